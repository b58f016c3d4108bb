//! Metrics Collection
//!
//! Counters for monitoring the crawl loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Metrics collector for the crawler
#[derive(Default)]
pub struct CrawlMetrics {
    /// Start time for uptime calculation
    start_time: Option<Instant>,

    /// Completed crawl rounds
    pub rounds: AtomicU64,

    /// Successful discovery lookups
    pub lookups_ok: AtomicU64,

    /// Failed discovery lookups
    pub lookups_failed: AtomicU64,

    /// Candidates seen for the first time
    pub nodes_added: AtomicU64,

    /// Probes answered
    pub probes_ok: AtomicU64,

    /// Probes failed or timed out
    pub probes_failed: AtomicU64,

    /// Registry writes that succeeded
    pub writes_ok: AtomicU64,

    /// Registry writes that failed and were queued for retry
    pub writes_failed: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub rounds: u64,
    pub lookups_ok: u64,
    pub lookups_failed: u64,
    pub nodes_added: u64,
    pub probes_ok: u64,
    pub probes_failed: u64,
    pub writes_ok: u64,
    pub writes_failed: u64,
}

impl CrawlMetrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    pub fn inc_rounds(&self) {
        self.rounds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_lookup(&self, ok: bool) {
        if ok {
            self.lookups_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.lookups_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn add_nodes(&self, count: u64) {
        self.nodes_added.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_probe(&self, alive: bool) {
        if alive {
            self.probes_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.probes_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn inc_write(&self, ok: bool) {
        if ok {
            self.writes_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.writes_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            rounds: self.rounds.load(Ordering::Relaxed),
            lookups_ok: self.lookups_ok.load(Ordering::Relaxed),
            lookups_failed: self.lookups_failed.load(Ordering::Relaxed),
            nodes_added: self.nodes_added.load(Ordering::Relaxed),
            probes_ok: self.probes_ok.load(Ordering::Relaxed),
            probes_failed: self.probes_failed.load(Ordering::Relaxed),
            writes_ok: self.writes_ok.load(Ordering::Relaxed),
            writes_failed: self.writes_failed.load(Ordering::Relaxed),
        }
    }
}
