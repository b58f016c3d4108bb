//! Crawl Scheduler
//!
//! Repeats crawl rounds until stopped:
//!
//! 1. Retry registry writes that failed in earlier rounds
//! 2. Random walk lookup, at most `lookup_budget` candidates accepted
//! 3. Merge candidates into the working set
//! 4. Probe the least recently checked due nodes, `probe_concurrency` at a time
//! 5. Score each result and upsert it
//! 6. Sleep until the next round
//!
//! A stop observed during the sleep or the lookup ends the loop immediately.
//! A stop observed while a batch is in flight lets the batch drain first.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{CrawlerConfig, ScoringConfig};
use crate::crypto;
use crate::discovery::Discovery;
use crate::metrics::CrawlMetrics;
use crate::registry::scoring::{self, ProbeOutcome};
use crate::registry::{MergeResult, NodeStore, Registry};
use crate::types::{Node, NodeId, NodeRecord};

/// Summary of one crawl round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundReport {
    /// Whether the lookup succeeded
    pub lookup_ok: bool,

    /// Candidates seen for the first time
    pub added: usize,

    /// Nodes probed
    pub probed: usize,

    /// Probes answered
    pub alive: usize,

    /// Upserts that failed and were queued for retry
    pub write_failures: usize,

    /// Stop was observed before the batch was dispatched
    pub interrupted: bool,
}

/// Result of one probe, bookkeeping applied
struct ProbeResult {
    record: NodeRecord,
    alive: bool,
    persisted: bool,
}

/// Crawl loop owning the working set and the discovery client
pub struct CrawlScheduler<D: Discovery> {
    discovery: Arc<D>,
    store: Arc<dyn NodeStore>,
    registry: Registry,
    bootnodes: Vec<Node>,
    local_id: NodeId,
    metrics: Arc<CrawlMetrics>,

    probe_concurrency: usize,
    lookup_budget: usize,
    round_interval: Duration,
    probe_timeout: Duration,
    stall_rounds: u32,

    /// Records whose last upsert failed
    pending_writes: HashSet<NodeId>,

    /// Consecutive rounds without a new candidate
    idle_rounds: u32,
}

impl<D: Discovery + 'static> CrawlScheduler<D> {
    /// Create the scheduler over the records loaded from the registry.
    ///
    /// An empty registry is seeded with the bootstrap nodes.
    pub fn new(
        discovery: Arc<D>,
        store: Arc<dyn NodeStore>,
        records: Vec<NodeRecord>,
        bootnodes: Vec<Node>,
        local_id: NodeId,
        config: &CrawlerConfig,
        metrics: Arc<CrawlMetrics>,
    ) -> Self {
        let mut scheduler = Self {
            discovery,
            store,
            registry: Registry::from_records(records, config.scoring.clone()),
            bootnodes,
            local_id,
            metrics,
            probe_concurrency: config.probe_concurrency.max(1),
            lookup_budget: config.lookup_budget,
            round_interval: config.round_interval(),
            probe_timeout: config.probe_timeout(),
            stall_rounds: config.stall_rounds,
            pending_writes: HashSet::new(),
            idle_rounds: 0,
        };

        if scheduler.registry.is_empty() {
            let seeded = scheduler.seed_bootnodes();
            info!("🌱 Registry empty, seeded {} bootstrap nodes", seeded);
        }

        scheduler
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Number of records waiting for a registry write retry
    pub fn pending_writes(&self) -> usize {
        self.pending_writes.len()
    }

    /// Run rounds until `cancel` fires, then release the discovery client
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            nodes = self.registry.len(),
            concurrency = self.probe_concurrency,
            lookup_budget = self.lookup_budget,
            "🕸️  Network crawl started"
        );

        while !cancel.is_cancelled() {
            let report = self.run_round(&cancel).await;
            if report.interrupted || cancel.is_cancelled() {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.round_interval) => {}
            }
        }

        self.shutdown().await;
    }

    /// Execute one crawl round
    pub async fn run_round(&mut self, cancel: &CancellationToken) -> RoundReport {
        let mut report = RoundReport::default();

        self.retry_pending_writes().await;

        // lookup can be abandoned, nothing is applied yet
        let lookup = tokio::select! {
            _ = cancel.cancelled() => {
                report.interrupted = true;
                return report;
            }
            result = self.discovery.lookup_random() => result,
        };

        let candidates = match lookup {
            Ok(nodes) => {
                report.lookup_ok = true;
                nodes
            }
            Err(e) => {
                warn!("Discovery lookup failed, skipping candidates this round: {}", e);
                Vec::new()
            }
        };
        self.metrics.inc_lookup(report.lookup_ok);

        report.added = self.merge_candidates(candidates);
        self.metrics.add_nodes(report.added as u64);
        self.track_stall(report.added);

        if cancel.is_cancelled() {
            report.interrupted = true;
            return report;
        }

        let batch = self.registry.select_batch(Utc::now(), self.probe_concurrency);
        report.probed = batch.len();

        // the batch always completes, stop or not
        for result in self.probe_batch(batch).await {
            if result.alive {
                report.alive += 1;
            }
            if result.persisted {
                self.pending_writes.remove(result.record.id());
            } else {
                report.write_failures += 1;
                self.pending_writes.insert(result.record.id().clone());
            }
            self.registry.update(result.record);
        }

        self.metrics.inc_rounds();
        self.log_round(&report);
        report
    }

    /// Merge lookup candidates; returns how many ids were new
    fn merge_candidates(&mut self, candidates: Vec<Node>) -> usize {
        let now = Utc::now();
        let mut added = 0;

        for candidate in candidates.into_iter().take(self.lookup_budget) {
            if candidate.id == self.local_id {
                continue;
            }

            if let Some(record) = &candidate.record {
                if record.id != candidate.id || crypto::verify_record(record).is_err() {
                    debug!("Dropping candidate {} with invalid record", candidate.id.short());
                    continue;
                }
            }

            match self.registry.merge(&candidate, now) {
                MergeResult::Added => {
                    debug!("🆕 Found node {}", candidate);
                    added += 1;
                }
                MergeResult::Refreshed => {
                    debug!("Node {} advertised a newer record", candidate.id.short());
                }
                MergeResult::Known => {}
            }
        }

        added
    }

    /// Count idle rounds and re-add bootstrap nodes when the walk stalls
    fn track_stall(&mut self, added: usize) {
        if added > 0 {
            self.idle_rounds = 0;
            return;
        }

        self.idle_rounds += 1;
        if self.stall_rounds > 0 && self.idle_rounds >= self.stall_rounds {
            let seeded = self.seed_bootnodes();
            if seeded > 0 {
                info!("🌱 Walk stalled for {} rounds, re-seeded {} bootstrap nodes", self.idle_rounds, seeded);
            }
            self.idle_rounds = 0;
        }
    }

    /// Merge bootstrap nodes missing from the working set
    fn seed_bootnodes(&mut self) -> usize {
        let now = Utc::now();
        let bootnodes = self.bootnodes.clone();

        bootnodes
            .iter()
            .filter(|node| node.id != self.local_id)
            .filter(|node| self.registry.merge(node, now) == MergeResult::Added)
            .count()
    }

    /// Probe a batch concurrently, each probe scoring and persisting its node
    async fn probe_batch(&self, batch: Vec<NodeRecord>) -> Vec<ProbeResult> {
        let scoring = self.registry.scoring().clone();

        stream::iter(batch)
            .map(|record| {
                probe_node(
                    self.discovery.clone(),
                    self.store.clone(),
                    self.metrics.clone(),
                    record,
                    self.probe_timeout,
                    scoring.clone(),
                )
            })
            .buffer_unordered(self.probe_concurrency)
            .collect()
            .await
    }

    /// Upsert records whose previous write failed
    async fn retry_pending_writes(&mut self) {
        if self.pending_writes.is_empty() {
            return;
        }

        let ids: Vec<NodeId> = self.pending_writes.iter().cloned().collect();
        let mut recovered = 0;

        for id in ids {
            let Some(record) = self.registry.get(&id) else {
                self.pending_writes.remove(&id);
                continue;
            };

            match self.store.upsert(record).await {
                Ok(()) => {
                    self.metrics.inc_write(true);
                    self.pending_writes.remove(&id);
                    recovered += 1;
                }
                Err(e) => {
                    self.metrics.inc_write(false);
                    debug!("Registry write for {} still failing: {}", id.short(), e);
                }
            }
        }

        if recovered > 0 {
            info!("📦 Persisted {} previously failed node updates", recovered);
        }
    }

    /// Final bookkeeping once the loop ended
    async fn shutdown(&mut self) {
        self.retry_pending_writes().await;
        if !self.pending_writes.is_empty() {
            warn!("{} node updates could not be persisted before shutdown", self.pending_writes.len());
        }

        if let Err(e) = self.store.flush().await {
            warn!("Failed to flush node registry: {}", e);
        }

        // closes the transport too
        self.discovery.close().await;
        info!("🕸️  Network crawl stopped, {} nodes known", self.registry.len());
    }

    fn log_round(&self, report: &RoundReport) {
        let stats = self.registry.stats(Utc::now());
        info!(
            "📊 Crawl: {} nodes ({} healthy, {} degraded, {} stale), +{} new, {}/{} probes ok, avg score {:.1}",
            stats.total_nodes,
            stats.healthy,
            stats.degraded,
            stats.stale,
            report.added,
            report.alive,
            report.probed,
            stats.average_score
        );
        if report.write_failures > 0 {
            warn!("{} node updates not persisted, retrying next round", report.write_failures);
        }
    }
}

/// Ping one node, apply the scoring rule and persist the result
async fn probe_node<D: Discovery>(
    discovery: Arc<D>,
    store: Arc<dyn NodeStore>,
    metrics: Arc<CrawlMetrics>,
    mut record: NodeRecord,
    timeout: Duration,
    scoring: ScoringConfig,
) -> ProbeResult {
    let outcome = match tokio::time::timeout(timeout, discovery.ping(record.node())).await {
        Ok(Ok(true)) => ProbeOutcome::Alive,
        Ok(Ok(false)) => {
            debug!("Node {} rejected ping", record.id().short());
            ProbeOutcome::Failed
        }
        Ok(Err(e)) => {
            debug!("Ping to {} failed: {}", record.id().short(), e);
            ProbeOutcome::Failed
        }
        Err(_) => {
            debug!("Ping to {} timed out", record.id().short());
            ProbeOutcome::Failed
        }
    };

    scoring::apply_probe(&mut record, outcome, Utc::now(), &scoring);
    let alive = outcome == ProbeOutcome::Alive;
    metrics.inc_probe(alive);

    let persisted = match store.upsert(&record).await {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to persist node {}: {}", record.id().short(), e);
            false
        }
    };
    metrics.inc_write(persisted);

    ProbeResult {
        record,
        alive,
        persisted,
    }
}
