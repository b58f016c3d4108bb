//! Crawler Configuration
//!
//! Configurable parameters for the network crawler. The configuration is
//! built once by the embedding application and handed to the crawler's
//! constructor; nothing reads it from global state.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Upper bound for any scoring interval: 10 years
pub const MAX_INTERVAL_SECS: u64 = 10 * 365 * 24 * 3600;

/// Scoring constants for the node health state machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Score of a newly found node
    pub initial_score: u32,

    /// Upper bound of the score
    pub max_score: u32,

    /// Score bonus for a successful probe
    pub success_increment: u32,

    /// The score is divided by this on a failed probe
    pub failure_divisor: u32,

    /// Minimum score of a healthy node
    pub healthy_threshold: u32,

    /// Minimum time between two probes of a live node (seconds)
    pub min_probe_interval_secs: u64,

    /// Minimum time between two probes of a zero-score node (seconds)
    pub backoff_interval_secs: u64,

    /// Time without check or response after which a node is stale (seconds)
    pub stale_after_secs: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            initial_score: 1,
            max_score: 100,
            success_increment: 1,
            failure_divisor: 2,
            healthy_threshold: 3,
            min_probe_interval_secs: 300,   // 5 minutes
            backoff_interval_secs: 3600,    // 1 hour
            stale_after_secs: 86400,        // 1 day
        }
    }
}

/// Main configuration for the network crawler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    // === Network ===

    /// Local bind address of the discovery transport (host:port)
    pub bind_address: String,

    /// Hex encoded Ed25519 secret key; a new one is generated if absent
    pub private_key: Option<String>,

    /// Bootstrap node addresses (`enode://<id>@<ip>:<port>`)
    pub bootstrap: Vec<String>,

    // === Storage ===

    /// Node registry location; absent means an in-memory registry
    pub db_path: Option<PathBuf>,

    // === Crawl ===

    /// Maximum number of simultaneous probes
    pub probe_concurrency: usize,

    /// Maximum number of candidates accepted per lookup round
    pub lookup_budget: usize,

    /// Pause between crawl rounds (milliseconds)
    pub round_interval_ms: u64,

    /// Deadline of a single probe (milliseconds)
    pub probe_timeout_ms: u64,

    /// Rounds without new candidates before bootstrap nodes are re-added
    pub stall_rounds: u32,

    // === Scoring ===

    pub scoring: ScoringConfig,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            // Network
            bind_address: "0.0.0.0:30305".to_string(),
            private_key: None,
            bootstrap: vec![],

            // Storage
            db_path: None,

            // Crawl
            probe_concurrency: 16,
            lookup_budget: 32,
            round_interval_ms: 10_000,  // 10 seconds
            probe_timeout_ms: 5_000,    // 5 seconds
            stall_rounds: 3,

            scoring: ScoringConfig::default(),
        }
    }
}

impl CrawlerConfig {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    // Builder-style methods for overrides

    pub fn with_bind_address(mut self, addr: impl Into<String>) -> Self {
        self.bind_address = addr.into();
        self
    }

    pub fn with_private_key(mut self, key: Option<String>) -> Self {
        self.private_key = key;
        self
    }

    pub fn with_bootstrap(mut self, urls: Vec<String>) -> Self {
        self.bootstrap = urls;
        self
    }

    pub fn with_db_path(mut self, path: Option<PathBuf>) -> Self {
        self.db_path = path;
        self
    }

    pub fn with_probe_concurrency(mut self, n: usize) -> Self {
        self.probe_concurrency = n;
        self
    }

    pub fn with_lookup_budget(mut self, n: usize) -> Self {
        self.lookup_budget = n;
        self
    }

    pub fn with_round_interval_ms(mut self, ms: u64) -> Self {
        self.round_interval_ms = ms;
        self
    }

    pub fn with_probe_timeout_ms(mut self, ms: u64) -> Self {
        self.probe_timeout_ms = ms;
        self
    }

    pub fn with_scoring(mut self, scoring: ScoringConfig) -> Self {
        self.scoring = scoring;
        self
    }

    pub fn round_interval(&self) -> Duration {
        Duration::from_millis(self.round_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Parse the bind address
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_address
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddress(self.bind_address.clone()))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;

        if self.probe_concurrency == 0 {
            return Err(ConfigError::Invalid("probe_concurrency must be at least 1".to_string()));
        }

        if self.lookup_budget == 0 {
            return Err(ConfigError::Invalid("lookup_budget must be at least 1".to_string()));
        }

        if self.probe_timeout_ms == 0 {
            return Err(ConfigError::Invalid("probe_timeout_ms must be positive".to_string()));
        }

        let scoring = &self.scoring;

        if scoring.initial_score > scoring.max_score {
            return Err(ConfigError::Invalid(format!(
                "initial_score ({}) must not exceed max_score ({})",
                scoring.initial_score, scoring.max_score
            )));
        }

        if scoring.failure_divisor < 2 {
            return Err(ConfigError::Invalid(format!(
                "failure_divisor ({}) must be at least 2",
                scoring.failure_divisor
            )));
        }

        if scoring.success_increment == 0 {
            return Err(ConfigError::Invalid("success_increment must be positive".to_string()));
        }

        for (name, secs) in [
            ("min_probe_interval_secs", scoring.min_probe_interval_secs),
            ("backoff_interval_secs", scoring.backoff_interval_secs),
            ("stale_after_secs", scoring.stale_after_secs),
        ] {
            if secs > MAX_INTERVAL_SECS {
                return Err(ConfigError::Invalid(format!(
                    "{} ({}) exceeds the maximum of {} seconds",
                    name, secs, MAX_INTERVAL_SECS
                )));
            }
        }

        if scoring.backoff_interval_secs < scoring.min_probe_interval_secs {
            return Err(ConfigError::Invalid(format!(
                "backoff_interval_secs ({}) must not be shorter than min_probe_interval_secs ({})",
                scoring.backoff_interval_secs, scoring.min_probe_interval_secs
            )));
        }

        Ok(())
    }
}
