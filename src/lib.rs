//! KratOs Network Crawler
//!
//! Background service that walks the node discovery overlay, re-validates
//! every node it learns about and keeps a scored registry of them.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   KRATOS NETWORK CRAWLER                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Orchestrator (svc)        ←── init / run / stop lifecycle  │
//! │  NetworkCrawler (crawler)  ←── binds UDP, owns the loop     │
//! │  CrawlScheduler            ←── lookup, merge, probe rounds  │
//! │  Discovery (external)      ←── random walks and pings       │
//! │  Registry + scoring        ←── working set, health rules    │
//! │  NodeStore (RocksDB/mem)   ←── persisted node documents     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Scoring
//!
//! - A successful probe raises the score by a fixed step, capped at a maximum
//! - A failed probe divides the score, flooring towards zero
//! - Nodes at score zero are probed on a long back-off interval

pub mod config;
pub mod crawler;
pub mod crypto;
pub mod discovery;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod svc;
pub mod types;

#[cfg(test)]
mod tests;

pub use config::{CrawlerConfig, ScoringConfig};
pub use crawler::{resolve_bootstrap, CrawlScheduler, NetworkCrawler, RoundReport};
pub use discovery::{Discovery, DiscoveryConnector, LocalNode};
pub use error::{ConfigError, CrawlerError, DiscoveryError, StoreError, TransportError};
pub use registry::{MemoryNodeStore, NodeStore, Registry, RocksNodeStore};
pub use svc::{Orchestrator, Service, ServiceEvent, ServiceState};
pub use types::{Node, NodeHealth, NodeId, NodeRecord};
