//! Crawler error taxonomy
//!
//! Startup errors (configuration, transport, registry open) are fatal and keep
//! the service from ever running. Steady-state errors (discovery, persistence)
//! are absorbed by the crawl loop and only logged.

use std::net::SocketAddr;

/// Bad configuration input. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("Invalid bootstrap url [{url}]: {reason}")]
    InvalidBootstrapUrl { url: String, reason: String },

    #[error("Invalid bind address [{0}]")]
    InvalidBindAddress(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// The discovery socket could not be opened. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Can not open discovery socket at {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Can not start discovery protocol: {0}")]
    Protocol(#[from] DiscoveryError),
}

/// A lookup or ping failed. Transient.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Discovery transport error: {0}")]
    Transport(String),

    #[error("Discovery protocol error: {0}")]
    Protocol(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Discovery client closed")]
    Closed,
}

/// Registry persistence failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backing store unavailable; transient, retried on the next upsert.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Malformed stored data; the record is skipped while loading.
    #[error("Corrupt record [{key}]: {reason}")]
    CorruptRecord { key: String, reason: String },

    #[error("Record encoding failed: {0}")]
    Encode(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Top level error returned by the service lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum CrawlerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Service {0} is not ready and will not run")]
    NotReady(&'static str),
}
