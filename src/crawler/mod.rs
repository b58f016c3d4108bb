//! Network Crawler Service
//!
//! Discovers peers of the overlay and keeps re-validating them, maintaining
//! a scored registry of known nodes.
//!
//! ## Lifecycle
//!
//! - `init`: resolve identity, bootstrap set and registry. Any failure is
//!   critical and leaves the crawler inert.
//! - `run`: open the discovery socket, start the protocol, notify the
//!   orchestrator and spawn the crawl loop.
//! - `stop`: cancel; the loop drains its current batch, closes discovery and
//!   reports finished.

mod bootstrap;
mod scheduler;

pub use bootstrap::resolve_bootstrap;
pub use scheduler::{CrawlScheduler, RoundReport};

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::CrawlerConfig;
use crate::crypto;
use crate::discovery::{self, DiscoveryConnector, LocalNode};
use crate::error::{CrawlerError, TransportError};
use crate::metrics::CrawlMetrics;
use crate::registry::{open_store, NodeStore};
use crate::svc::{EventSender, Service, ServiceEvent, ServiceState, StateCell};
use crate::types::{Node, NodeRecord};

/// Service name reported to the orchestrator
pub const SERVICE_NAME: &str = "network crawler";

/// Everything `init` resolved for `run`
struct Prepared {
    keypair: SigningKey,
    bind: SocketAddr,
    bootnodes: Vec<Node>,
    store: Arc<dyn NodeStore>,
    records: Vec<NodeRecord>,
}

/// The network crawler background service
pub struct NetworkCrawler<C: DiscoveryConnector> {
    config: CrawlerConfig,
    connector: C,

    /// Externally provided registry, used instead of opening one
    store: Option<Arc<dyn NodeStore>>,

    state: StateCell,
    cancel: CancellationToken,
    metrics: Arc<CrawlMetrics>,
    prepared: Option<Prepared>,
    local: Option<LocalNode>,
}

impl<C: DiscoveryConnector> NetworkCrawler<C> {
    pub fn new(config: CrawlerConfig, connector: C) -> Self {
        Self {
            config,
            connector,
            store: None,
            state: StateCell::new(),
            cancel: CancellationToken::new(),
            metrics: Arc::new(CrawlMetrics::new()),
            prepared: None,
            local: None,
        }
    }

    /// Use the given registry instead of the configured location
    pub fn with_store(mut self, store: Arc<dyn NodeStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn metrics(&self) -> Arc<CrawlMetrics> {
        self.metrics.clone()
    }

    pub fn state_cell(&self) -> &StateCell {
        &self.state
    }

    /// Local node, once the crawler runs
    pub fn local_node(&self) -> Option<&LocalNode> {
        self.local.as_ref()
    }

    /// Resolve identity, bootstrap set and registry
    async fn configure(&self) -> Result<Prepared, CrawlerError> {
        self.config.validate()?;
        let bind = self.config.bind_addr()?;

        let keypair = crypto::resolve_identity(self.config.private_key.as_deref())?;
        let bootnodes = resolve_bootstrap(&self.config.bootstrap)?;

        let store = match &self.store {
            Some(store) => store.clone(),
            None => open_store(self.config.db_path.as_deref())?,
        };
        let records = store.load_all().await?;

        info!(
            "⚙️  Crawler configured: bind {}, {} bootstrap nodes, {} known nodes",
            bind,
            bootnodes.len(),
            records.len()
        );

        Ok(Prepared {
            keypair,
            bind,
            bootnodes,
            store,
            records,
        })
    }

    fn fail(&self, err: CrawlerError) -> Result<(), CrawlerError> {
        error!("💥 Critical: network crawler will not run; {}", err);
        self.state.set(ServiceState::Failed);
        Err(err)
    }
}

#[async_trait]
impl<C: DiscoveryConnector + 'static> Service for NetworkCrawler<C> {
    fn name(&self) -> &'static str {
        SERVICE_NAME
    }

    fn state(&self) -> ServiceState {
        self.state.get()
    }

    async fn init(&mut self) -> Result<(), CrawlerError> {
        self.state.set(ServiceState::Configuring);

        match self.configure().await {
            Ok(prepared) => {
                self.prepared = Some(prepared);
                self.state.set(ServiceState::Ready);
                Ok(())
            }
            Err(e) => self.fail(e),
        }
    }

    async fn run(&mut self, events: EventSender) -> Result<(), CrawlerError> {
        let prepared = match (self.state.get(), self.prepared.take()) {
            (ServiceState::Ready, Some(prepared)) => prepared,
            _ => {
                error!("💥 Critical: network crawler not ready and will not run");
                return Err(CrawlerError::NotReady(SERVICE_NAME));
            }
        };

        let (socket, local) = match discovery::listen(prepared.bind, prepared.keypair).await {
            Ok(opened) => opened,
            Err(e) => return self.fail(e.into()),
        };

        let client = match self
            .connector
            .connect(socket, local.clone(), prepared.bootnodes.clone())
            .await
        {
            Ok(client) => Arc::new(client),
            Err(e) => return self.fail(TransportError::Protocol(e).into()),
        };

        let scheduler = CrawlScheduler::new(
            client,
            prepared.store,
            prepared.records,
            prepared.bootnodes,
            local.id().clone(),
            &self.config,
            self.metrics.clone(),
        );
        self.local = Some(local);

        // signal orchestrator we started and go
        self.state.set(ServiceState::Running);
        let _ = events.send(ServiceEvent::Started(SERVICE_NAME));

        let cancel = self.cancel.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            scheduler.run(cancel).await;

            state.set(ServiceState::Stopped);
            let _ = events.send(ServiceEvent::Finished(SERVICE_NAME));
        });

        Ok(())
    }

    fn stop(&self) {
        if self.cancel.is_cancelled() {
            return;
        }

        if self.state.get() == ServiceState::Running {
            self.state.set(ServiceState::Stopping);
        }
        self.cancel.cancel();
        info!("🛑 Network crawler stop requested");
    }
}
