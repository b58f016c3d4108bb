//! Discovery Capability
//!
//! The node discovery wire protocol is provided by an external library. The
//! crawler sees it through two seams:
//!
//! - [`DiscoveryConnector`] starts the protocol on a socket the crawler opened
//! - [`Discovery`] is the running client: random walk lookups, pings, close
//!
//! ## Startup
//!
//! 1. Crawler binds the UDP socket at the configured address
//! 2. Crawler signs its local node record for the bound endpoint
//! 3. Connector starts the protocol with socket, local node and bootstrap set

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tracing::info;

use crate::crypto;
use crate::error::{DiscoveryError, TransportError};
use crate::types::{Endpoint, Node, NodeId, SignedRecord};

/// Running discovery client
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Random walk of the overlay returning nodes near a random target
    async fn lookup_random(&self) -> Result<Vec<Node>, DiscoveryError>;

    /// Liveness check of a node; `Ok(false)` is an explicit rejection
    async fn ping(&self, node: &Node) -> Result<bool, DiscoveryError>;

    /// Stop the protocol and close the underlying transport
    async fn close(&self);
}

/// Starts the discovery protocol on an opened socket
#[async_trait]
pub trait DiscoveryConnector: Send + Sync {
    type Client: Discovery + 'static;

    async fn connect(
        &self,
        socket: UdpSocket,
        local: LocalNode,
        bootnodes: Vec<Node>,
    ) -> Result<Self::Client, DiscoveryError>;
}

/// The crawler's own node: identity plus the signed record it advertises
#[derive(Clone)]
pub struct LocalNode {
    keypair: SigningKey,
    record: SignedRecord,
}

impl LocalNode {
    /// Sign a fresh record for the given endpoint
    pub fn new(keypair: SigningKey, endpoint: Endpoint) -> Self {
        let record = crypto::sign_record(&keypair, 1, endpoint);
        Self { keypair, record }
    }

    pub fn id(&self) -> &NodeId {
        &self.record.id
    }

    pub fn record(&self) -> &SignedRecord {
        &self.record
    }

    pub fn node(&self) -> Node {
        self.record.node()
    }

    pub fn keypair(&self) -> &SigningKey {
        &self.keypair
    }

    /// Move to a new endpoint, re-signing with a bumped sequence number
    pub fn set_endpoint(&mut self, endpoint: Endpoint) {
        self.record = crypto::sign_record(&self.keypair, self.record.seq + 1, endpoint);
    }
}

impl std::fmt::Debug for LocalNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNode")
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

/// Endpoint advertised for a bound socket; unspecified IPs fall back to loopback
pub fn advertised_endpoint(bound: SocketAddr) -> Endpoint {
    let ip = if bound.ip().is_unspecified() {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        bound.ip()
    };
    Endpoint::new(ip, bound.port())
}

/// Open the discovery socket and build the local node for it
pub async fn listen(bind: SocketAddr, keypair: SigningKey) -> Result<(UdpSocket, LocalNode), TransportError> {
    let socket = UdpSocket::bind(bind)
        .await
        .map_err(|source| TransportError::Bind { addr: bind, source })?;

    let bound = socket
        .local_addr()
        .map_err(|source| TransportError::Bind { addr: bind, source })?;

    let local = LocalNode::new(keypair, advertised_endpoint(bound));
    info!("📡 Discovery socket bound at {}, local node {}", bound, local.node());

    Ok((socket, local))
}
