// Test doubles for the discovery capability and the node registry

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::Semaphore;

use crate::config::CrawlerConfig;
use crate::discovery::{Discovery, DiscoveryConnector, LocalNode};
use crate::error::{DiscoveryError, StoreError};
use crate::registry::{MemoryNodeStore, NodeStore, StoredNode};
use crate::types::{Node, NodeId, NodeRecord};

// =========================================================================
// HELPER FUNCTIONS
// =========================================================================

pub fn test_node(id: &str, last_octet: u8) -> Node {
    Node::parse(&format!("enode://{}@10.0.0.{}:30303", id, last_octet)).unwrap()
}

pub fn test_id(id: &str) -> NodeId {
    NodeId::parse(id).unwrap()
}

/// Config with fast rounds and no bootstrap set
pub fn fast_config() -> CrawlerConfig {
    CrawlerConfig::default()
        .with_bind_address("127.0.0.1:0")
        .with_round_interval_ms(20)
        .with_probe_timeout_ms(2_000)
}

/// Poll `check` until it holds or a second elapsed
pub async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

// =========================================================================
// DISCOVERY
// =========================================================================

/// Scripted discovery client.
///
/// Lookups pop scripted results and return nothing once the script runs
/// out. Pings answer for ids in the alive set. Pings or lookups can be
/// held on a gate.
#[derive(Default)]
pub struct MockDiscovery {
    lookups: Mutex<VecDeque<Result<Vec<Node>, DiscoveryError>>>,
    lookup_gate: Option<Semaphore>,
    lookups_started: AtomicUsize,
    alive: Mutex<HashSet<NodeId>>,
    gate: Option<Semaphore>,
    pinged: Mutex<Vec<NodeId>>,
    pings_started: AtomicUsize,
    closed: AtomicBool,
}

impl MockDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pings block until [`MockDiscovery::release`]
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    /// Lookups block until [`MockDiscovery::release`]
    pub fn gated_lookups() -> Self {
        Self {
            lookup_gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn push_lookup(&self, result: Result<Vec<Node>, DiscoveryError>) {
        self.lookups.lock().unwrap().push_back(result);
    }

    pub fn set_alive(&self, id: &NodeId) {
        self.alive.lock().unwrap().insert(id.clone());
    }

    pub fn release(&self) {
        for gate in [&self.gate, &self.lookup_gate].into_iter().flatten() {
            gate.add_permits(1024);
        }
    }

    pub fn lookups_started(&self) -> usize {
        self.lookups_started.load(Ordering::SeqCst)
    }

    pub fn pinged(&self) -> Vec<NodeId> {
        self.pinged.lock().unwrap().clone()
    }

    pub fn pings_started(&self) -> usize {
        self.pings_started.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Discovery for MockDiscovery {
    async fn lookup_random(&self) -> Result<Vec<Node>, DiscoveryError> {
        self.lookups_started.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.lookup_gate {
            gate.acquire().await.map_err(|_| DiscoveryError::Closed)?.forget();
        }

        self.lookups.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()))
    }

    async fn ping(&self, node: &Node) -> Result<bool, DiscoveryError> {
        self.pinged.lock().unwrap().push(node.id.clone());
        self.pings_started.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.acquire().await.map_err(|_| DiscoveryError::Closed)?.forget();
        }

        Ok(self.alive.lock().unwrap().contains(&node.id))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Client handed out by [`MockConnector`], sharing the scripted discovery
pub struct MockClient(pub Arc<MockDiscovery>);

#[async_trait]
impl Discovery for MockClient {
    async fn lookup_random(&self) -> Result<Vec<Node>, DiscoveryError> {
        self.0.lookup_random().await
    }

    async fn ping(&self, node: &Node) -> Result<bool, DiscoveryError> {
        self.0.ping(node).await
    }

    async fn close(&self) {
        self.0.close().await
    }
}

/// What the crawler passed to the connector
#[derive(Debug, Clone)]
pub struct Connection {
    pub local: LocalNode,
    pub bootnodes: Vec<Node>,
}

pub struct MockConnector {
    pub discovery: Arc<MockDiscovery>,
    pub fail: bool,
    pub connection: Arc<Mutex<Option<Connection>>>,
}

impl MockConnector {
    pub fn new(discovery: Arc<MockDiscovery>) -> Self {
        Self {
            discovery,
            fail: false,
            connection: Arc::new(Mutex::new(None)),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Arc::new(MockDiscovery::new()))
        }
    }
}

#[async_trait]
impl DiscoveryConnector for MockConnector {
    type Client = MockClient;

    async fn connect(
        &self,
        _socket: UdpSocket,
        local: LocalNode,
        bootnodes: Vec<Node>,
    ) -> Result<MockClient, DiscoveryError> {
        if self.fail {
            return Err(DiscoveryError::Protocol("handshake refused".to_string()));
        }

        *self.connection.lock().unwrap() = Some(Connection { local, bootnodes });
        Ok(MockClient(self.discovery.clone()))
    }
}

// =========================================================================
// REGISTRY
// =========================================================================

/// In-memory registry that counts writes and can be switched to failing
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryNodeStore,
    fail_writes: AtomicBool,
    upserts: AtomicUsize,
    flushed: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    /// Successful upserts so far
    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn was_flushed(&self) -> bool {
        self.flushed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn get(&self, id: &NodeId) -> Option<StoredNode> {
        self.inner.get(id)
    }
}

#[async_trait]
impl NodeStore for RecordingStore {
    async fn load_all(&self) -> Result<Vec<NodeRecord>, StoreError> {
        self.inner.load_all().await
    }

    async fn upsert(&self, record: &NodeRecord) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("disk detached".to_string()));
        }
        self.inner.upsert(record).await?;
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn flush(&self) -> Result<(), StoreError> {
        self.flushed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
