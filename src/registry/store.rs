//! Node Registry Storage
//!
//! The crawler only talks to the [`NodeStore`] interface. Two backends ship
//! with the crate: RocksDB for a persistent registry and an in-memory map
//! for an ephemeral one when no location is configured.

use async_trait::async_trait;
use rocksdb::{IteratorMode, Options, DB};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use super::document::StoredNode;
use crate::error::StoreError;
use crate::types::{NodeId, NodeRecord};

/// Key prefix for node entries
const PREFIX_NODE: &[u8] = b"node:";

/// Persistence interface of the node registry.
///
/// Upsert is keyed by node id and is the serialization point for updates of
/// a single node.
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Load every known node. Corrupt entries are skipped and logged.
    async fn load_all(&self) -> Result<Vec<NodeRecord>, StoreError>;

    /// Insert or replace the record with the same id
    async fn upsert(&self, record: &NodeRecord) -> Result<(), StoreError>;

    /// Flush buffered writes to durable storage
    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Open the registry: RocksDB at `path`, or an in-memory store if absent
pub fn open_store(path: Option<&Path>) -> Result<Arc<dyn NodeStore>, StoreError> {
    match path {
        Some(path) => {
            let store = RocksNodeStore::open(path)?;
            info!("📦 Node registry opened at {:?}", path);
            Ok(Arc::new(store))
        }
        None => {
            info!("📦 No registry path configured, using in-memory node registry");
            Ok(Arc::new(MemoryNodeStore::new()))
        }
    }
}

// =============================================================================
// ROCKSDB
// =============================================================================

/// Node registry backed by RocksDB.
///
/// Disk access runs on the blocking thread pool, off the crawl task.
pub struct RocksNodeStore {
    db: Arc<DB>,
}

impl RocksNodeStore {
    /// Open or create a node registry at the given path
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(100);
        opts.set_keep_log_file_num(3);

        let db = DB::open(&opts, path)?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Store a raw value under a node key, bypassing encoding
    #[cfg(test)]
    pub(crate) fn put_raw(&self, id: &str, value: &[u8]) -> Result<(), StoreError> {
        self.db.put(node_key_str(id), value)?;
        Ok(())
    }

    /// Run a database operation on the blocking pool
    async fn blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&DB) -> Result<T, StoreError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| StoreError::Unavailable(format!("registry task failed: {}", e)))?
    }
}

/// Decode every node entry, skipping corrupt ones
fn scan_nodes(db: &DB) -> Result<(Vec<NodeRecord>, usize), StoreError> {
    let mut records = Vec::new();
    let mut skipped = 0usize;

    let iter = db.iterator(IteratorMode::From(PREFIX_NODE, rocksdb::Direction::Forward));

    for item in iter {
        let (key, value) = item?;

        // Check if this is a node entry
        if !key.starts_with(PREFIX_NODE) {
            break;
        }

        let key_str = String::from_utf8_lossy(&key[PREFIX_NODE.len()..]).into_owned();
        match StoredNode::decode(&key_str, &value) {
            Ok(record) => records.push(record),
            Err(e) => {
                skipped += 1;
                warn!("Skipping registry entry: {}", e);
            }
        }
    }

    Ok((records, skipped))
}

#[async_trait]
impl NodeStore for RocksNodeStore {
    async fn load_all(&self) -> Result<Vec<NodeRecord>, StoreError> {
        let (records, skipped) = self.blocking(scan_nodes).await?;

        info!("📦 Loaded {} nodes from registry ({} corrupt skipped)", records.len(), skipped);
        Ok(records)
    }

    async fn upsert(&self, record: &NodeRecord) -> Result<(), StoreError> {
        let key = node_key(record.id());
        let value = StoredNode::from_record(record).encode()?;

        self.blocking(move |db| {
            db.put(key, value)?;
            Ok(())
        })
        .await
    }

    async fn flush(&self) -> Result<(), StoreError> {
        self.blocking(|db| {
            db.flush()?;
            Ok(())
        })
        .await
    }
}

/// Create storage key for a node
fn node_key(id: &NodeId) -> Vec<u8> {
    node_key_str(id.as_str())
}

fn node_key_str(id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(PREFIX_NODE.len() + id.len());
    key.extend_from_slice(PREFIX_NODE);
    key.extend_from_slice(id.as_bytes());
    key
}

// =============================================================================
// IN-MEMORY
// =============================================================================

/// Ephemeral node registry living for the process lifetime
#[derive(Default)]
pub struct MemoryNodeStore {
    docs: Mutex<HashMap<NodeId, StoredNode>>,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored nodes
    pub fn len(&self) -> usize {
        self.docs.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored document of a node
    pub fn get(&self, id: &NodeId) -> Option<StoredNode> {
        self.docs.lock().ok()?.get(id).cloned()
    }
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
    async fn load_all(&self) -> Result<Vec<NodeRecord>, StoreError> {
        let docs = self
            .docs
            .lock()
            .map_err(|_| StoreError::Unavailable("registry lock poisoned".to_string()))?;

        let mut records = Vec::with_capacity(docs.len());
        for (id, doc) in docs.iter() {
            match doc.clone().into_record() {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping registry entry {}: {}", id.short(), e),
            }
        }
        Ok(records)
    }

    async fn upsert(&self, record: &NodeRecord) -> Result<(), StoreError> {
        let mut docs = self
            .docs
            .lock()
            .map_err(|_| StoreError::Unavailable("registry lock poisoned".to_string()))?;
        docs.insert(record.id().clone(), StoredNode::from_record(record));
        Ok(())
    }
}
