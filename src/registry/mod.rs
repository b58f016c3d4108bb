//! Node Registry Module
//!
//! Keeps the crawler's in-memory working set of known nodes and persists
//! each node's health metadata through a [`NodeStore`].

mod document;
pub mod scoring;
mod store;

pub use document::{StoredNode, RECORD_SCHEME};
pub use store::{open_store, MemoryNodeStore, NodeStore, RocksNodeStore};

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::config::ScoringConfig;
use crate::types::{Node, NodeHealth, NodeId, NodeRecord};

/// Result of merging a discovery candidate into the working set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeResult {
    /// First time this id was seen
    Added,

    /// Known id, advertised record replaced by a newer one
    Refreshed,

    /// Known id, nothing changed
    Known,
}

/// Registry statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryStats {
    /// Total nodes in the working set
    pub total_nodes: usize,

    pub healthy: usize,

    pub degraded: usize,

    pub stale: usize,

    /// Nodes never probed yet
    pub unchecked: usize,

    /// Average node score
    pub average_score: f64,
}

/// In-memory working set of known nodes, keyed by id
pub struct Registry {
    nodes: HashMap<NodeId, NodeRecord>,
    scoring: ScoringConfig,
}

impl Registry {
    pub fn new(scoring: ScoringConfig) -> Self {
        Self {
            nodes: HashMap::new(),
            scoring,
        }
    }

    /// Build the working set from records loaded out of the store
    pub fn from_records(records: Vec<NodeRecord>, scoring: ScoringConfig) -> Self {
        let mut registry = Self::new(scoring);
        for record in records {
            registry.nodes.insert(record.id().clone(), record);
        }
        registry
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &NodeId) -> Option<&NodeRecord> {
        self.nodes.get(id)
    }

    pub fn records(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.values()
    }

    pub fn scoring(&self) -> &ScoringConfig {
        &self.scoring
    }

    /// Merge a candidate node; unseen ids become new records found at `now`
    pub fn merge(&mut self, candidate: &Node, now: DateTime<Utc>) -> MergeResult {
        match self.nodes.get_mut(&candidate.id) {
            Some(existing) => {
                if existing.refresh_node(candidate) {
                    MergeResult::Refreshed
                } else {
                    MergeResult::Known
                }
            }
            None => {
                let record = NodeRecord::discovered(candidate.advertised(), self.scoring.initial_score, now);
                self.nodes.insert(candidate.id.clone(), record);
                MergeResult::Added
            }
        }
    }

    /// Pick up to `limit` due nodes, least recently checked first.
    ///
    /// Never checked nodes come first; ties are broken by discovery time
    /// and then id so the order is deterministic.
    pub fn select_batch(&self, now: DateTime<Utc>, limit: usize) -> Vec<NodeRecord> {
        let mut due: Vec<&NodeRecord> = self
            .nodes
            .values()
            .filter(|r| scoring::is_due(r, now, &self.scoring))
            .collect();

        due.sort_by(|a, b| {
            a.last_check()
                .cmp(&b.last_check())
                .then_with(|| a.found().cmp(&b.found()))
                .then_with(|| a.id().cmp(b.id()))
        });

        due.into_iter().take(limit).cloned().collect()
    }

    /// Write a probed record back into the working set
    pub fn update(&mut self, record: NodeRecord) {
        self.nodes.insert(record.id().clone(), record);
    }

    /// Get registry statistics
    pub fn stats(&self, now: DateTime<Utc>) -> RegistryStats {
        let mut stats = RegistryStats {
            total_nodes: self.nodes.len(),
            ..Default::default()
        };

        let mut score_sum = 0u64;
        for record in self.nodes.values() {
            score_sum += record.score() as u64;
            if record.last_check().is_none() {
                stats.unchecked += 1;
            }
            match scoring::health(record, now, &self.scoring) {
                NodeHealth::Healthy => stats.healthy += 1,
                NodeHealth::Degraded => stats.degraded += 1,
                NodeHealth::Stale => stats.stale += 1,
            }
        }

        if !self.nodes.is_empty() {
            stats.average_score = score_sum as f64 / self.nodes.len() as f64;
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SignedRecord;
    use chrono::Duration;

    fn test_node(id: &str, last_octet: u8) -> Node {
        Node::parse(&format!("enode://{}@10.0.0.{}:30303", id, last_octet)).unwrap()
    }

    #[test]
    fn test_merge_new_and_known() {
        let mut registry = Registry::new(ScoringConfig::default());
        let now = Utc::now();

        assert_eq!(registry.merge(&test_node("aa", 1), now), MergeResult::Added);
        assert_eq!(registry.merge(&test_node("aa", 1), now), MergeResult::Known);
        assert_eq!(registry.len(), 1);

        let record = registry.get(&NodeId::parse("aa").unwrap()).unwrap();
        assert_eq!(record.score(), ScoringConfig::default().initial_score);
        assert_eq!(record.found(), now);
        assert!(record.last_response().is_none());
        assert!(record.last_check().is_none());
    }

    #[test]
    fn test_merge_does_not_touch_score() {
        let mut registry = Registry::new(ScoringConfig::default());
        let now = Utc::now();
        registry.merge(&test_node("aa", 1), now);

        let signed = SignedRecord {
            seq: 5,
            id: NodeId::parse("aa").unwrap(),
            ip: "10.0.0.9".parse().unwrap(),
            udp_port: 30301,
            tcp_port: 30303,
            signature: [0u8; 64],
        };
        let later = now + Duration::seconds(60);
        assert_eq!(registry.merge(&signed.node(), later), MergeResult::Refreshed);

        let record = registry.get(&signed.id).unwrap();
        assert_eq!(record.found(), now);
        assert_eq!(record.node().endpoint.udp_port, 30301);
    }

    #[test]
    fn test_merge_keeps_signed_endpoint() {
        let mut registry = Registry::new(ScoringConfig::default());
        let keypair = crate::crypto::generate_keypair();
        let signed = crate::crypto::sign_record(
            &keypair,
            3,
            crate::types::Endpoint::new("10.0.0.9".parse().unwrap(), 30301),
        );

        // lookup reported a different endpoint than the record signs
        let mut candidate = signed.node();
        candidate.endpoint = crate::types::Endpoint::new("10.6.6.6".parse().unwrap(), 40000);

        assert_eq!(registry.merge(&candidate, Utc::now()), MergeResult::Added);
        let record = registry.get(&signed.id).unwrap();
        assert_eq!(record.node().endpoint, signed.endpoint());
        assert_eq!(record.node().seq(), 3);
    }

    #[test]
    fn test_select_batch_staleness_first() {
        let config = ScoringConfig {
            min_probe_interval_secs: 0,
            ..ScoringConfig::default()
        };
        let now = Utc::now();

        let mut a = NodeRecord::discovered(test_node("aa", 1), 5, now - Duration::seconds(500));
        a.last_check = Some(now - Duration::seconds(100));
        let mut b = NodeRecord::discovered(test_node("bb", 2), 5, now - Duration::seconds(500));
        b.last_check = Some(now - Duration::seconds(10));
        let c = NodeRecord::discovered(test_node("cc", 3), 5, now - Duration::seconds(5));

        let registry = Registry::from_records(vec![b.clone(), a.clone(), c.clone()], config);

        let batch: Vec<_> = registry
            .select_batch(now, 3)
            .into_iter()
            .map(|r| r.id().clone())
            .collect();
        assert_eq!(batch, vec![c.id().clone(), a.id().clone(), b.id().clone()]);

        let batch = registry.select_batch(now, 1);
        assert_eq!(batch[0].id(), c.id());
    }

    #[test]
    fn test_select_batch_skips_recently_checked() {
        let config = ScoringConfig::default();
        let now = Utc::now();

        let mut fresh = NodeRecord::discovered(test_node("aa", 1), 5, now - Duration::seconds(60));
        fresh.last_check = Some(now - Duration::seconds(10));
        let mut old = NodeRecord::discovered(test_node("bb", 2), 5, now - Duration::seconds(9000));
        old.last_check = Some(now - Duration::seconds(config.min_probe_interval_secs as i64 + 1));

        let registry = Registry::from_records(vec![fresh, old.clone()], config);
        let batch = registry.select_batch(now, 10);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id(), old.id());
    }

    #[test]
    fn test_stats() {
        let config = ScoringConfig::default();
        let now = Utc::now();
        let mut registry = Registry::new(config.clone());
        assert_eq!(registry.stats(now), RegistryStats::default());

        registry.merge(&test_node("aa", 1), now);
        registry.merge(&test_node("bb", 2), now);

        let mut dead = registry.get(&NodeId::parse("bb").unwrap()).unwrap().clone();
        scoring::apply_probe(&mut dead, scoring::ProbeOutcome::Failed, now, &config);
        registry.update(dead);

        let stats = registry.stats(now);
        assert_eq!(stats.total_nodes, 2);
        assert_eq!(stats.unchecked, 1);
        assert_eq!(stats.stale, 1);
        assert_eq!(stats.degraded, 1);
        assert_eq!(stats.average_score, 0.5);
    }
}
