//! Persisted node document
//!
//! Layout of a node record in a document-oriented store. The node identity is
//! not stored separately; it is re-derived from the canonical `url` on decode.
//! A signed record the node advertised is kept next to it, so its sequence
//! number survives a restart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::types::{Node, NodeRecord, SignedRecord};

/// Discovery protocol version tag written to every document
pub const RECORD_SCHEME: &str = "v4";

/// A node record as stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredNode {
    pub scheme: String,

    pub url: String,

    pub score: u32,

    pub found: DateTime<Utc>,

    /// Last successful response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid: Option<DateTime<Utc>>,

    /// Last check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<DateTime<Utc>>,

    /// Signed record the node advertised, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<SignedRecord>,
}

impl StoredNode {
    pub fn from_record(record: &NodeRecord) -> Self {
        Self {
            scheme: RECORD_SCHEME.to_string(),
            url: record.node().url(),
            score: record.score(),
            found: record.found(),
            valid: record.last_response(),
            check: record.last_check(),
            record: record.node().record.clone(),
        }
    }

    /// Rebuild the record, re-deriving the node from its url
    pub fn into_record(self) -> Result<NodeRecord, StoreError> {
        let mut node = Node::parse(&self.url).map_err(|e| StoreError::CorruptRecord {
            key: self.url.clone(),
            reason: e.to_string(),
        })?;

        if let Some(signed) = self.record {
            if signed.id != node.id {
                return Err(StoreError::CorruptRecord {
                    key: self.url,
                    reason: format!("signed record belongs to {}", signed.id.short()),
                });
            }
            node = signed.node();
        }

        Ok(NodeRecord::restore(node, self.score, self.found, self.valid, self.check))
    }

    /// Encode as a JSON document
    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(self).map_err(|e| StoreError::Encode(e.to_string()))
    }

    /// Decode a JSON document into a record
    pub fn decode(key: &str, bytes: &[u8]) -> Result<NodeRecord, StoreError> {
        let doc: StoredNode = serde_json::from_slice(bytes).map_err(|e| StoreError::CorruptRecord {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        doc.into_record()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringConfig;
    use crate::registry::scoring::{apply_probe, ProbeOutcome};

    #[test]
    fn test_document_fields() {
        let node = Node::parse("enode://abc@1.2.3.4:30303").unwrap();
        let mut record = NodeRecord::discovered(node, 1, Utc::now());
        apply_probe(&mut record, ProbeOutcome::Alive, Utc::now(), &ScoringConfig::default());

        let bytes = StoredNode::from_record(&record).encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["scheme"], "v4");
        assert_eq!(value["url"], "enode://abc@1.2.3.4:30303");
        assert_eq!(value["score"], 2);
        assert!(value["found"].is_string());
        assert!(value["valid"].is_string());
        assert!(value["check"].is_string());

        let decoded = StoredNode::decode("abc", &bytes).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_unchecked_record_omits_timestamps() {
        let node = Node::parse("enode://abc@1.2.3.4:30303").unwrap();
        let record = NodeRecord::discovered(node, 1, Utc::now());

        let bytes = StoredNode::from_record(&record).encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(value.get("valid").is_none());
        assert!(value.get("check").is_none());

        let decoded = StoredNode::decode("abc", &bytes).unwrap();
        assert!(decoded.last_check().is_none());
    }

    #[test]
    fn test_malformed_url_is_corrupt() {
        let doc = StoredNode {
            scheme: RECORD_SCHEME.to_string(),
            url: "http://x".to_string(),
            score: 3,
            found: Utc::now(),
            valid: None,
            check: None,
            record: None,
        };
        assert!(matches!(doc.into_record(), Err(StoreError::CorruptRecord { .. })));
    }

    #[test]
    fn test_signed_record_survives_reload() {
        let keypair = crate::crypto::generate_keypair();
        let signed = crate::crypto::sign_record(
            &keypair,
            7,
            crate::types::Endpoint::new("10.0.0.9".parse().unwrap(), 30301),
        );
        let record = NodeRecord::discovered(signed.node(), 1, Utc::now());

        let bytes = StoredNode::from_record(&record).encode().unwrap();
        let decoded = StoredNode::decode("any", &bytes).unwrap();

        assert_eq!(decoded.node().seq(), 7);
        assert_eq!(decoded.node().record.as_ref(), Some(&signed));
        assert_eq!(decoded, record);

        // a candidate with an older sequence can not move the node after restart
        let older = crate::crypto::sign_record(
            &keypair,
            5,
            crate::types::Endpoint::new("10.6.6.6".parse().unwrap(), 30301),
        );
        let mut decoded = decoded;
        assert!(!decoded.refresh_node(&older.node()));
        assert_eq!(decoded.node().endpoint, signed.endpoint());
    }

    #[test]
    fn test_foreign_signed_record_is_corrupt() {
        let keypair = crate::crypto::generate_keypair();
        let signed = crate::crypto::sign_record(
            &keypair,
            1,
            crate::types::Endpoint::new("10.0.0.9".parse().unwrap(), 30303),
        );
        let doc = StoredNode {
            scheme: RECORD_SCHEME.to_string(),
            url: "enode://abc@10.0.0.9:30303".to_string(),
            score: 1,
            found: Utc::now(),
            valid: None,
            check: None,
            record: Some(signed),
        };
        assert!(matches!(doc.into_record(), Err(StoreError::CorruptRecord { .. })));
    }

    #[test]
    fn test_garbage_bytes_are_corrupt() {
        assert!(matches!(
            StoredNode::decode("abc", b"{not json"),
            Err(StoreError::CorruptRecord { .. })
        ));
    }
}
