//! Core types for the network crawler
//!
//! A [`Node`] is the identity and endpoint of one peer as advertised on the
//! overlay. A [`NodeRecord`] wraps it with the health metadata the crawler
//! tracks between probes.

use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Scheme prefix of a node address
pub const NODE_URL_SCHEME: &str = "enode://";

/// Query parameter carrying a discovery port that differs from the TCP port
const DISCPORT_PARAM: &str = "discport=";

/// Helper module for serializing [u8; 64] signatures
mod sig_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(data: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        hex::encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 64], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        if bytes.len() != 64 {
            return Err(serde::de::Error::custom("signature must be 64 bytes"));
        }
        let mut arr = [0u8; 64];
        arr.copy_from_slice(&bytes);
        Ok(arr)
    }
}

// =============================================================================
// NODE IDENTITY
// =============================================================================

/// Malformed node address
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct NodeUrlError(pub String);

/// Opaque peer identifier.
///
/// Locally generated ids are the hex encoded Ed25519 public key; ids read
/// from node addresses are accepted as long as they are alphanumeric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// Derive the id of a node from its public key
    pub fn from_public_key(key: &VerifyingKey) -> Self {
        NodeId(hex::encode(key.as_bytes()))
    }

    /// Parse an id token taken from a node address
    pub fn parse(s: &str) -> Result<Self, NodeUrlError> {
        if s.is_empty() {
            return Err(NodeUrlError("empty node id".to_string()));
        }
        if !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(NodeUrlError(format!("invalid node id [{}]", s)));
        }
        Ok(NodeId(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(16)]
    }

    /// Recover the public key, if this id is one
    pub fn public_key(&self) -> Option<VerifyingKey> {
        let bytes = hex::decode(&self.0).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        VerifyingKey::from_bytes(&arr).ok()
    }
}

impl TryFrom<String> for NodeId {
    type Error = NodeUrlError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        NodeId::parse(&s)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Network endpoint of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub ip: IpAddr,

    /// Discovery (UDP) port
    pub udp_port: u16,

    /// Listening (TCP) port
    pub tcp_port: u16,
}

impl Endpoint {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            ip,
            udp_port: port,
            tcp_port: port,
        }
    }

    /// Address used for discovery traffic
    pub fn discovery_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.udp_port)
    }
}

// =============================================================================
// SIGNED NODE RECORD
// =============================================================================

/// Self-description a node signs and advertises to the overlay.
///
/// Signing and verification live in [`crate::crypto`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SignedRecord {
    /// Sequence number, bumped each time the node changes its record
    pub seq: u64,

    pub id: NodeId,

    pub ip: IpAddr,

    pub udp_port: u16,

    pub tcp_port: u16,

    #[serde(with = "sig_serde")]
    pub signature: [u8; 64],
}

impl SignedRecord {
    /// Get the data to be signed (all fields except signature)
    pub fn signing_data(&self) -> Vec<u8> {
        bincode::serialize(&(
            self.seq,
            self.id.as_str(),
            self.ip,
            self.udp_port,
            self.tcp_port,
        ))
        .unwrap_or_default()
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            ip: self.ip,
            udp_port: self.udp_port,
            tcp_port: self.tcp_port,
        }
    }

    /// Re-derive the node described by this record
    pub fn node(&self) -> Node {
        Node {
            id: self.id.clone(),
            endpoint: self.endpoint(),
            record: Some(self.clone()),
        }
    }
}

// =============================================================================
// NODE
// =============================================================================

/// Identity and endpoint of a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub endpoint: Endpoint,

    /// Signed self-description, when the peer presented one
    pub record: Option<SignedRecord>,
}

impl Node {
    pub fn new(id: NodeId, endpoint: Endpoint) -> Self {
        Self {
            id,
            endpoint,
            record: None,
        }
    }

    /// Parse a node address of the form `enode://<id>@<ip>:<port>[?discport=<port>]`
    pub fn parse(url: &str) -> Result<Self, NodeUrlError> {
        let rest = url
            .strip_prefix(NODE_URL_SCHEME)
            .ok_or_else(|| NodeUrlError(format!("missing {} prefix", NODE_URL_SCHEME)))?;

        let (id, address) = rest
            .split_once('@')
            .ok_or_else(|| NodeUrlError("missing node id".to_string()))?;
        let id = NodeId::parse(id)?;

        let (host_port, query) = match address.split_once('?') {
            Some((hp, q)) => (hp, Some(q)),
            None => (address, None),
        };

        let socket: SocketAddr = host_port
            .parse()
            .map_err(|_| NodeUrlError(format!("invalid endpoint [{}]", host_port)))?;
        let mut endpoint = Endpoint::new(socket.ip(), socket.port());

        if let Some(query) = query {
            let port = query
                .strip_prefix(DISCPORT_PARAM)
                .ok_or_else(|| NodeUrlError(format!("unknown parameter [{}]", query)))?;
            endpoint.udp_port = port
                .parse()
                .map_err(|_| NodeUrlError(format!("invalid discovery port [{}]", port)))?;
        }

        Ok(Node::new(id, endpoint))
    }

    /// Canonical node address
    pub fn url(&self) -> String {
        let socket = SocketAddr::new(self.endpoint.ip, self.endpoint.tcp_port);
        if self.endpoint.udp_port == self.endpoint.tcp_port {
            format!("{}{}@{}", NODE_URL_SCHEME, self.id, socket)
        } else {
            format!(
                "{}{}@{}?{}{}",
                NODE_URL_SCHEME, self.id, socket, DISCPORT_PARAM, self.endpoint.udp_port
            )
        }
    }

    /// The node as its signed record describes it, when it carries one
    pub fn advertised(&self) -> Node {
        match &self.record {
            Some(record) => record.node(),
            None => self.clone(),
        }
    }

    /// Sequence number of the carried record, 0 when there is none
    pub fn seq(&self) -> u64 {
        self.record.as_ref().map(|r| r.seq).unwrap_or(0)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

// =============================================================================
// NODE RECORD
// =============================================================================

/// Health band of a tracked node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeHealth {
    /// Score above the healthy threshold and recently responsive
    Healthy,

    /// Score positive but not (or no longer) healthy
    Degraded,

    /// Score decayed to zero, or not checked for a long time
    Stale,
}

/// A discovered peer and its health metadata.
///
/// Score and timestamps change only through [`crate::registry::scoring`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub(crate) node: Node,

    pub(crate) score: u32,

    /// First discovery, never mutated
    pub(crate) found: DateTime<Utc>,

    /// Most recent successful probe
    pub(crate) last_response: Option<DateTime<Utc>>,

    /// Most recent probe attempt
    pub(crate) last_check: Option<DateTime<Utc>>,
}

impl NodeRecord {
    /// Record for a peer observed for the first time
    pub fn discovered(node: Node, initial_score: u32, now: DateTime<Utc>) -> Self {
        Self {
            node,
            score: initial_score,
            found: now,
            last_response: None,
            last_check: None,
        }
    }

    /// Rebuild a record read back from the registry
    pub fn restore(
        node: Node,
        score: u32,
        found: DateTime<Utc>,
        last_response: Option<DateTime<Utc>>,
        last_check: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            node,
            score,
            found,
            last_response,
            last_check,
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.node.id
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn found(&self) -> DateTime<Utc> {
        self.found
    }

    pub fn last_response(&self) -> Option<DateTime<Utc>> {
        self.last_response
    }

    pub fn last_check(&self) -> Option<DateTime<Utc>> {
        self.last_check
    }

    /// Replace the advertised node if the candidate carries a newer record
    pub(crate) fn refresh_node(&mut self, candidate: &Node) -> bool {
        if candidate.id != self.node.id || candidate.seq() <= self.node.seq() {
            return false;
        }
        self.node = candidate.advertised();
        true
    }
}
