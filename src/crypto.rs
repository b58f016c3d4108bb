//! Cryptographic utilities for the crawler identity
//!
//! Uses Ed25519, compatible with kratos-core. The crawler signs its own node
//! record so peers can verify the advertised endpoint.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;
use tracing::info;

use crate::error::ConfigError;
use crate::types::{Endpoint, NodeId, SignedRecord};

/// Domain separation prefix for node record signatures
const DOMAIN_NODE_RECORD: &[u8] = b"KRATOS_NODE_RECORD_V1:";

// =============================================================================
// KEYPAIR MANAGEMENT
// =============================================================================

/// Generate a new Ed25519 keypair
pub fn generate_keypair() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

/// Resolve the crawler identity.
///
/// A key supplied by configuration is parsed; parse failure is a
/// configuration error. Without one, a fresh keypair is generated.
pub fn resolve_identity(provided_key: Option<&str>) -> Result<SigningKey, ConfigError> {
    match provided_key {
        Some(key) => {
            let keypair = parse_secret_key(key)?;
            info!("🔑 Using configured crawler key {}", node_id(&keypair).short());
            Ok(keypair)
        }
        None => {
            let keypair = generate_keypair();
            info!("🔑 Generated new crawler key {}", node_id(&keypair).short());
            Ok(keypair)
        }
    }
}

/// Parse a hex encoded secret key (optional `0x` prefix)
pub fn parse_secret_key(hex_str: &str) -> Result<SigningKey, ConfigError> {
    let trimmed = hex_str.trim();
    let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);

    let bytes = hex::decode(trimmed).map_err(|e| ConfigError::InvalidKeyFormat(e.to_string()))?;

    if bytes.len() != SECRET_KEY_LENGTH {
        return Err(ConfigError::InvalidKeyFormat(format!(
            "expected {} bytes, got {}",
            SECRET_KEY_LENGTH,
            bytes.len()
        )));
    }

    let mut secret_bytes = [0u8; SECRET_KEY_LENGTH];
    secret_bytes.copy_from_slice(&bytes);

    Ok(SigningKey::from_bytes(&secret_bytes))
}

/// Hex encoding of the secret key, the format [`parse_secret_key`] accepts
pub fn secret_key_to_hex(keypair: &SigningKey) -> String {
    hex::encode(keypair.to_bytes())
}

/// Derive the node id of a keypair
pub fn node_id(keypair: &SigningKey) -> NodeId {
    NodeId::from_public_key(&keypair.verifying_key())
}

// =============================================================================
// NODE RECORD SIGNING & VERIFICATION
// =============================================================================

/// Create and sign a node record for the given endpoint
pub fn sign_record(keypair: &SigningKey, seq: u64, endpoint: Endpoint) -> SignedRecord {
    let mut record = SignedRecord {
        seq,
        id: node_id(keypair),
        ip: endpoint.ip,
        udp_port: endpoint.udp_port,
        tcp_port: endpoint.tcp_port,
        signature: [0u8; 64],
    };

    let domain_data = domain_separate(DOMAIN_NODE_RECORD, &record.signing_data());
    record.signature = keypair.sign(&domain_data).to_bytes();
    record
}

/// Verify a node record against the public key encoded in its id
pub fn verify_record(record: &SignedRecord) -> Result<(), SignatureError> {
    let verifying_key = record
        .id
        .public_key()
        .ok_or(SignatureError::InvalidPublicKey)?;

    let domain_data = domain_separate(DOMAIN_NODE_RECORD, &record.signing_data());
    let signature = Signature::from_bytes(&record.signature);

    verifying_key
        .verify(&domain_data, &signature)
        .map_err(|_| SignatureError::InvalidSignature)
}

// =============================================================================
// HELPERS
// =============================================================================

/// Apply domain separation to prevent cross-protocol replay attacks
fn domain_separate(domain: &[u8], data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(domain.len() + data.len());
    result.extend_from_slice(domain);
    result.extend_from_slice(data);
    result
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid signature")]
    InvalidSignature,
}
