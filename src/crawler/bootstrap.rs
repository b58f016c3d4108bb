//! Bootstrap node resolution

use tracing::debug;

use crate::error::ConfigError;
use crate::types::{Node, NODE_URL_SCHEME};

/// Parse the configured bootstrap addresses, preserving their order.
///
/// Any malformed address aborts the whole resolution: a bad bootstrap list
/// is a configuration error, not a transient condition.
pub fn resolve_bootstrap(urls: &[String]) -> Result<Vec<Node>, ConfigError> {
    let mut nodes = Vec::with_capacity(urls.len());

    for url in urls {
        if !url.starts_with(NODE_URL_SCHEME) {
            return Err(ConfigError::InvalidBootstrapUrl {
                url: url.clone(),
                reason: format!("missing {} prefix", NODE_URL_SCHEME),
            });
        }

        let node = Node::parse(url).map_err(|e| ConfigError::InvalidBootstrapUrl {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        debug!("Bootstrap node {}", node);
        nodes.push(node);
    }

    Ok(nodes)
}
