//! Error types for balancing decisions.

use thiserror::Error;

/// Result alias used throughout the balancing core.
pub type Result<T> = std::result::Result<T, BalancerError>;

/// Errors raised while resolving a node for a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BalancerError {
    /// The cluster has no nodes, or every node is marked down.
    #[error("no available node")]
    NoAvailableNode,

    /// No cluster is registered under the requested name.
    #[error("cluster not found: {0}")]
    ClusterNotFound(String),

    /// A node address could not be turned into a destination URL.
    #[error("invalid node {host}:{port}: {reason}")]
    InvalidNode {
        host: String,
        port: u16,
        reason: String,
    },
}
