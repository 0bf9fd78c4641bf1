//! Error Types
//!
//! Errors surfaced by the cluster manager and its map adapters.

use thiserror::Error;

use crate::engine::EngineError;

/// Result alias for cluster operations
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Failure on the membership or distributed map path
#[derive(Debug, Error)]
pub enum ClusterError {
    /// A map was requested before `join()` succeeded
    #[error("cluster manager has not joined a cluster")]
    NotJoined,

    /// The underlying engine rejected the operation
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A key or value could not be encoded or decoded
    #[error("map entry codec failure: {0}")]
    Codec(#[from] bincode::Error),

    /// The blocking task running an engine call did not complete
    #[error("map operation task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Failure while reading cluster configuration.
///
/// Never returned to callers of `join()`: the resolver logs it and falls
/// back to engine defaults.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read cluster configuration from {origin}: {error}")]
    Io {
        origin: String,
        #[source]
        error: std::io::Error,
    },

    #[error("failed to parse cluster configuration from {origin}: {error}")]
    Parse {
        origin: String,
        #[source]
        error: toml::de::Error,
    },
}
