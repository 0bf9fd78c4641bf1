//! Engine Boundary
//!
//! Capability traits over the distributed-data engine that owns storage,
//! replication and transport. The cluster manager only talks to these
//! traits, so engines can be swapped without touching lifecycle or event
//! translation.

pub mod memory;

use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;

use crate::cluster::{Member, MembershipEvent};
use crate::config::EngineConfig;

pub use memory::MemoryEngine;

/// Result alias for engine calls
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Engine-side failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("engine connection has been shut down")]
    ShutDown,

    #[error("map '{map}' is full ({limit} entries)")]
    CapacityExceeded { map: String, limit: usize },

    #[error("failed to start engine: {0}")]
    Start(String),
}

/// Options passed to the engine at connection start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Let the engine tear the connection down from its own shutdown hook
    pub shutdown_hook: bool,
}

/// Handle for a registered membership sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Engine factory
pub trait Engine: Send + Sync {
    /// Start a new member and return its connection
    fn start(
        &self,
        config: EngineConfig,
        options: StartOptions,
    ) -> EngineResult<Arc<dyn EngineConnection>>;
}

/// Receiver of raw membership events, invoked on the engine's event thread
pub trait MembershipSink: Send + Sync {
    fn member_added(&self, event: MembershipEvent);

    fn member_removed(&self, event: MembershipEvent);
}

/// Membership view of a connection
pub trait MembershipSource: Send + Sync {
    /// The member this connection represents
    fn local_member(&self) -> Member;

    /// Snapshot of all current members, local one included
    fn members(&self) -> Vec<Member>;

    fn add_membership_sink(&self, sink: Arc<dyn MembershipSink>) -> EngineResult<SubscriptionId>;

    /// Returns false if the subscription was not registered
    fn remove_membership_sink(&self, id: SubscriptionId) -> bool;
}

/// A live connection to the engine
pub trait EngineConnection: MembershipSource {
    /// Named key/value map; the same name always yields the same map
    fn map(&self, name: &str) -> Arc<dyn MapStore>;

    /// Named key/value-set map; the same name always yields the same map
    fn multi_map(&self, name: &str) -> Arc<dyn MultiMapStore>;

    fn is_running(&self) -> bool;

    /// Orderly shutdown. Calling it twice is a no-op.
    fn shutdown(&self);
}

/// Blocking byte-level key/value map
pub trait MapStore: Send + Sync {
    fn get(&self, key: &[u8]) -> EngineResult<Option<Bytes>>;

    /// Insert or overwrite, returning the previous value
    fn put(&self, key: Bytes, value: Bytes) -> EngineResult<Option<Bytes>>;

    /// Insert only if absent; returns the existing value otherwise
    fn put_if_absent(&self, key: Bytes, value: Bytes) -> EngineResult<Option<Bytes>>;

    fn remove(&self, key: &[u8]) -> EngineResult<Option<Bytes>>;

    /// Remove only if the current value equals `value`
    fn remove_if_equal(&self, key: &[u8], value: &[u8]) -> EngineResult<bool>;

    /// Overwrite only if present, returning the previous value
    fn replace(&self, key: Bytes, value: Bytes) -> EngineResult<Option<Bytes>>;

    /// Overwrite only if the current value equals `expected`
    fn replace_if_equal(&self, key: Bytes, expected: &[u8], value: Bytes) -> EngineResult<bool>;

    fn contains_key(&self, key: &[u8]) -> EngineResult<bool>;

    fn len(&self) -> EngineResult<usize>;

    fn is_empty(&self) -> EngineResult<bool> {
        Ok(self.len()? == 0)
    }

    fn clear(&self) -> EngineResult<()>;

    /// Snapshot of all live entries
    fn entries(&self) -> EngineResult<Vec<(Bytes, Bytes)>>;
}

/// Blocking byte-level map from a key to an unordered set of values
pub trait MultiMapStore: Send + Sync {
    /// Returns true if the value was not already present under the key
    fn put(&self, key: Bytes, value: Bytes) -> EngineResult<bool>;

    /// Snapshot of the values under the key
    fn get(&self, key: &[u8]) -> EngineResult<Vec<Bytes>>;

    fn remove(&self, key: &[u8], value: &[u8]) -> EngineResult<bool>;

    fn remove_all(&self, key: &[u8]) -> EngineResult<Vec<Bytes>>;

    /// Remove the value under every key, returning how many keys held it
    fn remove_all_for_value(&self, value: &[u8]) -> EngineResult<usize>;

    fn key_count(&self) -> EngineResult<usize>;
}
