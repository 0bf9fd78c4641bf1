//! NODEMESH - Cluster Membership and Distributed Maps
//!
//! A cluster manager that joins a node to a named cluster, reports members
//! joining and leaving, and hands out typed views of the distributed maps
//! a messaging layer keeps its routing and ownership state in.

pub mod cluster;
pub mod config;
pub mod engine;
pub mod error;
pub mod map;

pub use cluster::{ClusterManager, NodeEvent, NodeId, NodeListener, WeakClusterManager};
pub use config::{ClusterOptions, EngineConfig, MapConfig};
pub use engine::{Engine, EngineConnection, EngineError, MemoryEngine};
pub use error::{ClusterError, ConfigError, Result};
pub use map::{AsyncMap, AsyncMultiMap, ChoosableSet, SyncMap};
