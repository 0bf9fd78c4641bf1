//! Cluster Module
//!
//! Membership lifecycle, node identity and listener notification.

pub mod listener;
pub mod manager;
pub mod node;
pub mod tracker;

pub use listener::{NodeEvent, NodeListener};
pub use manager::{ClusterManager, WeakClusterManager};
pub use node::{Member, MembershipEvent, MembershipEventKind, NodeId};
pub use tracker::MembershipTracker;
