//! Node Listener
//!
//! Callback interface for membership notifications.

use tokio::sync::mpsc::UnboundedSender;

use super::node::NodeId;

/// Receives node-joined and node-left notifications.
///
/// Called on the engine's event thread while the manager's lifecycle lock
/// is held. An `Err` or a panic is logged and swallowed by the tracker.
/// A listener that calls back into the manager should hold a
/// `WeakClusterManager`; a strong clone keeps the manager joined.
pub trait NodeListener: Send + Sync {
    fn node_added(&self, node_id: &NodeId) -> anyhow::Result<()>;

    fn node_left(&self, node_id: &NodeId) -> anyhow::Result<()>;
}

/// Membership notification forwarded over a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    Added(NodeId),
    Left(NodeId),
}

impl NodeListener for UnboundedSender<NodeEvent> {
    fn node_added(&self, node_id: &NodeId) -> anyhow::Result<()> {
        self.send(NodeEvent::Added(node_id.clone()))?;
        Ok(())
    }

    fn node_left(&self, node_id: &NodeId) -> anyhow::Result<()> {
        self.send(NodeEvent::Left(node_id.clone()))?;
        Ok(())
    }
}
