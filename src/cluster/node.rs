//! Cluster Node
//!
//! Node identity and membership change events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique node identifier.
///
/// Assigned by the engine when a member starts. A node that leaves and
/// joins again receives a new identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A member as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Node identifier
    pub id: NodeId,
    /// When the member started
    pub joined_at: DateTime<Utc>,
}

impl Member {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            joined_at: Utc::now(),
        }
    }
}

/// Kind of membership change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipEventKind {
    Joined,
    Left,
}

impl fmt::Display for MembershipEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MembershipEventKind::Joined => write!(f, "member joined"),
            MembershipEventKind::Left => write!(f, "member left"),
        }
    }
}

/// Transient membership change, consumed once by the tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipEvent {
    pub member: Member,
    pub kind: MembershipEventKind,
}

impl MembershipEvent {
    pub fn joined(member: Member) -> Self {
        Self {
            member,
            kind: MembershipEventKind::Joined,
        }
    }

    pub fn left(member: Member) -> Self {
        Self {
            member,
            kind: MembershipEventKind::Left,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.member.id
    }
}
