//! Membership Tracker
//!
//! Translates raw engine membership events into listener notifications.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Weak;
use tracing::{error, trace};

use super::manager::LifecycleLock;
use super::node::{MembershipEvent, MembershipEventKind};
use crate::engine::MembershipSink;

/// Engine-facing membership sink of one cluster manager.
///
/// Delivery takes the manager's lifecycle lock, so it never interleaves
/// with `join()` or `leave()`. Events arriving while the manager is not
/// active, or after it has rejoined through a newer connection, are
/// dropped. Listener failures are logged and swallowed.
pub struct MembershipTracker {
    lifecycle: Weak<LifecycleLock>,
    /// Join generation this tracker was registered for
    generation: u64,
}

impl MembershipTracker {
    pub(super) fn new(lifecycle: Weak<LifecycleLock>, generation: u64) -> Self {
        Self {
            lifecycle,
            generation,
        }
    }

    fn deliver(&self, event: MembershipEvent) {
        let Some(lifecycle) = self.lifecycle.upgrade() else {
            return;
        };
        let guard = lifecycle.lock();

        let listener = {
            let state = guard.borrow();
            if !state.active {
                trace!(node_id = %event.node_id(), "Discarding {} while inactive", event.kind);
                return;
            }
            if state.generation != self.generation {
                trace!(
                    node_id = %event.node_id(),
                    generation = self.generation,
                    "Discarding {} from a previous connection",
                    event.kind
                );
                return;
            }
            state.listener.clone()
        };
        let Some(listener) = listener else {
            return;
        };

        let node_id = event.node_id();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match event.kind {
            MembershipEventKind::Joined => listener.node_added(node_id),
            MembershipEventKind::Left => listener.node_left(node_id),
        }));

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(node_id = %node_id, error = %e, "Failed to handle {}", event.kind);
            }
            Err(_) => {
                error!(node_id = %node_id, "Node listener panicked handling {}", event.kind);
            }
        }
    }
}

impl MembershipSink for MembershipTracker {
    fn member_added(&self, event: MembershipEvent) {
        self.deliver(event);
    }

    fn member_removed(&self, event: MembershipEvent) {
        self.deliver(event);
    }
}
