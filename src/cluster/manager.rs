//! Cluster Manager
//!
//! Owns the join/leave lifecycle, the node identity and the single node
//! listener, and hands out typed views of the engine's distributed maps.

use parking_lot::ReentrantMutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cell::RefCell;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use super::listener::NodeListener;
use super::node::NodeId;
use super::tracker::MembershipTracker;
use crate::config::ClusterOptions;
use crate::engine::{Engine, EngineConnection, StartOptions, SubscriptionId};
use crate::error::{ClusterError, Result};
use crate::map::{AsyncMap, AsyncMultiMap, SyncMap};

/// Lifecycle state guarded by one re-entrant lock.
///
/// Re-entrant so a listener running under the lock can call back into the
/// manager. The `RefCell` is never borrowed across a listener call.
pub(super) type LifecycleLock = ReentrantMutex<RefCell<Lifecycle>>;

#[derive(Default)]
pub(super) struct Lifecycle {
    /// Joined and not yet left
    pub(super) active: bool,
    /// Set on join, kept after leave
    pub(super) node_id: Option<NodeId>,
    /// Bumped by every successful join
    pub(super) generation: u64,
    pub(super) listener: Option<Arc<dyn NodeListener>>,
    connection: Option<Arc<dyn EngineConnection>>,
    subscription: Option<SubscriptionId>,
}

/// Cluster membership and distributed map access for one process.
///
/// Clones share the same state. Dropping the last clone leaves the
/// cluster; a listener that needs the manager should hold a
/// [`WeakClusterManager`], since a strong clone keeps it joined.
#[derive(Clone)]
pub struct ClusterManager {
    inner: Arc<Inner>,
}

/// Handle that does not keep a [`ClusterManager`] alive
#[derive(Clone)]
pub struct WeakClusterManager {
    inner: Weak<Inner>,
}

impl WeakClusterManager {
    pub fn upgrade(&self) -> Option<ClusterManager> {
        self.inner.upgrade().map(|inner| ClusterManager { inner })
    }
}

struct Inner {
    engine: Arc<dyn Engine>,
    options: ClusterOptions,
    lifecycle: Arc<LifecycleLock>,
}

impl ClusterManager {
    pub fn new(engine: impl Engine + 'static, options: ClusterOptions) -> Self {
        Self::with_engine(Arc::new(engine), options)
    }

    pub fn with_engine(engine: Arc<dyn Engine>, options: ClusterOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                options,
                lifecycle: Arc::new(ReentrantMutex::new(RefCell::new(Lifecycle::default()))),
            }),
        }
    }

    /// Join the cluster. A no-op when already joined.
    ///
    /// Configuration problems never fail the join; only an engine that
    /// cannot start does.
    pub fn join(&self) -> Result<()> {
        let guard = self.inner.lifecycle.lock();
        if guard.borrow().active {
            debug!("Already joined, ignoring join");
            return Ok(());
        }

        let config = self.inner.options.resolver().resolve();
        let start = StartOptions {
            shutdown_hook: self.inner.options.engine_shutdown_hook,
        };
        let connection = self.inner.engine.start(config, start)?;
        let node_id = connection.local_member().id;

        let generation = guard.borrow().generation + 1;
        let tracker = Arc::new(MembershipTracker::new(
            Arc::downgrade(&self.inner.lifecycle),
            generation,
        ));
        let subscription = match connection.add_membership_sink(tracker) {
            Ok(id) => id,
            Err(e) => {
                connection.shutdown();
                return Err(e.into());
            }
        };

        let mut state = guard.borrow_mut();
        state.active = true;
        state.generation = generation;
        state.node_id = Some(node_id.clone());
        state.connection = Some(connection);
        state.subscription = Some(subscription);

        info!(node_id = %node_id, "Joined cluster");
        Ok(())
    }

    /// Leave the cluster. A no-op when not joined.
    pub fn leave(&self) {
        leave_locked(&self.inner.lifecycle);
    }

    pub fn is_active(&self) -> bool {
        let guard = self.inner.lifecycle.lock();
        let active = guard.borrow().active;
        active
    }

    /// This node's identifier; `None` before the first join
    pub fn node_id(&self) -> Option<NodeId> {
        let guard = self.inner.lifecycle.lock();
        let node_id = guard.borrow().node_id.clone();
        node_id
    }

    /// Snapshot of every member's identifier; empty when not joined
    pub fn nodes(&self) -> Vec<NodeId> {
        self.connection()
            .map(|connection| {
                connection
                    .members()
                    .into_iter()
                    .map(|member| member.id)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn downgrade(&self) -> WeakClusterManager {
        WeakClusterManager {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Register the membership listener, replacing any previous one
    pub fn set_node_listener(&self, listener: Arc<dyn NodeListener>) {
        let guard = self.inner.lifecycle.lock();
        guard.borrow_mut().listener = Some(listener);
    }

    pub fn get_async_map<K, V>(&self, name: &str) -> Result<AsyncMap<K, V>>
    where
        K: Serialize,
        V: Serialize + DeserializeOwned,
    {
        let connection = self.connection().ok_or(ClusterError::NotJoined)?;
        Ok(AsyncMap::new(name, connection.map(name)))
    }

    pub fn get_async_multi_map<K, V>(&self, name: &str) -> Result<AsyncMultiMap<K, V>>
    where
        K: Serialize,
        V: Serialize + DeserializeOwned,
    {
        let connection = self.connection().ok_or(ClusterError::NotJoined)?;
        Ok(AsyncMultiMap::new(name, connection.multi_map(name)))
    }

    pub fn get_sync_map<K, V>(&self, name: &str) -> Result<SyncMap<K, V>>
    where
        K: Serialize + DeserializeOwned,
        V: Serialize + DeserializeOwned,
    {
        let connection = self.connection().ok_or(ClusterError::NotJoined)?;
        Ok(SyncMap::new(name, connection.map(name)))
    }

    /// Tracker bound to the current join generation
    pub(crate) fn tracker(&self) -> MembershipTracker {
        let guard = self.inner.lifecycle.lock();
        let generation = guard.borrow().generation;
        MembershipTracker::new(Arc::downgrade(&self.inner.lifecycle), generation)
    }

    fn connection(&self) -> Option<Arc<dyn EngineConnection>> {
        let guard = self.inner.lifecycle.lock();
        let connection = guard.borrow().connection.clone();
        connection
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        leave_locked(&self.lifecycle);
    }
}

fn leave_locked(lifecycle: &LifecycleLock) {
    let guard = lifecycle.lock();
    let (connection, subscription) = {
        let mut state = guard.borrow_mut();
        if !state.active {
            debug!("Not joined, ignoring leave");
            return;
        }
        (state.connection.take(), state.subscription.take())
    };

    if let Some(connection) = connection {
        if let Some(id) = subscription {
            connection.remove_membership_sink(id);
        }
        connection.shutdown();
    }

    let mut state = guard.borrow_mut();
    state.active = false;
    info!(
        node_id = %state.node_id.as_ref().map(NodeId::as_str).unwrap_or("-"),
        "Left cluster"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::listener::NodeEvent;
    use crate::cluster::node::{Member, MembershipEvent};
    use crate::config::{CONFIG_FILE, DEFAULT_CONFIG_FILE, ENV_LOCK};
    use crate::engine::{MembershipSink, MemoryEngine};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
    use tokio_test::assert_ok;

    /// Pinned to the bundled configuration so the environment cannot move
    /// members into another cluster
    fn options() -> ClusterOptions {
        ClusterOptions::default().with_cluster_file(DEFAULT_CONFIG_FILE)
    }

    fn manager(engine: &MemoryEngine) -> ClusterManager {
        ClusterManager::new(engine.clone(), options())
    }

    fn channel_listener(manager: &ClusterManager) -> UnboundedReceiver<NodeEvent> {
        let (tx, rx) = mpsc::unbounded_channel::<NodeEvent>();
        manager.set_node_listener(Arc::new(tx));
        rx
    }

    async fn next_event(rx: &mut UnboundedReceiver<NodeEvent>) -> NodeEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for membership event")
            .expect("listener channel closed")
    }

    async fn assert_quiet(rx: &mut UnboundedReceiver<NodeEvent>) {
        let outcome = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(outcome.is_err(), "unexpected event: {:?}", outcome);
    }

    #[test]
    fn test_repeated_join_is_a_no_op() {
        let engine = MemoryEngine::new();
        let a = manager(&engine);

        assert_ok!(a.join());
        let first = a.node_id().unwrap();
        assert_ok!(a.join());
        assert_ok!(a.join());

        assert_eq!(a.node_id(), Some(first));
        assert_eq!(engine.started_connections(), 1);
        assert_eq!(a.nodes().len(), 1);
    }

    #[test]
    fn test_repeated_leave_is_a_no_op() {
        let engine = MemoryEngine::new();
        let a = manager(&engine);
        let b = manager(&engine);
        a.join().unwrap();
        b.join().unwrap();
        assert_eq!(a.nodes().len(), 2);

        b.leave();
        b.leave();

        assert!(!b.is_active());
        assert_eq!(a.nodes().len(), 1);
        assert!(b.nodes().is_empty());
    }

    #[test]
    fn test_leave_before_join_is_a_no_op() {
        let engine = MemoryEngine::new();
        let a = manager(&engine);

        a.leave();
        assert!(!a.is_active());
        assert_eq!(a.node_id(), None);
    }

    #[test]
    fn test_concurrent_join_starts_one_connection() {
        let engine = MemoryEngine::new();
        let a = manager(&engine);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let a = a.clone();
                std::thread::spawn(move || a.join())
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }

        assert_eq!(engine.started_connections(), 1);
        assert!(a.is_active());
    }

    #[test]
    fn test_rejoin_gets_new_node_id() {
        let engine = MemoryEngine::new();
        let a = manager(&engine);

        a.join().unwrap();
        let first = a.node_id().unwrap();
        a.leave();
        // Identity is kept until the next join
        assert_eq!(a.node_id(), Some(first.clone()));

        a.join().unwrap();
        let second = a.node_id().unwrap();
        assert_ne!(first, second);
        assert_eq!(engine.started_connections(), 2);
        assert_eq!(a.nodes(), vec![second]);
    }

    #[test]
    fn test_maps_require_join() {
        let engine = MemoryEngine::new();
        let a = manager(&engine);

        assert!(matches!(
            a.get_async_map::<String, String>("owners"),
            Err(ClusterError::NotJoined)
        ));
        assert!(a.get_sync_map::<String, String>("owners").is_err());

        a.join().unwrap();
        assert_ok!(a.get_async_multi_map::<String, String>("subs"));

        a.leave();
        assert!(matches!(
            a.get_async_multi_map::<String, String>("subs"),
            Err(ClusterError::NotJoined)
        ));
    }

    #[tokio::test]
    async fn test_two_node_scenario() {
        let engine = MemoryEngine::new();
        let a = manager(&engine);
        let mut events = channel_listener(&a);
        a.join().unwrap();
        let a_id = a.node_id().unwrap();

        let b = manager(&engine);
        b.join().unwrap();
        let b_id = b.node_id().unwrap();

        assert_eq!(next_event(&mut events).await, NodeEvent::Added(b_id.clone()));
        let nodes = a.nodes();
        assert!(nodes.contains(&a_id));
        assert!(nodes.contains(&b_id));

        b.leave();
        assert_eq!(next_event(&mut events).await, NodeEvent::Left(b_id.clone()));
        assert_eq!(a.nodes(), vec![a_id]);
    }

    #[tokio::test]
    async fn test_events_while_inactive_are_discarded() {
        let engine = MemoryEngine::new();
        let a = manager(&engine);
        let mut events = channel_listener(&a);
        let stranger = Member::new(NodeId::from("B1"));

        a.tracker()
            .member_added(MembershipEvent::joined(stranger.clone()));
        assert_quiet(&mut events).await;

        a.join().unwrap();
        a.tracker()
            .member_added(MembershipEvent::joined(stranger.clone()));
        assert_eq!(
            next_event(&mut events).await,
            NodeEvent::Added(stranger.id.clone())
        );

        a.leave();
        a.tracker().member_removed(MembershipEvent::left(stranger));
        assert_quiet(&mut events).await;
    }

    #[tokio::test]
    async fn test_listener_is_replaced() {
        let engine = MemoryEngine::new();
        let a = manager(&engine);
        let mut first = channel_listener(&a);
        let mut second = channel_listener(&a);
        a.join().unwrap();

        let b = manager(&engine);
        b.join().unwrap();

        assert_eq!(
            next_event(&mut second).await,
            NodeEvent::Added(b.node_id().unwrap())
        );
        // The replaced sender was dropped without ever being called
        assert_eq!(first.recv().await, None);
    }

    /// Fails the first call with an error, panics on the second, then forwards
    struct Flaky {
        calls: AtomicUsize,
        tx: UnboundedSender<NodeEvent>,
    }

    impl NodeListener for Flaky {
        fn node_added(&self, node_id: &NodeId) -> anyhow::Result<()> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => anyhow::bail!("listener rejected {}", node_id),
                1 => panic!("listener exploded on {}", node_id),
                _ => self.tx.node_added(node_id),
            }
        }

        fn node_left(&self, node_id: &NodeId) -> anyhow::Result<()> {
            self.tx.node_left(node_id)
        }
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_stop_delivery() {
        let engine = MemoryEngine::new();
        let a = manager(&engine);
        let (tx, mut events) = mpsc::unbounded_channel();
        a.set_node_listener(Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            tx,
        }));
        a.join().unwrap();

        let b = manager(&engine);
        b.join().unwrap();
        let c = manager(&engine);
        c.join().unwrap();
        let d = manager(&engine);
        d.join().unwrap();

        assert_eq!(
            next_event(&mut events).await,
            NodeEvent::Added(d.node_id().unwrap())
        );
        c.leave();
        assert_eq!(
            next_event(&mut events).await,
            NodeEvent::Left(c.node_id().unwrap())
        );
        assert!(a.is_active());
    }

    /// Calls back into the manager from the event thread
    struct Reentrant {
        manager: WeakClusterManager,
        tx: UnboundedSender<usize>,
    }

    impl NodeListener for Reentrant {
        fn node_added(&self, _node_id: &NodeId) -> anyhow::Result<()> {
            if let Some(manager) = self.manager.upgrade() {
                self.tx.send(manager.nodes().len())?;
            }
            Ok(())
        }

        fn node_left(&self, _node_id: &NodeId) -> anyhow::Result<()> {
            if let Some(manager) = self.manager.upgrade() {
                manager.leave();
                self.tx.send(usize::MAX)?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_listener_may_call_back_into_manager() {
        let engine = MemoryEngine::new();
        let a = manager(&engine);
        let (tx, mut seen) = mpsc::unbounded_channel();
        a.set_node_listener(Arc::new(Reentrant {
            manager: a.downgrade(),
            tx,
        }));
        a.join().unwrap();

        let b = manager(&engine);
        b.join().unwrap();
        let size = tokio::time::timeout(Duration::from_secs(2), seen.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(size, 2);

        b.leave();
        let marker = tokio::time::timeout(Duration::from_secs(2), seen.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(marker, usize::MAX);
        assert!(!a.is_active());
    }

    #[tokio::test]
    async fn test_multimap_by_name_sees_both_values() {
        let engine = MemoryEngine::new();
        let a = manager(&engine);
        a.join().unwrap();

        let first = a.get_async_multi_map::<String, String>("subs").unwrap();
        let second = a.get_async_multi_map::<String, String>("subs").unwrap();
        let address = "orders.created".to_string();

        first.add(&address, &"handler-1".to_string()).await.unwrap();
        second.add(&address, &"handler-2".to_string()).await.unwrap();

        let handlers = first.get(&address).await.unwrap();
        assert_eq!(handlers.len(), 2);
        assert!(handlers.contains(&"handler-1".to_string()));
        assert!(handlers.contains(&"handler-2".to_string()));
    }

    #[tokio::test]
    async fn test_maps_are_shared_between_members() {
        let engine = MemoryEngine::new();
        let a = manager(&engine);
        let b = manager(&engine);
        a.join().unwrap();
        b.join().unwrap();

        let owners = a.get_async_map::<String, NodeId>("owners").unwrap();
        owners
            .put(&"queue-1".to_string(), &a.node_id().unwrap())
            .await
            .unwrap();

        let view = b.get_sync_map::<String, NodeId>("owners").unwrap();
        let owner = tokio::task::spawn_blocking(move || view.get(&"queue-1".to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(owner, a.node_id());
    }

    #[test]
    fn test_configuration_reaches_engine() {
        let _env = ENV_LOCK.lock();
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "cluster_name = \"alpha\"").unwrap();

        let engine = MemoryEngine::new();
        let alpha = ClusterManager::new(
            engine.clone(),
            ClusterOptions::default().with_resource_root(dir.path()),
        );
        let fallback = manager(&engine);
        alpha.join().unwrap();
        fallback.join().unwrap();

        // Different cluster names never see each other
        assert_eq!(alpha.nodes().len(), 1);
        assert_eq!(fallback.nodes().len(), 1);
    }

    #[test]
    fn test_malformed_configuration_still_joins() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("broken.toml");
        std::fs::write(&file, "cluster_name = ").unwrap();

        let engine = MemoryEngine::new();
        let a = ClusterManager::new(
            engine.clone(),
            ClusterOptions::default().with_cluster_file(&file),
        );

        assert_ok!(a.join());
        assert!(a.is_active());
    }

    #[test]
    fn test_manager_disables_engine_shutdown_hook() {
        let engine = MemoryEngine::new();
        let a = manager(&engine);
        let hooked = ClusterManager::new(
            engine.clone(),
            options().with_engine_shutdown_hook(true),
        );
        a.join().unwrap();
        hooked.join().unwrap();

        assert_eq!(engine.run_shutdown_hooks(), 1);
        assert_eq!(a.nodes().len(), 1);
    }

    #[test]
    fn test_dropping_manager_leaves_cluster() {
        let engine = MemoryEngine::new();
        let a = manager(&engine);
        a.join().unwrap();
        {
            let b = manager(&engine);
            b.join().unwrap();
            assert_eq!(a.nodes().len(), 2);
        }
        assert_eq!(a.nodes().len(), 1);
    }

    #[test]
    fn test_dropping_manager_with_listener_handle_leaves_cluster() {
        let engine = MemoryEngine::new();
        let a = manager(&engine);
        a.join().unwrap();
        {
            let b = manager(&engine);
            let (tx, _seen) = mpsc::unbounded_channel();
            b.set_node_listener(Arc::new(Reentrant {
                manager: b.downgrade(),
                tx,
            }));
            b.join().unwrap();
            assert_eq!(a.nodes().len(), 2);
        }
        assert_eq!(a.nodes().len(), 1);
    }

    #[test]
    fn test_weak_handle_upgrades_while_manager_lives() {
        let engine = MemoryEngine::new();
        let a = manager(&engine);
        let weak = a.downgrade();
        a.join().unwrap();

        let upgraded = weak.upgrade().unwrap();
        assert_eq!(upgraded.node_id(), a.node_id());

        drop(upgraded);
        drop(a);
        assert!(weak.upgrade().is_none());
        assert_eq!(engine.started_connections(), 1);
    }

    /// Parks inside `node_added` until released
    struct Parked {
        entered: std::sync::mpsc::Sender<()>,
        release: parking_lot::Mutex<std::sync::mpsc::Receiver<()>>,
        finished: Arc<AtomicBool>,
        calls: Arc<AtomicUsize>,
    }

    impl NodeListener for Parked {
        fn node_added(&self, _node_id: &NodeId) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.send(())?;
            self.release.lock().recv()?;
            self.finished.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn node_left(&self, _node_id: &NodeId) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_leave_waits_for_listener_in_progress() {
        let engine = MemoryEngine::new();
        let a = manager(&engine);
        let (entered_tx, entered) = std::sync::mpsc::channel();
        let (release, release_rx) = std::sync::mpsc::channel();
        let finished = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));
        a.set_node_listener(Arc::new(Parked {
            entered: entered_tx,
            release: parking_lot::Mutex::new(release_rx),
            finished: finished.clone(),
            calls: calls.clone(),
        }));
        a.join().unwrap();

        let b = manager(&engine);
        b.join().unwrap();
        entered.recv_timeout(Duration::from_secs(2)).unwrap();

        let leaving = {
            let a = a.clone();
            let finished = finished.clone();
            std::thread::spawn(move || {
                a.leave();
                finished.load(Ordering::SeqCst)
            })
        };
        std::thread::sleep(Duration::from_millis(100));
        assert!(!leaving.is_finished());

        release.send(()).unwrap();
        drop(release);
        assert!(leaving.join().unwrap(), "leave returned while the listener was running");
        assert!(!a.is_active());

        let c = manager(&engine);
        c.join().unwrap();
        b.leave();
        a.tracker()
            .member_added(MembershipEvent::joined(Member::new(NodeId::from("C1"))));
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_events_from_previous_connection_are_discarded() {
        let engine = MemoryEngine::new();
        let a = manager(&engine);
        let mut events = channel_listener(&a);
        a.join().unwrap();
        let stale = a.tracker();

        a.leave();
        a.join().unwrap();

        let stranger = Member::new(NodeId::from("B1"));
        stale.member_added(MembershipEvent::joined(stranger.clone()));
        assert_quiet(&mut events).await;

        a.tracker()
            .member_added(MembershipEvent::joined(stranger.clone()));
        assert_eq!(next_event(&mut events).await, NodeEvent::Added(stranger.id));
    }
}
