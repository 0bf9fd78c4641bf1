//! In-Memory Engine
//!
//! A complete engine that keeps every member of a cluster inside one
//! process. Clones of a `MemoryEngine` share a hub, so managers started on
//! clones see each other exactly like separate processes would.

mod map;

use crossbeam::channel::{self, Receiver, Sender};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use tracing::{debug, info};

use self::map::{MapHandle, MemoryMap, MemoryMultiMap, MultiMapHandle};
use super::{
    Engine, EngineConnection, EngineError, EngineResult, MapStore, MembershipSink,
    MembershipSource, MultiMapStore, StartOptions, SubscriptionId,
};
use crate::cluster::{Member, MembershipEvent, MembershipEventKind, NodeId};
use crate::config::EngineConfig;

/// In-process engine shared by every clone
#[derive(Clone, Default)]
pub struct MemoryEngine {
    hub: Arc<Hub>,
}

#[derive(Default)]
struct Hub {
    /// Clusters keyed by cluster name
    groups: DashMap<String, Arc<Group>>,
    /// Connections started with the engine shutdown hook enabled
    hooked: Mutex<Vec<Weak<MemoryConnection>>>,
    started: AtomicU64,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connections ever started on this hub
    pub fn started_connections(&self) -> u64 {
        self.hub.started.load(Ordering::SeqCst)
    }

    /// Shut down every running connection that registered the engine
    /// shutdown hook. Returns how many were shut down.
    pub fn run_shutdown_hooks(&self) -> usize {
        let hooked: Vec<_> = self.hub.hooked.lock().drain(..).collect();
        let mut count = 0;
        for connection in hooked.iter().filter_map(Weak::upgrade) {
            if connection.is_running() {
                connection.shutdown();
                count += 1;
            }
        }
        info!(connections = count, "Engine shutdown hooks ran");
        count
    }

    fn group(&self, cluster_name: &str) -> Arc<Group> {
        self.hub
            .groups
            .entry(cluster_name.to_string())
            .or_insert_with(|| Arc::new(Group::new(cluster_name)))
            .clone()
    }
}

impl Engine for MemoryEngine {
    fn start(
        &self,
        config: EngineConfig,
        options: StartOptions,
    ) -> EngineResult<Arc<dyn EngineConnection>> {
        let group = self.group(&config.cluster_name);
        let member = Member::new(NodeId::random());
        let (events_tx, events_rx) = channel::unbounded();
        let (ready_tx, ready_rx) = channel::bounded(1);

        let connection = Arc::new(MemoryConnection {
            member: member.clone(),
            group: group.clone(),
            config,
            sinks: Arc::new(RwLock::new(HashMap::new())),
            next_subscription: AtomicU64::new(1),
            running: Arc::new(AtomicBool::new(true)),
            ready: Mutex::new(Some(ready_tx)),
        });

        Dispatcher {
            ready: ready_rx,
            events: events_rx,
            sinks: connection.sinks.clone(),
            running: connection.running.clone(),
        }
        .spawn(connection.thread_name())
        .map_err(|e| EngineError::Start(e.to_string()))?;

        group.admit(Peer {
            member: member.clone(),
            events: events_tx,
        });

        if options.shutdown_hook {
            self.hub.hooked.lock().push(Arc::downgrade(&connection));
        }
        self.hub.started.fetch_add(1, Ordering::SeqCst);

        info!(
            node_id = %member.id,
            cluster = %group.name,
            instance = connection.config.instance_name.as_deref().unwrap_or("-"),
            "Engine member started"
        );

        Ok(connection)
    }
}

/// A member as seen by the rest of its cluster
struct Peer {
    member: Member,
    events: Sender<MembershipEvent>,
}

/// Members and shared maps of one cluster
struct Group {
    name: String,
    peers: RwLock<Vec<Peer>>,
    maps: DashMap<String, Arc<MemoryMap>>,
    multi_maps: DashMap<String, Arc<MemoryMultiMap>>,
}

impl Group {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            peers: RwLock::new(Vec::new()),
            maps: DashMap::new(),
            multi_maps: DashMap::new(),
        }
    }

    /// Add a member and tell the existing ones about it
    fn admit(&self, peer: Peer) {
        let event = MembershipEvent::joined(peer.member.clone());
        let mut peers = self.peers.write();
        for existing in peers.iter() {
            existing.notify(event.clone());
        }
        peers.push(peer);
        debug!(cluster = %self.name, size = peers.len(), "Cluster size changed");
    }

    /// Remove a member and tell the remaining ones
    fn evict(&self, node_id: &NodeId) {
        let mut peers = self.peers.write();
        let Some(pos) = peers.iter().position(|p| &p.member.id == node_id) else {
            return;
        };
        // Dropping the peer closes its event channel and stops its dispatcher
        let departed = peers.remove(pos);
        let event = MembershipEvent::left(departed.member);
        for remaining in peers.iter() {
            remaining.notify(event.clone());
        }
        debug!(cluster = %self.name, size = peers.len(), "Cluster size changed");
    }

    fn members(&self) -> Vec<Member> {
        self.peers.read().iter().map(|p| p.member.clone()).collect()
    }

    fn map(&self, name: &str) -> Arc<MemoryMap> {
        self.maps
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryMap::new()))
            .clone()
    }

    fn multi_map(&self, name: &str) -> Arc<MemoryMultiMap> {
        self.multi_maps
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryMultiMap::new()))
            .clone()
    }
}

impl Peer {
    fn notify(&self, event: MembershipEvent) {
        if self.events.send(event).is_err() {
            debug!(node_id = %self.member.id, "Event channel closed");
        }
    }
}

type Sinks = Arc<RwLock<HashMap<SubscriptionId, Arc<dyn MembershipSink>>>>;

/// Delivers membership events to a connection's sinks, in arrival order,
/// on a dedicated thread. Nothing is delivered before the first sink is
/// registered; earlier events wait in the channel for it.
struct Dispatcher {
    /// Signalled by the first sink registration, closed on shutdown
    ready: Receiver<()>,
    events: Receiver<MembershipEvent>,
    sinks: Sinks,
    running: Arc<AtomicBool>,
}

impl Dispatcher {
    fn spawn(self, name: String) -> std::io::Result<thread::JoinHandle<()>> {
        thread::Builder::new().name(name).spawn(move || self.run())
    }

    fn run(self) {
        // An error means shutdown came first; the loop below then stops
        let _ = self.ready.recv();
        while let Ok(event) = self.events.recv() {
            if !self.running.load(Ordering::Acquire) {
                break;
            }
            let sinks: Vec<_> = self.sinks.read().values().cloned().collect();
            for sink in sinks {
                match event.kind {
                    MembershipEventKind::Joined => sink.member_added(event.clone()),
                    MembershipEventKind::Left => sink.member_removed(event.clone()),
                }
            }
        }
        debug!("Membership dispatcher stopped");
    }
}

/// Connection for one member of an in-memory cluster
pub struct MemoryConnection {
    member: Member,
    group: Arc<Group>,
    config: EngineConfig,
    sinks: Sinks,
    next_subscription: AtomicU64,
    running: Arc<AtomicBool>,
    ready: Mutex<Option<Sender<()>>>,
}

impl MemoryConnection {
    fn thread_name(&self) -> String {
        let label = self
            .config
            .instance_name
            .clone()
            .unwrap_or_else(|| self.member.id.as_str().chars().take(8).collect());
        format!("nodemesh-events-{}", label)
    }
}

impl MembershipSource for MemoryConnection {
    fn local_member(&self) -> Member {
        self.member.clone()
    }

    fn members(&self) -> Vec<Member> {
        self.group.members()
    }

    fn add_membership_sink(&self, sink: Arc<dyn MembershipSink>) -> EngineResult<SubscriptionId> {
        if !self.is_running() {
            return Err(EngineError::ShutDown);
        }
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.sinks.write().insert(id, sink);
        if let Some(ready) = self.ready.lock().take() {
            let _ = ready.send(());
        }
        Ok(id)
    }

    fn remove_membership_sink(&self, id: SubscriptionId) -> bool {
        self.sinks.write().remove(&id).is_some()
    }
}

impl EngineConnection for MemoryConnection {
    fn map(&self, name: &str) -> Arc<dyn MapStore> {
        let max_entries = self
            .config
            .maps
            .get(name)
            .and_then(|map_config| map_config.max_entries);
        Arc::new(MapHandle::new(
            name,
            self.group.map(name),
            self.running.clone(),
            max_entries,
        ))
    }

    fn multi_map(&self, name: &str) -> Arc<dyn MultiMapStore> {
        Arc::new(MultiMapHandle::new(
            self.group.multi_map(name),
            self.running.clone(),
        ))
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.sinks.write().clear();
        self.ready.lock().take();
        self.group.evict(&self.member.id);
        info!(node_id = %self.member.id, cluster = %self.group.name, "Engine member stopped");
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.shutdown();
    }
}
