//! NODEMESH Node Binary
//!
//! Starts a small in-process cluster, registers every member under one
//! address in a distributed multimap and walks the lifecycle end to end.

use clap::Parser;
use futures::future::join_all;
use nodemesh::{ClusterManager, ClusterOptions, MemoryEngine, NodeEvent, NodeId};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// NODEMESH Node - cluster membership demo
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Number of cluster members to start
    #[arg(short, long, default_value_t = 3)]
    members: usize,

    /// Override configuration file (resource name or path)
    #[arg(long)]
    cluster_file: Option<PathBuf>,

    /// Resource directory searched for cluster.toml (repeatable)
    #[arg(long = "resource-path")]
    resource_paths: Vec<PathBuf>,

    /// Multimap holding the handler registrations
    #[arg(long, default_value = "subs")]
    map: String,

    /// Address every member registers under
    #[arg(long, default_value = "news.feed")]
    key: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("nodemesh=info".parse()?))
        .init();

    let args = Args::parse();
    anyhow::ensure!(args.members > 0, "--members must be at least 1");

    let mut options = ClusterOptions::from_env();
    if let Some(path) = &args.cluster_file {
        options = options.with_cluster_file(path);
    }
    for root in &args.resource_paths {
        options = options.with_resource_root(root);
    }

    let engine = MemoryEngine::new();
    let managers: Vec<_> = (0..args.members)
        .map(|_| ClusterManager::new(engine.clone(), options.clone()))
        .collect();

    // The first member joins alone so it observes everyone else arriving
    let (tx, mut events) = mpsc::unbounded_channel::<NodeEvent>();
    let observer = &managers[0];
    observer.set_node_listener(Arc::new(tx));
    observer.join()?;

    let joins = managers[1..].iter().cloned().map(|manager| {
        tokio::task::spawn_blocking(move || manager.join())
    });
    for outcome in join_all(joins).await {
        outcome??;
    }
    await_events(&mut events, args.members - 1).await;
    info!(nodes = observer.nodes().len(), "Cluster formed");

    for manager in &managers {
        let subs = manager.get_async_multi_map::<String, NodeId>(&args.map)?;
        if let Some(node_id) = manager.node_id() {
            subs.add(&args.key, &node_id).await?;
        }
    }

    let subs = observer.get_async_multi_map::<String, NodeId>(&args.map)?;
    let handlers = subs.get(&args.key).await?;
    info!(address = %args.key, handlers = handlers.len(), "Handlers registered");
    for _ in 0..handlers.len() * 2 {
        if let Some(node_id) = handlers.choose() {
            info!(address = %args.key, node_id = %node_id, "Routed message");
        }
    }

    for manager in managers[1..].iter() {
        if let Some(node_id) = manager.node_id() {
            subs.remove_all_for_value(&node_id).await?;
        }
        manager.leave();
    }
    await_events(&mut events, args.members - 1).await;
    info!(nodes = observer.nodes().len(), "Peers departed");

    observer.leave();
    let hooked = engine.run_shutdown_hooks();
    info!(hooked, started = engine.started_connections(), "Shutdown complete");

    Ok(())
}

async fn await_events(events: &mut UnboundedReceiver<NodeEvent>, expected: usize) {
    for _ in 0..expected {
        match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Some(NodeEvent::Added(node_id))) => info!(node_id = %node_id, "Node added"),
            Ok(Some(NodeEvent::Left(node_id))) => info!(node_id = %node_id, "Node left"),
            Ok(None) => break,
            Err(_) => {
                warn!("Timed out waiting for membership events");
                break;
            }
        }
    }
}
