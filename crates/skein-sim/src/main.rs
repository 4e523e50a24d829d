mod net;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use skein_protocol::{MeshChannels, MeshConfig, MeshEvent, MeshHandle, MeshService, PeerId};

use net::SimNet;

#[derive(Parser)]
#[command(name = "skein-sim", about = "In-memory simulation of a skein mesh")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Let a room of nodes converge, then flood one command and count
    /// deliveries.
    Flood {
        /// Number of simulated devices.
        #[arg(long, default_value = "8")]
        nodes: usize,
        /// Seconds to let the topology settle before broadcasting.
        #[arg(long, default_value = "10")]
        settle: u64,
        /// The command to flood.
        #[arg(long, default_value = "slideshow")]
        command: String,
    },

    /// Converge, crash a node, and watch the mesh heal around it.
    Churn {
        #[arg(long, default_value = "8")]
        nodes: usize,
        #[arg(long, default_value = "10")]
        settle: u64,
    },
}

/// Tightened timers so a simulation converges in seconds, not minutes.
fn sim_config() -> MeshConfig {
    MeshConfig {
        maintenance_interval: Duration::from_millis(500),
        gossip_base_interval: Duration::from_secs(2),
        gossip_jitter: Duration::from_secs(1),
        reshuffle_interval: Duration::from_secs(5),
        purge_interval: Duration::from_secs(30),
        pending_expiry: Duration::from_secs(5),
        ..MeshConfig::default()
    }
}

struct SimNode {
    id: PeerId,
    handle: MeshHandle,
    commands_seen: Arc<AtomicUsize>,
}

fn spawn_room(net: &SimNet, count: usize) -> Vec<SimNode> {
    (0..count)
        .map(|i| {
            let id = PeerId::new(format!("node{i:02}"));
            let events_rx = net.register(id.clone());
            let MeshChannels { handle, mut events } =
                MeshService::spawn(id.clone(), net.transport(id.clone()), events_rx, sim_config());

            let commands_seen = Arc::new(AtomicUsize::new(0));
            let counter = commands_seen.clone();
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    if let MeshEvent::Command { .. } = event {
                        counter.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });

            SimNode {
                id,
                handle,
                commands_seen,
            }
        })
        .collect()
}

async fn print_degrees(nodes: &[SimNode]) {
    for node in nodes {
        if let Ok(status) = node.handle.status().await {
            eprintln!(
                "  {}: {} direct, {} known",
                node.id, status.direct_peer_count, status.known_peer_count
            );
        } else {
            eprintln!("  {}: offline", node.id);
        }
    }
}

async fn run_flood(nodes_count: usize, settle: u64, command: String) -> anyhow::Result<()> {
    let net = SimNet::new();
    let nodes = spawn_room(&net, nodes_count);

    eprintln!("settling {nodes_count} nodes for {settle}s...");
    tokio::time::sleep(Duration::from_secs(settle)).await;
    eprintln!("topology after settling ({} links):", net.link_count());
    print_degrees(&nodes).await;

    eprintln!("broadcasting {command:?} from {}", nodes[0].id);
    nodes[0].handle.broadcast(command).await?;
    tokio::time::sleep(Duration::from_secs(3)).await;

    let delivered = nodes[1..]
        .iter()
        .filter(|n| n.commands_seen.load(Ordering::Relaxed) > 0)
        .count();
    let duplicates: usize = nodes[1..]
        .iter()
        .map(|n| n.commands_seen.load(Ordering::Relaxed).saturating_sub(1))
        .sum();

    eprintln!();
    eprintln!(
        "delivered to {delivered}/{} nodes, {duplicates} duplicate deliveries",
        nodes_count - 1
    );

    for node in &nodes {
        node.handle.shutdown().await;
    }
    Ok(())
}

async fn run_churn(nodes_count: usize, settle: u64) -> anyhow::Result<()> {
    let net = SimNet::new();
    let nodes = spawn_room(&net, nodes_count);

    eprintln!("settling {nodes_count} nodes for {settle}s...");
    tokio::time::sleep(Duration::from_secs(settle)).await;
    print_degrees(&nodes).await;

    let victim = &nodes[1];
    eprintln!("crashing {}", victim.id);
    victim.handle.shutdown().await;
    net.crash(&victim.id);

    tokio::time::sleep(Duration::from_secs(settle)).await;
    eprintln!("topology after healing ({} links):", net.link_count());
    print_degrees(&nodes).await;

    for node in &nodes {
        node.handle.shutdown().await;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    eprintln!("skein-sim v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Flood {
            nodes,
            settle,
            command,
        } => run_flood(nodes, settle, command).await,
        Command::Churn { nodes, settle } => run_churn(nodes, settle).await,
    }
}
