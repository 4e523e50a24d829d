/// The mesh runtime — integrates registry, dedup, gossip, and topology
/// into a live event loop.
///
/// The runtime owns a `Transport` and all mesh state. It exposes a
/// channel-based API so the embedding application (WebView host, bridge,
/// test harness) never touches raw bytes or protocol internals.
mod effect;
mod executor;
mod r#loop;
pub mod state;
pub mod transport;

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::error::SkeinError;
use crate::gossip::{GOSSIP_BASE_INTERVAL, GOSSIP_JITTER};
use crate::topology::DegreeBounds;
use crate::types::PeerId;

pub use effect::MeshEffect;
pub use transport::{Transport, TransportEvent, TransferOutcome};

// ── Configuration ─────────────────────────────────────────────────────

/// Configuration for a mesh session.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Service id advertised and discovered on the transport.
    pub service_id: String,
    /// Degree targets for the connection graph.
    pub bounds: DegreeBounds,
    /// Interval for the heal/pending-expiry maintenance pass.
    pub maintenance_interval: Duration,
    /// Base delay between gossip announces.
    pub gossip_base_interval: Duration,
    /// Random jitter added to each gossip delay.
    pub gossip_jitter: Duration,
    /// Interval for the redundancy/distance reshuffle pass.
    pub reshuffle_interval: Duration,
    /// Interval for stale-endpoint purging.
    pub purge_interval: Duration,
    /// How long an endpoint stays in the registry without a signal.
    pub registry_retention: Duration,
    /// Window within which an endpoint counts as recently heard from.
    pub recency_window: Duration,
    /// How long a message id stays in the dedup cache.
    pub dedup_ttl: Duration,
    /// Interval for the dedup cache sweep.
    pub dedup_sweep_interval: Duration,
    /// After this long, an unresolved connection attempt counts as failed.
    pub pending_expiry: Duration,
    /// Consecutive transfer failures before a proactive disconnect.
    pub transfer_failure_limit: u32,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            service_id: "skein.mesh".to_string(),
            bounds: DegreeBounds::default(),
            maintenance_interval: Duration::from_secs(5),
            gossip_base_interval: GOSSIP_BASE_INTERVAL,
            gossip_jitter: GOSSIP_JITTER,
            reshuffle_interval: Duration::from_secs(30),
            purge_interval: Duration::from_secs(60),
            registry_retention: Duration::from_secs(300),
            recency_window: Duration::from_secs(300),
            dedup_ttl: Duration::from_secs(300),
            dedup_sweep_interval: Duration::from_secs(10),
            pending_expiry: Duration::from_secs(60),
            transfer_failure_limit: 3,
        }
    }
}

// ── Commands (app → runtime) ──────────────────────────────────────────

/// Commands the application sends to the mesh event loop.
#[derive(Debug)]
pub enum MeshCommand {
    /// Inject a command for flooding across the mesh.
    Broadcast { command: String },
    /// Request a read-only status snapshot.
    GetStatus { reply: oneshot::Sender<MeshStatus> },
    /// Graceful shutdown: disconnect everyone, stop all timers.
    Shutdown,
}

// ── Events (runtime → app) ────────────────────────────────────────────

/// Events the application may want to observe.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    /// A first-seen message carrying a command arrived.
    Command {
        command: String,
        origin: Option<PeerId>,
    },
    /// Discovery saw a peer for the first time this session.
    PeerDiscovered { peer: PeerId },
    /// A direct connection was established.
    PeerConnected { peer: PeerId },
    /// A direct connection was lost (transport-reported or proactive).
    PeerDisconnected { peer: PeerId },
    /// The runtime hit a non-fatal error.
    Error { description: String },
}

/// Read-only snapshot for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshStatus {
    pub local_id: PeerId,
    pub direct_peer_count: usize,
    pub known_peer_count: usize,
}

// ── MeshHandle (app-facing API) ───────────────────────────────────────

/// Handle to a running mesh session. Cheap to clone; all methods are
/// non-blocking channel sends.
#[derive(Debug, Clone)]
pub struct MeshHandle {
    cmd_tx: mpsc::Sender<MeshCommand>,
    local_id: PeerId,
}

impl MeshHandle {
    /// This node's identity.
    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// Flood a command across the mesh.
    pub async fn broadcast(&self, command: impl Into<String>) -> Result<(), SkeinError> {
        self.cmd_tx
            .send(MeshCommand::Broadcast {
                command: command.into(),
            })
            .await
            .map_err(|_| SkeinError::ServiceStopped)
    }

    /// Current status snapshot.
    pub async fn status(&self) -> Result<MeshStatus, SkeinError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(MeshCommand::GetStatus { reply: tx })
            .await
            .map_err(|_| SkeinError::ServiceStopped)?;
        rx.await.map_err(|_| SkeinError::ServiceStopped)
    }

    /// Graceful shutdown.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(MeshCommand::Shutdown).await;
    }
}

// ── MeshChannels ──────────────────────────────────────────────────────

/// Channels returned to the application when the mesh starts.
pub struct MeshChannels {
    /// Handle to send commands to the runtime.
    pub handle: MeshHandle,
    /// Receive mesh events (commands, peer lifecycle, errors).
    pub events: mpsc::Receiver<MeshEvent>,
}

// ── MeshService ───────────────────────────────────────────────────────

/// The mesh service — spawn it and communicate via channels.
pub struct MeshService;

impl MeshService {
    /// Create and start a mesh session.
    ///
    /// Takes ownership of the transport and its event stream. Spawns the
    /// event loop as a tokio task; dropping into `Shutdown` tears down all
    /// timers with it.
    pub fn spawn<T: Transport + 'static>(
        local_id: PeerId,
        transport: T,
        transport_events: mpsc::Receiver<TransportEvent>,
        config: MeshConfig,
    ) -> MeshChannels {
        let (cmd_tx, cmd_rx) = mpsc::channel::<MeshCommand>(64);
        let (event_tx, event_rx) = mpsc::channel::<MeshEvent>(64);

        tokio::spawn(r#loop::mesh_loop(
            transport,
            transport_events,
            cmd_rx,
            event_tx,
            local_id.clone(),
            config,
        ));

        MeshChannels {
            handle: MeshHandle { cmd_tx, local_id },
            events: event_rx,
        }
    }
}
