/// The mesh event loop.
///
/// A single async task that owns all mutable mesh state and multiplexes
/// over transport events, application commands, and timers. Dropping out
/// of the loop tears every timer down with it.
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::types::{now_ms, PeerId};

use super::executor::execute_effects;
use super::state::MeshState;
use super::transport::{Transport, TransportEvent};
use super::{MeshCommand, MeshConfig, MeshEvent};

pub(super) async fn mesh_loop<T: Transport>(
    transport: T,
    mut transport_rx: mpsc::Receiver<TransportEvent>,
    mut cmd_rx: mpsc::Receiver<MeshCommand>,
    event_tx: mpsc::Sender<MeshEvent>,
    local_id: PeerId,
    config: MeshConfig,
) {
    let mut state = MeshState::new(local_id.clone(), config.clone());

    // ── Go visible ──────────────────────────────────────────────────
    if let Err(e) = transport.advertise(&local_id, &config.service_id).await {
        warn!("advertising failed: {e}");
        let _ = event_tx.try_send(MeshEvent::Error {
            description: format!("advertising failed: {e}"),
        });
    }
    if let Err(e) = transport.discover(&config.service_id).await {
        warn!("discovery failed: {e}");
        let _ = event_tx.try_send(MeshEvent::Error {
            description: format!("discovery failed: {e}"),
        });
    }

    // ── Timers ──────────────────────────────────────────────────────
    let mut maintenance = tokio::time::interval(config.maintenance_interval);
    let mut reshuffle = tokio::time::interval(config.reshuffle_interval);
    let mut purge = tokio::time::interval(config.purge_interval);
    let mut dedup_sweep = tokio::time::interval(config.dedup_sweep_interval);

    // Skip the immediate first tick on all intervals
    maintenance.tick().await;
    reshuffle.tick().await;
    purge.tick().await;
    dedup_sweep.tick().await;

    // Gossip runs on a jittered schedule rather than a fixed interval.
    let mut next_gossip = Instant::now() + state.gossip_delay();

    info!("mesh loop started as {local_id}");

    loop {
        tokio::select! {
            // ── 1. Transport events ─────────────────────────────
            event = transport_rx.recv() => {
                let Some(event) = event else {
                    info!("transport event stream closed, stopping");
                    break;
                };
                let effects = state.handle_transport_event(event, now_ms());
                execute_effects(effects, &transport, &event_tx, &local_id).await;
            }

            // ── 2. Commands from the application ────────────────
            Some(cmd) = cmd_rx.recv() => {
                match cmd {
                    MeshCommand::Broadcast { command } => {
                        let effects = state.handle_broadcast(command, now_ms());
                        execute_effects(effects, &transport, &event_tx, &local_id).await;
                    }
                    MeshCommand::GetStatus { reply } => {
                        let _ = reply.send(state.status());
                    }
                    MeshCommand::Shutdown => {
                        let effects = state.shutdown();
                        execute_effects(effects, &transport, &event_tx, &local_id).await;
                        break;
                    }
                }
            }

            // ── 3. Timers ───────────────────────────────────────
            _ = maintenance.tick() => {
                let effects = state.tick_maintenance(now_ms());
                execute_effects(effects, &transport, &event_tx, &local_id).await;
            }

            _ = tokio::time::sleep_until(next_gossip) => {
                let effects = state.tick_gossip(now_ms());
                execute_effects(effects, &transport, &event_tx, &local_id).await;
                next_gossip = Instant::now() + state.gossip_delay();
            }

            _ = reshuffle.tick() => {
                let effects = state.tick_reshuffle(now_ms());
                execute_effects(effects, &transport, &event_tx, &local_id).await;
            }

            _ = purge.tick() => {
                let effects = state.tick_purge(now_ms());
                execute_effects(effects, &transport, &event_tx, &local_id).await;
            }

            _ = dedup_sweep.tick() => {
                let effects = state.tick_dedup_sweep(now_ms());
                execute_effects(effects, &transport, &event_tx, &local_id).await;
            }
        }
    }

    info!("mesh loop stopped");
}
