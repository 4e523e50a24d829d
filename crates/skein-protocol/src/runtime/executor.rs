//! Effect executor — the only place that touches I/O.
//!
//! Takes a list of `MeshEffect` and executes them concretely:
//! - Send -> transport.send()
//! - RequestConnection / AcceptConnection / RejectConnection / Disconnect
//!   -> the matching transport primitive
//! - Emit -> event_tx

use tokio::sync::mpsc;
use tracing::warn;

use crate::types::PeerId;

use super::effect::MeshEffect;
use super::transport::Transport;
use super::MeshEvent;

/// Execute a list of effects against the transport and event channel.
pub(super) async fn execute_effects<T: Transport>(
    effects: Vec<MeshEffect>,
    transport: &T,
    event_tx: &mpsc::Sender<MeshEvent>,
    local_id: &PeerId,
) {
    for effect in effects {
        match effect {
            MeshEffect::Send { targets, message } => match message.to_bytes() {
                Ok(bytes) => {
                    if let Err(e) = transport.send(&targets, &bytes).await {
                        report(event_tx, format!("send to {} peers failed: {e}", targets.len()));
                    }
                }
                Err(e) => {
                    report(event_tx, format!("serialize message failed: {e}"));
                }
            },
            MeshEffect::RequestConnection(peer) => {
                // Failure here is recovered by pending expiry + backoff.
                if let Err(e) = transport.request_connection(local_id, &peer).await {
                    warn!("request connection to {peer} failed: {e}");
                }
            }
            MeshEffect::AcceptConnection(peer) => {
                if let Err(e) = transport.accept_connection(&peer).await {
                    warn!("accept connection from {peer} failed: {e}");
                }
            }
            MeshEffect::RejectConnection(peer) => {
                if let Err(e) = transport.reject_connection(&peer).await {
                    warn!("reject connection from {peer} failed: {e}");
                }
            }
            MeshEffect::Disconnect(peer) => {
                if let Err(e) = transport.disconnect(&peer).await {
                    warn!("disconnect from {peer} failed: {e}");
                }
            }
            MeshEffect::Emit(event) => {
                // try_send: never block the loop on a slow consumer.
                let _ = event_tx.try_send(event);
            }
        }
    }
}

fn report(event_tx: &mpsc::Sender<MeshEvent>, description: String) {
    warn!("{description}");
    let _ = event_tx.try_send(MeshEvent::Error { description });
}
