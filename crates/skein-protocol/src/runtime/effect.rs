use crate::message::NetworkMessage;
use crate::types::PeerId;

use super::MeshEvent;

/// Intention produced by the pure logic in `MeshState`.
///
/// Every `handle_*` / `tick_*` method returns `Vec<MeshEffect>`; the loop
/// then executes them against the transport and outbound channels.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshEffect {
    /// Send an encoded message to each listed peer.
    Send {
        targets: Vec<PeerId>,
        message: NetworkMessage,
    },

    /// Request an outbound connection.
    RequestConnection(PeerId),

    /// Accept an inbound connection request.
    AcceptConnection(PeerId),

    /// Reject an inbound connection request.
    RejectConnection(PeerId),

    /// Tear down a direct connection.
    Disconnect(PeerId),

    /// Surface an event to the application.
    Emit(MeshEvent),
}
