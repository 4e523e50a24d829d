/// The transport seam.
///
/// The physical layer (radio discovery, connection negotiation, byte
/// delivery) lives outside this crate. The mesh only decides *when* to use
/// these primitives and *what* to send; results arrive asynchronously as
/// `TransportEvent`s on a channel the runtime consumes.
use crate::types::PeerId;

/// Primitives the mesh drives. Implemented by the embedding application
/// over its radio stack; by `mock::MockTransport` in tests.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Advertise the local name under a service id.
    async fn advertise(&self, local_id: &PeerId, service_id: &str) -> Result<(), String>;

    /// Start discovering peers advertising the service id.
    async fn discover(&self, service_id: &str) -> Result<(), String>;

    /// Request an outbound connection to a peer.
    async fn request_connection(&self, local_id: &PeerId, peer: &PeerId) -> Result<(), String>;

    /// Accept an inbound connection request.
    async fn accept_connection(&self, peer: &PeerId) -> Result<(), String>;

    /// Reject an inbound connection request.
    async fn reject_connection(&self, peer: &PeerId) -> Result<(), String>;

    /// Tear down an established connection.
    async fn disconnect(&self, peer: &PeerId) -> Result<(), String>;

    /// Send raw bytes to each of the listed peers.
    async fn send(&self, targets: &[PeerId], data: &[u8]) -> Result<(), String>;
}

/// Result of one payload transfer, as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Success,
    Failure,
    Canceled,
}

/// Everything the transport can tell us, as one tagged stream consumed by
/// a single dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Discovery saw a peer advertising our service.
    EndpointFound { peer: PeerId },
    /// Discovery can no longer see the peer.
    EndpointLost { peer: PeerId },
    /// A remote peer asked to connect to us.
    ConnectionRequested { peer: PeerId },
    /// An attempt (inbound accept or outbound request) resolved.
    ConnectionResult { peer: PeerId, success: bool },
    /// An established connection dropped.
    Disconnected { peer: PeerId },
    /// Bytes arrived from a connected peer.
    PayloadReceived { from: PeerId, data: Vec<u8> },
    /// A payload transfer to a peer finished (or didn't).
    TransferUpdate {
        peer: PeerId,
        outcome: TransferOutcome,
    },
}

// ── MockTransport (test support) ────────────────────────────────────

pub mod mock {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::message::NetworkMessage;

    /// One recorded call against the mock.
    #[derive(Debug, Clone, PartialEq)]
    pub enum MockCall {
        Advertise { local_id: PeerId, service_id: String },
        Discover { service_id: String },
        RequestConnection { peer: PeerId },
        AcceptConnection { peer: PeerId },
        RejectConnection { peer: PeerId },
        Disconnect { peer: PeerId },
        Send { targets: Vec<PeerId>, data: Vec<u8> },
    }

    /// Transport that records every call for verification.
    #[derive(Debug, Clone, Default)]
    pub struct MockTransport {
        calls: Arc<Mutex<Vec<MockCall>>>,
        fail_sends: Arc<Mutex<bool>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn calls(&self) -> Vec<MockCall> {
            self.calls.lock().unwrap().clone()
        }

        /// All sent payloads, decoded.
        pub fn sent_messages(&self) -> Vec<(Vec<PeerId>, NetworkMessage)> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    MockCall::Send { targets, data } => {
                        NetworkMessage::from_bytes(&data).ok().map(|m| (targets, m))
                    }
                    _ => None,
                })
                .collect()
        }

        pub fn set_fail_sends(&self, fail: bool) {
            *self.fail_sends.lock().unwrap() = fail;
        }

        pub fn clear(&self) {
            self.calls.lock().unwrap().clear();
        }

        fn record(&self, call: MockCall) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait::async_trait]
    impl Transport for MockTransport {
        async fn advertise(&self, local_id: &PeerId, service_id: &str) -> Result<(), String> {
            self.record(MockCall::Advertise {
                local_id: local_id.clone(),
                service_id: service_id.to_string(),
            });
            Ok(())
        }

        async fn discover(&self, service_id: &str) -> Result<(), String> {
            self.record(MockCall::Discover {
                service_id: service_id.to_string(),
            });
            Ok(())
        }

        async fn request_connection(&self, _local_id: &PeerId, peer: &PeerId) -> Result<(), String> {
            self.record(MockCall::RequestConnection { peer: peer.clone() });
            Ok(())
        }

        async fn accept_connection(&self, peer: &PeerId) -> Result<(), String> {
            self.record(MockCall::AcceptConnection { peer: peer.clone() });
            Ok(())
        }

        async fn reject_connection(&self, peer: &PeerId) -> Result<(), String> {
            self.record(MockCall::RejectConnection { peer: peer.clone() });
            Ok(())
        }

        async fn disconnect(&self, peer: &PeerId) -> Result<(), String> {
            self.record(MockCall::Disconnect { peer: peer.clone() });
            Ok(())
        }

        async fn send(&self, targets: &[PeerId], data: &[u8]) -> Result<(), String> {
            if *self.fail_sends.lock().unwrap() {
                return Err("mock: send failed".to_string());
            }
            self.record(MockCall::Send {
                targets: targets.to_vec(),
                data: data.to_vec(),
            });
            Ok(())
        }
    }
}
