//! In-process transport fabric.
//!
//! Plays the role of the radio stack for a whole simulated room of
//! devices: discovery visibility, connection negotiation, and byte
//! delivery between registered nodes, reported back through each node's
//! `TransportEvent` channel.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;

use skein_protocol::{PeerId, TransferOutcome, Transport, TransportEvent};

#[derive(Default)]
struct Fabric {
    /// Event channel per registered node.
    nodes: HashMap<PeerId, mpsc::Sender<TransportEvent>>,
    advertised: HashSet<PeerId>,
    discovering: HashSet<PeerId>,
    /// Established links, stored as normalized pairs.
    links: HashSet<(PeerId, PeerId)>,
    /// In-flight requests: (requester, target).
    pending: HashSet<(PeerId, PeerId)>,
}

fn link_key(a: &PeerId, b: &PeerId) -> (PeerId, PeerId) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

impl Fabric {
    fn deliver(&self, to: &PeerId, event: TransportEvent) {
        if let Some(tx) = self.nodes.get(to) {
            let _ = tx.try_send(event);
        }
    }

    fn linked(&self, a: &PeerId, b: &PeerId) -> bool {
        self.links.contains(&link_key(a, b))
    }
}

/// Shared handle to the simulated room.
#[derive(Clone, Default)]
pub struct SimNet {
    inner: Arc<Mutex<Fabric>>,
}

impl SimNet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node and return the event stream its mesh will consume.
    pub fn register(&self, id: PeerId) -> mpsc::Receiver<TransportEvent> {
        let (tx, rx) = mpsc::channel(256);
        self.inner.lock().unwrap().nodes.insert(id, tx);
        rx
    }

    /// A transport bound to one registered node.
    pub fn transport(&self, local: PeerId) -> SimTransport {
        SimTransport {
            inner: self.inner.clone(),
            local,
        }
    }

    /// Pull a node's plug: links drop, neighbors get `Disconnected`, and
    /// discovery forgets it.
    pub fn crash(&self, id: &PeerId) {
        let mut fabric = self.inner.lock().unwrap();
        fabric.nodes.remove(id);
        fabric.advertised.remove(id);
        fabric.discovering.remove(id);
        fabric.pending.retain(|(a, b)| a != id && b != id);

        let broken: Vec<(PeerId, PeerId)> = fabric
            .links
            .iter()
            .filter(|(a, b)| a == id || b == id)
            .cloned()
            .collect();
        for link in broken {
            fabric.links.remove(&link);
            let survivor = if &link.0 == id { &link.1 } else { &link.0 };
            fabric.deliver(survivor, TransportEvent::Disconnected { peer: id.clone() });
            fabric.deliver(survivor, TransportEvent::EndpointLost { peer: id.clone() });
        }
    }

    /// Current link count (for reporting).
    pub fn link_count(&self) -> usize {
        self.inner.lock().unwrap().links.len()
    }
}

/// One node's view of the fabric.
#[derive(Clone)]
pub struct SimTransport {
    inner: Arc<Mutex<Fabric>>,
    local: PeerId,
}

#[async_trait::async_trait]
impl Transport for SimTransport {
    async fn advertise(&self, local_id: &PeerId, _service_id: &str) -> Result<(), String> {
        let mut fabric = self.inner.lock().unwrap();
        fabric.advertised.insert(local_id.clone());
        // Everyone already discovering sees the new arrival.
        for watcher in fabric.discovering.clone() {
            if &watcher != local_id {
                fabric.deliver(
                    &watcher,
                    TransportEvent::EndpointFound {
                        peer: local_id.clone(),
                    },
                );
            }
        }
        Ok(())
    }

    async fn discover(&self, _service_id: &str) -> Result<(), String> {
        let mut fabric = self.inner.lock().unwrap();
        fabric.discovering.insert(self.local.clone());
        for seen in fabric.advertised.clone() {
            if seen != self.local {
                fabric.deliver(&self.local, TransportEvent::EndpointFound { peer: seen });
            }
        }
        Ok(())
    }

    async fn request_connection(&self, local_id: &PeerId, peer: &PeerId) -> Result<(), String> {
        let mut fabric = self.inner.lock().unwrap();
        if !fabric.nodes.contains_key(peer) {
            return Err(format!("unknown endpoint {peer}"));
        }
        debug!("{local_id} requests connection to {peer}");
        fabric.pending.insert((local_id.clone(), peer.clone()));
        fabric.deliver(
            peer,
            TransportEvent::ConnectionRequested {
                peer: local_id.clone(),
            },
        );
        Ok(())
    }

    async fn accept_connection(&self, peer: &PeerId) -> Result<(), String> {
        let mut fabric = self.inner.lock().unwrap();
        if !fabric.pending.remove(&(peer.clone(), self.local.clone())) {
            return Err(format!("no pending request from {peer}"));
        }
        fabric.links.insert(link_key(&self.local, peer));
        debug!("{} accepted {peer}", self.local);
        fabric.deliver(
            peer,
            TransportEvent::ConnectionResult {
                peer: self.local.clone(),
                success: true,
            },
        );
        fabric.deliver(
            &self.local,
            TransportEvent::ConnectionResult {
                peer: peer.clone(),
                success: true,
            },
        );
        Ok(())
    }

    async fn reject_connection(&self, peer: &PeerId) -> Result<(), String> {
        let mut fabric = self.inner.lock().unwrap();
        fabric.pending.remove(&(peer.clone(), self.local.clone()));
        fabric.deliver(
            peer,
            TransportEvent::ConnectionResult {
                peer: self.local.clone(),
                success: false,
            },
        );
        Ok(())
    }

    async fn disconnect(&self, peer: &PeerId) -> Result<(), String> {
        let mut fabric = self.inner.lock().unwrap();
        if fabric.links.remove(&link_key(&self.local, peer)) {
            fabric.deliver(
                peer,
                TransportEvent::Disconnected {
                    peer: self.local.clone(),
                },
            );
            fabric.deliver(
                &self.local,
                TransportEvent::Disconnected { peer: peer.clone() },
            );
        }
        Ok(())
    }

    async fn send(&self, targets: &[PeerId], data: &[u8]) -> Result<(), String> {
        let fabric = self.inner.lock().unwrap();
        for target in targets {
            if fabric.linked(&self.local, target) {
                fabric.deliver(
                    target,
                    TransportEvent::PayloadReceived {
                        from: self.local.clone(),
                        data: data.to_vec(),
                    },
                );
                fabric.deliver(
                    &self.local,
                    TransportEvent::TransferUpdate {
                        peer: target.clone(),
                        outcome: TransferOutcome::Success,
                    },
                );
            } else {
                fabric.deliver(
                    &self.local,
                    TransportEvent::TransferUpdate {
                        peer: target.clone(),
                        outcome: TransferOutcome::Failure,
                    },
                );
            }
        }
        Ok(())
    }
}
