/// Complete mesh state — pure logic, zero async, zero network.
///
/// Every `handle_*` / `tick_*` method returns `Vec<MeshEffect>`. No method
/// touches the transport or the channels, which makes the whole decision
/// surface testable with plain synchronous calls.
use std::collections::BTreeSet;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::dedup::DedupCache;
use crate::gossip::{jittered_delay, GossipEngine};
use crate::message::NetworkMessage;
use crate::registry::EndpointRegistry;
use crate::topology::{TopologyAction, TopologyController};
use crate::types::PeerId;

use super::effect::MeshEffect;
use super::transport::{TransferOutcome, TransportEvent};
use super::{MeshConfig, MeshEvent, MeshStatus};

pub struct MeshState {
    local_id: PeerId,
    config: MeshConfig,

    registry: EndpointRegistry,
    dedup: DedupCache,
    gossip: GossipEngine,
    topology: TopologyController,

    /// Peers currently visible via discovery.
    discovered: BTreeSet<PeerId>,
}

impl MeshState {
    pub fn new(local_id: PeerId, config: MeshConfig) -> Self {
        Self {
            registry: EndpointRegistry::new(),
            dedup: DedupCache::new(config.dedup_ttl.as_millis() as u64),
            gossip: GossipEngine::new(local_id.clone()),
            topology: TopologyController::new(config.bounds),
            discovered: BTreeSet::new(),
            local_id,
            config,
        }
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    /// Next gossip delay: base plus fresh jitter, so co-located devices
    /// drift apart instead of bursting together.
    pub fn gossip_delay(&self) -> Duration {
        jittered_delay(self.config.gossip_base_interval, self.config.gossip_jitter)
    }

    pub fn status(&self) -> MeshStatus {
        MeshStatus {
            local_id: self.local_id.clone(),
            direct_peer_count: self.registry.direct_count(),
            known_peer_count: self.registry.known_count(),
        }
    }

    // ── Transport event dispatch ─────────────────────────────────────

    pub fn handle_transport_event(&mut self, event: TransportEvent, now: u64) -> Vec<MeshEffect> {
        match event {
            TransportEvent::EndpointFound { peer } => self.handle_endpoint_found(peer, now),
            TransportEvent::EndpointLost { peer } => self.handle_endpoint_lost(&peer),
            TransportEvent::ConnectionRequested { peer } => {
                self.handle_connection_requested(peer, now)
            }
            TransportEvent::ConnectionResult { peer, success } => {
                self.handle_connection_result(peer, success, now)
            }
            TransportEvent::Disconnected { peer } => self.handle_disconnected(peer, now),
            TransportEvent::PayloadReceived { from, data } => {
                self.handle_payload_received(from, &data, now)
            }
            TransportEvent::TransferUpdate { peer, outcome } => {
                self.handle_transfer_update(peer, outcome, now)
            }
        }
    }

    /// Discovery saw a peer. Raw discovery is not fully trustworthy, so
    /// the registry only gets a touch, not a distance.
    pub fn handle_endpoint_found(&mut self, peer: PeerId, now: u64) -> Vec<MeshEffect> {
        self.registry.touch(&peer, now);
        if self.discovered.insert(peer.clone()) {
            debug!("discovery: found {peer}");
            return vec![MeshEffect::Emit(MeshEvent::PeerDiscovered { peer })];
        }
        Vec::new()
    }

    pub fn handle_endpoint_lost(&mut self, peer: &PeerId) -> Vec<MeshEffect> {
        debug!("discovery: lost {peer}");
        self.discovered.remove(peer);
        Vec::new()
    }

    /// Inbound connection request — rule: accept under the cap, make room
    /// by pruning a redundant peer at the cap, otherwise reject.
    pub fn handle_connection_requested(&mut self, peer: PeerId, now: u64) -> Vec<MeshEffect> {
        self.registry.touch(&peer, now);
        let actions = self.topology.handle_inbound_request(&peer, &self.registry, now);
        self.actions_to_effects(actions)
    }

    pub fn handle_connection_result(
        &mut self,
        peer: PeerId,
        success: bool,
        now: u64,
    ) -> Vec<MeshEffect> {
        self.topology.clear_pending(&peer);

        if !success {
            info!("connection to {peer} failed");
            self.topology.note_connect_failure(&peer, now);
            return Vec::new();
        }

        info!("connected to {peer}");
        self.registry.mark_direct(&peer, now);
        self.topology.note_connect_success(&peer);

        let mut effects = vec![MeshEffect::Emit(MeshEvent::PeerConnected {
            peer: peer.clone(),
        })];

        // Simultaneous accepts can overshoot the cap; shed a redundant
        // peer if one is known.
        if self.registry.direct_count() > self.topology.bounds().max {
            if let Some(redundant) = self.topology.find_redundant_peer(&self.registry) {
                if redundant != peer {
                    info!("over capacity after connect, pruning {redundant}");
                    effects.push(MeshEffect::Disconnect(redundant));
                }
            }
        }

        effects
    }

    pub fn handle_disconnected(&mut self, peer: PeerId, now: u64) -> Vec<MeshEffect> {
        let was_direct = self
            .registry
            .endpoint(&peer)
            .map(|e| e.is_direct())
            .unwrap_or(false);

        self.topology.clear_pending(&peer);
        self.registry.mark_not_direct(&peer, now);

        let mut effects = Vec::new();
        if was_direct {
            info!("disconnected from {peer}");
            effects.push(MeshEffect::Emit(MeshEvent::PeerDisconnected { peer }));
        }

        // Reconnect aggressively: don't wait for the next maintenance tick
        // when we just dropped below the minimum degree.
        if self.registry.direct_count() < self.topology.bounds().min {
            let actions = self.topology.heal(&self.registry, &self.discovered, now);
            effects.extend(self.actions_to_effects(actions));
        }

        effects
    }

    pub fn handle_transfer_update(
        &mut self,
        peer: PeerId,
        outcome: TransferOutcome,
        now: u64,
    ) -> Vec<MeshEffect> {
        if outcome == TransferOutcome::Success {
            self.registry.reset_transfer_failures(&peer, now);
            return Vec::new();
        }

        let failures = self.registry.record_transfer_failure(&peer, now);
        debug!("transfer to {peer} failed ({failures} consecutive)");
        if failures < self.config.transfer_failure_limit {
            return Vec::new();
        }

        // Escalate: drop the peer proactively instead of waiting for the
        // transport to notice.
        info!("{failures} consecutive transfer failures, disconnecting {peer}");
        self.registry.mark_not_direct(&peer, now);
        self.registry.reset_transfer_failures(&peer, now);
        vec![
            MeshEffect::Disconnect(peer.clone()),
            MeshEffect::Emit(MeshEvent::PeerDisconnected { peer }),
        ]
    }

    /// Incoming bytes from a connected peer.
    pub fn handle_payload_received(
        &mut self,
        from: PeerId,
        data: &[u8],
        now: u64,
    ) -> Vec<MeshEffect> {
        let msg = match NetworkMessage::from_bytes(data) {
            Ok(m) => m,
            Err(e) => {
                warn!("malformed payload from {from}: {e}");
                return Vec::new();
            }
        };

        self.registry.touch(&from, now);

        // The normal, expected case in a flood — not an error.
        if !self.dedup.is_first_seen(&msg.id, now) {
            debug!("duplicate message {} from {from}", msg.id);
            return Vec::new();
        }

        self.gossip.process_message(&msg, &mut self.registry, now);

        let mut effects = Vec::new();
        if let Some(command) = &msg.command {
            info!("command received: {command}");
            effects.push(MeshEffect::Emit(MeshEvent::Command {
                command: command.clone(),
                origin: msg.origin().cloned(),
            }));
        }

        effects.extend(self.forward(msg, Some(&from), now));
        effects
    }

    // ── App commands ─────────────────────────────────────────────────

    /// Inject a locally originated command into the flood.
    pub fn handle_broadcast(&mut self, command: String, now: u64) -> Vec<MeshEffect> {
        let msg = NetworkMessage::command(command);
        debug!("broadcast {}", msg.id);
        self.dedup.is_first_seen(&msg.id, now);
        self.forward(msg, None, now)
    }

    /// Append the local breadcrumb and send to every direct peer that has
    /// not already carried the message (and is not the peer it came from).
    fn forward(
        &mut self,
        mut msg: NetworkMessage,
        received_from: Option<&PeerId>,
        now: u64,
    ) -> Vec<MeshEffect> {
        msg.push_breadcrumb(self.local_id.clone(), now);

        let targets: Vec<PeerId> = self
            .registry
            .direct_ids()
            .into_iter()
            .filter(|p| received_from != Some(p) && !msg.has_visited(p))
            .collect();

        if targets.is_empty() {
            return Vec::new();
        }
        debug!("forwarding {} to {} peers", msg.id, targets.len());
        vec![MeshEffect::Send {
            targets,
            message: msg,
        }]
    }

    // ── Ticks ────────────────────────────────────────────────────────

    /// Heal pass: expire stale connection attempts, then close the gap to
    /// the minimum degree.
    pub fn tick_maintenance(&mut self, now: u64) -> Vec<MeshEffect> {
        let expiry = self.config.pending_expiry.as_millis() as u64;
        self.topology.expire_stale_pending(expiry, now);

        let actions = self.topology.heal(&self.registry, &self.discovered, now);
        self.actions_to_effects(actions)
    }

    /// Announce the local neighbor set if anyone is listening.
    pub fn tick_gossip(&mut self, now: u64) -> Vec<MeshEffect> {
        let neighbors = self.registry.direct_ids();
        if neighbors.is_empty() {
            return Vec::new();
        }

        let msg = self.gossip.build_announce(neighbors.clone(), now);
        debug!("gossip announce {}", msg.id);
        self.dedup.is_first_seen(&msg.id, now);

        let targets: Vec<PeerId> = neighbors.into_iter().collect();
        vec![MeshEffect::Send {
            targets,
            message: msg,
        }]
    }

    /// Reshuffle pass: trade the most redundant direct peer for the worst
    /// distant node.
    pub fn tick_reshuffle(&mut self, now: u64) -> Vec<MeshEffect> {
        let recency = self.config.recency_window.as_millis() as u64;
        let actions = self.topology.reshuffle(&self.registry, recency, now);
        self.actions_to_effects(actions)
    }

    pub fn tick_purge(&mut self, now: u64) -> Vec<MeshEffect> {
        let retention = self.config.registry_retention.as_millis() as u64;
        self.registry.purge_stale(retention, now);
        Vec::new()
    }

    pub fn tick_dedup_sweep(&mut self, now: u64) -> Vec<MeshEffect> {
        self.dedup.purge_expired(now);
        Vec::new()
    }

    // ── Shutdown ─────────────────────────────────────────────────────

    /// Disconnect everyone and forget this session's state; a restarted
    /// mesh starts from scratch.
    pub fn shutdown(&mut self) -> Vec<MeshEffect> {
        let effects: Vec<MeshEffect> = self
            .registry
            .direct_ids()
            .into_iter()
            .map(MeshEffect::Disconnect)
            .collect();

        self.registry.clear();
        self.dedup.clear();
        self.discovered.clear();
        self.topology.clear();
        effects
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn actions_to_effects(&self, actions: Vec<TopologyAction>) -> Vec<MeshEffect> {
        actions
            .into_iter()
            .map(|action| match action {
                TopologyAction::RequestConnection(peer) => MeshEffect::RequestConnection(peer),
                TopologyAction::Accept(peer) => MeshEffect::AcceptConnection(peer),
                TopologyAction::Reject(peer) => MeshEffect::RejectConnection(peer),
                TopologyAction::Disconnect(peer) => MeshEffect::Disconnect(peer),
            })
            .collect()
    }
}
