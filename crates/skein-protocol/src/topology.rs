/// Topology decisions for the degree-bounded mesh.
///
/// Pure decision engine — reads the registry, returns `TopologyAction`s
/// for the runtime to execute. No I/O, no transport dependency.
///
/// Each node holds between `min` and `max` direct connections. Redundancy
/// scoring plus the periodic reshuffle steer the random graph toward global
/// reachability; a purely greedy degree rule would converge to local
/// cliques and fragment the mesh.
use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info};

use crate::registry::EndpointRegistry;
use crate::types::PeerId;

/// First retry delay after a failed connection attempt.
const CONNECT_BACKOFF_BASE_MS: u64 = 5_000;

/// Ceiling for the exponential backoff.
const CONNECT_BACKOFF_MAX_MS: u64 = 300_000;

/// Direct peers considered "near" during reshuffle target selection; only
/// endpoints farther than this (or of unknown distance) are worth chasing.
const NEAR_DISTANCE: u32 = 2;

/// Degree targets for the connection graph.
#[derive(Debug, Clone, Copy)]
pub struct DegreeBounds {
    /// Below this, actively request new connections.
    pub min: usize,
    /// Hard cap dictated by the transport/hardware.
    pub max: usize,
    /// Ideal degree used for pruning decisions.
    pub target: usize,
}

impl Default for DegreeBounds {
    fn default() -> Self {
        Self {
            min: 2,
            max: 7,
            target: 3,
        }
    }
}

/// What the runtime should do to the connection graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyAction {
    /// Request an outbound connection to this peer.
    RequestConnection(PeerId),
    /// Accept an inbound connection request.
    Accept(PeerId),
    /// Reject an inbound connection request.
    Reject(PeerId),
    /// Tear down a direct connection.
    Disconnect(PeerId),
}

#[derive(Debug)]
struct Backoff {
    failures: u32,
    retry_at: u64,
}

/// The decision engine: accept/reject against capacity, heal below the
/// minimum, prune redundant peers, reshuffle toward distant nodes.
#[derive(Debug)]
pub struct TopologyController {
    bounds: DegreeBounds,
    /// Connection attempts in flight (inbound accepts and outbound
    /// requests), with the ms they were noted. Prevents duplicate
    /// simultaneous attempts to the same id.
    pending: HashMap<PeerId, u64>,
    backoff: HashMap<PeerId, Backoff>,
}

impl TopologyController {
    pub fn new(bounds: DegreeBounds) -> Self {
        Self {
            bounds,
            pending: HashMap::new(),
            backoff: HashMap::new(),
        }
    }

    pub fn bounds(&self) -> DegreeBounds {
        self.bounds
    }

    pub fn is_pending(&self, peer: &PeerId) -> bool {
        self.pending.contains_key(peer)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn note_pending(&mut self, peer: PeerId, now: u64) {
        self.pending.insert(peer, now);
    }

    pub fn clear_pending(&mut self, peer: &PeerId) {
        self.pending.remove(peer);
    }

    /// Treat attempts that never resolved as failed, so the degree logic
    /// cannot deadlock on a marker the transport forgot about.
    pub fn expire_stale_pending(&mut self, expiry_ms: u64, now: u64) -> Vec<PeerId> {
        let expired: Vec<PeerId> = self
            .pending
            .iter()
            .filter(|(_, since)| **since + expiry_ms <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for peer in &expired {
            info!("pending connection to {peer} never resolved, treating as failed");
            self.pending.remove(peer);
            self.note_connect_failure(peer, now);
        }
        expired
    }

    /// Record a failed attempt: next retry is delayed exponentially.
    pub fn note_connect_failure(&mut self, peer: &PeerId, now: u64) {
        let entry = self.backoff.entry(peer.clone()).or_insert(Backoff {
            failures: 0,
            retry_at: 0,
        });
        entry.failures += 1;
        let delay = CONNECT_BACKOFF_BASE_MS
            .saturating_mul(1 << (entry.failures - 1).min(16))
            .min(CONNECT_BACKOFF_MAX_MS);
        entry.retry_at = now + delay;
        debug!("connect backoff for {peer}: {delay}ms (attempt {})", entry.failures);
    }

    pub fn note_connect_success(&mut self, peer: &PeerId) {
        self.backoff.remove(peer);
    }

    fn in_backoff(&self, peer: &PeerId, now: u64) -> bool {
        self.backoff
            .get(peer)
            .map(|b| b.retry_at > now)
            .unwrap_or(false)
    }

    /// Rule: accept inbound unconditionally while under the hard cap. At
    /// the cap, evict a redundant peer to make room; with nothing
    /// redundant, reject.
    pub fn handle_inbound_request(
        &mut self,
        peer: &PeerId,
        registry: &EndpointRegistry,
        now: u64,
    ) -> Vec<TopologyAction> {
        if registry.direct_count() < self.bounds.max {
            self.note_pending(peer.clone(), now);
            return vec![TopologyAction::Accept(peer.clone())];
        }
        if let Some(redundant) = self.find_redundant_peer(registry) {
            info!("at capacity, pruning redundant {redundant} to admit {peer}");
            self.note_pending(peer.clone(), now);
            return vec![
                TopologyAction::Disconnect(redundant),
                TopologyAction::Accept(peer.clone()),
            ];
        }
        info!("at capacity with nothing redundant, rejecting {peer}");
        vec![TopologyAction::Reject(peer.clone())]
    }

    /// Rule: below the minimum degree, request a connection to one
    /// discovered candidate, preferring unknown or large distance.
    pub fn heal(
        &mut self,
        registry: &EndpointRegistry,
        discovered: &BTreeSet<PeerId>,
        now: u64,
    ) -> Vec<TopologyAction> {
        if registry.direct_count() + self.pending.len() >= self.bounds.min {
            return Vec::new();
        }

        let candidate = discovered
            .iter()
            .filter(|id| {
                !registry.endpoint(id).map(|e| e.is_direct()).unwrap_or(false)
                    && !self.is_pending(id)
                    && !self.in_backoff(id, now)
            })
            .max_by_key(|id| {
                let distance = registry
                    .endpoint(id)
                    .and_then(|e| e.distance)
                    .map(u64::from)
                    .unwrap_or(u64::MAX);
                (distance, (*id).clone())
            })
            .cloned();

        match candidate {
            Some(peer) => {
                info!("heal: requesting connection to {peer}");
                self.note_pending(peer.clone(), now);
                vec![TopologyAction::RequestConnection(peer)]
            }
            None => Vec::new(),
        }
    }

    /// The direct peer contributing the least unique reachability.
    ///
    /// Redundancy score = how many *other* direct peers already list this
    /// peer in their reported neighbor sets. Ties go to the peer with the
    /// larger own neighbor count. A peer nobody else can reach scores 0
    /// and is never considered redundant.
    pub fn find_redundant_peer(&self, registry: &EndpointRegistry) -> Option<PeerId> {
        let direct: Vec<_> = registry.direct_peers().collect();

        direct
            .iter()
            .filter_map(|peer| {
                let score = direct
                    .iter()
                    .filter(|other| other.id != peer.id)
                    .filter(|other| {
                        other
                            .immediate_neighbors
                            .as_ref()
                            .map(|n| n.contains(&peer.id))
                            .unwrap_or(false)
                    })
                    .count();
                if score == 0 {
                    return None;
                }
                let own_count = peer
                    .immediate_neighbors
                    .as_ref()
                    .map(|n| n.len())
                    .unwrap_or(0);
                Some((score, own_count, peer.id.clone()))
            })
            .max()
            .map(|(_, _, id)| id)
    }

    /// The most distant recently-heard-from endpoint that is not already a
    /// direct peer — unknown distance counts as infinitely far.
    pub fn worst_distant_peer(
        &self,
        registry: &EndpointRegistry,
        recency_ms: u64,
        now: u64,
    ) -> Option<PeerId> {
        registry
            .endpoints()
            .filter(|e| {
                !e.is_direct()
                    && e.last_updated + recency_ms > now
                    && !self.is_pending(&e.id)
                    && !self.in_backoff(&e.id, now)
                    && e.distance.map(|d| d > NEAR_DISTANCE).unwrap_or(true)
            })
            .max_by_key(|e| {
                let distance = e.distance.map(u64::from).unwrap_or(u64::MAX);
                (distance, e.id.clone())
            })
            .map(|e| e.id.clone())
    }

    /// Rule: periodically trade the most redundant direct peer for the
    /// worst distant node, steering the random graph toward better global
    /// reachability.
    pub fn reshuffle(
        &mut self,
        registry: &EndpointRegistry,
        recency_ms: u64,
        now: u64,
    ) -> Vec<TopologyAction> {
        let Some(target) = self.worst_distant_peer(registry, recency_ms, now) else {
            return Vec::new();
        };
        let Some(redundant) = self.find_redundant_peer(registry) else {
            return Vec::new();
        };
        if redundant == target {
            return Vec::new();
        }

        info!("reshuffle: dropping redundant {redundant} for distant {target}");
        self.note_pending(target.clone(), now);
        vec![
            TopologyAction::Disconnect(redundant),
            TopologyAction::RequestConnection(target),
        ]
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.backoff.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(name: &str) -> PeerId {
        PeerId::new(name)
    }

    fn controller() -> TopologyController {
        TopologyController::new(DegreeBounds::default())
    }

    /// Registry with `n` direct peers named p0..pn.
    fn registry_with_direct(n: usize) -> EndpointRegistry {
        let mut reg = EndpointRegistry::new();
        for i in 0..n {
            reg.mark_direct(&peer(&format!("p{i}")), 1000);
        }
        reg
    }

    // ── Inbound requests ──────────────────────────────────────────────

    #[test]
    fn inbound_accepted_under_capacity() {
        let mut topo = controller();
        let reg = registry_with_direct(3);

        let actions = topo.handle_inbound_request(&peer("new"), &reg, 2000);
        assert_eq!(actions, vec![TopologyAction::Accept(peer("new"))]);
        assert!(topo.is_pending(&peer("new")));
    }

    #[test]
    fn inbound_at_capacity_prunes_redundant() {
        let mut topo = controller();
        let mut reg = registry_with_direct(7);
        // p0 and p1 both report p2 as a neighbor; p2 is prunable.
        reg.set_neighbors(&peer("p0"), [peer("p2")].into(), 1000);
        reg.set_neighbors(&peer("p1"), [peer("p2")].into(), 1000);

        let actions = topo.handle_inbound_request(&peer("new"), &reg, 2000);
        assert_eq!(
            actions,
            vec![
                TopologyAction::Disconnect(peer("p2")),
                TopologyAction::Accept(peer("new")),
            ]
        );
    }

    #[test]
    fn inbound_at_capacity_rejected_without_redundancy() {
        let mut topo = controller();
        let reg = registry_with_direct(7);

        let actions = topo.handle_inbound_request(&peer("new"), &reg, 2000);
        assert_eq!(actions, vec![TopologyAction::Reject(peer("new"))]);
        assert!(!topo.is_pending(&peer("new")));
    }

    // ── Healing ───────────────────────────────────────────────────────

    #[test]
    fn heal_below_min_requests_connection() {
        let mut topo = controller();
        let reg = registry_with_direct(0);
        let discovered = [peer("a"), peer("b")].into();

        let actions = topo.heal(&reg, &discovered, 1000);
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], TopologyAction::RequestConnection(_)));
        assert_eq!(topo.pending_count(), 1);
    }

    #[test]
    fn heal_prefers_unknown_distance() {
        let mut topo = controller();
        let mut reg = registry_with_direct(0);
        reg.update_distance(&peer("near"), 2, 1000);
        // "mystery" is discovered but never heard of otherwise.
        let discovered = [peer("near"), peer("mystery")].into();

        let actions = topo.heal(&reg, &discovered, 1000);
        assert_eq!(
            actions,
            vec![TopologyAction::RequestConnection(peer("mystery"))]
        );
    }

    #[test]
    fn heal_counts_pending_toward_degree() {
        let mut topo = controller();
        let reg = registry_with_direct(1);
        topo.note_pending(peer("inflight"), 1000);

        // 1 direct + 1 pending == min: nothing to do.
        let actions = topo.heal(&reg, &[peer("c")].into(), 1000);
        assert!(actions.is_empty());
    }

    #[test]
    fn heal_skips_backoff_and_pending_candidates() {
        let mut topo = controller();
        let reg = registry_with_direct(0);
        topo.note_connect_failure(&peer("flaky"), 1000);
        topo.note_pending(peer("inflight"), 1000);

        let discovered = [peer("flaky"), peer("inflight")].into();
        let actions = topo.heal(&reg, &discovered, 1001);
        // "inflight" already counts toward the degree, and "flaky" is
        // backing off — min is still unmet but there is no usable candidate.
        assert!(actions.is_empty());
    }

    #[test]
    fn heal_retries_after_backoff_expires() {
        let mut topo = controller();
        let reg = registry_with_direct(0);
        topo.note_connect_failure(&peer("flaky"), 1000);

        let discovered = [peer("flaky")].into();
        assert!(topo.heal(&reg, &discovered, 1001).is_empty());

        let later = 1000 + CONNECT_BACKOFF_BASE_MS + 1;
        let actions = topo.heal(&reg, &discovered, later);
        assert_eq!(
            actions,
            vec![TopologyAction::RequestConnection(peer("flaky"))]
        );
    }

    // ── Redundancy scoring ────────────────────────────────────────────

    #[test]
    fn redundant_peer_four_node_scenario() {
        // Direct peers A, B, C. A and B both report C as a neighbor; C
        // reports neither. C duplicates reach the others already have.
        let mut reg = EndpointRegistry::new();
        for name in ["A", "B", "C"] {
            reg.mark_direct(&peer(name), 1000);
        }
        reg.set_neighbors(&peer("A"), [peer("C"), peer("x1")].into(), 1000);
        reg.set_neighbors(&peer("B"), [peer("C"), peer("x2")].into(), 1000);
        reg.set_neighbors(&peer("C"), [peer("x3")].into(), 1000);

        let topo = controller();
        assert_eq!(topo.find_redundant_peer(&reg), Some(peer("C")));
    }

    #[test]
    fn no_redundancy_without_cross_listing() {
        let mut reg = EndpointRegistry::new();
        for name in ["A", "B"] {
            reg.mark_direct(&peer(name), 1000);
        }
        reg.set_neighbors(&peer("A"), [peer("x")].into(), 1000);

        let topo = controller();
        assert_eq!(topo.find_redundant_peer(&reg), None);
    }

    #[test]
    fn redundancy_tie_broken_by_own_neighbor_count() {
        // C and D are each listed by one other peer; D reports the larger
        // neighbor set, so D is the better pruning candidate.
        let mut reg = EndpointRegistry::new();
        for name in ["A", "B", "C", "D"] {
            reg.mark_direct(&peer(name), 1000);
        }
        reg.set_neighbors(&peer("A"), [peer("C")].into(), 1000);
        reg.set_neighbors(&peer("B"), [peer("D")].into(), 1000);
        reg.set_neighbors(&peer("C"), [peer("n1")].into(), 1000);
        reg.set_neighbors(&peer("D"), [peer("n1"), peer("n2")].into(), 1000);

        let topo = controller();
        assert_eq!(topo.find_redundant_peer(&reg), Some(peer("D")));
    }

    // ── Reshuffle ─────────────────────────────────────────────────────

    #[test]
    fn worst_distant_prefers_unknown() {
        let mut reg = EndpointRegistry::new();
        reg.update_distance(&peer("far"), 5, 1000);
        reg.touch(&peer("unknown"), 1000);

        let topo = controller();
        assert_eq!(
            topo.worst_distant_peer(&reg, 300_000, 2000),
            Some(peer("unknown"))
        );
    }

    #[test]
    fn worst_distant_ignores_near_stale_and_direct() {
        let mut reg = EndpointRegistry::new();
        reg.mark_direct(&peer("direct"), 6000);
        reg.update_distance(&peer("near"), 2, 6000);
        reg.touch(&peer("stale"), 0);
        reg.update_distance(&peer("far"), 4, 6000);

        let topo = controller();
        assert_eq!(
            topo.worst_distant_peer(&reg, 10_000, 15_000),
            Some(peer("far"))
        );
    }

    #[test]
    fn reshuffle_swaps_redundant_for_distant() {
        let mut reg = EndpointRegistry::new();
        for name in ["A", "B", "C"] {
            reg.mark_direct(&peer(name), 1000);
        }
        reg.set_neighbors(&peer("A"), [peer("C")].into(), 1000);
        reg.set_neighbors(&peer("B"), [peer("C")].into(), 1000);
        reg.update_distance(&peer("island"), 6, 1000);

        let mut topo = controller();
        let actions = topo.reshuffle(&reg, 300_000, 2000);
        assert_eq!(
            actions,
            vec![
                TopologyAction::Disconnect(peer("C")),
                TopologyAction::RequestConnection(peer("island")),
            ]
        );
        assert!(topo.is_pending(&peer("island")));
    }

    #[test]
    fn reshuffle_noop_without_redundant_peer() {
        let mut reg = EndpointRegistry::new();
        reg.mark_direct(&peer("A"), 1000);
        reg.update_distance(&peer("island"), 6, 1000);

        let mut topo = controller();
        assert!(topo.reshuffle(&reg, 300_000, 2000).is_empty());
    }

    #[test]
    fn reshuffle_noop_without_distant_target() {
        let mut reg = EndpointRegistry::new();
        for name in ["A", "B", "C"] {
            reg.mark_direct(&peer(name), 1000);
        }
        reg.set_neighbors(&peer("A"), [peer("C")].into(), 1000);
        reg.set_neighbors(&peer("B"), [peer("C")].into(), 1000);

        let mut topo = controller();
        assert!(topo.reshuffle(&reg, 300_000, 2000).is_empty());
    }

    // ── Pending + backoff bookkeeping ─────────────────────────────────

    #[test]
    fn stale_pending_expires_into_backoff() {
        let mut topo = controller();
        topo.note_pending(peer("ghost"), 1000);
        topo.note_pending(peer("fresh"), 50_000);

        let expired = topo.expire_stale_pending(60_000, 61_001);
        assert_eq!(expired, vec![peer("ghost")]);
        assert!(!topo.is_pending(&peer("ghost")));
        assert!(topo.is_pending(&peer("fresh")));
        assert!(topo.in_backoff(&peer("ghost"), 61_002));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut topo = controller();
        let p = peer("flaky");

        topo.note_connect_failure(&p, 0);
        assert_eq!(topo.backoff[&p].retry_at, CONNECT_BACKOFF_BASE_MS);

        topo.note_connect_failure(&p, 0);
        assert_eq!(topo.backoff[&p].retry_at, 2 * CONNECT_BACKOFF_BASE_MS);

        for _ in 0..20 {
            topo.note_connect_failure(&p, 0);
        }
        assert_eq!(topo.backoff[&p].retry_at, CONNECT_BACKOFF_MAX_MS);
    }

    #[test]
    fn success_clears_backoff() {
        let mut topo = controller();
        let p = peer("flaky");
        topo.note_connect_failure(&p, 0);
        topo.note_connect_success(&p);
        assert!(!topo.in_backoff(&p, 1));
    }
}
