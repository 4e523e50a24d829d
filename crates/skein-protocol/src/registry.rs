/// Every endpoint seen during this mesh session: direct peers, distant
/// nodes heard of via gossip, and other islands. Some may no longer be
/// viable — staleness pruning clears those out.
use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info};

use crate::types::PeerId;

/// A remote peer identity known to this node, directly or by reputation.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub id: PeerId,
    /// Estimated hop count. `Some(1)` exactly when a live direct connection
    /// exists; `None` means known but not usable for routing decisions.
    pub distance: Option<u32>,
    /// Unix ms of the last signal about this peer, direct or gossiped.
    pub last_updated: u64,
    /// The peer's own direct-neighbor set, as last reported via gossip.
    pub immediate_neighbors: Option<BTreeSet<PeerId>>,
    /// Consecutive payload-send failures; reset on success.
    pub transfer_failures: u32,
}

impl Endpoint {
    fn new(id: PeerId, now: u64) -> Self {
        Self {
            id,
            distance: None,
            last_updated: now,
            immediate_neighbors: None,
            transfer_failures: 0,
        }
    }

    /// Whether a live direct connection exists.
    pub fn is_direct(&self) -> bool {
        self.distance == Some(1)
    }
}

/// Authoritative map of every peer ever observed this session.
///
/// Owned by the runtime's single event loop, so mutation is serialized by
/// construction — no locking needed.
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    endpoints: HashMap<PeerId, Endpoint>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get an existing endpoint or create a fresh one (unknown distance).
    /// Idempotent.
    pub fn get(&mut self, id: &PeerId, now: u64) -> &mut Endpoint {
        self.endpoints.entry(id.clone()).or_insert_with(|| {
            info!("registry first seen: {id}");
            Endpoint::new(id.clone(), now)
        })
    }

    /// Read-only lookup.
    pub fn endpoint(&self, id: &PeerId) -> Option<&Endpoint> {
        self.endpoints.get(id)
    }

    /// Refresh `last_updated` without touching distance. Used for signals
    /// that are not fully trustworthy, like raw discovery.
    pub fn touch(&mut self, id: &PeerId, now: u64) {
        self.get(id, now).last_updated = now;
    }

    /// Distance-vector minimum rule: only ever lowers the stored distance.
    /// The sole way a distance goes back up is `mark_not_direct`.
    pub fn update_distance(&mut self, id: &PeerId, candidate: u32, now: u64) {
        let endpoint = self.get(id, now);
        endpoint.last_updated = now;
        if candidate < endpoint.distance.unwrap_or(u32::MAX) {
            debug!("registry: {id} distance -> {candidate}");
            endpoint.distance = Some(candidate);
        }
    }

    /// A direct connection was established.
    pub fn mark_direct(&mut self, id: &PeerId, now: u64) {
        let endpoint = self.get(id, now);
        endpoint.distance = Some(1);
        endpoint.last_updated = now;
        endpoint.transfer_failures = 0;
    }

    /// A direct connection was lost. Demotes to unknown only if the
    /// distance was exactly 1 — a better estimate learned via gossip from
    /// another path is kept.
    pub fn mark_not_direct(&mut self, id: &PeerId, now: u64) {
        let endpoint = self.get(id, now);
        if endpoint.distance == Some(1) {
            endpoint.distance = None;
        }
        endpoint.last_updated = now;
    }

    /// Record the peer's own neighbor set as reported via gossip.
    pub fn set_neighbors(&mut self, id: &PeerId, neighbors: BTreeSet<PeerId>, now: u64) {
        let endpoint = self.get(id, now);
        endpoint.immediate_neighbors = Some(neighbors);
        endpoint.last_updated = now;
    }

    /// Bump the consecutive-failure counter; returns the new count.
    pub fn record_transfer_failure(&mut self, id: &PeerId, now: u64) -> u32 {
        let endpoint = self.get(id, now);
        endpoint.transfer_failures += 1;
        endpoint.transfer_failures
    }

    pub fn reset_transfer_failures(&mut self, id: &PeerId, now: u64) {
        self.get(id, now).transfer_failures = 0;
    }

    /// All endpoints with a live direct connection.
    pub fn direct_peers(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values().filter(|e| e.is_direct())
    }

    /// Direct-peer ids, ordered (stable for gossip payloads and tests).
    pub fn direct_ids(&self) -> BTreeSet<PeerId> {
        self.direct_peers().map(|e| e.id.clone()).collect()
    }

    pub fn direct_count(&self) -> usize {
        self.direct_peers().count()
    }

    pub fn known_count(&self) -> usize {
        self.endpoints.len()
    }

    /// All known endpoints.
    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values()
    }

    /// Drop endpoints not heard from within the retention window, keeping
    /// anything with an active direct connection.
    pub fn purge_stale(&mut self, retention_ms: u64, now: u64) {
        self.endpoints.retain(|id, e| {
            let keep = e.is_direct() || e.last_updated + retention_ms > now;
            if !keep {
                info!("registry: purging stale endpoint {id}");
            }
            keep
        });
    }

    pub fn clear(&mut self) {
        info!("registry cleared");
        self.endpoints.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(name: &str) -> PeerId {
        PeerId::new(name)
    }

    #[test]
    fn get_is_idempotent() {
        let mut reg = EndpointRegistry::new();
        reg.get(&peer("A"), 100).distance = Some(3);
        let again = reg.get(&peer("A"), 200);
        assert_eq!(again.distance, Some(3));
        assert_eq!(reg.known_count(), 1);
    }

    #[test]
    fn fresh_endpoint_has_unknown_distance() {
        let mut reg = EndpointRegistry::new();
        let e = reg.get(&peer("A"), 100);
        assert_eq!(e.distance, None);
        assert_eq!(e.last_updated, 100);
        assert_eq!(e.transfer_failures, 0);
    }

    #[test]
    fn update_distance_only_lowers() {
        let mut reg = EndpointRegistry::new();
        let a = peer("A");

        reg.update_distance(&a, 4, 100);
        assert_eq!(reg.endpoint(&a).unwrap().distance, Some(4));

        reg.update_distance(&a, 2, 200);
        assert_eq!(reg.endpoint(&a).unwrap().distance, Some(2));

        // Higher candidate is ignored, but last_updated still refreshes.
        reg.update_distance(&a, 6, 300);
        assert_eq!(reg.endpoint(&a).unwrap().distance, Some(2));
        assert_eq!(reg.endpoint(&a).unwrap().last_updated, 300);
    }

    #[test]
    fn mark_direct_and_counts() {
        let mut reg = EndpointRegistry::new();
        reg.mark_direct(&peer("A"), 100);
        reg.mark_direct(&peer("B"), 100);
        reg.update_distance(&peer("C"), 3, 100);

        assert_eq!(reg.direct_count(), 2);
        assert_eq!(reg.known_count(), 3);
        assert_eq!(reg.direct_ids(), [peer("A"), peer("B")].into());
    }

    #[test]
    fn disconnect_demotes_only_distance_one() {
        let mut reg = EndpointRegistry::new();
        let a = peer("A");
        let b = peer("B");

        // A is direct — disconnect clears to unknown.
        reg.mark_direct(&a, 100);
        reg.mark_not_direct(&a, 200);
        assert_eq!(reg.endpoint(&a).unwrap().distance, None);

        // B was learned via gossip at distance 3 — disconnect must not
        // erase the better estimate from the other path.
        reg.update_distance(&b, 3, 100);
        reg.mark_not_direct(&b, 200);
        assert_eq!(reg.endpoint(&b).unwrap().distance, Some(3));
    }

    #[test]
    fn transfer_failures_count_and_reset() {
        let mut reg = EndpointRegistry::new();
        let a = peer("A");

        assert_eq!(reg.record_transfer_failure(&a, 100), 1);
        assert_eq!(reg.record_transfer_failure(&a, 100), 2);
        reg.reset_transfer_failures(&a, 100);
        assert_eq!(reg.record_transfer_failure(&a, 100), 1);
    }

    #[test]
    fn mark_direct_resets_failures() {
        let mut reg = EndpointRegistry::new();
        let a = peer("A");
        reg.record_transfer_failure(&a, 100);
        reg.record_transfer_failure(&a, 100);
        reg.mark_direct(&a, 200);
        assert_eq!(reg.endpoint(&a).unwrap().transfer_failures, 0);
    }

    #[test]
    fn purge_keeps_direct_and_fresh() {
        let mut reg = EndpointRegistry::new();
        reg.mark_direct(&peer("direct"), 0); // stale but direct
        reg.touch(&peer("fresh"), 90_000);
        reg.touch(&peer("stale"), 0);

        reg.purge_stale(60_000, 100_000);

        assert!(reg.endpoint(&peer("direct")).is_some());
        assert!(reg.endpoint(&peer("fresh")).is_some());
        assert!(reg.endpoint(&peer("stale")).is_none());
    }

    #[test]
    fn neighbors_recorded() {
        let mut reg = EndpointRegistry::new();
        let a = peer("A");
        reg.set_neighbors(&a, [peer("B"), peer("C")].into(), 100);
        assert_eq!(
            reg.endpoint(&a).unwrap().immediate_neighbors,
            Some([peer("B"), peer("C")].into())
        );
    }

    #[test]
    fn clear_empties_registry() {
        let mut reg = EndpointRegistry::new();
        reg.mark_direct(&peer("A"), 100);
        reg.clear();
        assert_eq!(reg.known_count(), 0);
    }
}
