/// Epidemic topology dissemination.
///
/// Each node periodically floods an announce carrying its direct-neighbor
/// set; receivers mine every message's breadcrumb trail for hop-distance
/// estimates. There is no separate control channel — the registry converges
/// toward true hop distances from ordinary flood traffic alone.
use std::collections::BTreeSet;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::message::NetworkMessage;
use crate::registry::EndpointRegistry;
use crate::types::PeerId;

/// Base delay between gossip announces.
pub const GOSSIP_BASE_INTERVAL: Duration = Duration::from_secs(15);

/// Random jitter added on top of the base delay, so co-located devices
/// don't burst in lockstep.
pub const GOSSIP_JITTER: Duration = Duration::from_secs(10);

/// A jittered gossip delay: `base` plus a uniform random slice of `jitter`.
pub fn jittered_delay(base: Duration, jitter: Duration) -> Duration {
    let extra = rand::rng().random_range(0..=jitter.as_millis() as u64);
    base + Duration::from_millis(extra)
}

/// Builds announces and digests incoming topology signals.
#[derive(Debug)]
pub struct GossipEngine {
    local_id: PeerId,
}

impl GossipEngine {
    pub fn new(local_id: PeerId) -> Self {
        Self { local_id }
    }

    /// A fresh announce: the local node as sole breadcrumb, carrying the
    /// current direct-neighbor set.
    pub fn build_announce(&self, neighbors: BTreeSet<PeerId>, now: u64) -> NetworkMessage {
        let mut msg = NetworkMessage::announce(neighbors);
        msg.push_breadcrumb(self.local_id.clone(), now);
        msg
    }

    /// Digest one received message into the registry: breadcrumb positions
    /// become distance candidates, and an attached neighbor set is credited
    /// to the originator.
    pub fn process_message(&self, msg: &NetworkMessage, registry: &mut EndpointRegistry, now: u64) {
        for (i, crumb) in msg.breadcrumbs.iter().enumerate() {
            if crumb.peer == self.local_id {
                continue;
            }
            let candidate = i as u32 + 1;
            registry.update_distance(&crumb.peer, candidate, now);
        }

        if let (Some(neighbors), Some(origin)) = (&msg.neighbors, msg.origin()) {
            if *origin != self.local_id {
                debug!("gossip: {origin} reports {} neighbors", neighbors.len());
                registry.set_neighbors(origin, neighbors.clone(), now);
            }
        }
    }
}
