/// The flooded wire message.
///
/// One `NetworkMessage` per logical event; the same `id` travels every hop
/// of the flood. Wire format: MessagePack (compact binary).
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::SkeinError;
use crate::types::PeerId;

/// One hop in a message's journey: who forwarded it, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub peer: PeerId,
    /// Unix ms at the time that node forwarded the message.
    pub timestamp: u64,
}

/// A message flooded across the mesh.
///
/// `breadcrumbs` is the journey the message took to get here — every node
/// appends itself before forwarding, and a message is never sent back to a
/// node already on the trail. The trail doubles as an implicit hop-distance
/// signal for the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkMessage {
    /// Unique per logical message; identical across all hops of a flood.
    pub id: String,
    /// Append-only forwarding trail.
    pub breadcrumbs: Vec<Breadcrumb>,
    /// Command for the application (e.g. a display target). Absent for a
    /// pure gossip announce.
    pub command: Option<String>,
    /// The originator's direct-neighbor set, carried by gossip announces.
    /// Forwarders never touch this field.
    pub neighbors: Option<BTreeSet<PeerId>>,
}

impl NetworkMessage {
    /// A fresh command message with no breadcrumbs yet.
    pub fn command(command: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            breadcrumbs: Vec::new(),
            command: Some(command.into()),
            neighbors: None,
        }
    }

    /// A fresh gossip announce carrying the local direct-neighbor set.
    pub fn announce(neighbors: BTreeSet<PeerId>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            breadcrumbs: Vec::new(),
            command: None,
            neighbors: Some(neighbors),
        }
    }

    /// The node that originated this message, if any hop is recorded.
    pub fn origin(&self) -> Option<&PeerId> {
        self.breadcrumbs.first().map(|c| &c.peer)
    }

    /// Whether `peer` already appears on the forwarding trail.
    pub fn has_visited(&self, peer: &PeerId) -> bool {
        self.breadcrumbs.iter().any(|c| &c.peer == peer)
    }

    /// Append a hop to the trail.
    pub fn push_breadcrumb(&mut self, peer: PeerId, now: u64) {
        self.breadcrumbs.push(Breadcrumb {
            peer,
            timestamp: now,
        });
    }

    /// True for a gossip/heartbeat message with no command attached.
    pub fn is_gossip(&self) -> bool {
        self.command.is_none()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SkeinError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, SkeinError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(name: &str) -> PeerId {
        PeerId::new(name)
    }

    #[test]
    fn command_message_has_fresh_id() {
        let a = NetworkMessage::command("slideshow");
        let b = NetworkMessage::command("slideshow");
        assert_ne!(a.id, b.id);
        assert_eq!(a.command.as_deref(), Some("slideshow"));
        assert!(a.breadcrumbs.is_empty());
        assert!(!a.is_gossip());
    }

    #[test]
    fn announce_is_gossip() {
        let msg = NetworkMessage::announce([peer("Y"), peer("Z")].into());
        assert!(msg.is_gossip());
        assert_eq!(msg.neighbors.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn roundtrip_msgpack() {
        let mut msg = NetworkMessage::command("room4");
        msg.push_breadcrumb(peer("X"), 1_700_000_000_000);
        msg.push_breadcrumb(peer("Y"), 1_700_000_000_100);

        let bytes = msg.to_bytes().expect("serialize");
        let decoded = NetworkMessage::from_bytes(&bytes).expect("deserialize");
        assert_eq!(msg, decoded);
    }

    #[test]
    fn roundtrip_with_neighbors() {
        let mut msg = NetworkMessage::announce([peer("A"), peer("B")].into());
        msg.push_breadcrumb(peer("X"), 42);

        let bytes = msg.to_bytes().expect("serialize");
        let decoded = NetworkMessage::from_bytes(&bytes).expect("deserialize");
        assert_eq!(decoded.neighbors, msg.neighbors);
        assert_eq!(decoded.origin(), Some(&peer("X")));
    }

    #[test]
    fn has_visited_tracks_trail() {
        let mut msg = NetworkMessage::command("go");
        assert!(!msg.has_visited(&peer("X")));

        msg.push_breadcrumb(peer("X"), 1);
        msg.push_breadcrumb(peer("Y"), 2);
        assert!(msg.has_visited(&peer("X")));
        assert!(msg.has_visited(&peer("Y")));
        assert!(!msg.has_visited(&peer("Z")));
    }

    #[test]
    fn origin_is_first_crumb() {
        let mut msg = NetworkMessage::command("go");
        assert_eq!(msg.origin(), None);

        msg.push_breadcrumb(peer("X"), 1);
        msg.push_breadcrumb(peer("Y"), 2);
        assert_eq!(msg.origin(), Some(&peer("X")));
    }

    #[test]
    fn malformed_bytes_rejected() {
        assert!(NetworkMessage::from_bytes(&[0xff, 0x00, 0x13]).is_err());
    }
}
