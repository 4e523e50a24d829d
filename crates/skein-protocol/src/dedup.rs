/// Message de-duplication — the single synchronization point that stops
/// flood loops. Every receive and send path must call `is_first_seen`
/// before acting on a message body or forwarding it.
use std::collections::HashMap;

use tracing::debug;

/// Maximum cached entries (DoS protection). At capacity an inline sweep
/// runs before inserting.
const MAX_CACHE_SIZE: usize = 10_000;

/// Cache of recently seen message ids with TTL eviction.
///
/// The TTL must exceed the worst-case mesh diameter times one gossip
/// interval, or late duplicates re-flood.
#[derive(Debug)]
pub struct DedupCache {
    /// Message id → first-seen Unix ms.
    seen: HashMap<String, u64>,
    ttl_ms: u64,
}

impl DedupCache {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            seen: HashMap::new(),
            ttl_ms,
        }
    }

    /// Check-and-insert: returns true exactly once per id within the TTL
    /// window.
    pub fn is_first_seen(&mut self, id: &str, now: u64) -> bool {
        if self.seen.len() >= MAX_CACHE_SIZE {
            self.purge_expired(now);
        }
        if self.seen.contains_key(id) {
            return false;
        }
        self.seen.insert(id.to_string(), now);
        true
    }

    /// Background sweep: drop entries older than the TTL.
    pub fn purge_expired(&mut self, now: u64) {
        let ttl = self.ttl_ms;
        let before = self.seen.len();
        self.seen.retain(|_, first_seen| *first_seen + ttl > now);
        let evicted = before - self.seen.len();
        if evicted > 0 {
            debug!("dedup sweep evicted {evicted} entries");
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}
