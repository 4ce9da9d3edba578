//! DHT peer liveness table.
//!
//! A bounded table of known peers with periodic re-ping and stale
//! pruning. This is the maintenance half of a DHT; routing (closeness
//! metrics, key/value storage) lives in the excluded DHT subsystem.
//!
//! All methods take `now` explicitly so maintenance is deterministic
//! under test.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use peerwave_types::PublicKey;

use crate::packet::NodeEntry;

// ---------------------------------------------------------------------------
// DhtNode
// ---------------------------------------------------------------------------

/// One peer tracked by the liveness table.
#[derive(Clone, Debug)]
pub struct DhtNode {
    /// The peer's public key.
    pub key: PublicKey,
    /// Last address the peer was observed at.
    pub addr: SocketAddr,
    /// When the peer last sent us anything.
    last_seen: Instant,
    /// When we last pinged the peer. `None` until the first tick.
    last_pinged: Option<Instant>,
    /// Ping id we are waiting on, if any.
    pending_ping: Option<u64>,
}

// ---------------------------------------------------------------------------
// DhtTable
// ---------------------------------------------------------------------------

/// Everything a maintenance tick decided to do.
///
/// The caller owns the socket and the event queue, so the tick reports
/// its decisions instead of acting on them.
#[derive(Debug, Default)]
pub struct TickActions {
    /// Peers due for a liveness probe: destination and the ping id to send.
    pub to_ping: Vec<(SocketAddr, u64)>,
    /// Peers pruned for staying silent past the node timeout.
    pub expired: Vec<(PublicKey, SocketAddr)>,
}

/// Bounded table of known peers with liveness maintenance.
#[derive(Debug)]
pub struct DhtTable {
    nodes: Vec<DhtNode>,
    capacity: usize,
    ping_interval: Duration,
    node_timeout: Duration,
}

impl DhtTable {
    /// Creates an empty table.
    ///
    /// `ping_interval` must be shorter than `node_timeout`; config
    /// validation upstream guarantees it.
    pub fn new(capacity: usize, ping_interval: Duration, node_timeout: Duration) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            capacity,
            ping_interval,
            node_timeout,
        }
    }

    /// Number of tracked peers.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Records that `key` was observed alive at `addr`.
    ///
    /// Returns `true` if the peer is new to the table. An existing
    /// entry has its address and last-seen time refreshed. When the
    /// table is full, the stalest entry is evicted to make room.
    pub fn observe(&mut self, key: PublicKey, addr: SocketAddr, now: Instant) -> bool {
        if let Some(node) = self.nodes.iter_mut().find(|n| n.key == key) {
            node.addr = addr;
            node.last_seen = now;
            return false;
        }

        if self.nodes.len() >= self.capacity {
            if let Some(stalest) = self
                .nodes
                .iter()
                .enumerate()
                .min_by_key(|(_, n)| n.last_seen)
                .map(|(i, _)| i)
            {
                let evicted = self.nodes.swap_remove(stalest);
                tracing::debug!(key = %evicted.key, "evicting stalest peer for newcomer");
            }
        }

        self.nodes.push(DhtNode {
            key,
            addr,
            last_seen: now,
            last_pinged: None,
            pending_ping: None,
        });
        true
    }

    /// Handles a pong carrying `ping_id` from `key`.
    ///
    /// Returns `true` if it answers the ping we were waiting on; a
    /// stray or replayed pong is ignored.
    pub fn pong_received(&mut self, key: &PublicKey, ping_id: u64, now: Instant) -> bool {
        match self.nodes.iter_mut().find(|n| n.key == *key) {
            Some(node) if node.pending_ping == Some(ping_id) => {
                node.pending_ping = None;
                node.last_seen = now;
                true
            }
            _ => false,
        }
    }

    /// Runs one maintenance pass: prunes peers silent past the node
    /// timeout and schedules probes for peers not pinged recently.
    pub fn tick(&mut self, now: Instant) -> TickActions {
        let mut actions = TickActions::default();

        let timeout = self.node_timeout;
        self.nodes.retain(|node| {
            let alive = now.duration_since(node.last_seen) < timeout;
            if !alive {
                actions.expired.push((node.key, node.addr));
            }
            alive
        });

        for node in &mut self.nodes {
            let due = node
                .last_pinged
                .map_or(true, |t| now.duration_since(t) >= self.ping_interval);
            if due {
                let ping_id = rand::random::<u64>();
                node.last_pinged = Some(now);
                node.pending_ping = Some(ping_id);
                actions.to_ping.push((node.addr, ping_id));
            }
        }

        actions
    }

    /// Time until the next maintenance action falls due, if any peer
    /// is tracked. Zero when something is already overdue.
    pub fn next_action_in(&self, now: Instant) -> Option<Duration> {
        self.nodes
            .iter()
            .map(|node| {
                let ping_due = node
                    .last_pinged
                    .map_or(Duration::ZERO, |t| {
                        (t + self.ping_interval).saturating_duration_since(now)
                    });
                let expiry_due =
                    (node.last_seen + self.node_timeout).saturating_duration_since(now);
                ping_due.min(expiry_due)
            })
            .min()
    }

    /// Up to `max` peers to advertise in a nodes response, excluding
    /// the requester itself.
    pub fn entries_for_response(&self, exclude: &PublicKey, max: usize) -> Vec<NodeEntry> {
        self.nodes
            .iter()
            .filter(|n| n.key != *exclude)
            .take(max)
            .map(|n| NodeEntry {
                key: n.key,
                addr: n.addr,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const PING: Duration = Duration::from_millis(100);
    const TIMEOUT: Duration = Duration::from_millis(400);

    fn key(seed: u8) -> PublicKey {
        let mut bytes = [0u8; 32];
        bytes[0] = seed;
        PublicKey::new(bytes)
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn table(capacity: usize) -> DhtTable {
        DhtTable::new(capacity, PING, TIMEOUT)
    }

    #[test]
    fn observe_inserts_once() {
        let mut dht = table(4);
        let now = Instant::now();
        assert!(dht.observe(key(1), addr(1000), now));
        assert!(!dht.observe(key(1), addr(1001), now));
        assert_eq!(dht.len(), 1);
    }

    #[test]
    fn observe_refreshes_address() {
        let mut dht = table(4);
        let now = Instant::now();
        dht.observe(key(1), addr(1000), now);
        dht.observe(key(1), addr(2000), now);
        let entries = dht.entries_for_response(&key(9), 4);
        assert_eq!(entries[0].addr, addr(2000));
    }

    #[test]
    fn full_table_evicts_stalest() {
        let mut dht = table(2);
        let t0 = Instant::now();
        dht.observe(key(1), addr(1), t0);
        dht.observe(key(2), addr(2), t0 + Duration::from_millis(10));
        dht.observe(key(3), addr(3), t0 + Duration::from_millis(20));
        assert_eq!(dht.len(), 2);
        let keys: Vec<_> = dht.entries_for_response(&key(9), 4).into_iter().map(|e| e.key).collect();
        assert!(!keys.contains(&key(1)), "stalest peer must be evicted");
        assert!(keys.contains(&key(3)));
    }

    #[test]
    fn tick_pings_fresh_node_immediately() {
        let mut dht = table(4);
        let now = Instant::now();
        dht.observe(key(1), addr(1), now);
        let actions = dht.tick(now);
        assert_eq!(actions.to_ping.len(), 1);
        assert_eq!(actions.to_ping[0].0, addr(1));
    }

    #[test]
    fn tick_does_not_reping_before_interval() {
        let mut dht = table(4);
        let now = Instant::now();
        dht.observe(key(1), addr(1), now);
        dht.tick(now);
        let actions = dht.tick(now + PING / 2);
        assert!(actions.to_ping.is_empty());
    }

    #[test]
    fn tick_repings_after_interval() {
        let mut dht = table(4);
        let now = Instant::now();
        dht.observe(key(1), addr(1), now);
        dht.tick(now);
        let actions = dht.tick(now + PING);
        assert_eq!(actions.to_ping.len(), 1);
    }

    #[test]
    fn tick_prunes_silent_node() {
        let mut dht = table(4);
        let now = Instant::now();
        dht.observe(key(1), addr(1), now);
        let actions = dht.tick(now + TIMEOUT);
        assert_eq!(actions.expired.len(), 1);
        assert_eq!(actions.expired[0].0, key(1));
        assert!(dht.is_empty());
    }

    #[test]
    fn pong_clears_pending_ping() {
        let mut dht = table(4);
        let now = Instant::now();
        dht.observe(key(1), addr(1), now);
        let actions = dht.tick(now);
        let ping_id = actions.to_ping[0].1;
        assert!(dht.pong_received(&key(1), ping_id, now + Duration::from_millis(5)));
    }

    #[test]
    fn stray_pong_ignored() {
        let mut dht = table(4);
        let now = Instant::now();
        dht.observe(key(1), addr(1), now);
        let actions = dht.tick(now);
        let ping_id = actions.to_ping[0].1;
        assert!(!dht.pong_received(&key(1), ping_id.wrapping_add(1), now));
        assert!(!dht.pong_received(&key(2), ping_id, now));
    }

    #[test]
    fn pong_keeps_node_alive_past_timeout() {
        let mut dht = table(4);
        let now = Instant::now();
        dht.observe(key(1), addr(1), now);
        let ping_id = dht.tick(now).to_ping[0].1;
        dht.pong_received(&key(1), ping_id, now + TIMEOUT / 2);
        let actions = dht.tick(now + TIMEOUT);
        assert!(actions.expired.is_empty());
        assert_eq!(dht.len(), 1);
    }

    #[test]
    fn next_action_none_when_empty() {
        let dht = table(4);
        assert!(dht.next_action_in(Instant::now()).is_none());
    }

    #[test]
    fn next_action_zero_for_unpinged_node() {
        let mut dht = table(4);
        let now = Instant::now();
        dht.observe(key(1), addr(1), now);
        assert_eq!(dht.next_action_in(now), Some(Duration::ZERO));
    }

    #[test]
    fn next_action_bounded_by_ping_interval() {
        let mut dht = table(4);
        let now = Instant::now();
        dht.observe(key(1), addr(1), now);
        dht.tick(now);
        let next = dht.next_action_in(now).expect("node tracked");
        assert!(next <= PING);
        assert!(next > Duration::ZERO);
    }

    #[test]
    fn response_entries_exclude_requester() {
        let mut dht = table(4);
        let now = Instant::now();
        dht.observe(key(1), addr(1), now);
        dht.observe(key(2), addr(2), now);
        let entries = dht.entries_for_response(&key(1), 4);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, key(2));
    }
}
