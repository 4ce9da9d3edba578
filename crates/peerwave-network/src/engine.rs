//! The iteration engine: one bounded unit of network work per call.
//!
//! [`NetworkCore`] owns everything a node's network side consists of —
//! the UDP socket, the DHT liveness table, the relay registry and the
//! outbound event queue. [`NetworkCore::advance`] is the single entry
//! point the run loop drives; it is only reachable through the node's
//! state lock, so no two calls for one node ever overlap.
//!
//! The bootstrap/relay registration surface lives here too: both are
//! plain synchronous calls into the owned state, valid before the loop
//! starts and while it runs.

use std::collections::VecDeque;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

use rand::Rng;

use peerwave_types::config::NodeConfig;
use peerwave_types::{PeerwaveError, PublicKey, Result};

use crate::dht::DhtTable;
use crate::events::NetworkEvent;
use crate::packet::{self, Packet, MAX_SENT_NODES};
use crate::relay::RelayRegistry;
use crate::socket::NetSocket;

// ---------------------------------------------------------------------------
// NetworkCore
// ---------------------------------------------------------------------------

/// Network state of one node and the engine advancing it.
#[derive(Debug)]
pub struct NetworkCore {
    dht_key: PublicKey,
    socket: NetSocket,
    dht: DhtTable,
    relays: RelayRegistry,
    events: VecDeque<NetworkEvent>,
    recv_batch_max: usize,
    max_interval: Duration,
    iterations: u64,
}

impl NetworkCore {
    /// Binds the socket and generates this node's DHT identity.
    ///
    /// # Errors
    ///
    /// `PeerwaveError::NetworkError` if the socket cannot be bound.
    pub fn new(config: &NodeConfig) -> Result<Self> {
        let socket = NetSocket::bind(config.bind_ip, config.udp_port)?;

        let mut key_bytes = [0u8; 32];
        rand::thread_rng().fill(&mut key_bytes[..]);
        let dht_key = PublicKey::new(key_bytes);

        Ok(Self {
            dht_key,
            socket,
            dht: DhtTable::new(
                config.dht_max_nodes,
                Duration::from_millis(config.dht_ping_interval_ms),
                Duration::from_millis(config.dht_node_timeout_ms),
            ),
            relays: RelayRegistry::new(config.max_relays),
            events: VecDeque::new(),
            recv_batch_max: config.recv_batch_max,
            max_interval: Duration::from_millis(config.max_iteration_interval_ms),
            iterations: 0,
        })
    }

    /// This node's DHT public key.
    pub fn dht_key(&self) -> PublicKey {
        self.dht_key
    }

    /// The UDP port the node is reachable on.
    pub fn udp_port(&self) -> u16 {
        self.socket.local_port()
    }

    /// Number of peers currently in the DHT liveness table.
    pub fn dht_node_count(&self) -> usize {
        self.dht.len()
    }

    /// Number of registered TCP relays.
    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }

    /// Number of completed [`advance`](Self::advance) calls.
    pub fn iteration_count(&self) -> u64 {
        self.iterations
    }

    // -----------------------------------------------------------------------
    // Iteration engine
    // -----------------------------------------------------------------------

    /// Performs one bounded unit of network work.
    ///
    /// Drains up to `recv_batch_max` datagrams, handles each packet,
    /// runs the DHT maintenance tick, and queues application events.
    /// Returns the longest the caller may wait before calling again —
    /// an upper bound on sleep, never a lower bound, and zero when the
    /// receive batch filled (more datagrams may already be queued).
    pub fn advance(&mut self) -> Duration {
        self.iterations += 1;
        let now = Instant::now();

        let batch = self.socket.recv_batch(self.recv_batch_max);
        let drained = batch.len();
        for (from, datagram) in batch {
            match packet::decode(&datagram) {
                Ok((sender, _)) if sender == self.dht_key => {
                    // Own key echoed back at us; drop it.
                }
                Ok((sender, body)) => self.handle_packet(from, sender, body, now),
                Err(e) => {
                    tracing::debug!(%from, %e, "discarding undecodable datagram");
                }
            }
        }

        let actions = self.dht.tick(now);
        for (dest, ping_id) in actions.to_ping {
            self.send(Packet::Ping { ping_id }, dest);
        }
        for (key, addr) in actions.expired {
            tracing::debug!(%key, %addr, "peer timed out");
            self.events.push_back(NetworkEvent::PeerExpired { key });
        }

        if drained == self.recv_batch_max {
            return Duration::ZERO;
        }
        self.dht
            .next_action_in(now)
            .map_or(self.max_interval, |d| d.min(self.max_interval))
    }

    /// Takes all events queued by this iteration.
    pub fn drain_events(&mut self) -> Vec<NetworkEvent> {
        self.events.drain(..).collect()
    }

    fn handle_packet(&mut self, from: SocketAddr, sender: PublicKey, body: Packet, now: Instant) {
        match body {
            Packet::Ping { ping_id } => {
                self.observe_peer(sender, from, now);
                self.send(Packet::Pong { ping_id }, from);
            }
            Packet::Pong { ping_id } => {
                if !self.dht.pong_received(&sender, ping_id, now) {
                    tracing::debug!(key = %sender, "ignoring unsolicited pong");
                }
            }
            Packet::NodesRequest { target: _ } => {
                self.observe_peer(sender, from, now);
                let nodes = self.dht.entries_for_response(&sender, MAX_SENT_NODES);
                self.send(Packet::NodesResponse { nodes }, from);
            }
            Packet::NodesResponse { nodes } => {
                self.observe_peer(sender, from, now);
                for entry in nodes {
                    if entry.key == self.dht_key || entry.key.is_zero() {
                        continue;
                    }
                    self.observe_peer(entry.key, entry.addr, now);
                }
            }
        }
    }

    /// Records a live observation of `key` and queues a discovery
    /// event if the peer is new.
    fn observe_peer(&mut self, key: PublicKey, addr: SocketAddr, now: Instant) {
        if self.dht.observe(key, addr, now) {
            tracing::debug!(%key, %addr, "peer discovered");
            self.events.push_back(NetworkEvent::PeerDiscovered { key, addr });
        }
    }

    fn send(&self, body: Packet, dest: SocketAddr) {
        let wire = packet::encode(&self.dht_key, &body);
        if let Err(e) = self.socket.send_to(&wire, dest) {
            tracing::debug!(%dest, %e, "dropping outbound packet");
        }
    }

    // -----------------------------------------------------------------------
    // Bootstrap gateway
    // -----------------------------------------------------------------------

    /// Asks a known remote node for DHT entry.
    ///
    /// Validates the target, records it in the liveness table and
    /// sends it an initial nodes request. Failure never affects loop
    /// state.
    ///
    /// # Errors
    ///
    /// `PeerwaveError::BootstrapError` on an empty address, a zero
    /// port, a host that does not resolve, an all-zero key, or a send
    /// failure.
    pub fn bootstrap(&mut self, address: &str, port: u16, key: PublicKey) -> Result<()> {
        let addr = resolve_target(address, port).map_err(|e| PeerwaveError::BootstrapError {
            reason: e.to_string(),
        })?;
        if key.is_zero() {
            return Err(PeerwaveError::BootstrapError {
                reason: "all-zero public key".into(),
            });
        }

        self.observe_peer(key, addr, Instant::now());
        let request = Packet::NodesRequest {
            target: self.dht_key,
        };
        self.socket
            .send_to(&packet::encode(&self.dht_key, &request), addr)
            .map_err(|e| PeerwaveError::BootstrapError {
                reason: e.to_string(),
            })?;

        tracing::info!(%key, %addr, "bootstrap request sent");
        Ok(())
    }

    /// Registers a TCP relay as a fallback path.
    ///
    /// # Errors
    ///
    /// `PeerwaveError::RelayError` on an empty address, a zero port, a
    /// host that does not resolve, an all-zero key, or a full registry.
    pub fn add_relay(&mut self, address: &str, port: u16, key: PublicKey) -> Result<()> {
        let addr = resolve_target(address, port).map_err(|e| PeerwaveError::RelayError {
            reason: e.to_string(),
        })?;
        if key.is_zero() {
            return Err(PeerwaveError::RelayError {
                reason: "all-zero public key".into(),
            });
        }

        if self.relays.add(key, addr, Instant::now())? {
            tracing::info!(%key, %addr, "relay registered");
            self.events.push_back(NetworkEvent::RelayAdded { key, addr });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Address resolution
// ---------------------------------------------------------------------------

/// Resolves `address:port` to the first usable socket address.
fn resolve_target(address: &str, port: u16) -> Result<SocketAddr> {
    if address.is_empty() {
        return Err(PeerwaveError::InvalidAddress {
            reason: "empty address".into(),
        });
    }
    if port == 0 {
        return Err(PeerwaveError::InvalidAddress {
            reason: "port must be non-zero".into(),
        });
    }
    (address, port)
        .to_socket_addrs()
        .map_err(|e| PeerwaveError::InvalidAddress {
            reason: format!("unable to resolve '{address}': {e}"),
        })?
        .next()
        .ok_or_else(|| PeerwaveError::InvalidAddress {
            reason: format!("'{address}' resolved to no addresses"),
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
