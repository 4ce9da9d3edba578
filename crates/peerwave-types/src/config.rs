//! Node configuration with sensible defaults.
//!
//! All operational parameters of a node are centralized here. Every
//! value has a documented default; `validate()` rejects values that
//! would stall or spin the run loop.

use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

use crate::{PeerwaveError, Result};

/// Per-node configuration.
///
/// Fixed at node creation; the run loop and the network core read it
/// but never change it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// IP address the UDP socket binds to.
    ///
    /// Default: `0.0.0.0` (all interfaces).
    pub bind_ip: IpAddr,

    /// UDP port to bind. `0` asks the OS for an ephemeral port.
    pub udp_port: u16,

    /// Whether external threads may call node APIs while the loop runs.
    ///
    /// When `true`, the loop holds the node lock across the whole
    /// iteration bracket (begin callback, network advance, event
    /// delivery, end callback), so a thread holding the external lock
    /// never observes a half-applied iteration. When `false`, the lock
    /// is held only around the network advance itself and the
    /// callbacks run outside it.
    ///
    /// Fixed at creation. Default: `false`.
    pub thread_safe: bool,

    /// Upper bound, in milliseconds, on the wait hint returned by one
    /// loop iteration. The loop never sleeps longer than this between
    /// iterations. Default: 50.
    pub max_iteration_interval_ms: u64,

    /// How often, in milliseconds, a known DHT peer is re-pinged to
    /// confirm liveness. Default: 60 000 (one minute).
    pub dht_ping_interval_ms: u64,

    /// How long, in milliseconds, a DHT peer may stay silent before it
    /// is pruned from the table. Must exceed the ping interval.
    /// Default: 180 000 (three minutes).
    pub dht_node_timeout_ms: u64,

    /// Maximum number of peers kept in the DHT liveness table. When
    /// full, the stalest entry is evicted. Default: 32.
    pub dht_max_nodes: usize,

    /// Maximum number of registered TCP relays. Registration beyond
    /// this fails synchronously. Default: 8.
    pub max_relays: usize,

    /// Maximum number of datagrams drained from the socket in a single
    /// iteration. Bounds the work one iteration performs. Default: 64.
    pub recv_batch_max: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            udp_port: 0,
            thread_safe: false,
            max_iteration_interval_ms: 50,
            dht_ping_interval_ms: 60_000,
            dht_node_timeout_ms: 180_000,
            dht_max_nodes: 32,
            max_relays: 8,
            recv_batch_max: 64,
        }
    }
}

impl NodeConfig {
    /// Validates all configuration values.
    ///
    /// Returns an error if any value is outside its acceptable range.
    pub fn validate(&self) -> Result<()> {
        if self.max_iteration_interval_ms == 0 {
            return Err(PeerwaveError::ConfigError {
                reason: "max_iteration_interval_ms must be greater than 0".into(),
            });
        }

        if self.dht_ping_interval_ms == 0 {
            return Err(PeerwaveError::ConfigError {
                reason: "dht_ping_interval_ms must be greater than 0".into(),
            });
        }

        if self.dht_node_timeout_ms <= self.dht_ping_interval_ms {
            return Err(PeerwaveError::ConfigError {
                reason: "dht_node_timeout_ms must exceed dht_ping_interval_ms".into(),
            });
        }

        if self.dht_max_nodes == 0 {
            return Err(PeerwaveError::ConfigError {
                reason: "dht_max_nodes must be greater than 0".into(),
            });
        }

        if self.max_relays == 0 {
            return Err(PeerwaveError::ConfigError {
                reason: "max_relays must be greater than 0".into(),
            });
        }

        if self.recv_batch_max == 0 {
            return Err(PeerwaveError::ConfigError {
                reason: "recv_batch_max must be greater than 0".into(),
            });
        }

        Ok(())
    }
}
