//! TCP relay registry.
//!
//! Relays are fallback paths for peers whose direct UDP traffic is
//! blocked. The relay session protocol itself (framing, multiplexing,
//! keepalive) is an excluded subsystem; this registry is the boundary
//! the run-loop core needs: validated registration, dedupe by key, and
//! a capacity cap so a misbehaving host cannot grow the list without
//! bound.

use std::net::SocketAddr;
use std::time::Instant;

use peerwave_types::{PeerwaveError, PublicKey, Result};

/// One registered relay.
#[derive(Clone, Debug)]
pub struct RelayEntry {
    /// The relay's public key.
    pub key: PublicKey,
    /// Resolved address of the relay.
    pub addr: SocketAddr,
    /// When the relay was registered (or last re-registered).
    pub added_at: Instant,
}

/// Bounded, key-deduplicated list of relays.
#[derive(Debug)]
pub struct RelayRegistry {
    relays: Vec<RelayEntry>,
    capacity: usize,
}

impl RelayRegistry {
    /// Creates an empty registry holding at most `capacity` relays.
    pub fn new(capacity: usize) -> Self {
        Self {
            relays: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Number of registered relays.
    pub fn len(&self) -> usize {
        self.relays.len()
    }

    /// Whether no relay is registered.
    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }

    /// Registers a relay, replacing a previous entry with the same key.
    ///
    /// Returns `true` if the relay is new.
    ///
    /// # Errors
    ///
    /// `PeerwaveError::RelayError` when the registry is full and the
    /// key is not already present.
    pub fn add(&mut self, key: PublicKey, addr: SocketAddr, now: Instant) -> Result<bool> {
        if let Some(entry) = self.relays.iter_mut().find(|r| r.key == key) {
            entry.addr = addr;
            entry.added_at = now;
            return Ok(false);
        }

        if self.relays.len() >= self.capacity {
            return Err(PeerwaveError::RelayError {
                reason: format!("relay capacity of {} reached", self.capacity),
            });
        }

        self.relays.push(RelayEntry {
            key,
            addr,
            added_at: now,
        });
        Ok(true)
    }

    /// Iterates over the registered relays.
    pub fn iter(&self) -> impl Iterator<Item = &RelayEntry> {
        self.relays.iter()
    }
}
