//! Application-level events emitted by the network core.
//!
//! Queued by [`NetworkCore::advance`] and delivered to the host's
//! event callback within the same loop iteration, so a consumer never
//! observes an event for state that a later iteration has already
//! replaced.
//!
//! [`NetworkCore::advance`]: crate::NetworkCore::advance

use std::net::SocketAddr;

use peerwave_types::PublicKey;

/// An event the network core reports to the embedding application.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NetworkEvent {
    /// A peer was added to the DHT liveness table.
    PeerDiscovered {
        /// Public key of the discovered peer.
        key: PublicKey,
        /// Address the peer was observed at.
        addr: SocketAddr,
    },

    /// A peer stayed silent past the node timeout and was pruned.
    PeerExpired {
        /// Public key of the pruned peer.
        key: PublicKey,
    },

    /// A TCP relay was registered.
    RelayAdded {
        /// Public key of the relay.
        key: PublicKey,
        /// Resolved address of the relay.
        addr: SocketAddr,
    },
}
