//! Core shared types for the Peerwave P2P node.
//!
//! This crate defines the types used across the workspace. No other
//! crate should define shared types — everything lives here.

pub mod config;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// PublicKey
// ---------------------------------------------------------------------------

/// 32-byte public identity key of a node on the DHT.
///
/// This is the coarse-grained identity the run-loop core needs: a
/// fixed-size key identifying a remote peer for bootstrap and relay
/// registration. Key generation and the handshake built on top of it
/// live outside this workspace.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// The fixed byte length of a public key.
    pub const LEN: usize = 32;

    /// Creates a new `PublicKey` from raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Whether every byte of the key is zero.
    ///
    /// The all-zero key is not a valid peer identity; bootstrap and
    /// relay registration reject it.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl From<[u8; 32]> for PublicKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for PublicKey {
    type Err = PeerwaveError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| PeerwaveError::InvalidKey {
            reason: "invalid hex encoding".into(),
        })?;
        if bytes.len() != Self::LEN {
            return Err(PeerwaveError::InvalidKey {
                reason: format!("expected {} bytes, got {}", Self::LEN, bytes.len()),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

// ---------------------------------------------------------------------------
// PeerwaveError
// ---------------------------------------------------------------------------

/// Central error type for the Peerwave workspace.
///
/// All crates convert their internal failures into variants of this
/// enum, giving a unified error surface. State-machine violations are
/// returned to the caller and never silently ignored; the documented
/// idempotent no-ops (redundant stop, join of a never-started loop)
/// return `Ok` instead of a distinguishable error.
#[derive(Debug, Error)]
pub enum PeerwaveError {
    /// The loop is already running (or stopping) and cannot be started.
    #[error("loop already running: {reason}")]
    AlreadyRunning {
        /// Human-readable description including the offending state.
        reason: String,
    },

    /// The loop worker thread terminated abnormally.
    ///
    /// Fatal to that handle's loop run; the handle itself remains valid
    /// for inspection and teardown.
    #[error("internal failure: {reason}")]
    InternalFailure {
        /// Human-readable description of the abnormal termination.
        reason: String,
    },

    /// A DHT bootstrap request could not be issued.
    #[error("bootstrap failed: {reason}")]
    BootstrapError {
        /// Human-readable description of the bootstrap failure.
        reason: String,
    },

    /// A TCP relay could not be registered.
    #[error("relay registration failed: {reason}")]
    RelayError {
        /// Human-readable description of the relay failure.
        reason: String,
    },

    /// A host/port pair is malformed or does not resolve.
    #[error("invalid address: {reason}")]
    InvalidAddress {
        /// Human-readable description of why the address is invalid.
        reason: String,
    },

    /// A public key is malformed.
    #[error("invalid key: {reason}")]
    InvalidKey {
        /// Human-readable description of why the key is invalid.
        reason: String,
    },

    /// A socket operation failed.
    #[error("network error: {reason}")]
    NetworkError {
        /// Human-readable description of the network failure.
        reason: String,
    },

    /// A wire packet could not be encoded or decoded.
    #[error("protocol error: {reason}")]
    ProtocolError {
        /// Human-readable description of the protocol failure.
        reason: String,
    },

    /// A configuration value is invalid.
    #[error("config error: {reason}")]
    ConfigError {
        /// Human-readable description of the configuration problem.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Result alias
// ---------------------------------------------------------------------------

/// Convenience result type using [`PeerwaveError`].
pub type Result<T> = std::result::Result<T, PeerwaveError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_key_roundtrip_hex() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let bytes = [0xABu8; 32];
        let key = PublicKey::new(bytes);
        let hex_str = key.to_string();
        let parsed: PublicKey = hex_str.parse()?;
        assert_eq!(key, parsed);
        Ok(())
    }

    #[test]
    fn public_key_invalid_hex_length() {
        let result: std::result::Result<PublicKey, _> = "abcd".parse();
        assert!(result.is_err());
    }

    #[test]
    fn public_key_invalid_hex_chars() {
        let result: std::result::Result<PublicKey, _> = "zzzz".parse();
        assert!(result.is_err());
    }

    #[test]
    fn public_key_zero_detection() {
        assert!(PublicKey::new([0u8; 32]).is_zero());
        let mut bytes = [0u8; 32];
        bytes[31] = 1;
        assert!(!PublicKey::new(bytes).is_zero());
    }

    #[test]
    fn public_key_serde_json_roundtrip() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let key = PublicKey::new([0x11u8; 32]);
        let json = serde_json::to_string(&key)?;
        let parsed: PublicKey = serde_json::from_str(&json)?;
        assert_eq!(key, parsed);
        Ok(())
    }

    #[test]
    fn error_display() {
        let err = PeerwaveError::BootstrapError {
            reason: "port must be non-zero".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("port must be non-zero"));
    }
}
