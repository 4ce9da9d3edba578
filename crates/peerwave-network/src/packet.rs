//! Minimal wire codec for DHT liveness traffic.
//!
//! Every datagram starts with a one-byte kind and the sender's 32-byte
//! public key, followed by a kind-specific payload:
//!
//! ```text
//! ping / pong      ping_id: u64 (big-endian)
//! nodes request    target key: 32 bytes
//! nodes response   count: u8, then per node:
//!                  family (2 = IPv4, 10 = IPv6), ip, port: u16 BE, key
//! ```
//!
//! Encryption, padding and handshake framing belong to the excluded
//! wire-security layer; this codec carries exactly what the liveness
//! table needs and nothing else.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use peerwave_types::{PeerwaveError, PublicKey, Result};

const KIND_PING: u8 = 0x00;
const KIND_PONG: u8 = 0x01;
const KIND_NODES_REQUEST: u8 = 0x02;
const KIND_NODES_RESPONSE: u8 = 0x04;

const FAMILY_IPV4: u8 = 2;
const FAMILY_IPV6: u8 = 10;

/// Maximum node entries carried in one nodes response.
pub const MAX_SENT_NODES: usize = 4;

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// One decoded datagram body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Packet {
    /// Liveness probe. The receiver echoes `ping_id` back in a [`Packet::Pong`].
    Ping {
        /// Random pairing id chosen by the sender.
        ping_id: u64,
    },
    /// Answer to a [`Packet::Ping`].
    Pong {
        /// The `ping_id` from the probe being answered.
        ping_id: u64,
    },
    /// Request for known peers near `target`.
    NodesRequest {
        /// Key the requester wants peers for (its own, during bootstrap).
        target: PublicKey,
    },
    /// Known peers, at most [`MAX_SENT_NODES`] of them.
    NodesResponse {
        /// Advertised peers.
        nodes: Vec<NodeEntry>,
    },
}

/// One peer advertised in a nodes response.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeEntry {
    /// The peer's public key.
    pub key: PublicKey,
    /// The address the advertiser last saw the peer at.
    pub addr: SocketAddr,
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encodes `packet` as sent by `sender`.
pub fn encode(sender: &PublicKey, packet: &Packet) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    out.push(kind_of(packet));
    out.extend_from_slice(sender.as_bytes());

    match packet {
        Packet::Ping { ping_id } | Packet::Pong { ping_id } => {
            out.extend_from_slice(&ping_id.to_be_bytes());
        }
        Packet::NodesRequest { target } => {
            out.extend_from_slice(target.as_bytes());
        }
        Packet::NodesResponse { nodes } => {
            debug_assert!(nodes.len() <= MAX_SENT_NODES);
            out.push(nodes.len() as u8);
            for node in nodes {
                match node.addr.ip() {
                    IpAddr::V4(ip) => {
                        out.push(FAMILY_IPV4);
                        out.extend_from_slice(&ip.octets());
                    }
                    IpAddr::V6(ip) => {
                        out.push(FAMILY_IPV6);
                        out.extend_from_slice(&ip.octets());
                    }
                }
                out.extend_from_slice(&node.addr.port().to_be_bytes());
                out.extend_from_slice(node.key.as_bytes());
            }
        }
    }

    out
}

fn kind_of(packet: &Packet) -> u8 {
    match packet {
        Packet::Ping { .. } => KIND_PING,
        Packet::Pong { .. } => KIND_PONG,
        Packet::NodesRequest { .. } => KIND_NODES_REQUEST,
        Packet::NodesResponse { .. } => KIND_NODES_RESPONSE,
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decodes a datagram into the sender's key and the packet body.
///
/// # Errors
///
/// `PeerwaveError::ProtocolError` on a truncated buffer, an unknown
/// kind, a malformed node entry, or trailing bytes.
pub fn decode(buf: &[u8]) -> Result<(PublicKey, Packet)> {
    let mut r = Reader::new(buf);
    let kind = r.u8()?;
    let sender = r.key()?;

    let packet = match kind {
        KIND_PING => Packet::Ping { ping_id: r.u64()? },
        KIND_PONG => Packet::Pong { ping_id: r.u64()? },
        KIND_NODES_REQUEST => Packet::NodesRequest { target: r.key()? },
        KIND_NODES_RESPONSE => {
            let count = r.u8()? as usize;
            if count > MAX_SENT_NODES {
                return Err(PeerwaveError::ProtocolError {
                    reason: format!("nodes response advertises {count} entries, max is {MAX_SENT_NODES}"),
                });
            }
            let mut nodes = Vec::with_capacity(count);
            for _ in 0..count {
                let ip = match r.u8()? {
                    FAMILY_IPV4 => IpAddr::V4(Ipv4Addr::from(r.array::<4>()?)),
                    FAMILY_IPV6 => IpAddr::V6(Ipv6Addr::from(r.array::<16>()?)),
                    family => {
                        return Err(PeerwaveError::ProtocolError {
                            reason: format!("unknown address family {family}"),
                        })
                    }
                };
                let port = u16::from_be_bytes(r.array::<2>()?);
                let key = r.key()?;
                nodes.push(NodeEntry {
                    key,
                    addr: SocketAddr::new(ip, port),
                });
            }
            Packet::NodesResponse { nodes }
        }
        kind => {
            return Err(PeerwaveError::ProtocolError {
                reason: format!("unknown packet kind 0x{kind:02x}"),
            })
        }
    };

    if !r.is_empty() {
        return Err(PeerwaveError::ProtocolError {
            reason: format!("{} trailing bytes after packet body", r.remaining()),
        });
    }

    Ok((sender, packet))
}

/// Cursor over a received datagram.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(PeerwaveError::ProtocolError {
                reason: format!("truncated packet: wanted {n} bytes, {} left", self.remaining()),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.array::<8>()?))
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn key(&mut self) -> Result<PublicKey> {
        Ok(PublicKey::new(self.array::<32>()?))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
