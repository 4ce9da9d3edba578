//! Non-blocking UDP socket with batched receive.
//!
//! The run loop must never block inside an iteration, so the socket is
//! switched to non-blocking mode at bind time and reads are drained in
//! bounded batches until the kernel reports `WouldBlock`.

use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};

use peerwave_types::{PeerwaveError, Result};

/// Largest datagram the codec ever produces; receive buffers are sized
/// to this.
pub const MAX_DATAGRAM: usize = 2048;

/// Non-blocking UDP socket owned by a node's network core.
#[derive(Debug)]
pub struct NetSocket {
    socket: UdpSocket,
    local_port: u16,
}

impl NetSocket {
    /// Binds a non-blocking UDP socket to `ip:port`.
    ///
    /// A `port` of `0` asks the OS for an ephemeral port; the actual
    /// port is available via [`local_port`](Self::local_port).
    ///
    /// # Errors
    ///
    /// `PeerwaveError::NetworkError` if the bind fails or the socket
    /// cannot be switched to non-blocking mode.
    pub fn bind(ip: IpAddr, port: u16) -> Result<Self> {
        let socket = UdpSocket::bind((ip, port)).map_err(|e| PeerwaveError::NetworkError {
            reason: format!("failed to bind UDP socket on {ip}:{port}: {e}"),
        })?;
        socket
            .set_nonblocking(true)
            .map_err(|e| PeerwaveError::NetworkError {
                reason: format!("failed to set socket non-blocking: {e}"),
            })?;
        let local_port = socket
            .local_addr()
            .map_err(|e| PeerwaveError::NetworkError {
                reason: format!("failed to read bound socket address: {e}"),
            })?
            .port();
        Ok(Self { socket, local_port })
    }

    /// The port the socket is actually bound to.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Sends one datagram to `dest`.
    ///
    /// # Errors
    ///
    /// `PeerwaveError::NetworkError` on send failure. UDP gives no
    /// delivery guarantee either way; callers inside the iteration
    /// path log and continue rather than abort the iteration.
    pub fn send_to(&self, buf: &[u8], dest: SocketAddr) -> Result<()> {
        self.socket
            .send_to(buf, dest)
            .map_err(|e| PeerwaveError::NetworkError {
                reason: format!("failed to send datagram to {dest}: {e}"),
            })?;
        Ok(())
    }

    /// Drains up to `max` pending datagrams from the socket.
    ///
    /// Stops at `WouldBlock` (queue empty) or after `max` datagrams,
    /// whichever comes first. Per-datagram soft errors (e.g. an ICMP
    /// port-unreachable surfacing as `ConnectionRefused`) are skipped;
    /// anything else ends the batch with a warning.
    pub fn recv_batch(&self, max: usize) -> Vec<(SocketAddr, Vec<u8>)> {
        let mut batch = Vec::new();
        let mut buf = [0u8; MAX_DATAGRAM];

        while batch.len() < max {
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => batch.push((from, buf[..len].to_vec())),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e)
                    if e.kind() == io::ErrorKind::ConnectionRefused
                        || e.kind() == io::ErrorKind::ConnectionReset =>
                {
                    // A previous send bounced; irrelevant to receiving.
                    continue;
                }
                Err(e) => {
                    tracing::warn!(%e, "receive batch aborted");
                    break;
                }
            }
        }

        batch
    }
}
