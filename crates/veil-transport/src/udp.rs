// ============================================
// File: crates/veil-transport/src/udp.rs
// ============================================
//! # UDP Channel
//!
//! ## Creation Reason
//! Wraps a Tokio UDP socket behind the session's cooperative model:
//! one awaitable readiness probe, everything else non-suspending.
//!
//! ## Design Choices
//! - Uses SO_REUSEADDR for quick rebinding after restart
//! - `socket2` for option setup, then converted into a Tokio socket
//! - `try_send_to` / `try_recv_from` never block; the only await is
//!   [`UdpChannel::readable`]
//!
//! ## ⚠️ Important Note for Next Developer
//! - UDP is connectionless - no guaranteed delivery
//! - Maximum UDP payload is ~65507 bytes
//! - `try_recv_from` returning `WouldBlock` ends a drain loop; it is
//!   not an error
//!
//! ## Last Modified
//! v0.1.0 - Initial UDP channel

use std::net::SocketAddr;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{info, trace};

use crate::error::{Result, TransportError};

// ============================================
// UdpChannel
// ============================================

/// UDP socket with non-suspending I/O operations.
pub struct UdpChannel {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl UdpChannel {
    /// Binds a UDP socket to `addr`.
    ///
    /// # Socket Options
    /// - `SO_REUSEADDR`: enabled for quick rebinding
    /// - Non-blocking: required for the cooperative model
    ///
    /// # Errors
    /// - `BindFailed` / `Io`: option setup or bind failure
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| TransportError::io("creating UDP socket", e))?;

        socket
            .set_reuse_address(true)
            .map_err(|e| TransportError::io("setting SO_REUSEADDR", e))?;

        socket
            .set_nonblocking(true)
            .map_err(|e| TransportError::io("setting non-blocking", e))?;

        socket
            .bind(&addr.into())
            .map_err(|e| TransportError::bind_failed(addr, e.to_string()))?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)
            .map_err(|e| TransportError::io("converting to Tokio socket", e))?;

        let local_addr = socket
            .local_addr()
            .map_err(|e| TransportError::io("getting local address", e))?;

        info!(%local_addr, "UDP channel bound");

        Ok(Self { socket, local_addr })
    }

    /// Returns the bound local address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Waits until the socket is readable.
    ///
    /// This is the session's single suspension point; callers bound it
    /// with a timeout.
    ///
    /// # Errors
    /// Returns `Io` if the readiness probe fails.
    pub async fn readable(&self) -> Result<()> {
        self.socket
            .readable()
            .await
            .map_err(|e| TransportError::io("awaiting readability", e))
    }

    /// Receives one datagram without suspending.
    ///
    /// # Returns
    /// `Ok(None)` when no datagram is queued (`WouldBlock`).
    ///
    /// # Errors
    /// Returns `Io` for real socket failures.
    pub fn try_recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>> {
        match self.socket.try_recv_from(buf) {
            Ok((len, addr)) => {
                trace!(len, %addr, "datagram received");
                Ok(Some((len, addr)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(TransportError::io("receiving datagram", e)),
        }
    }

    /// Sends one datagram without suspending.
    ///
    /// # Returns
    /// `false` when the socket was not ready (`WouldBlock`); the
    /// datagram is then dropped and reliability recovers it.
    ///
    /// # Errors
    /// Returns `Io` for real socket failures.
    pub fn try_send_to(&self, buf: &[u8], dest: SocketAddr) -> Result<bool> {
        match self.socket.try_send_to(buf, dest) {
            Ok(len) => {
                trace!(len, %dest, "datagram sent");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                trace!(%dest, "send would block, datagram dropped");
                Ok(false)
            }
            Err(e) => Err(TransportError::io("sending datagram", e)),
        }
    }
}

impl std::fmt::Debug for UdpChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpChannel")
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_bind_and_local_addr() {
        let channel = UdpChannel::bind(loopback()).unwrap();
        let addr = channel.local_addr();

        assert_eq!(addr.ip(), std::net::Ipv4Addr::LOCALHOST);
        assert!(addr.port() > 0);
    }

    #[tokio::test]
    async fn test_send_recv_loopback() {
        let server = UdpChannel::bind(loopback()).unwrap();
        let client = UdpChannel::bind(loopback()).unwrap();

        let message = b"Hello, VEIL!";
        assert!(client.try_send_to(message, server.local_addr()).unwrap());

        server.readable().await.unwrap();
        let mut buf = [0u8; 1024];
        let (len, source) = server.try_recv_from(&mut buf).unwrap().unwrap();

        assert_eq!(&buf[..len], message);
        assert_eq!(source, client.local_addr());
    }

    #[tokio::test]
    async fn test_try_recv_empty_returns_none() {
        let channel = UdpChannel::bind(loopback()).unwrap();
        let mut buf = [0u8; 1024];
        assert!(channel.try_recv_from(&mut buf).unwrap().is_none());
    }
}
