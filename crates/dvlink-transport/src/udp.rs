//! UDP transport for the binary datagram dialect.
//!
//! [`UdpTransport`] wraps a [`tokio::net::UdpSocket`] with error mapping
//! consistent with the rest of the dvlink transport layer. It does **not**
//! implement [`Transport`](dvlink_core::Transport): datagrams are atomic and
//! connectionless, not a byte stream.
//!
//! Session actors read with the poll-then-drain pattern: await
//! [`readable`](UdpTransport::readable), then call
//! [`try_recv_from`](UdpTransport::try_recv_from) until it reports `None`.
//! This never blocks the actor's turn on a datagram that is not there.
//!
//! # Example
//!
//! ```no_run
//! use dvlink_transport::UdpTransport;
//! use std::time::Duration;
//!
//! # async fn example() -> dvlink_core::Result<()> {
//! let transport = UdpTransport::bind("0.0.0.0:0").await?;
//! let radio = "192.168.1.60:50001".parse().unwrap();
//! transport.send_to(&[0x10, 0, 0, 0, 0x03, 0], radio).await?;
//!
//! let mut buf = [0u8; 1500];
//! let (n, src) = transport.recv_from(&mut buf, Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

use dvlink_core::error::{Error, Result};
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;

/// UDP transport for datagram-based radio sessions.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl UdpTransport {
    /// Bind to a local address, e.g. `"0.0.0.0:0"` for any port.
    pub async fn bind(addr: &str) -> Result<Self> {
        tracing::debug!(addr = %addr, "Binding UDP socket");

        let socket = UdpSocket::bind(addr).await.map_err(|e| {
            tracing::error!(addr = %addr, error = %e, "Failed to bind UDP socket");
            Error::Io(e)
        })?;

        let local_addr = socket.local_addr().map_err(|e| {
            tracing::error!(error = %e, "Failed to get local address");
            Error::Io(e)
        })?;

        tracing::debug!(local_addr = %local_addr, "UDP socket bound");

        Ok(Self { socket, local_addr })
    }

    /// Bind to a specific port on all interfaces (0 for any).
    pub async fn bind_port(port: u16) -> Result<Self> {
        Self::bind(&format!("0.0.0.0:{}", port)).await
    }

    /// The local address this socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The local IPv4 address and port, if bound to IPv4.
    ///
    /// Session identifiers are derived from these.
    pub fn local_ipv4(&self) -> Option<(Ipv4Addr, u16)> {
        match self.local_addr {
            SocketAddr::V4(v4) => Some((*v4.ip(), v4.port())),
            SocketAddr::V6(_) => None,
        }
    }

    /// Send one datagram to `addr`.
    pub async fn send_to(&self, data: &[u8], addr: SocketAddr) -> Result<()> {
        tracing::trace!(
            local = %self.local_addr,
            remote = %addr,
            bytes = data.len(),
            "Sending datagram"
        );

        self.socket.send_to(data, addr).await.map_err(|e| {
            tracing::error!(
                local = %self.local_addr,
                remote = %addr,
                error = %e,
                "Failed to send datagram"
            );
            Error::Transport(format!("send to {addr} failed: {e}"))
        })?;

        Ok(())
    }

    /// Receive a datagram with timeout. Returns `(bytes_read, source_addr)`.
    ///
    /// Returns [`Error::Timeout`] if nothing arrives within `timeout`.
    pub async fn recv_from(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<(usize, SocketAddr)> {
        match tokio::time::timeout(timeout, self.socket.recv_from(buf)).await {
            Ok(Ok((n, src))) => {
                tracing::trace!(local = %self.local_addr, remote = %src, bytes = n, "Received datagram");
                Ok((n, src))
            }
            Ok(Err(e)) => {
                tracing::error!(local = %self.local_addr, error = %e, "Failed to receive datagram");
                Err(Error::Io(e))
            }
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Wait until at least one datagram can be read.
    ///
    /// Cancel-safe; intended as a `tokio::select!` arm.
    pub async fn readable(&self) -> Result<()> {
        self.socket.readable().await.map_err(Error::Io)
    }

    /// Read one queued datagram without waiting.
    ///
    /// Returns `Ok(None)` once the socket is drained.
    pub fn try_recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>> {
        match self.socket.try_recv_from(buf) {
            Ok((n, src)) => {
                tracing::trace!(local = %self.local_addr, remote = %src, bytes = n, "Drained datagram");
                Ok(Some((n, src)))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_and_local_addr() {
        let transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr();

        assert_eq!(addr.ip(), Ipv4Addr::LOCALHOST);
        assert_ne!(addr.port(), 0, "OS should assign a nonzero port");

        let (ip, port) = transport.local_ipv4().unwrap();
        assert_eq!(ip, Ipv4Addr::LOCALHOST);
        assert_eq!(port, addr.port());
    }

    #[tokio::test]
    async fn send_recv_loopback() {
        let sender = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let receiver = UdpTransport::bind("127.0.0.1:0").await.unwrap();

        let data = [0x10u8, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00];
        sender.send_to(&data, receiver.local_addr()).await.unwrap();

        let mut buf = [0u8; 256];
        let (n, src) = receiver
            .recv_from(&mut buf, Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(&buf[..n], &data);
        assert_eq!(src, sender.local_addr());
    }

    #[tokio::test]
    async fn recv_timeout() {
        let transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();

        let mut buf = [0u8; 256];
        let result = transport
            .recv_from(&mut buf, Duration::from_millis(50))
            .await;

        assert!(
            matches!(result, Err(Error::Timeout)),
            "expected Timeout, got: {:?}",
            result
        );
    }

    #[tokio::test]
    async fn try_recv_on_empty_socket() {
        let transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let mut buf = [0u8; 64];
        assert!(transport.try_recv_from(&mut buf).unwrap().is_none());
    }

    #[tokio::test]
    async fn readable_then_drain() {
        let sender = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let receiver = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let dest = receiver.local_addr();

        let messages: &[&[u8]] = &[b"one", b"two", b"three"];
        for msg in messages {
            sender.send_to(msg, dest).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut received = Vec::new();
        let mut buf = [0u8; 64];
        while received.len() < messages.len() {
            tokio::time::timeout(Duration::from_secs(2), receiver.readable())
                .await
                .unwrap()
                .unwrap();
            while let Some((n, _)) = receiver.try_recv_from(&mut buf).unwrap() {
                received.push(buf[..n].to_vec());
            }
        }

        let expected: Vec<Vec<u8>> = messages.iter().map(|m| m.to_vec()).collect();
        assert_eq!(received, expected);
    }
}
