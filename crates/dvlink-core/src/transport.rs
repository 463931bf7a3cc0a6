//! Stream transport abstraction for the line-oriented radio dialect.
//!
//! The [`Transport`] trait abstracts over the byte stream to a radio. The
//! command session in `dvlink-flex` drives a `Transport` rather than a raw
//! socket, and obtains fresh transports through a [`Connector`] so that it
//! can tear down and re-establish the link on its own schedule.
//!
//! The binary datagram dialect does not use this trait; datagrams are not a
//! byte stream. See `dvlink_transport::UdpTransport`.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level stream transport to a radio.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes, returning once all bytes are written and flushed.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes into `buf`.
    ///
    /// Returns the number of bytes read. Waits up to `timeout` for data;
    /// returns [`Error::Timeout`](crate::error::Error::Timeout) if nothing
    /// arrives and [`Error::ConnectionLost`](crate::error::Error::ConnectionLost)
    /// when the peer closes the stream (a zero-length read).
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the connection. Subsequent calls return
    /// [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}

/// Factory for stream transports.
///
/// A reconnecting session holds one `Connector` and asks it for a new
/// [`Transport`] on every connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new connection to `addr` (`host:port`).
    async fn connect(&self, addr: &str) -> Result<Box<dyn Transport>>;
}
