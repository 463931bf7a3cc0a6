//! Stream link for the line-oriented radio dialect.
//!
//! Sessions never build a [`TcpTransport`] by hand. They hold a
//! [`TcpConnector`] and ask it for a fresh transport on every connect
//! attempt, so a reconnect always starts from a new socket.
//!
//! ```no_run
//! use dvlink_transport::TcpConnector;
//! use dvlink_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> dvlink_core::Result<()> {
//! let connector = TcpConnector::new(Duration::from_millis(750));
//! let mut link = connector.open("192.168.1.100:4992").await?;
//! link.send(b"C1|sub slice all\n").await?;
//!
//! let mut buf = [0u8; 1024];
//! let n = link.receive(&mut buf, Duration::from_secs(2)).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use dvlink_core::error::{Error, Result};
use dvlink_core::transport::{Connector, Transport};
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens one [`TcpTransport`] per connection attempt.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Connect to `host:port`. Gives up with [`Error::Timeout`] once the
    /// connect timeout passes.
    pub async fn open(&self, addr: &str) -> Result<TcpTransport> {
        debug!(addr, timeout_ms = self.timeout.as_millis(), "opening command stream");

        let stream = match tokio::time::timeout(self.timeout, TcpStream::connect(addr)).await {
            Err(_) => {
                warn!(addr, "command stream connect timed out");
                return Err(Error::Timeout);
            }
            Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => {
                warn!(addr, "command stream refused");
                return Err(Error::Transport(format!("{addr}: connection refused")));
            }
            Ok(Err(e)) => {
                warn!(addr, error = %e, "command stream connect failed");
                return Err(Error::Io(e));
            }
            Ok(Ok(stream)) => stream,
        };

        // Command lines are short; don't let Nagle hold them back.
        if let Err(e) = stream.set_nodelay(true) {
            warn!(addr, error = %e, "TCP_NODELAY not set");
        }
        info!(addr, "command stream open");

        Ok(TcpTransport {
            stream: Some(stream),
            peer: addr.to_string(),
        })
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, addr: &str) -> Result<Box<dyn Transport>> {
        Ok(Box::new(self.open(addr).await?))
    }
}

/// An open command stream to a radio.
#[derive(Debug)]
pub struct TcpTransport {
    /// `None` once closed.
    stream: Option<TcpStream>,
    peer: String,
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        trace!(peer = %self.peer, bytes = data.len(), "tx");

        let written = match stream.write_all(data).await {
            Ok(()) => stream.flush().await,
            Err(e) => Err(e),
        };
        written.map_err(|e| {
            warn!(peer = %self.peer, error = %e, "write failed");
            stream_error(e)
        })
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        let n = tokio::time::timeout(timeout, stream.read(buf))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|e| {
                warn!(peer = %self.peer, error = %e, "read failed");
                stream_error(e)
            })?;
        if n == 0 {
            warn!(peer = %self.peer, "radio closed the command stream");
            return Err(Error::ConnectionLost);
        }
        trace!(peer = %self.peer, bytes = n, "rx");
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        if let Err(e) = stream.shutdown().await {
            debug!(peer = %self.peer, error = %e, "shutdown failed");
        }
        info!(peer = %self.peer, "command stream closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

/// Errors that mean the peer is gone become [`Error::ConnectionLost`].
fn stream_error(e: std::io::Error) -> Error {
    match e.kind() {
        ErrorKind::ConnectionReset
        | ErrorKind::BrokenPipe
        | ErrorKind::NotConnected
        | ErrorKind::ConnectionAborted
        | ErrorKind::UnexpectedEof => Error::ConnectionLost,
        _ => Error::Io(e),
    }
}
