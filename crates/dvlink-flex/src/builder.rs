//! FlexSessionBuilder -- fluent builder for [`FlexSession`] actors.
//!
//! Separates configuration from construction so that callers can set the
//! radio address, reconnect policy, and transport before the actor starts.
//! Building does not connect; call [`FlexSession::connect`].
//!
//! # Example
//!
//! ```no_run
//! use dvlink_flex::FlexSessionBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> dvlink_core::Result<()> {
//! let session = FlexSessionBuilder::new("192.168.1.100")
//!     .reconnect_backoff(Duration::from_secs(10))
//!     .build()?;
//! session.connect().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use dvlink_core::error::{Error, Result};
use dvlink_core::transport::Connector;
use dvlink_transport::TcpConnector;

use crate::session::{FlexSession, SessionParts};

/// Command port of the radio.
pub const DEFAULT_TCP_PORT: u16 = 4992;

/// Wait between a lost connection and the next attempt.
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(10);

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Fluent builder for [`FlexSession`].
pub struct FlexSessionBuilder {
    host: String,
    port: u16,
    backoff: Duration,
    connect_timeout: Duration,
    auto_reconnect: bool,
    connector: Option<Box<dyn Connector>>,
}

impl FlexSessionBuilder {
    /// Create a builder for the radio at `host` (name or IP address).
    pub fn new(host: &str) -> Self {
        FlexSessionBuilder {
            host: host.to_string(),
            port: DEFAULT_TCP_PORT,
            backoff: DEFAULT_RECONNECT_BACKOFF,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            auto_reconnect: true,
            connector: None,
        }
    }

    /// TCP command port (default: 4992).
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Delay before reconnecting after the link drops (default: 10s).
    pub fn reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Reconnect automatically after the link drops (default: true).
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Open connections through `connector` instead of plain TCP.
    pub fn connector(mut self, connector: Box<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Spawn the session actor. Must be called within a tokio runtime.
    pub fn build(self) -> Result<FlexSession> {
        if self.host.is_empty() {
            return Err(Error::InvalidParameter("host must not be empty".into()));
        }
        if self.backoff.is_zero() {
            return Err(Error::InvalidParameter(
                "reconnect_backoff must be non-zero".into(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::InvalidParameter(
                "connect_timeout must be non-zero".into(),
            ));
        }

        let addr = format_addr(&self.host, self.port);
        let connector = self
            .connector
            .unwrap_or_else(|| Box::new(TcpConnector::new(self.connect_timeout)));

        tracing::info!(addr = %addr, backoff_ms = self.backoff.as_millis() as u64, "Built command session");

        Ok(FlexSession::spawn(SessionParts {
            addr,
            connector,
            backoff: self.backoff,
            auto_reconnect: self.auto_reconnect,
        }))
    }
}

/// `host:port`, bracketing bare IPv6 literals.
fn format_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_formatting() {
        assert_eq!(format_addr("192.168.1.100", 4992), "192.168.1.100:4992");
        assert_eq!(format_addr("radio.local", 1), "radio.local:1");
        assert_eq!(format_addr("::1", 4992), "[::1]:4992");
    }

    #[tokio::test]
    async fn rejects_zero_backoff() {
        let result = FlexSessionBuilder::new("127.0.0.1")
            .reconnect_backoff(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn builds_disconnected_session() {
        let session = FlexSessionBuilder::new("127.0.0.1").build().unwrap();
        assert_eq!(session.addr(), "127.0.0.1:4992");
        let status = session.status().await.unwrap();
        assert!(!status.connected);
        assert!(!status.reconnect_scheduled);
        assert_eq!(status.handle, None);
        session.shutdown().await.unwrap();
    }
}
