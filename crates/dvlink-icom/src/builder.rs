//! IcomSessionBuilder -- fluent builder for [`IcomSession`] actors.
//!
//! Separates configuration from construction so that callers can pick the
//! sub-session kind, ports, retry policy, and audio channels before the
//! socket is bound.
//!
//! # Example
//!
//! ```no_run
//! use dvlink_icom::{Credentials, IcomSessionBuilder, SessionKind};
//! use std::time::Duration;
//!
//! # async fn example() -> dvlink_core::Result<()> {
//! let session = IcomSessionBuilder::new("192.168.1.60")
//!     .kind(SessionKind::Control)
//!     .max_retries(5)
//!     .build()
//!     .await?;
//! session
//!     .connect_and_wait(Credentials::new("user", "pass"), Duration::from_secs(5))
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use dvlink_core::audio::{AudioReceiver, AudioSender};
use dvlink_core::error::{Error, Result};
use dvlink_transport::UdpTransport;

use crate::machine::{MachineConfig, ProtocolMachine};
use crate::packet;
use crate::session::{IcomSession, SessionParts};
use crate::state::SessionKind;

/// Radio port for the control sub-session.
pub const DEFAULT_CONTROL_PORT: u16 = 50001;
/// Radio port for the CI-V serial sub-session.
pub const DEFAULT_SERIAL_PORT: u16 = 50002;
/// Radio port for the audio sub-session.
pub const DEFAULT_AUDIO_PORT: u16 = 50003;

/// Default radio port for a sub-session kind.
pub fn default_port(kind: SessionKind) -> u16 {
    match kind {
        SessionKind::Control => DEFAULT_CONTROL_PORT,
        SessionKind::Serial => DEFAULT_SERIAL_PORT,
        SessionKind::Audio => DEFAULT_AUDIO_PORT,
    }
}

/// Fluent builder for [`IcomSession`].
pub struct IcomSessionBuilder {
    host: String,
    port: Option<u16>,
    local_addr: String,
    config: MachineConfig,
    audio_in: Option<AudioReceiver>,
    audio_out: Option<AudioSender>,
}

impl IcomSessionBuilder {
    /// Create a builder for the radio at `host` (name or IPv4 address).
    pub fn new(host: &str) -> Self {
        IcomSessionBuilder {
            host: host.to_string(),
            port: None,
            local_addr: "0.0.0.0:0".into(),
            config: MachineConfig::default(),
            audio_in: None,
            audio_out: None,
        }
    }

    /// Select the sub-session kind (default: control).
    pub fn kind(mut self, kind: SessionKind) -> Self {
        self.config.kind = kind;
        self
    }

    /// Override the radio port. Defaults to the well-known port for the kind.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Local address to bind (default `0.0.0.0:0`).
    pub fn local_addr(mut self, addr: &str) -> Self {
        self.local_addr = addr.to_string();
        self
    }

    /// Interval between discovery resends and tracked-packet retries (default: 500ms).
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.config.retry_interval = interval;
        self
    }

    /// Retry budget before the session fails (default: 5).
    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = interval;
        self
    }

    pub fn audio_period(mut self, period: Duration) -> Self {
        self.config.audio_period = period;
        self
    }

    /// Login attempts before a rejection is final (default: 3).
    pub fn max_login_attempts(mut self, n: u32) -> Self {
        self.config.max_login_attempts = n;
        self
    }

    /// Send outbound audio as tracked packets (default: false).
    pub fn reliable_audio(mut self, enabled: bool) -> Self {
        self.config.reliable_audio = enabled;
        self
    }

    pub fn client_name(mut self, name: &str) -> Self {
        self.config.client_name = name.to_string();
        self
    }

    /// Frames pulled from here are sent to the radio (audio sessions only).
    pub fn audio_input(mut self, rx: AudioReceiver) -> Self {
        self.audio_in = Some(rx);
        self
    }

    /// Audio received from the radio is pushed here (audio sessions only).
    pub fn audio_output(mut self, tx: AudioSender) -> Self {
        self.audio_out = Some(tx);
        self
    }

    /// Resolve the radio, bind the socket, and spawn the session actor.
    ///
    /// The session starts idle; call [`IcomSession::connect`] to begin
    /// discovery.
    pub async fn build(self) -> Result<IcomSession> {
        self.validate()?;

        let port = self.port.unwrap_or_else(|| default_port(self.config.kind));
        let peer = resolve(&self.host, port).await?;
        let socket = UdpTransport::bind(&self.local_addr).await?;
        let our_id = match socket.local_ipv4() {
            Some((ip, local_port)) => packet::identifier_for(ip, local_port),
            None => socket.local_addr().port() as u32,
        };

        tracing::info!(
            session = %self.config.kind,
            peer = %peer,
            our_id = format_args!("{our_id:#010x}"),
            "Built radio session"
        );

        Ok(IcomSession::spawn(SessionParts {
            socket,
            peer,
            machine: ProtocolMachine::new(self.config, our_id),
            audio_in: self.audio_in,
            audio_out: self.audio_out,
        }))
    }

    fn validate(&self) -> Result<()> {
        if self.config.max_retries == 0 {
            return Err(Error::InvalidParameter("max_retries must be at least 1".into()));
        }
        if self.config.max_login_attempts == 0 {
            return Err(Error::InvalidParameter(
                "max_login_attempts must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("retry_interval", self.config.retry_interval),
            ("ping_interval", self.config.ping_interval),
            ("audio_period", self.config.audio_period),
        ] {
            if value.is_zero() {
                return Err(Error::InvalidParameter(format!("{name} must be non-zero")));
            }
        }
        if self.config.kind != SessionKind::Audio
            && (self.audio_in.is_some() || self.audio_out.is_some())
        {
            return Err(Error::InvalidParameter(format!(
                "{} session does not carry audio",
                self.config.kind
            )));
        }
        Ok(())
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let mut addrs = tokio::net::lookup_host((host, port)).await.map_err(|e| {
        tracing::error!(host = %host, error = %e, "Failed to resolve radio address");
        Error::InvalidParameter(format!("cannot resolve {host}: {e}"))
    })?;
    addrs
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| Error::InvalidParameter(format!("{host} has no IPv4 address")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dvlink_core::audio::audio_channel;

    #[test]
    fn ports_by_kind() {
        assert_eq!(default_port(SessionKind::Control), 50001);
        assert_eq!(default_port(SessionKind::Serial), 50002);
        assert_eq!(default_port(SessionKind::Audio), 50003);
    }

    #[tokio::test]
    async fn rejects_zero_retries() {
        let result = IcomSessionBuilder::new("127.0.0.1").max_retries(0).build().await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn rejects_audio_on_control_session() {
        let (_tx, rx) = audio_channel(4);
        let result = IcomSessionBuilder::new("127.0.0.1")
            .kind(SessionKind::Control)
            .audio_input(rx)
            .build()
            .await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn builds_idle_session() {
        let session = IcomSessionBuilder::new("127.0.0.1")
            .port(9)
            .local_addr("127.0.0.1:0")
            .build()
            .await
            .unwrap();
        let status = session.status().await.unwrap();
        assert_eq!(status.state, crate::state::State::Idle);
        assert_eq!(status.kind, SessionKind::Control);
        assert_eq!(status.their_id, 0);
        assert_eq!(session.peer().port(), 9);
        session.shutdown().await.unwrap();
    }
}
