//! # dvlink -- digital-voice radio link
//!
//! `dvlink` connects a digital-voice handset to a networked transceiver.
//! It speaks two radio dialects, sequences the handset's subsystems through
//! start, sleep, and wake, and wires their audio channels together.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use dvlink::icom::{Credentials, IcomSessionBuilder, SessionKind};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let control = IcomSessionBuilder::new("192.168.1.60")
//!         .kind(SessionKind::Control)
//!         .build()
//!         .await?;
//!     control
//!         .connect_and_wait(Credentials::new("user", "pass"), Duration::from_secs(5))
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate               | Purpose                                        |
//! |---------------------|------------------------------------------------|
//! | `dvlink-core`       | Errors, session events, transport trait, audio channels |
//! | `dvlink-transport`  | TCP and UDP transports                         |
//! | `dvlink-icom`       | Binary datagram dialect: codec, ledger, state machine, session |
//! | `dvlink-flex`       | Line dialect: codec, continuation table, reconnecting session |
//! | `dvlink-task`       | Task lifecycle, supervisor, audio fabric       |
//! | **`dvlink`**        | This facade crate -- re-exports everything     |
//!
//! ## Feature Flags
//!
//! | Feature | Enables                         | Default |
//! |---------|---------------------------------|---------|
//! | `icom`  | [`icom`] module (datagram dialect) | yes  |
//! | `flex`  | [`flex`] module (line dialect)  | yes     |

use std::fmt;
use std::str::FromStr;

pub use dvlink_core::*;

/// Task lifecycle, supervisor, and audio routing.
pub mod task {
    pub use dvlink_task::*;
}

/// Stream and datagram transports.
pub mod transport {
    pub use dvlink_transport::*;
}

/// Binary datagram dialect.
///
/// Provides [`IcomSession`](icom::IcomSession) and
/// [`IcomSessionBuilder`](icom::IcomSessionBuilder) for the control, serial,
/// and audio sub-sessions, plus the sans-IO
/// [`ProtocolMachine`](icom::ProtocolMachine) underneath them.
#[cfg(feature = "icom")]
pub mod icom {
    pub use dvlink_icom::*;
}

/// Line-oriented command dialect.
///
/// Provides [`FlexSession`](flex::FlexSession) and
/// [`FlexSessionBuilder`](flex::FlexSessionBuilder), which register the
/// FreeDV waveforms and reconnect after the link drops.
#[cfg(feature = "flex")]
pub mod flex {
    pub use dvlink_flex::*;
}

/// A radio network dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// UDP datagrams with discovery, login, and tracked sends.
    Icom,
    /// Newline-terminated commands over TCP.
    Flex,
}

impl Dialect {
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Icom => "icom",
            Dialect::Flex => "flex",
        }
    }

    /// Well-known radio port for the dialect's primary session.
    pub fn default_port(&self) -> u16 {
        match self {
            Dialect::Icom => 50001,
            Dialect::Flex => 4992,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "icom" => Ok(Dialect::Icom),
            "flex" | "flexradio" => Ok(Dialect::Flex),
            other => Err(Error::InvalidParameter(format!("unknown radio dialect '{other}'"))),
        }
    }
}

/// Dialects compiled into this build.
///
/// # Example
///
/// ```
/// for dialect in dvlink::supported_dialects() {
///     println!("{dialect} (port {})", dialect.default_port());
/// }
/// ```
pub fn supported_dialects() -> Vec<Dialect> {
    let mut dialects = Vec::new();

    #[cfg(feature = "icom")]
    dialects.push(Dialect::Icom);

    #[cfg(feature = "flex")]
    dialects.push(Dialect::Flex);

    dialects
}
