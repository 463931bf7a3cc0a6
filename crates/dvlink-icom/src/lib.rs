//! Network control/audio protocol backend for dvlink.
//!
//! This crate implements the UDP dialect spoken by networked transceivers
//! for remote control and audio. It provides:
//!
//! - **Packet codec** ([`packet`]) -- encode and decode the fixed-header
//!   control, discovery, login, ping, and audio datagrams.
//! - **Passcode** ([`passcode`]) -- credential obfuscation for login.
//! - **Ledger** ([`ledger`]) -- tracked-send bookkeeping with fixed-interval
//!   retry and eviction.
//! - **State table** ([`state`]) -- protocol states and the packet kinds
//!   each one handles.
//! - **ProtocolMachine** ([`machine`]) -- the sans-IO per-sub-session state
//!   machine: discovery, readiness, login, keep-alive, and audio ticks.
//! - **IcomSession** ([`session`]) -- the actor that owns the socket and
//!   drives a machine from its timers.
//! - **IcomSessionBuilder** ([`builder`]) -- fluent construction.
//!
//! # Example
//!
//! ```
//! use dvlink_icom::packet::{self, DecodeResult, PacketKind};
//!
//! let hello = packet::are_you_there(0x0001_C351, 0);
//! match packet::decode(&hello) {
//!     DecodeResult::Packet(p) => assert_eq!(p.kind(), PacketKind::AreYouThere),
//!     DecodeResult::Malformed(why) => panic!("{why}"),
//! }
//! ```

pub mod builder;
pub mod ledger;
pub mod machine;
pub mod packet;
pub mod passcode;
pub mod session;
pub mod state;

pub use builder::IcomSessionBuilder;
pub use machine::{Action, Credentials, MachineConfig, ProtocolMachine};
pub use session::{IcomSession, SessionStatus};
pub use state::{SessionKind, State};
