//! Line-dialect command session for dvlink.
//!
//! This crate speaks the newline-terminated ASCII command protocol used by
//! SmartSDR-family radios on TCP port 4992. It provides:
//!
//! - **Codec** ([`codec`]) -- `C<seq>|<command>` encoding and parsing of
//!   `V`, `H`, and `R` lines.
//! - **Command channel** ([`channel`]) -- sans-IO sequence numbering,
//!   continuation table, and line buffering.
//! - **Waveform setup** ([`waveform`]) -- the commands that register the
//!   FreeDV waveforms once the radio assigns a handle.
//! - **FlexSession** ([`session`]) -- actor owning the stream transport,
//!   with backoff reconnect after the link drops.
//! - **FlexSessionBuilder** ([`builder`]) -- fluent configuration.
//!
//! # Example
//!
//! ```
//! use dvlink_flex::channel::CommandChannel;
//!
//! let mut channel = CommandChannel::new();
//! channel.feed(b"V1.4.0.0\nH2C0F1A3B\n");
//! assert_eq!(channel.take_outbound().len(), 3);
//! ```

pub mod builder;
pub mod channel;
pub mod codec;
pub mod session;
pub mod waveform;

pub use builder::FlexSessionBuilder;
pub use channel::{ChannelEvent, CommandChannel, Continuation};
pub use codec::{FlexLine, Response};
pub use session::{FlexSession, FlexStatus};
