//! dvlink-core: Core error, event, transport, and audio types for dvlink.
//!
//! This crate defines the abstractions shared by the radio protocol crates
//! and the task supervisor, without pulling in any specific radio dialect.
//!
//! # Key types
//!
//! - [`Error`] / [`Result`] -- error handling, with [`ErrorKind`] taxonomy
//! - [`SessionEvent`] -- asynchronous radio session notifications
//! - [`Transport`] / [`Connector`] -- byte-stream link to a radio
//! - [`AudioFrame`], [`AudioPorts`], [`AudioNode`] -- audio channel plumbing

pub mod audio;
pub mod error;
pub mod events;
pub mod transport;
pub mod types;

pub use audio::{
    AudioFrame, AudioNode, AudioPorts, AudioReceiver, AudioSender, ChannelLabel,
    DEFAULT_CHANNEL_CAPACITY, audio_channel,
};
pub use error::{Error, ErrorKind, Result};
pub use events::SessionEvent;
pub use transport::{Connector, Transport};
pub use types::{FailureReason, LifecyclePhase, TaskState};
