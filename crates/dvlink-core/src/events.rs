//! Asynchronous session event types.
//!
//! Events are emitted by radio sessions through a [`tokio::sync::broadcast`]
//! channel whenever the session changes state. The UI subscribes to these to
//! drive the network indicator without polling the session.

use crate::types::FailureReason;

/// An event emitted by a radio session.
///
/// Delivered on a best-effort basis through a bounded broadcast channel;
/// slow subscribers may miss events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The protocol state machine moved between states.
    StateChanged {
        from: &'static str,
        to: &'static str,
    },

    /// The peer answered discovery; its identifier is now known.
    PeerIdentified {
        /// Remote session identifier.
        their_id: u32,
    },

    /// The session is fully established and ready for traffic.
    Connected,

    /// The session was torn down on request.
    Disconnected,

    /// The session gave up. Exactly one is emitted per failed session;
    /// the owner must reconnect explicitly.
    Failed {
        reason: FailureReason,
    },

    /// A reconnect has been scheduled after a transport failure.
    Reconnecting {
        /// The reconnection attempt number (1-based).
        attempt: u32,
    },

    /// The line-dialect radio assigned us a connection handle.
    HandleAssigned {
        handle: u32,
    },
}

impl SessionEvent {
    /// Whether this event means the link is currently usable.
    ///
    /// Drives the "network" indicator: on for `Connected`, off for
    /// `Disconnected`/`Failed`/`Reconnecting`, unchanged otherwise.
    pub fn link_indicator(&self) -> Option<bool> {
        match self {
            SessionEvent::Connected | SessionEvent::HandleAssigned { .. } => Some(true),
            SessionEvent::Disconnected
            | SessionEvent::Failed { .. }
            | SessionEvent::Reconnecting { .. } => Some(false),
            SessionEvent::StateChanged { .. } | SessionEvent::PeerIdentified { .. } => None,
        }
    }
}
