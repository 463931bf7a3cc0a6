//! Protocol states and the per-state dispatch table.
//!
//! Each state is one record in [`TABLE`]: its name and the packet kinds it
//! is willing to handle. Anything else that arrives in that state is
//! logged and dropped without a transition.

use std::fmt;

use crate::packet::PacketKind;

/// Which sub-session a state machine drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    /// Main control session; the only one that logs in.
    Control,
    /// CI-V serial passthrough.
    Serial,
    /// PCM audio stream.
    Audio,
}

impl SessionKind {
    pub fn name(self) -> &'static str {
        match self {
            SessionKind::Control => "control",
            SessionKind::Serial => "serial",
            SessionKind::Audio => "audio",
        }
    }

    /// Whether this sub-session authenticates after the readiness exchange.
    pub fn requires_login(self) -> bool {
        matches!(self, SessionKind::Control)
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum State {
    #[default]
    Idle,
    AreYouThere,
    AreYouReady,
    Login,
    Ready,
}

struct StateRecord {
    state: State,
    name: &'static str,
    accepts: &'static [PacketKind],
}

const TABLE: [StateRecord; 5] = [
    StateRecord {
        state: State::Idle,
        name: "Idle",
        accepts: &[],
    },
    StateRecord {
        state: State::AreYouThere,
        name: "AreYouThere",
        accepts: &[PacketKind::IAmHere],
    },
    StateRecord {
        state: State::AreYouReady,
        name: "AreYouReady",
        accepts: &[PacketKind::AreYouReady],
    },
    StateRecord {
        state: State::Login,
        name: "Login",
        accepts: &[
            PacketKind::LoginResponse,
            PacketKind::Idle,
            PacketKind::RetransmitRequest,
            PacketKind::Disconnect,
        ],
    },
    StateRecord {
        state: State::Ready,
        name: "Ready",
        accepts: &[
            PacketKind::Idle,
            PacketKind::RetransmitRequest,
            PacketKind::Ping,
            PacketKind::PingReply,
            PacketKind::Audio,
            PacketKind::Disconnect,
        ],
    },
];

impl State {
    fn record(self) -> &'static StateRecord {
        &TABLE[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.record().name
    }

    /// Whether a packet of `kind` is handled in this state.
    pub fn accepts(self, kind: PacketKind) -> bool {
        self.record().accepts.contains(&kind)
    }

    /// Discovery and readiness are re-sent on a timer rather than tracked.
    pub fn is_discovering(self) -> bool {
        matches!(self, State::AreYouThere | State::AreYouReady)
    }

    /// States in which tracked packets may be outstanding.
    pub fn uses_ledger(self) -> bool {
        matches!(self, State::Login | State::Ready)
    }

    /// Where the readiness reply leads for a given sub-session.
    pub fn after_ready(kind: SessionKind) -> State {
        if kind.requires_login() {
            State::Login
        } else {
            State::Ready
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
