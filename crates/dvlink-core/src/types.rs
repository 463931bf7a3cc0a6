//! Shared value types used across dvlink crates.

use std::fmt;

/// One of the three externally-driven lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecyclePhase {
    Start,
    Sleep,
    Wake,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecyclePhase::Start => write!(f, "start"),
            LifecyclePhase::Sleep => write!(f, "sleep"),
            LifecyclePhase::Wake => write!(f, "wake"),
        }
    }
}

/// The implicit lifecycle state of a supervised task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TaskState {
    #[default]
    Stopped,
    Running,
    Sleeping,
}

impl TaskState {
    /// The state a task lands in after completing `phase`.
    pub fn after(phase: LifecyclePhase) -> Self {
        match phase {
            LifecyclePhase::Start | LifecyclePhase::Wake => TaskState::Running,
            LifecyclePhase::Sleep => TaskState::Sleeping,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Stopped => write!(f, "stopped"),
            TaskState::Running => write!(f, "running"),
            TaskState::Sleeping => write!(f, "sleeping"),
        }
    }
}

/// Why a radio session gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// A tracked packet, discovery packet or keep-alive exhausted its retry budget.
    Timeout,
    /// The radio rejected our credentials on every allowed attempt.
    Rejected,
    /// The transport failed underneath the session.
    Transport,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout => write!(f, "retry budget exhausted"),
            FailureReason::Rejected => write!(f, "login rejected"),
            FailureReason::Transport => write!(f, "transport failure"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_display() {
        assert_eq!(LifecyclePhase::Start.to_string(), "start");
        assert_eq!(LifecyclePhase::Sleep.to_string(), "sleep");
        assert_eq!(LifecyclePhase::Wake.to_string(), "wake");
    }

    #[test]
    fn state_after_phase() {
        assert_eq!(TaskState::after(LifecyclePhase::Start), TaskState::Running);
        assert_eq!(TaskState::after(LifecyclePhase::Wake), TaskState::Running);
        assert_eq!(TaskState::after(LifecyclePhase::Sleep), TaskState::Sleeping);
        assert_eq!(TaskState::default(), TaskState::Stopped);
    }
}
