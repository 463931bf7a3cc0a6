//! Error types for dvlink.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport failures, protocol decode
//! errors, retry-budget exhaustion, and assembly-time configuration errors
//! are all captured here.

use crate::types::LifecyclePhase;

/// The error type for all dvlink operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (UDP socket, TCP stream).
    #[error("transport error: {0}")]
    Transport(String),

    /// A packet or line that could not be parsed.
    #[error("malformed input: {0}")]
    Malformed(String),

    /// A well-formed packet or line that is not valid in the current state.
    #[error("unexpected input: {0}")]
    Unexpected(String),

    /// No reply within the retry budget, or a lifecycle transition that
    /// did not complete within its timeout.
    #[error("timeout waiting for response")]
    Timeout,

    /// The radio refused the supplied credentials.
    #[error("login rejected: {0}")]
    Rejected(String),

    /// An invalid parameter was passed to an operation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The system could not be assembled (missing task, channel, or a
    /// channel bound twice). Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No session with the radio has been established.
    #[error("not connected")]
    NotConnected,

    /// The connection to the radio was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An actor inbox or audio channel was closed.
    #[error("stream closed")]
    StreamClosed,

    /// A supervisor start/sleep/wake sequence aborted at `task`.
    #[error("{phase} sequence failed at task '{task}': {source}")]
    SequenceFailed {
        /// The lifecycle phase being sequenced.
        phase: LifecyclePhase,
        /// The task whose transition failed.
        task: String,
        /// Why the transition failed.
        source: Box<Error>,
    },

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an [`Error`], used to decide propagation.
///
/// Parsing and protocol errors are absorbed at the component boundary,
/// transport failures trigger teardown and reconnect, timeouts are fatal to
/// the session, and configuration failures are fatal at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Malformed,
    Unexpected,
    Timeout,
    TransportFailure,
    ConfigurationFailure,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Malformed(_) => ErrorKind::Malformed,
            Error::Unexpected(_) | Error::InvalidParameter(_) => ErrorKind::Unexpected,
            Error::Timeout | Error::Rejected(_) => ErrorKind::Timeout,
            Error::Transport(_)
            | Error::NotConnected
            | Error::ConnectionLost
            | Error::StreamClosed
            | Error::Io(_) => ErrorKind::TransportFailure,
            Error::Configuration(_) => ErrorKind::ConfigurationFailure,
            Error::SequenceFailed { source, .. } => source.kind(),
        }
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_malformed() {
        let e = Error::Malformed("short header".into());
        assert_eq!(e.to_string(), "malformed input: short header");
    }

    #[test]
    fn error_display_timeout() {
        assert_eq!(Error::Timeout.to_string(), "timeout waiting for response");
    }

    #[test]
    fn error_display_configuration() {
        let e = Error::Configuration("no input LEFT on mixer".into());
        assert_eq!(e.to_string(), "configuration error: no input LEFT on mixer");
    }

    #[test]
    fn error_display_sequence_failed() {
        let e = Error::SequenceFailed {
            phase: LifecyclePhase::Sleep,
            task: "network".into(),
            source: Box::new(Error::Timeout),
        };
        assert_eq!(
            e.to_string(),
            "sleep sequence failed at task 'network': timeout waiting for response"
        );
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn kind_classification() {
        assert_eq!(Error::Malformed("x".into()).kind(), ErrorKind::Malformed);
        assert_eq!(Error::Unexpected("x".into()).kind(), ErrorKind::Unexpected);
        assert_eq!(Error::Timeout.kind(), ErrorKind::Timeout);
        assert_eq!(Error::ConnectionLost.kind(), ErrorKind::TransportFailure);
        assert_eq!(
            Error::Configuration("x".into()).kind(),
            ErrorKind::ConfigurationFailure
        );
    }

    #[test]
    fn sequence_failed_kind_follows_source() {
        let e = Error::SequenceFailed {
            phase: LifecyclePhase::Start,
            task: "codec".into(),
            source: Box::new(Error::Timeout),
        };
        assert_eq!(e.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
