//! Sans-IO command channel for the line dialect.
//!
//! [`CommandChannel`] owns everything about one connection that does not
//! need a socket: the sequence counter, the table of reply continuations,
//! the partial-line buffer, and the queue of encoded command lines waiting
//! to be written. The session actor feeds it raw bytes with
//! [`feed`](CommandChannel::feed) and writes out whatever
//! [`take_outbound`](CommandChannel::take_outbound) returns.
//!
//! A continuation is invoked at most once, when the matching `R` line
//! arrives. It receives the channel itself so that it can queue follow-up
//! commands.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, error, info, trace, warn};

use crate::codec::{self, FlexLine, Response};
use crate::waveform;

/// Longest partial line kept while waiting for its newline.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Reply handler registered with [`CommandChannel::send_command`].
pub type Continuation = Box<dyn FnOnce(&mut CommandChannel, &Response) + Send>;

/// Something the session should act on after a [`feed`](CommandChannel::feed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The radio reported its protocol version.
    Version(String),
    /// The radio assigned this connection a handle; waveform setup has been
    /// queued.
    HandleAssigned(u32),
}

/// Per-connection command state.
#[derive(Default)]
pub struct CommandChannel {
    next_seq: u32,
    continuations: HashMap<u32, Continuation>,
    inbuf: Vec<u8>,
    /// Dropping the rest of an over-long line up to its newline.
    overflowed: bool,
    outbox: Vec<Vec<u8>>,
    events: Vec<ChannelEvent>,
}

impl CommandChannel {
    pub fn new() -> Self {
        CommandChannel::default()
    }

    /// Queue `command` under the next sequence number and return that
    /// number. `continuation`, if any, runs when the radio replies.
    pub fn send_command(&mut self, command: &str, continuation: Option<Continuation>) -> u32 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);

        if let Some(cont) = continuation {
            if self.continuations.insert(seq, cont).is_some() {
                warn!(seq, "replacing stale continuation for reused sequence number");
            }
        }

        debug!(seq, command, "queueing command");
        self.outbox.push(codec::encode_command(seq, command));
        seq
    }

    /// Append received bytes and process every complete line.
    ///
    /// Bytes after the last newline stay buffered until more data arrives.
    /// A line that grows past [`MAX_LINE_LEN`] without a newline is
    /// discarded as malformed.
    pub fn feed(&mut self, data: &[u8]) {
        self.inbuf.extend_from_slice(data);

        while let Some(pos) = self.inbuf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.inbuf.drain(..=pos).collect();
            if self.overflowed {
                self.overflowed = false;
                continue;
            }
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            self.process_line(line);
        }

        if self.inbuf.len() > MAX_LINE_LEN {
            warn!(bytes = self.inbuf.len(), "discarding malformed over-long line");
            self.inbuf.clear();
            self.overflowed = true;
        }
    }

    /// Dispatch one complete line (without its terminator).
    pub fn process_line(&mut self, line: &str) {
        trace!(line, "received line");
        match codec::parse_line(line) {
            Ok(FlexLine::Version(version)) => {
                info!(version = %version, "radio protocol version");
                self.events.push(ChannelEvent::Version(version));
            }
            Ok(FlexLine::Handle(handle)) => {
                info!(handle = format_args!("{handle:08X}"), "connection handle assigned");
                self.events.push(ChannelEvent::HandleAssigned(handle));
                waveform::register_all(self);
            }
            Ok(FlexLine::Response(response)) => self.complete(response),
            Ok(FlexLine::Unknown(line)) => {
                warn!(line = %line, "ignoring unhandled line");
            }
            Err(e) => warn!(line, error = %e, "discarding malformed line"),
        }
    }

    fn complete(&mut self, response: Response) {
        if response.status != 0 {
            error!(
                seq = response.sequence,
                status = format_args!("{:08X}", response.status),
                message = %response.message,
                "command failed"
            );
        }
        match self.continuations.remove(&response.sequence) {
            Some(cont) => cont(self, &response),
            None => trace!(seq = response.sequence, "no continuation registered"),
        }
    }

    /// Drain the encoded command lines queued since the last call.
    pub fn take_outbound(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outbox)
    }

    /// Drain events raised since the last call.
    pub fn take_events(&mut self) -> Vec<ChannelEvent> {
        std::mem::take(&mut self.events)
    }

    /// Whether a continuation is waiting on `seq`.
    pub fn is_pending(&self, seq: u32) -> bool {
        self.continuations.contains_key(&seq)
    }

    /// Number of registered continuations.
    pub fn pending(&self) -> usize {
        self.continuations.len()
    }

    /// Sequence number the next command will use.
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    /// Forget everything about the current connection. Registered
    /// continuations are dropped without being invoked.
    pub fn reset(&mut self) {
        if !self.continuations.is_empty() {
            debug!(count = self.continuations.len(), "discarding pending continuations");
        }
        self.next_seq = 0;
        self.continuations.clear();
        self.inbuf.clear();
        self.overflowed = false;
        self.outbox.clear();
        self.events.clear();
    }
}

impl fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandChannel")
            .field("next_seq", &self.next_seq)
            .field("pending", &self.continuations.len())
            .field("buffered", &self.inbuf.len())
            .field("outbox", &self.outbox.len())
            .finish()
    }
}
