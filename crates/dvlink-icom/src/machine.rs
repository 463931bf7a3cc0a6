//! Sans-IO protocol state machine for one sub-session.
//!
//! [`ProtocolMachine`] owns the session identifiers, the sequence counters,
//! and the tracked-send [`Ledger`]. It never touches a socket or a clock:
//! every entry point takes the current [`Instant`] and returns the
//! [`Action`]s the owner must perform. The owner calls
//! [`poll`](ProtocolMachine::poll) no later than
//! [`next_deadline`](ProtocolMachine::next_deadline).
//!
//! ```text
//! Idle -> AreYouThere -> AreYouReady -> Login -> Ready
//!                                   \___________/ (serial, audio)
//! any state -> Idle on stop, peer disconnect, or exhausted retries
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use dvlink_core::{FailureReason, SessionEvent};

use crate::ledger::{self, Ledger};
use crate::packet::{self, DecodeResult, LoginFields, Packet};
use crate::state::{SessionKind, State};

/// Interval between keep-alive pings once ready.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(500);
/// Audio output tick.
pub const DEFAULT_AUDIO_PERIOD: Duration = Duration::from_millis(20);
/// Samples pulled per audio tick (20 ms at 8 kHz).
pub const DEFAULT_AUDIO_FRAME_SAMPLES: usize = 160;
/// Sample rate of the audio stream.
pub const AUDIO_SAMPLE_RATE: u32 = 8000;
pub const DEFAULT_MAX_LOGIN_ATTEMPTS: u32 = 3;

/// Timing and policy for one [`ProtocolMachine`].
#[derive(Debug, Clone)]
pub struct MachineConfig {
    pub kind: SessionKind,
    /// Interval for discovery resends and tracked-packet retries.
    pub retry_interval: Duration,
    /// Retry budget shared by discovery, tracked packets, and keep-alives.
    pub max_retries: u32,
    pub ping_interval: Duration,
    pub audio_period: Duration,
    pub max_login_attempts: u32,
    /// Send audio as tracked packets instead of fire-and-forget.
    pub reliable_audio: bool,
    /// Name reported to the radio in the login packet.
    pub client_name: String,
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            kind: SessionKind::Control,
            retry_interval: ledger::DEFAULT_RETRY_INTERVAL,
            max_retries: ledger::DEFAULT_MAX_RETRIES,
            ping_interval: DEFAULT_PING_INTERVAL,
            audio_period: DEFAULT_AUDIO_PERIOD,
            max_login_attempts: DEFAULT_MAX_LOGIN_ATTEMPTS,
            reliable_audio: false,
            client_name: "dvlink".into(),
        }
    }
}

/// Username and password presented at login.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Work the owner of a machine must carry out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Put a datagram on the wire to the peer.
    Send(Vec<u8>),
    /// Publish a session event.
    Emit(SessionEvent),
    /// An audio tick fired: pull one frame and pass it to
    /// [`ProtocolMachine::send_audio`].
    PullAudio,
    /// Samples received from the radio, already deduplicated.
    DeliverAudio(Vec<i16>),
}

/// One sub-session's protocol state.
#[derive(Debug)]
pub struct ProtocolMachine {
    config: MachineConfig,
    credentials: Credentials,
    state: State,
    our_id: u32,
    their_id: u32,

    /// Sequence counter for tracked and audio packets.
    send_seq: u16,
    ping_seq: u16,
    /// Sequence of the ping we are waiting to see answered.
    pending_ping: Option<u16>,
    missed_pings: u32,
    inner_seq: u16,
    token_request: u16,
    token: u32,
    login_attempts: u32,
    login_seq: Option<u16>,
    audio_seq: u16,
    last_rx_audio: Option<u16>,
    discovery_attempts: u32,

    ledger: Ledger,
    epoch: Option<Instant>,
    discovery_at: Option<Instant>,
    ping_at: Option<Instant>,
    audio_at: Option<Instant>,
}

impl ProtocolMachine {
    pub fn new(config: MachineConfig, our_id: u32) -> Self {
        let ledger = Ledger::new(config.retry_interval, config.max_retries);
        ProtocolMachine {
            config,
            credentials: Credentials::default(),
            state: State::Idle,
            our_id,
            their_id: 0,
            send_seq: 1,
            ping_seq: 0,
            pending_ping: None,
            missed_pings: 0,
            inner_seq: 0,
            token_request: 0,
            token: 0,
            login_attempts: 0,
            login_seq: None,
            audio_seq: 0,
            last_rx_audio: None,
            discovery_attempts: 0,
            ledger,
            epoch: None,
            discovery_at: None,
            ping_at: None,
            audio_at: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn kind(&self) -> SessionKind {
        self.config.kind
    }

    pub fn our_id(&self) -> u32 {
        self.our_id
    }

    /// Remote identifier; zero until the peer has answered discovery.
    pub fn their_id(&self) -> u32 {
        self.their_id
    }

    /// Token granted by the radio on a successful login.
    pub fn token(&self) -> u32 {
        self.token
    }

    /// Number of tracked packets awaiting acknowledgment.
    pub fn pending(&self) -> usize {
        self.ledger.len()
    }

    /// Earliest instant at which [`poll`](Self::poll) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let ledger = if self.state.uses_ledger() {
            self.ledger.next_deadline()
        } else {
            None
        };
        [self.discovery_at, ledger, self.ping_at, self.audio_at]
            .into_iter()
            .flatten()
            .min()
    }

    /// Begin a new session. An active session is torn down first.
    pub fn connect(&mut self, credentials: Credentials, now: Instant) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.state != State::Idle {
            tracing::debug!(
                session = %self.config.kind,
                state = %self.state,
                "Connect on active session; restarting"
            );
            self.teardown(now, &mut actions);
        }

        self.credentials = credentials;
        self.their_id = 0;
        self.send_seq = 1;
        self.ping_seq = 0;
        self.inner_seq = 0;
        self.token_request = rand::random::<u16>();
        self.token = 0;
        self.audio_seq = 0;
        self.last_rx_audio = None;
        self.epoch = Some(now);

        self.transition(State::AreYouThere, now, &mut actions);
        actions
    }

    /// Tear the session down, telling the peer. No-op when idle.
    pub fn stop(&mut self, now: Instant) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.state != State::Idle {
            self.teardown(now, &mut actions);
        }
        actions
    }

    /// Process one inbound datagram.
    ///
    /// Malformed datagrams, datagrams from another peer, and packets the
    /// current state does not expect are dropped without a transition.
    pub fn handle_datagram(&mut self, buf: &[u8], now: Instant) -> Vec<Action> {
        let mut actions = Vec::new();

        let packet = match packet::decode(buf) {
            DecodeResult::Packet(p) => p,
            DecodeResult::Malformed(reason) => {
                tracing::warn!(
                    session = %self.config.kind,
                    bytes = buf.len(),
                    reason = %reason,
                    "Dropping malformed datagram"
                );
                return actions;
            }
        };

        let kind = packet.kind();
        let header = *packet.header();
        if (self.their_id != 0 && header.sent_id != self.their_id)
            || (header.rcvd_id != 0 && header.rcvd_id != self.our_id)
        {
            tracing::warn!(
                session = %self.config.kind,
                sent_id = format_args!("{:#010x}", header.sent_id),
                rcvd_id = format_args!("{:#010x}", header.rcvd_id),
                "Dropping datagram for another session"
            );
            return actions;
        }
        if !self.state.accepts(kind) {
            tracing::debug!(
                session = %self.config.kind,
                state = %self.state,
                kind = ?kind,
                "Ignoring packet not expected in this state"
            );
            return actions;
        }

        tracing::trace!(session = %self.config.kind, kind = ?kind, seq = header.seq, "Received packet");

        match packet {
            Packet::IAmHere(h) => {
                self.their_id = h.sent_id;
                tracing::info!(
                    session = %self.config.kind,
                    their_id = format_args!("{:#010x}", h.sent_id),
                    "Peer identified"
                );
                actions.push(Action::Emit(SessionEvent::PeerIdentified {
                    their_id: h.sent_id,
                }));
                self.transition(State::AreYouReady, now, &mut actions);
            }
            Packet::AreYouReady(_) => {
                let next = State::after_ready(self.config.kind);
                self.transition(next, now, &mut actions);
            }
            Packet::LoginResponse {
                inner_seq,
                token,
                error,
                ..
            } => self.on_login_response(inner_seq, token, error, now, &mut actions),
            Packet::Idle(h) => {
                if self.ledger.acknowledge(h.seq) {
                    tracing::trace!(session = %self.config.kind, seq = h.seq, "Acknowledged");
                }
            }
            Packet::RetransmitRequest(h) => match self.ledger.get(h.seq) {
                Some(bytes) => {
                    tracing::debug!(session = %self.config.kind, seq = h.seq, "Peer requested retransmit");
                    actions.push(Action::Send(bytes.to_vec()));
                }
                None => {
                    tracing::debug!(session = %self.config.kind, seq = h.seq, "Retransmit requested for packet no longer held");
                }
            },
            Packet::Ping {
                header,
                reply: false,
                time,
            } => {
                actions.push(Action::Send(packet::ping_reply(
                    header.seq,
                    self.our_id,
                    self.their_id,
                    time,
                )));
            }
            Packet::Ping {
                header,
                reply: true,
                ..
            } => {
                if self.pending_ping == Some(header.seq) {
                    self.pending_ping = None;
                    self.missed_pings = 0;
                }
            }
            Packet::Audio {
                send_seq, samples, ..
            } => self.on_audio(send_seq, samples, &mut actions),
            Packet::Disconnect(_) => {
                tracing::info!(session = %self.config.kind, "Peer closed the session");
                self.transition(State::Idle, now, &mut actions);
                actions.push(Action::Emit(SessionEvent::Disconnected));
            }
            Packet::AreYouThere(_) | Packet::Login { .. } => {}
        }

        actions
    }

    /// Run every timer that is due at `now`.
    pub fn poll(&mut self, now: Instant) -> Vec<Action> {
        let mut actions = Vec::new();

        if self.state.is_discovering() && self.discovery_at.is_some_and(|at| now >= at) {
            if self.discovery_attempts >= self.config.max_retries {
                tracing::warn!(
                    session = %self.config.kind,
                    state = %self.state,
                    attempts = self.discovery_attempts,
                    "No reply from radio"
                );
                self.fail(FailureReason::Timeout, now, &mut actions);
                return actions;
            }
            self.discovery_attempts += 1;
            tracing::trace!(session = %self.config.kind, state = %self.state, attempt = self.discovery_attempts, "Resending discovery");
            actions.push(Action::Send(self.discovery_packet()));
            self.discovery_at = Some(now + self.config.retry_interval);
        }

        if self.state.uses_ledger() {
            let outcome = self.ledger.tick(now);
            for (seq, bytes) in outcome.resend {
                tracing::trace!(session = %self.config.kind, seq, "Resending tracked packet");
                actions.push(Action::Send(bytes));
            }
            if let Some(seq) = outcome.evicted.first() {
                tracing::warn!(session = %self.config.kind, seq, "Tracked packet exhausted its retries");
                self.fail(FailureReason::Timeout, now, &mut actions);
                return actions;
            }
        }

        if self.state == State::Ready && self.ping_at.is_some_and(|at| now >= at) {
            if self.pending_ping.is_some() {
                self.missed_pings += 1;
                if self.missed_pings >= self.config.max_retries {
                    tracing::warn!(session = %self.config.kind, missed = self.missed_pings, "Keep-alive lost");
                    self.fail(FailureReason::Timeout, now, &mut actions);
                    return actions;
                }
            }
            let seq = self.ping_seq;
            self.ping_seq = self.ping_seq.wrapping_add(1);
            self.pending_ping = Some(seq);
            actions.push(Action::Send(packet::ping(
                seq,
                self.our_id,
                self.their_id,
                self.elapsed_ms(now),
            )));
            self.ping_at = Some(now + self.config.ping_interval);
        }

        if let Some(at) = self.audio_at.filter(|&at| self.state == State::Ready && now >= at) {
            actions.push(Action::PullAudio);
            let next = at + self.config.audio_period;
            self.audio_at = Some(if next <= now {
                now + self.config.audio_period
            } else {
                next
            });
        }

        actions
    }

    /// Send one frame of outbound audio. Ignored unless this is a ready
    /// audio sub-session.
    pub fn send_audio(&mut self, samples: &[i16], now: Instant) -> Vec<Action> {
        if self.state != State::Ready || self.config.kind != SessionKind::Audio {
            return Vec::new();
        }
        let seq = self.next_seq();
        let bytes = packet::audio(seq, self.our_id, self.their_id, self.audio_seq, samples);
        self.audio_seq = self.audio_seq.wrapping_add(1);
        if self.config.reliable_audio {
            self.ledger.track(seq, bytes.clone(), now);
        }
        vec![Action::Send(bytes)]
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    fn transition(&mut self, to: State, now: Instant, actions: &mut Vec<Action>) {
        let from = self.state;
        tracing::debug!(session = %self.config.kind, state = %from, "Leaving state");
        if from.is_discovering() {
            self.discovery_at = None;
        }
        self.state = to;
        tracing::debug!(session = %self.config.kind, state = %to, "Entering state");
        actions.push(Action::Emit(SessionEvent::StateChanged {
            from: from.name(),
            to: to.name(),
        }));
        self.enter(to, now, actions);
    }

    fn enter(&mut self, state: State, now: Instant, actions: &mut Vec<Action>) {
        match state {
            State::Idle => {
                self.ledger.clear();
                self.discovery_at = None;
                self.ping_at = None;
                self.audio_at = None;
                self.pending_ping = None;
                self.login_seq = None;
            }
            State::AreYouThere | State::AreYouReady => {
                self.discovery_attempts = 1;
                actions.push(Action::Send(self.discovery_packet()));
                self.discovery_at = Some(now + self.config.retry_interval);
            }
            State::Login => {
                self.login_attempts = 0;
                self.send_login(now, actions);
            }
            State::Ready => {
                self.missed_pings = 0;
                self.pending_ping = None;
                self.ping_at = Some(now + self.config.ping_interval);
                if self.config.kind == SessionKind::Audio {
                    self.audio_at = Some(now + self.config.audio_period);
                }
                tracing::info!(session = %self.config.kind, "Session ready");
                actions.push(Action::Emit(SessionEvent::Connected));
            }
        }
    }

    fn teardown(&mut self, now: Instant, actions: &mut Vec<Action>) {
        actions.push(Action::Send(packet::disconnect(self.our_id, self.their_id)));
        self.transition(State::Idle, now, actions);
        actions.push(Action::Emit(SessionEvent::Disconnected));
    }

    fn fail(&mut self, reason: FailureReason, now: Instant, actions: &mut Vec<Action>) {
        tracing::error!(
            session = %self.config.kind,
            state = %self.state,
            reason = %reason,
            "Session failed"
        );
        self.transition(State::Idle, now, actions);
        actions.push(Action::Emit(SessionEvent::Failed { reason }));
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn discovery_packet(&self) -> Vec<u8> {
        match self.state {
            State::AreYouReady => packet::are_you_ready(self.our_id, self.their_id),
            _ => packet::are_you_there(self.our_id, self.their_id),
        }
    }

    fn send_login(&mut self, now: Instant, actions: &mut Vec<Action>) {
        self.login_attempts += 1;
        self.inner_seq = self.inner_seq.wrapping_add(1);
        let seq = self.next_seq();
        let bytes = packet::login(
            seq,
            self.our_id,
            self.their_id,
            &LoginFields {
                inner_seq: self.inner_seq,
                token_request: self.token_request,
                username: &self.credentials.username,
                password: &self.credentials.password,
                client_name: &self.config.client_name,
            },
        );
        tracing::debug!(
            session = %self.config.kind,
            seq,
            attempt = self.login_attempts,
            "Sending login"
        );
        self.ledger.track(seq, bytes.clone(), now);
        self.login_seq = Some(seq);
        actions.push(Action::Send(bytes));
    }

    fn on_login_response(
        &mut self,
        inner_seq: u16,
        token: u32,
        error: u32,
        now: Instant,
        actions: &mut Vec<Action>,
    ) {
        if inner_seq != self.inner_seq {
            tracing::debug!(
                session = %self.config.kind,
                got = inner_seq,
                expected = self.inner_seq,
                "Ignoring stale login response"
            );
            return;
        }
        if let Some(seq) = self.login_seq.take() {
            self.ledger.acknowledge(seq);
        }

        if error == 0 {
            self.token = token;
            tracing::info!(session = %self.config.kind, "Login accepted");
            self.transition(State::Ready, now, actions);
        } else if self.login_attempts < self.config.max_login_attempts {
            tracing::warn!(
                session = %self.config.kind,
                error = format_args!("{error:#010x}"),
                attempt = self.login_attempts,
                "Login rejected; retrying"
            );
            self.send_login(now, actions);
        } else {
            self.fail(FailureReason::Rejected, now, actions);
        }
    }

    fn on_audio(&mut self, send_seq: u16, samples: Vec<i16>, actions: &mut Vec<Action>) {
        if self.config.kind != SessionKind::Audio {
            return;
        }
        if let Some(last) = self.last_rx_audio {
            let ahead = send_seq.wrapping_sub(last);
            if ahead == 0 || ahead >= 0x8000 {
                tracing::trace!(session = %self.config.kind, send_seq, last, "Dropping duplicate audio");
                return;
            }
        }
        self.last_rx_audio = Some(send_seq);
        actions.push(Action::DeliverAudio(samples));
    }

    fn next_seq(&mut self) -> u16 {
        let seq = self.send_seq;
        self.send_seq = self.send_seq.wrapping_add(1);
        seq
    }

    fn elapsed_ms(&self, now: Instant) -> u32 {
        self.epoch
            .map(|e| now.saturating_duration_since(e).as_millis() as u32)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketKind;

    const OUR: u32 = 0x0001_C351;
    const THEIRS: u32 = 0x1234;
    const STEP: Duration = ledger::DEFAULT_RETRY_INTERVAL;

    fn machine(kind: SessionKind) -> ProtocolMachine {
        ProtocolMachine::new(
            MachineConfig {
                kind,
                ..MachineConfig::default()
            },
            OUR,
        )
    }

    fn creds() -> Credentials {
        Credentials::new("user", "pass")
    }

    fn sent(actions: &[Action]) -> Vec<Packet> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Send(bytes) => match packet::decode(bytes) {
                    DecodeResult::Packet(p) => Some(p),
                    DecodeResult::Malformed(why) => panic!("sent malformed packet: {why}"),
                },
                _ => None,
            })
            .collect()
    }

    fn events(actions: &[Action]) -> Vec<SessionEvent> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Emit(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    fn failures(actions: &[Action]) -> usize {
        events(actions)
            .iter()
            .filter(|e| matches!(e, SessionEvent::Failed { .. }))
            .count()
    }

    /// Drive a machine through discovery; returns the actions of the
    /// readiness reply.
    fn through_ready_reply(m: &mut ProtocolMachine, now: Instant) -> Vec<Action> {
        m.connect(creds(), now);
        m.handle_datagram(&packet::i_am_here(THEIRS, OUR), now);
        m.handle_datagram(&packet::are_you_ready(THEIRS, OUR), now)
    }

    fn login_of(actions: &[Action]) -> (u16, u16) {
        sent(actions)
            .into_iter()
            .find_map(|p| match p {
                Packet::Login {
                    header, inner_seq, ..
                } => Some((header.seq, inner_seq)),
                _ => None,
            })
            .expect("login sent")
    }

    #[test]
    fn connect_sends_discovery() {
        let mut m = machine(SessionKind::Control);
        let actions = m.connect(creds(), Instant::now());

        assert_eq!(m.state(), State::AreYouThere);
        let packets = sent(&actions);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].kind(), PacketKind::AreYouThere);
        assert_eq!(packets[0].header().sent_id, OUR);
        assert_eq!(packets[0].header().rcvd_id, 0);
        assert!(events(&actions).contains(&SessionEvent::StateChanged {
            from: "Idle",
            to: "AreYouThere"
        }));
    }

    #[test]
    fn peer_identifier_used_in_next_packet() {
        let now = Instant::now();
        let mut m = machine(SessionKind::Control);
        m.connect(creds(), now);

        let actions = m.handle_datagram(&packet::i_am_here(0x1234, OUR), now);

        assert_eq!(m.their_id(), 0x1234);
        assert_eq!(m.state(), State::AreYouReady);
        let packets = sent(&actions);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].kind(), PacketKind::AreYouReady);
        assert_eq!(packets[0].header().rcvd_id, 0x1234);
        assert!(events(&actions).contains(&SessionEvent::PeerIdentified { their_id: 0x1234 }));
    }

    #[test]
    fn silent_peer_fails_once_after_retry_budget() {
        let t0 = Instant::now();
        let mut m = machine(SessionKind::Control);
        let mut all = m.connect(creds(), t0);
        for i in 1..=20 {
            all.extend(m.poll(t0 + STEP * i));
        }

        let discoveries = sent(&all)
            .iter()
            .filter(|p| p.kind() == PacketKind::AreYouThere)
            .count();
        assert_eq!(discoveries, 5);
        assert_eq!(failures(&all), 1);
        assert!(events(&all).contains(&SessionEvent::Failed {
            reason: FailureReason::Timeout
        }));
        assert_eq!(m.state(), State::Idle);
        assert_eq!(m.next_deadline(), None);
    }

    #[test]
    fn mismatched_packets_are_ignored() {
        let now = Instant::now();
        let mut m = machine(SessionKind::Control);
        m.connect(creds(), now);

        let stray: Vec<Vec<u8>> = vec![
            packet::are_you_ready(THEIRS, OUR),
            packet::login_response(1, THEIRS, OUR, 1, 0, 0, ""),
            packet::ping(0, THEIRS, OUR, 0),
            packet::idle(1, THEIRS, OUR),
            vec![0x01, 0x02, 0x03],
        ];
        for bytes in stray {
            assert!(m.handle_datagram(&bytes, now).is_empty());
            assert_eq!(m.state(), State::AreYouThere);
        }
    }

    #[test]
    fn datagram_for_other_session_is_ignored() {
        let now = Instant::now();
        let mut m = machine(SessionKind::Serial);
        m.connect(creds(), now);
        m.handle_datagram(&packet::i_am_here(THEIRS, OUR), now);

        // Wrong sender, then wrong receiver.
        assert!(m.handle_datagram(&packet::are_you_ready(0x9999, OUR), now).is_empty());
        assert!(m.handle_datagram(&packet::are_you_ready(THEIRS, 0x7777), now).is_empty());
        assert_eq!(m.state(), State::AreYouReady);
    }

    #[test]
    fn control_session_logs_in() {
        let now = Instant::now();
        let mut m = machine(SessionKind::Control);
        let actions = through_ready_reply(&mut m, now);
        assert_eq!(m.state(), State::Login);
        assert_eq!(m.pending(), 1);

        let (seq, inner) = login_of(&actions);
        let actions = m.handle_datagram(
            &packet::login_response(seq, THEIRS, OUR, inner, 0xABCD, 0, "WFVIEW"),
            now,
        );

        assert_eq!(m.state(), State::Ready);
        assert_eq!(m.token(), 0xABCD);
        assert_eq!(m.pending(), 0);
        assert!(events(&actions).contains(&SessionEvent::Connected));
    }

    #[test]
    fn rejected_login_retries_then_fails() {
        let now = Instant::now();
        let mut m = machine(SessionKind::Control);
        let mut actions = through_ready_reply(&mut m, now);
        let mut logins = 0;
        let mut all = Vec::new();

        for _ in 0..DEFAULT_MAX_LOGIN_ATTEMPTS {
            let (seq, inner) = login_of(&actions);
            logins += 1;
            actions =
                m.handle_datagram(&packet::login_response(seq, THEIRS, OUR, inner, 0, 0xFEFF_FFFF, ""), now);
            all.extend(actions.clone());
        }

        assert_eq!(logins, 3);
        assert_eq!(m.state(), State::Idle);
        assert_eq!(failures(&all), 1);
        assert!(events(&all).contains(&SessionEvent::Failed {
            reason: FailureReason::Rejected
        }));
    }

    #[test]
    fn unanswered_login_times_out() {
        let t0 = Instant::now();
        let mut m = machine(SessionKind::Control);
        through_ready_reply(&mut m, t0);

        let mut all = Vec::new();
        for i in 1..=10 {
            all.extend(m.poll(t0 + STEP * i));
        }
        let resent = sent(&all)
            .iter()
            .filter(|p| p.kind() == PacketKind::Login)
            .count();
        assert_eq!(resent, 5);
        assert_eq!(failures(&all), 1);
        assert_eq!(m.state(), State::Idle);
    }

    #[test]
    fn retransmit_request_resends_tracked_packet() {
        let now = Instant::now();
        let mut m = machine(SessionKind::Control);
        let actions = through_ready_reply(&mut m, now);
        let original = actions
            .iter()
            .find_map(|a| match a {
                Action::Send(b) if b.len() == packet::LOGIN_LEN => Some(b.clone()),
                _ => None,
            })
            .unwrap();
        let (seq, _) = login_of(&actions);

        let actions = m.handle_datagram(&packet::retransmit_request(seq, THEIRS, OUR), now);
        assert_eq!(actions, vec![Action::Send(original)]);

        // Unknown sequence: nothing to resend.
        assert!(m
            .handle_datagram(&packet::retransmit_request(seq.wrapping_add(40), THEIRS, OUR), now)
            .is_empty());
    }

    #[test]
    fn serial_session_skips_login() {
        let now = Instant::now();
        let mut m = machine(SessionKind::Serial);
        let actions = through_ready_reply(&mut m, now);
        assert_eq!(m.state(), State::Ready);
        assert!(sent(&actions).iter().all(|p| p.kind() != PacketKind::Login));
        assert!(events(&actions).contains(&SessionEvent::Connected));
    }

    #[test]
    fn unanswered_pings_time_out() {
        let t0 = Instant::now();
        let mut m = machine(SessionKind::Serial);
        through_ready_reply(&mut m, t0);

        let mut all = Vec::new();
        for i in 1..=10 {
            all.extend(m.poll(t0 + STEP * i));
        }
        let pings = sent(&all)
            .iter()
            .filter(|p| p.kind() == PacketKind::Ping)
            .count();
        assert_eq!(pings, 5);
        assert_eq!(failures(&all), 1);
        assert_eq!(m.state(), State::Idle);
    }

    #[test]
    fn answered_pings_keep_session_alive() {
        let t0 = Instant::now();
        let mut m = machine(SessionKind::Serial);
        through_ready_reply(&mut m, t0);

        for i in 1..=20 {
            let now = t0 + STEP * i;
            for p in sent(&m.poll(now)) {
                if let Packet::Ping { header, time, .. } = p {
                    m.handle_datagram(&packet::ping_reply(header.seq, THEIRS, OUR, time), now);
                }
            }
        }
        assert_eq!(m.state(), State::Ready);
    }

    #[test]
    fn peer_ping_is_answered() {
        let now = Instant::now();
        let mut m = machine(SessionKind::Serial);
        through_ready_reply(&mut m, now);

        let packets = sent(&m.handle_datagram(&packet::ping(9, THEIRS, OUR, 777), now));
        assert_eq!(packets.len(), 1);
        match &packets[0] {
            Packet::Ping {
                header,
                reply,
                time,
            } => {
                assert!(*reply);
                assert_eq!(header.seq, 9);
                assert_eq!(*time, 777);
                assert_eq!(header.rcvd_id, THEIRS);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn audio_tick_and_send_policy() {
        let t0 = Instant::now();
        let mut m = machine(SessionKind::Audio);
        through_ready_reply(&mut m, t0);

        let actions = m.poll(t0 + DEFAULT_AUDIO_PERIOD);
        assert!(actions.contains(&Action::PullAudio));

        let frame = vec![5i16; DEFAULT_AUDIO_FRAME_SAMPLES];
        let packets = sent(&m.send_audio(&frame, t0));
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].kind(), PacketKind::Audio);
        assert_eq!(m.pending(), 0);

        let mut reliable = ProtocolMachine::new(
            MachineConfig {
                kind: SessionKind::Audio,
                reliable_audio: true,
                ..MachineConfig::default()
            },
            OUR,
        );
        through_ready_reply(&mut reliable, t0);
        reliable.send_audio(&frame, t0);
        assert_eq!(reliable.pending(), 1);
    }

    #[test]
    fn control_session_has_no_audio_tick() {
        let t0 = Instant::now();
        let mut m = machine(SessionKind::Serial);
        through_ready_reply(&mut m, t0);
        assert!(!m.poll(t0 + DEFAULT_AUDIO_PERIOD).contains(&Action::PullAudio));
        assert!(m.send_audio(&[1, 2], t0).is_empty());
    }

    #[test]
    fn inbound_audio_is_deduplicated() {
        let now = Instant::now();
        let mut m = machine(SessionKind::Audio);
        through_ready_reply(&mut m, now);

        let mut delivered = Vec::new();
        for (i, send_seq) in [5u16, 5, 4, 6, 6, 7].into_iter().enumerate() {
            let bytes = packet::audio(100 + i as u16, THEIRS, OUR, send_seq, &[send_seq as i16]);
            for a in m.handle_datagram(&bytes, now) {
                if let Action::DeliverAudio(s) = a {
                    delivered.push(s[0]);
                }
            }
        }
        assert_eq!(delivered, vec![5, 6, 7]);
    }

    #[test]
    fn audio_dedup_survives_wrap() {
        let now = Instant::now();
        let mut m = machine(SessionKind::Audio);
        through_ready_reply(&mut m, now);

        let mut count = 0;
        for send_seq in [u16::MAX - 1, u16::MAX, 0, 1] {
            let bytes = packet::audio(1, THEIRS, OUR, send_seq, &[0]);
            count += m
                .handle_datagram(&bytes, now)
                .iter()
                .filter(|a| matches!(a, Action::DeliverAudio(_)))
                .count();
        }
        assert_eq!(count, 4);
    }

    #[test]
    fn stop_sends_disconnect() {
        let now = Instant::now();
        let mut m = machine(SessionKind::Serial);
        through_ready_reply(&mut m, now);

        let actions = m.stop(now);
        let packets = sent(&actions);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].kind(), PacketKind::Disconnect);
        assert_eq!(packets[0].header().rcvd_id, THEIRS);
        assert!(events(&actions).contains(&SessionEvent::Disconnected));
        assert_eq!(m.state(), State::Idle);
        assert_eq!(m.next_deadline(), None);

        assert!(m.stop(now).is_empty());
    }

    #[test]
    fn peer_disconnect_returns_to_idle() {
        let now = Instant::now();
        let mut m = machine(SessionKind::Serial);
        through_ready_reply(&mut m, now);

        let actions = m.handle_datagram(&packet::disconnect(THEIRS, OUR), now);
        assert_eq!(m.state(), State::Idle);
        assert!(events(&actions).contains(&SessionEvent::Disconnected));
    }

    #[test]
    fn reconnect_restarts_discovery() {
        let now = Instant::now();
        let mut m = machine(SessionKind::Serial);
        through_ready_reply(&mut m, now);

        let actions = m.connect(creds(), now);
        let kinds: Vec<_> = sent(&actions).iter().map(Packet::kind).collect();
        assert_eq!(kinds, vec![PacketKind::Disconnect, PacketKind::AreYouThere]);
        assert_eq!(m.state(), State::AreYouThere);
        assert_eq!(m.their_id(), 0);
    }
}
