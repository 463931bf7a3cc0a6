//! Session actor for one network sub-session.
//!
//! The actor task owns the UDP socket and the [`ProtocolMachine`] and is
//! the only code that touches either. Callers talk to it through
//! [`IcomSession`], which sends [`Request`]s over an mpsc inbox and awaits
//! oneshot replies.
//!
//! The loop uses `tokio::select! { biased; }` to prioritize:
//! 1. Cancellation
//! 2. Requests from the handle
//! 3. Inbound datagrams (readiness check, then drain)
//! 4. The machine's next timer deadline

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use dvlink_core::audio::{AudioFrame, AudioReceiver, AudioSender};
use dvlink_core::error::{Error, Result};
use dvlink_core::events::SessionEvent;
use dvlink_core::types::FailureReason;
use dvlink_transport::UdpTransport;

use crate::machine::{AUDIO_SAMPLE_RATE, Action, Credentials, ProtocolMachine};
use crate::state::{SessionKind, State};

/// Largest datagram we expect from the radio.
const MAX_DATAGRAM: usize = 1500;

/// Capacity of the event broadcast channel.
pub(crate) const EVENT_CAPACITY: usize = 64;

/// Point-in-time view of a session, returned by [`IcomSession::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub kind: SessionKind,
    pub state: State,
    pub our_id: u32,
    pub their_id: u32,
    /// Tracked packets awaiting acknowledgment.
    pub pending: usize,
}

pub(crate) enum Request {
    Connect {
        credentials: Credentials,
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Everything the actor task owns.
pub(crate) struct SessionParts {
    pub socket: UdpTransport,
    pub peer: SocketAddr,
    pub machine: ProtocolMachine,
    pub audio_in: Option<AudioReceiver>,
    pub audio_out: Option<AudioSender>,
}

/// Handle to a running sub-session actor.
///
/// Dropping the handle cancels the actor without notifying the radio; call
/// [`stop`](IcomSession::stop) or [`shutdown`](IcomSession::shutdown) for
/// an orderly disconnect.
pub struct IcomSession {
    cmd_tx: mpsc::Sender<Request>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    event_tx: broadcast::Sender<SessionEvent>,
    kind: SessionKind,
    local_addr: SocketAddr,
    peer: SocketAddr,
}

impl IcomSession {
    pub(crate) fn spawn(parts: SessionParts) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Request>(32);
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let cancel = CancellationToken::new();
        let kind = parts.machine.kind();
        let local_addr = parts.socket.local_addr();
        let peer = parts.peer;

        let actor = SessionActor {
            parts,
            event_tx: event_tx.clone(),
            cmd_rx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(actor.run());

        IcomSession {
            cmd_tx,
            cancel,
            task: Some(task),
            event_tx,
            kind,
            local_addr,
            peer,
        }
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// Local socket address; the session identifier derives from it.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Start discovery. Returns as soon as the first discovery packet is on the wire;
    /// progress is reported through [`subscribe`](Self::subscribe).
    pub async fn connect(&self, credentials: Credentials) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Request::Connect { credentials, reply }).await?;
        rx.await.map_err(|_| Error::NotConnected)?
    }

    /// Start discovery and wait until the session is ready or has failed.
    pub async fn connect_and_wait(&self, credentials: Credentials, timeout: Duration) -> Result<()> {
        let mut events = self.subscribe();
        self.connect(credentials).await?;

        let wait = async {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::Connected) => return Ok(()),
                    Ok(SessionEvent::Failed { reason }) => {
                        return Err(match reason {
                            FailureReason::Timeout => Error::Timeout,
                            FailureReason::Rejected => {
                                Error::Rejected(format!("{} session", self.kind))
                            }
                            FailureReason::Transport => Error::ConnectionLost,
                        });
                    }
                    Ok(SessionEvent::Disconnected) => return Err(Error::NotConnected),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(skipped = n, "event subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Err(Error::StreamClosed),
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::Timeout)?
    }

    /// Disconnect from the radio. The actor keeps running and can connect
    /// again.
    pub async fn stop(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Request::Stop { reply }).await?;
        rx.await.map_err(|_| Error::NotConnected)
    }

    pub async fn status(&self) -> Result<SessionStatus> {
        let (reply, rx) = oneshot::channel();
        self.request(Request::Status { reply }).await?;
        rx.await.map_err(|_| Error::NotConnected)
    }

    pub async fn state(&self) -> Result<State> {
        Ok(self.status().await?.state)
    }

    /// Disconnect and stop the actor.
    pub async fn shutdown(mut self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Request::Shutdown { reply }).await;
        let _ = rx.await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        Ok(())
    }

    async fn request(&self, req: Request) -> Result<()> {
        self.cmd_tx.send(req).await.map_err(|_| Error::NotConnected)
    }
}

impl Drop for IcomSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct SessionActor {
    parts: SessionParts,
    event_tx: broadcast::Sender<SessionEvent>,
    cmd_rx: mpsc::Receiver<Request>,
    cancel: CancellationToken,
}

/// Sleep until `deadline`, or forever when there is none.
async fn sleep_until(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}

impl SessionActor {
    async fn run(mut self) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let kind = self.parts.machine.kind();
        debug!(session = %kind, local = %self.parts.socket.local_addr(), peer = %self.parts.peer, "session task started");

        loop {
            let deadline = self.parts.machine.next_deadline();
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!(session = %kind, "session task cancelled");
                    break;
                }

                req = self.cmd_rx.recv() => {
                    match req {
                        Some(Request::Connect { credentials, reply }) => {
                            let actions = self.parts.machine.connect(credentials, now());
                            self.perform(actions).await;
                            let _ = reply.send(Ok(()));
                        }
                        Some(Request::Stop { reply }) => {
                            let actions = self.parts.machine.stop(now());
                            self.perform(actions).await;
                            let _ = reply.send(());
                        }
                        Some(Request::Status { reply }) => {
                            let m = &self.parts.machine;
                            let _ = reply.send(SessionStatus {
                                kind: m.kind(),
                                state: m.state(),
                                our_id: m.our_id(),
                                their_id: m.their_id(),
                                pending: m.pending(),
                            });
                        }
                        Some(Request::Shutdown { reply }) => {
                            debug!(session = %kind, "session shutdown requested");
                            let actions = self.parts.machine.stop(now());
                            self.perform(actions).await;
                            let _ = reply.send(());
                            return;
                        }
                        None => {
                            debug!(session = %kind, "all handles dropped, exiting session task");
                            break;
                        }
                    }
                }

                ready = self.parts.socket.readable() => {
                    if let Err(e) = ready {
                        tracing::warn!(session = %kind, error = %e, "socket readiness failed");
                        continue;
                    }
                    self.drain(&mut buf).await;
                }

                _ = sleep_until(deadline) => {
                    let actions = self.parts.machine.poll(now());
                    self.perform(actions).await;
                }
            }
        }
    }

    /// Consume every queued datagram.
    async fn drain(&mut self, buf: &mut [u8]) {
        loop {
            match self.parts.socket.try_recv_from(buf) {
                Ok(Some((n, src))) => {
                    if src != self.parts.peer {
                        tracing::trace!(src = %src, "ignoring datagram from unknown address");
                        continue;
                    }
                    let actions = self.parts.machine.handle_datagram(&buf[..n], now());
                    self.perform(actions).await;
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "datagram receive failed");
                    break;
                }
            }
        }
    }

    async fn perform(&mut self, actions: Vec<Action>) {
        let mut queue: VecDeque<Action> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                Action::Send(bytes) => {
                    if let Err(e) = self.parts.socket.send_to(&bytes, self.parts.peer).await {
                        // The retry budget covers lost datagrams.
                        tracing::warn!(error = %e, "datagram send failed");
                    }
                }
                Action::Emit(event) => {
                    let _ = self.event_tx.send(event);
                }
                Action::PullAudio => {
                    let frame = self.parts.audio_in.as_mut().and_then(AudioReceiver::try_recv);
                    if let Some(frame) = frame {
                        queue.extend(self.parts.machine.send_audio(&frame.samples, now()));
                    }
                }
                Action::DeliverAudio(samples) => self.deliver(samples),
            }
        }
    }

    fn deliver(&mut self, samples: Vec<i16>) {
        let Some(out) = &self.parts.audio_out else {
            return;
        };
        match out.try_send(AudioFrame::new(samples, AUDIO_SAMPLE_RATE)) {
            Ok(true) => {}
            Ok(false) => tracing::trace!("audio consumer behind; frame dropped"),
            Err(_) => {
                tracing::warn!("audio consumer gone; discarding received audio");
                self.parts.audio_out = None;
            }
        }
    }
}
