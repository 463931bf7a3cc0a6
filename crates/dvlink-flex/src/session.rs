//! Reconnecting command session actor.
//!
//! The actor task owns the stream transport and the [`CommandChannel`].
//! Callers talk to it through [`FlexSession`], which sends [`Request`]s
//! over an mpsc inbox and awaits oneshot replies.
//!
//! When the radio closes the stream, or a read or write fails, every
//! pending continuation is dropped, the transport is closed, and a single
//! reconnect is scheduled after the backoff interval. Connecting always
//! cancels a scheduled reconnect and tears down any live connection first,
//! so at most one transport and one timer exist at any time.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dvlink_core::error::{Error, Result};
use dvlink_core::events::SessionEvent;
use dvlink_core::transport::{Connector, Transport};

use crate::channel::{ChannelEvent, CommandChannel, Continuation};
use crate::codec::Response;
use crate::waveform;

/// How long a single read waits before the loop checks in again.
const READ_POLL: Duration = Duration::from_secs(1);

/// Read buffer size.
const READ_BUF: usize = 4096;

/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 64;

/// Point-in-time view of a session, returned by [`FlexSession::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlexStatus {
    pub connected: bool,
    /// Handle assigned by the radio on the current connection.
    pub handle: Option<u32>,
    /// Commands still waiting for a reply continuation to run.
    pub pending: usize,
    pub reconnect_scheduled: bool,
    /// Consecutive failed or lost connections since the last good connect.
    pub reconnect_attempts: u32,
}

pub(crate) enum Request {
    Connect {
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Command {
        text: String,
        response: Option<oneshot::Sender<Response>>,
        reply: oneshot::Sender<Result<u32>>,
    },
    Status {
        reply: oneshot::Sender<FlexStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Everything the actor needs at spawn time.
pub(crate) struct SessionParts {
    pub addr: String,
    pub connector: Box<dyn Connector>,
    pub backoff: Duration,
    pub auto_reconnect: bool,
}

/// Handle to a running command session actor.
pub struct FlexSession {
    cmd_tx: mpsc::Sender<Request>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    event_tx: broadcast::Sender<SessionEvent>,
    addr: String,
}

impl FlexSession {
    pub(crate) fn spawn(parts: SessionParts) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Request>(32);
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let cancel = CancellationToken::new();
        let addr = parts.addr.clone();

        let actor = FlexActor {
            parts,
            transport: None,
            channel: CommandChannel::new(),
            handle: None,
            wanted: false,
            reconnect_at: None,
            attempts: 0,
            event_tx: event_tx.clone(),
            cmd_rx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(actor.run());

        FlexSession {
            cmd_tx,
            cancel,
            task: Some(task),
            event_tx,
            addr,
        }
    }

    /// `host:port` of the radio.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Open the connection, replacing any existing one.
    ///
    /// On failure a reconnect is still scheduled and the error is returned.
    pub async fn connect(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Request::Connect { reply }).await?;
        rx.await.map_err(|_| Error::NotConnected)?
    }

    /// Remove the waveforms, close the connection, and stop reconnecting.
    pub async fn disconnect(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Request::Disconnect { reply }).await?;
        rx.await.map_err(|_| Error::NotConnected)
    }

    /// Send a command without waiting for the radio's reply. Returns the
    /// sequence number it was sent under.
    pub async fn send_command_no_wait(&self, text: &str) -> Result<u32> {
        let (reply, rx) = oneshot::channel();
        self.request(Request::Command {
            text: text.to_string(),
            response: None,
            reply,
        })
        .await?;
        rx.await.map_err(|_| Error::NotConnected)?
    }

    /// Send a command and wait up to `timeout` for its reply.
    ///
    /// A non-zero status is returned as a normal [`Response`]; callers
    /// decide what it means. If the connection drops first the result is
    /// [`Error::ConnectionLost`].
    pub async fn send_command(&self, text: &str, timeout: Duration) -> Result<Response> {
        let (response_tx, response_rx) = oneshot::channel();
        let (reply, rx) = oneshot::channel();
        self.request(Request::Command {
            text: text.to_string(),
            response: Some(response_tx),
            reply,
        })
        .await?;
        let seq = rx.await.map_err(|_| Error::NotConnected)??;

        match tokio::time::timeout(timeout, response_rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::ConnectionLost),
            Err(_) => {
                debug!(seq, "no reply within timeout");
                Err(Error::Timeout)
            }
        }
    }

    pub async fn status(&self) -> Result<FlexStatus> {
        let (reply, rx) = oneshot::channel();
        self.request(Request::Status { reply }).await?;
        rx.await.map_err(|_| Error::NotConnected)
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

impl Drop for FlexSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct FlexActor {
    parts: SessionParts,
    transport: Option<Box<dyn Transport>>,
    channel: CommandChannel,
    handle: Option<u32>,
    /// Set by connect, cleared by disconnect. Reconnects only happen while set.
    wanted: bool,
    reconnect_at: Option<Instant>,
    attempts: u32,
    event_tx: broadcast::Sender<SessionEvent>,
    cmd_rx: mpsc::Receiver<Request>,
    cancel: CancellationToken,
}

async fn receive(transport: &mut Option<Box<dyn Transport>>, buf: &mut [u8]) -> Result<usize> {
    match transport {
        Some(t) => t.receive(buf, READ_POLL).await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn reply_continuation(tx: oneshot::Sender<Response>) -> Continuation {
    Box::new(move |_: &mut CommandChannel, response: &Response| {
        let _ = tx.send(response.clone());
    })
}

impl FlexActor {
    async fn run(mut self) {
        let mut buf = vec![0u8; READ_BUF];
        debug!(addr = %self.parts.addr, "command session task started");

        loop {
            let reconnect_at = self.reconnect_at;
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("command session task cancelled");
                    self.teardown(true).await;
                    break;
                }

                req = self.cmd_rx.recv() => {
                    match req {
                        Some(Request::Connect { reply }) => {
                            self.wanted = true;
                            let result = self.connect().await;
                            let _ = reply.send(result);
                        }
                        Some(Request::Disconnect { reply }) => {
                            self.wanted = false;
                            self.reconnect_at = None;
                            if self.teardown(true).await {
                                let _ = self.event_tx.send(SessionEvent::Disconnected);
                            }
                            let _ = reply.send(());
                        }
                        Some(Request::Command { text, response, reply }) => {
                            let result = self.command(&text, response).await;
                            let _ = reply.send(result);
                        }
                        Some(Request::Status { reply }) => {
                            let _ = reply.send(FlexStatus {
                                connected: self.transport.is_some(),
                                handle: self.handle,
                                pending: self.channel.pending(),
                                reconnect_scheduled: self.reconnect_at.is_some(),
                                reconnect_attempts: self.attempts,
                            });
                        }
                        Some(Request::Shutdown { reply }) => {
                            debug!("command session shutdown requested");
                            self.teardown(true).await;
                            let _ = reply.send(());
                            return;
                        }
                        None => {
                            debug!("all handles dropped, exiting command session task");
                            self.teardown(true).await;
                            break;
                        }
                    }
                }

                read = receive(&mut self.transport, &mut buf) => {
                    match read {
                        Ok(n) => {
                            self.channel.feed(&buf[..n]);
                            self.service().await;
                        }
                        Err(Error::Timeout) => {}
                        Err(e) => {
                            warn!(addr = %self.parts.addr, error = %e, "lost connection to radio");
                            self.link_lost().await;
                        }
                    }
                }

                _ = sleep_until(reconnect_at) => {
                    self.reconnect_at = None;
                    info!(addr = %self.parts.addr, attempt = self.attempts, "reconnecting");
                    if let Err(e) = self.connect().await {
                        debug!(error = %e, "reconnect attempt failed");
                    }
                }
            }
        }
    }

    /// Cancel any pending reconnect, drop any live connection, and open a
    /// new one.
    async fn connect(&mut self) -> Result<()> {
        self.reconnect_at = None;
        if self.teardown(true).await {
            debug!("closed existing connection before reconnecting");
        }

        info!(addr = %self.parts.addr, "connecting to radio");
        match self.parts.connector.connect(&self.parts.addr).await {
            Ok(transport) => {
                self.transport = Some(transport);
                self.channel.reset();
                self.attempts = 0;
                let _ = self.event_tx.send(SessionEvent::Connected);
                Ok(())
            }
            Err(e) => {
                warn!(addr = %self.parts.addr, error = %e, "connection to radio failed");
                self.schedule_reconnect();
                Err(e)
            }
        }
    }

    async fn command(&mut self, text: &str, response: Option<oneshot::Sender<Response>>) -> Result<u32> {
        if self.transport.is_none() {
            return Err(Error::NotConnected);
        }
        let seq = self
            .channel
            .send_command(text, response.map(reply_continuation));
        self.service().await;
        Ok(seq)
    }

    /// Publish channel events and write out queued commands.
    async fn service(&mut self) {
        for event in self.channel.take_events() {
            match event {
                ChannelEvent::HandleAssigned(handle) => {
                    self.handle = Some(handle);
                    let _ = self.event_tx.send(SessionEvent::HandleAssigned { handle });
                }
                ChannelEvent::Version(_) => {}
            }
        }
        self.flush().await;
    }

    async fn flush(&mut self) {
        let outbound = self.channel.take_outbound();
        let Some(transport) = self.transport.as_mut() else {
            if !outbound.is_empty() {
                debug!(count = outbound.len(), "not connected; dropping queued commands");
            }
            return;
        };

        let mut failed = None;
        for bytes in outbound {
            if let Err(e) = transport.send(&bytes).await {
                failed = Some(e);
                break;
            }
        }
        if let Some(e) = failed {
            warn!(addr = %self.parts.addr, error = %e, "command write failed");
            self.link_lost().await;
        }
    }

    /// Close the transport and forget the connection. When `cleanup` is set
    /// and the radio had assigned a handle, the waveforms are removed first.
    ///
    /// Returns whether there was a connection to close.
    async fn teardown(&mut self, cleanup: bool) -> bool {
        let Some(mut transport) = self.transport.take() else {
            return false;
        };

        if cleanup && self.handle.is_some() {
            waveform::unregister_all(&mut self.channel);
            for bytes in self.channel.take_outbound() {
                if let Err(e) = transport.send(&bytes).await {
                    debug!(error = %e, "could not send waveform removal");
                    break;
                }
            }
        }

        if let Err(e) = transport.close().await {
            debug!(error = %e, "error closing transport");
        }
        self.channel.reset();
        self.handle = None;
        true
    }

    async fn link_lost(&mut self) {
        self.teardown(false).await;
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if !self.wanted || !self.parts.auto_reconnect {
            return;
        }
        self.attempts += 1;
        self.reconnect_at = Some(Instant::now() + self.parts.backoff);
        info!(
            attempt = self.attempts,
            backoff_ms = self.parts.backoff.as_millis() as u64,
            "reconnect scheduled"
        );
        let _ = self.event_tx.send(SessionEvent::Reconnecting {
            attempt: self.attempts,
        });
    }
}
