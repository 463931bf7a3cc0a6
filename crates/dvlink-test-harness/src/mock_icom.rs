//! Mock UDP radio speaking the network control/audio dialect.
//!
//! [`MockIcomRadio`] binds a localhost UDP socket and answers a client the
//! way a transceiver would: discovery, readiness, login (optionally
//! rejecting the first few attempts), keep-alive pings, and audio
//! acknowledgment. Every packet it receives is recorded so tests can
//! assert on what the client sent.
//!
//! # Example
//!
//! ```no_run
//! use dvlink_test_harness::{MockIcomRadio, MockRadioConfig};
//!
//! # async fn example() -> dvlink_core::Result<()> {
//! let radio = MockIcomRadio::start(MockRadioConfig::default()).await?;
//! let port = radio.addr().port();
//! // ... build a session against 127.0.0.1:port ...
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use dvlink_core::error::{Error, Result};
use dvlink_icom::packet::{self, DecodeResult, Packet, PacketKind};

/// Error code the radio returns for a refused login.
pub const LOGIN_REFUSED: u32 = 0xFEFF_FFFF;

/// Behavior of a [`MockIcomRadio`].
#[derive(Debug, Clone)]
pub struct MockRadioConfig {
    /// Identifier the radio reports in its I-am-here reply.
    pub radio_id: u32,
    /// Reply to are-you-there packets. When false the radio stays silent.
    pub answer_discovery: bool,
    /// Number of login attempts to refuse before accepting.
    pub reject_logins: u32,
    /// Reply to the client's keep-alive pings.
    pub answer_pings: bool,
    /// Acknowledge audio packets with an idle packet carrying their seq.
    pub ack_audio: bool,
}

impl Default for MockRadioConfig {
    fn default() -> Self {
        MockRadioConfig {
            radio_id: 0x1234,
            answer_discovery: true,
            reject_logins: 0,
            answer_pings: true,
            ack_audio: true,
        }
    }
}

#[derive(Debug, Default)]
struct Record {
    kinds: Vec<PacketKind>,
    client: Option<(SocketAddr, u32)>,
    audio: Vec<Vec<i16>>,
    usernames: Vec<Vec<u8>>,
}

/// A scripted UDP radio for session tests.
pub struct MockIcomRadio {
    addr: SocketAddr,
    radio_id: u32,
    record: Arc<Mutex<Record>>,
    inject_tx: mpsc::Sender<Vec<u8>>,
    task: JoinHandle<()>,
}

impl MockIcomRadio {
    /// Bind to a random localhost port and start answering.
    pub async fn start(config: MockRadioConfig) -> Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::Transport(format!("failed to bind mock radio: {}", e)))?;
        let addr = socket.local_addr().map_err(Error::Io)?;
        let record = Arc::new(Mutex::new(Record::default()));
        let (inject_tx, inject_rx) = mpsc::channel(32);
        let radio_id = config.radio_id;

        let task = tokio::spawn(serve(socket, config, Arc::clone(&record), inject_rx));

        Ok(MockIcomRadio {
            addr,
            radio_id,
            record,
            inject_tx,
            task,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn radio_id(&self) -> u32 {
        self.radio_id
    }

    /// Kinds of every packet received so far, in arrival order.
    pub fn received(&self) -> Vec<PacketKind> {
        self.lock().kinds.clone()
    }

    /// Number of received packets of `kind`.
    pub fn count(&self, kind: PacketKind) -> usize {
        self.lock().kinds.iter().filter(|&&k| k == kind).count()
    }

    /// Identifier the client announced in its first are-you-there.
    pub fn client_id(&self) -> Option<u32> {
        self.lock().client.map(|(_, id)| id)
    }

    /// Sample blocks received from the client.
    pub fn audio_received(&self) -> Vec<Vec<i16>> {
        self.lock().audio.clone()
    }

    /// Encoded usernames seen in login packets.
    pub fn login_usernames(&self) -> Vec<Vec<u8>> {
        self.lock().usernames.clone()
    }

    /// Send an audio packet to the client.
    pub async fn send_audio(&self, send_seq: u16, samples: &[i16]) -> Result<()> {
        let client = self.client_id().ok_or(Error::NotConnected)?;
        let bytes = packet::audio(send_seq, self.radio_id, client, send_seq, samples);
        self.inject(bytes).await
    }

    /// Tell the client the radio is closing the session.
    pub async fn send_disconnect(&self) -> Result<()> {
        let client = self.client_id().ok_or(Error::NotConnected)?;
        self.inject(packet::disconnect(self.radio_id, client)).await
    }

    /// Poll until `kind` has been received `n` times or `timeout` elapses.
    pub async fn wait_for(&self, kind: PacketKind, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.count(kind) >= n {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn inject(&self, bytes: Vec<u8>) -> Result<()> {
        self.inject_tx
            .send(bytes)
            .await
            .map_err(|_| Error::StreamClosed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Record> {
        self.record.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for MockIcomRadio {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    socket: UdpSocket,
    config: MockRadioConfig,
    record: Arc<Mutex<Record>>,
    mut inject_rx: mpsc::Receiver<Vec<u8>>,
) {
    let mut buf = vec![0u8; 2048];
    let mut rejects_left = config.reject_logins;
    let radio = config.radio_id;

    loop {
        tokio::select! {
            injected = inject_rx.recv() => {
                let Some(bytes) = injected else { return };
                let client = record.lock().unwrap_or_else(|e| e.into_inner()).client;
                if let Some((addr, _)) = client {
                    let _ = socket.send_to(&bytes, addr).await;
                }
            }
            received = socket.recv_from(&mut buf) => {
                let Ok((n, src)) = received else { return };
                let DecodeResult::Packet(p) = packet::decode(&buf[..n]) else {
                    continue;
                };

                let client_id = {
                    let mut rec = record.lock().unwrap_or_else(|e| e.into_inner());
                    rec.kinds.push(p.kind());
                    if let Packet::AreYouThere(h) = &p {
                        rec.client = Some((src, h.sent_id));
                    }
                    if let Packet::Audio { samples, .. } = &p {
                        rec.audio.push(samples.clone());
                    }
                    if let Packet::Login { username, .. } = &p {
                        let end = username.iter().position(|&b| b == 0).unwrap_or(username.len());
                        rec.usernames.push(username[..end].to_vec());
                    }
                    p.header().sent_id
                };

                let reply = match &p {
                    Packet::AreYouThere(_) if config.answer_discovery => {
                        Some(packet::i_am_here(radio, client_id))
                    }
                    Packet::AreYouReady(_) => Some(packet::are_you_ready(radio, client_id)),
                    Packet::Login { header, inner_seq, .. } => {
                        let error = if rejects_left > 0 {
                            rejects_left -= 1;
                            LOGIN_REFUSED
                        } else {
                            0
                        };
                        Some(packet::login_response(
                            header.seq, radio, client_id, *inner_seq, 0xA5A5_0001, error, "WFVIEW",
                        ))
                    }
                    Packet::Ping { header, reply: false, time } if config.answer_pings => {
                        Some(packet::ping_reply(header.seq, radio, client_id, *time))
                    }
                    Packet::Audio { header, .. } if config.ack_audio => {
                        Some(packet::idle(header.seq, radio, client_id))
                    }
                    _ => None,
                };

                if let Some(bytes) = reply {
                    let _ = socket.send_to(&bytes, src).await;
                }
            }
        }
    }
}
