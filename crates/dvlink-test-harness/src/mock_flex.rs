//! Mock TCP radio speaking the line-oriented command dialect.
//!
//! [`MockFlexRadio`] listens on a random localhost port. Every accepted
//! connection is greeted with a version line and a handle line, then each
//! `C<seq>|<command>` line is recorded and answered with
//! `R<seq>|<status>|`. Statuses default to zero and can be overridden per
//! command prefix. [`drop_connections`](MockFlexRadio::drop_connections)
//! closes every live connection so tests can exercise reconnect.
//!
//! # Example
//!
//! ```no_run
//! use dvlink_test_harness::MockFlexRadio;
//!
//! # async fn example() -> dvlink_core::Result<()> {
//! let radio = MockFlexRadio::start().await?;
//! radio.set_status("waveform create", 0x5000_002D);
//! let addr = radio.addr();
//! // ... connect a session to addr ...
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use dvlink_core::error::{Error, Result};

/// Version line sent on connect.
pub const GREETING_VERSION: &str = "V1.4.0.0";
/// Default handle announced on connect.
pub const DEFAULT_HANDLE: u32 = 0x2C0F_1A3B;

#[derive(Debug, Default)]
struct Shared {
    accepted: usize,
    active: usize,
    commands: Vec<String>,
    statuses: Vec<(String, u32)>,
}

/// A scripted line-dialect radio.
pub struct MockFlexRadio {
    addr: String,
    shared: Arc<Mutex<Shared>>,
    kick: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl MockFlexRadio {
    /// Bind and start accepting connections.
    pub async fn start() -> Result<Self> {
        Self::start_with_handle(DEFAULT_HANDLE).await
    }

    /// Like [`start`](Self::start), announcing `handle` on every connection.
    pub async fn start_with_handle(handle: u32) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::Transport(format!("failed to bind mock radio: {}", e)))?;
        let addr = listener.local_addr().map_err(Error::Io)?.to_string();
        let shared = Arc::new(Mutex::new(Shared::default()));
        let (kick, _) = broadcast::channel(4);

        let task = tokio::spawn(accept_loop(listener, handle, Arc::clone(&shared), kick.clone()));

        Ok(MockFlexRadio {
            addr,
            shared,
            kick,
            task,
        })
    }

    /// `host:port` to connect to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Answer commands starting with `prefix` with `status`.
    pub fn set_status(&self, prefix: &str, status: u32) {
        self.lock().statuses.push((prefix.to_string(), status));
    }

    /// Connections accepted since start.
    pub fn accepted(&self) -> usize {
        self.lock().accepted
    }

    /// Connections currently open.
    pub fn active(&self) -> usize {
        self.lock().active
    }

    /// Command text of every received command line, without the
    /// `C<seq>|` prefix.
    pub fn commands(&self) -> Vec<String> {
        self.lock()
            .commands
            .iter()
            .map(|line| match line.split_once('|') {
                Some((_, cmd)) => cmd.to_string(),
                None => line.clone(),
            })
            .collect()
    }

    /// Every received line exactly as sent.
    pub fn raw_lines(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    /// Close every open connection from the radio side.
    pub fn drop_connections(&self) {
        let _ = self.kick.send(());
    }

    /// Poll until a received command starts with `prefix`.
    pub async fn wait_for_command(&self, prefix: &str, timeout: Duration) -> bool {
        self.wait_until(timeout, |s| {
            s.commands
                .iter()
                .filter_map(|l| l.split_once('|'))
                .any(|(_, cmd)| cmd.starts_with(prefix))
        })
        .await
    }

    /// Poll until `n` connections have been accepted.
    pub async fn wait_for_accepted(&self, n: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |s| s.accepted >= n).await
    }

    async fn wait_until(&self, timeout: Duration, done: impl Fn(&Shared) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if done(&*self.lock()) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for MockFlexRadio {
    fn drop(&mut self) {
        self.drop_connections();
        self.task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    handle: u32,
    shared: Arc<Mutex<Shared>>,
    kick: broadcast::Sender<()>,
) {
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        {
            let mut s = shared.lock().unwrap_or_else(|e| e.into_inner());
            s.accepted += 1;
            s.active += 1;
        }
        tokio::spawn(serve(stream, handle, Arc::clone(&shared), kick.subscribe()));
    }
}

async fn serve(
    stream: TcpStream,
    handle: u32,
    shared: Arc<Mutex<Shared>>,
    mut kick: broadcast::Receiver<()>,
) {
    let (rd, mut wr) = stream.into_split();
    let mut lines = BufReader::new(rd).lines();

    let greeting = format!("{GREETING_VERSION}\nH{handle:08X}\n");
    if wr.write_all(greeting.as_bytes()).await.is_ok() {
        loop {
            tokio::select! {
                _ = kick.recv() => break,
                line = lines.next_line() => {
                    let Ok(Some(line)) = line else { break };
                    let reply = {
                        let mut s = shared.lock().unwrap_or_else(|e| e.into_inner());
                        s.commands.push(line.clone());
                        respond(&s, &line)
                    };
                    if let Some(reply) = reply {
                        if wr.write_all(reply.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    let _ = wr.shutdown().await;
    let mut s = shared.lock().unwrap_or_else(|e| e.into_inner());
    s.active = s.active.saturating_sub(1);
}

/// Build the `R` line for a `C<seq>|<command>` line.
fn respond(shared: &Shared, line: &str) -> Option<String> {
    let (seq, cmd) = line.strip_prefix('C')?.split_once('|')?;
    let status = shared
        .statuses
        .iter()
        .rev()
        .find(|(prefix, _)| cmd.starts_with(prefix.as_str()))
        .map(|(_, s)| *s)
        .unwrap_or(0);
    Some(format!("R{seq}|{status:X}|\n"))
}
