//! The network task: owns the radio session and reports link state.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use dvlink::flex::{FlexSession, FlexSessionBuilder};
use dvlink::icom::builder::{DEFAULT_AUDIO_PORT, DEFAULT_CONTROL_PORT};
use dvlink::icom::{Credentials, IcomSession, IcomSessionBuilder, SessionKind};
use dvlink::task::{Task, names};
use dvlink::{AudioReceiver, AudioSender, Dialect, Result, SessionEvent};

/// How the handset reaches its radio.
#[derive(Debug, Clone)]
pub struct RadioOptions {
    pub dialect: Dialect,
    pub host: String,
    /// Primary session port. `None` uses the dialect's well-known port.
    pub port: Option<u16>,
    /// Datagram-dialect audio port. `None` keeps the standard spacing from
    /// the control port.
    pub audio_port: Option<u16>,
    pub username: String,
    pub password: String,
    /// Track outbound audio for retransmission.
    pub reliable_audio: bool,
    /// Line-dialect TCP connect timeout. Keep it under the network task's
    /// start timeout.
    pub connect_timeout: Duration,
    /// Line-dialect delay before reconnecting.
    pub reconnect_backoff: Duration,
}

impl Default for RadioOptions {
    fn default() -> Self {
        RadioOptions {
            dialect: Dialect::Icom,
            host: "127.0.0.1".into(),
            port: None,
            audio_port: None,
            username: String::new(),
            password: String::new(),
            reliable_audio: false,
            connect_timeout: Duration::from_millis(750),
            reconnect_backoff: Duration::from_secs(10),
        }
    }
}

impl RadioOptions {
    /// Control and audio ports for the datagram dialect. A custom control
    /// port keeps the standard spacing to the audio port.
    pub fn icom_ports(&self) -> (u16, u16) {
        let control = self.port.unwrap_or(DEFAULT_CONTROL_PORT);
        let audio = self.audio_port.unwrap_or_else(|| {
            control.saturating_add(DEFAULT_AUDIO_PORT - DEFAULT_CONTROL_PORT)
        });
        (control, audio)
    }
}

/// Session-side ends of the network audio path.
#[derive(Debug)]
pub struct RadioAudio {
    /// Microphone audio to send to the radio.
    pub input: AudioReceiver,
    /// Where received radio audio is delivered.
    pub output: AudioSender,
}

enum Link {
    Icom {
        control: IcomSession,
        audio: IcomSession,
    },
    Flex(FlexSession),
}

/// Connects to the radio on start and disconnects on sleep.
///
/// Sessions are built on first start and kept for later wakes. Link state
/// is published on a watch channel derived from session events.
pub struct RadioTask {
    options: RadioOptions,
    audio: Option<RadioAudio>,
    link: Option<Link>,
    state_tx: watch::Sender<bool>,
    follower: Option<JoinHandle<()>>,
}

impl RadioTask {
    pub fn new(options: RadioOptions, audio: Option<RadioAudio>) -> Self {
        let (state_tx, _) = watch::channel(false);
        RadioTask {
            options,
            audio,
            link: None,
            state_tx,
            follower: None,
        }
    }

    /// Whether the radio link is up.
    pub fn link_state(&self) -> watch::Receiver<bool> {
        self.state_tx.subscribe()
    }

    async fn open(&mut self) -> Result<Link> {
        let opts = &self.options;
        match opts.dialect {
            Dialect::Icom => {
                let (control_port, audio_port) = opts.icom_ports();
                let control = IcomSessionBuilder::new(&opts.host)
                    .kind(SessionKind::Control)
                    .port(control_port)
                    .build()
                    .await?;
                let mut builder = IcomSessionBuilder::new(&opts.host)
                    .kind(SessionKind::Audio)
                    .port(audio_port)
                    .reliable_audio(opts.reliable_audio);
                if let Some(audio) = self.audio.take() {
                    builder = builder.audio_input(audio.input).audio_output(audio.output);
                }
                let audio = builder.build().await?;
                self.follow(control.subscribe(), Some(audio.subscribe()));
                Ok(Link::Icom { control, audio })
            }
            Dialect::Flex => {
                let mut builder = FlexSessionBuilder::new(&opts.host)
                    .connect_timeout(opts.connect_timeout)
                    .reconnect_backoff(opts.reconnect_backoff);
                if let Some(port) = opts.port {
                    builder = builder.port(port);
                }
                let session = builder.build()?;
                self.follow(session.subscribe(), None);
                Ok(Link::Flex(session))
            }
        }
    }

    fn follow(
        &mut self,
        main: broadcast::Receiver<SessionEvent>,
        audio: Option<broadcast::Receiver<SessionEvent>>,
    ) {
        if let Some(old) = self.follower.take() {
            old.abort();
        }
        self.follower = Some(tokio::spawn(follow_link(main, audio, self.state_tx.clone())));
    }
}

/// Publish the link as up only while the main session and, if present, the
/// audio session are both connected.
async fn follow_link(
    mut main: broadcast::Receiver<SessionEvent>,
    mut audio: Option<broadcast::Receiver<SessionEvent>>,
    state: watch::Sender<bool>,
) {
    let mut main_up = false;
    let mut audio_up = audio.is_none();
    loop {
        let (event, from_audio) = tokio::select! {
            event = main.recv() => (event, false),
            event = next_event(&mut audio) => (event, true),
        };
        match event {
            Ok(event) => {
                let Some(up) = event.link_indicator() else {
                    continue;
                };
                if from_audio {
                    audio_up = up;
                } else {
                    main_up = up;
                }
                debug!(main = main_up, audio = audio_up, "link state");
                state.send_replace(main_up && audio_up);
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                debug!(skipped = n, "link follower lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    state.send_replace(false);
}

async fn next_event(
    rx: &mut Option<broadcast::Receiver<SessionEvent>>,
) -> std::result::Result<SessionEvent, broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[async_trait]
impl Task for RadioTask {
    fn name(&self) -> &str {
        names::NETWORK
    }

    async fn on_start(&mut self) -> Result<()> {
        if self.link.is_none() {
            self.link = Some(self.open().await?);
        }
        let credentials = Credentials::new(&self.options.username, &self.options.password);
        info!(dialect = %self.options.dialect, host = %self.options.host, "connecting to radio");

        match &self.link {
            Some(Link::Icom { control, audio }) => {
                control.connect(credentials.clone()).await?;
                audio.connect(credentials).await?;
            }
            Some(Link::Flex(session)) => {
                // A failed attempt leaves a reconnect scheduled.
                if let Err(e) = session.connect().await {
                    warn!(addr = %session.addr(), error = %e, "radio not reachable yet");
                }
            }
            None => {}
        }
        Ok(())
    }

    async fn on_sleep(&mut self) -> Result<()> {
        match &self.link {
            Some(Link::Icom { control, audio }) => {
                audio.stop().await?;
                control.stop().await?;
            }
            Some(Link::Flex(session)) => session.disconnect().await?,
            None => {}
        }
        self.state_tx.send_replace(false);
        info!("radio link closed");
        Ok(())
    }
}

impl Drop for RadioTask {
    fn drop(&mut self) {
        if let Some(follower) = self.follower.take() {
            follower.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dvlink::icom::packet::PacketKind;
    use dvlink_test_harness::{MockFlexRadio, MockIcomRadio, MockRadioConfig};

    const WAIT: Duration = Duration::from_secs(5);

    async fn wait_for_link(rx: &mut watch::Receiver<bool>, up: bool) {
        tokio::time::timeout(WAIT, rx.wait_for(|&state| state == up))
            .await
            .expect("link state timed out")
            .unwrap();
    }

    #[test]
    fn icom_port_spacing() {
        let mut options = RadioOptions::default();
        assert_eq!(options.icom_ports(), (50001, 50003));
        options.port = Some(40001);
        assert_eq!(options.icom_ports(), (40001, 40003));
        options.audio_port = Some(40100);
        assert_eq!(options.icom_ports(), (40001, 40100));
    }

    #[tokio::test]
    async fn flex_link_follows_lifecycle() {
        let radio = MockFlexRadio::start().await.unwrap();
        let (host, port) = radio.addr().rsplit_once(':').unwrap();
        let options = RadioOptions {
            dialect: Dialect::Flex,
            host: host.to_string(),
            port: Some(port.parse().unwrap()),
            ..RadioOptions::default()
        };
        let mut task = RadioTask::new(options, None);
        let mut link = task.link_state();

        task.on_start().await.unwrap();
        wait_for_link(&mut link, true).await;
        assert!(radio.wait_for_command("sub slice all", WAIT).await);

        task.on_sleep().await.unwrap();
        assert!(radio.wait_for_command("waveform remove FreeDV-USB", WAIT).await);
        wait_for_link(&mut link, false).await;
    }

    #[tokio::test]
    async fn unreachable_flex_radio_does_not_fail_start() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let options = RadioOptions {
            dialect: Dialect::Flex,
            port: Some(port),
            ..RadioOptions::default()
        };
        let mut task = RadioTask::new(options, None);
        task.on_start().await.unwrap();
        assert!(!*task.link_state().borrow());
    }

    #[tokio::test]
    async fn icom_link_comes_up_after_login() {
        let radio = MockIcomRadio::start(MockRadioConfig::default()).await.unwrap();
        let audio = MockIcomRadio::start(MockRadioConfig::default()).await.unwrap();
        let options = RadioOptions {
            dialect: Dialect::Icom,
            port: Some(radio.addr().port()),
            audio_port: Some(audio.addr().port()),
            username: "op".into(),
            password: "secret".into(),
            ..RadioOptions::default()
        };
        let mut task = RadioTask::new(options, None);
        let mut link = task.link_state();

        task.on_start().await.unwrap();
        wait_for_link(&mut link, true).await;
        assert_eq!(radio.login_usernames().len(), 1);

        task.on_sleep().await.unwrap();
        wait_for_link(&mut link, false).await;
    }

    #[tokio::test]
    async fn lost_audio_session_takes_link_down() {
        let control = MockIcomRadio::start(MockRadioConfig::default()).await.unwrap();
        let audio = MockIcomRadio::start(MockRadioConfig::default()).await.unwrap();
        let options = RadioOptions {
            dialect: Dialect::Icom,
            port: Some(control.addr().port()),
            audio_port: Some(audio.addr().port()),
            username: "op".into(),
            password: "secret".into(),
            ..RadioOptions::default()
        };
        let mut task = RadioTask::new(options, None);
        let mut link = task.link_state();

        task.on_start().await.unwrap();
        wait_for_link(&mut link, true).await;

        audio.send_disconnect().await.unwrap();
        wait_for_link(&mut link, false).await;
    }

    #[tokio::test]
    async fn silent_audio_session_keeps_link_down() {
        let control = MockIcomRadio::start(MockRadioConfig::default()).await.unwrap();
        let audio = MockIcomRadio::start(MockRadioConfig {
            answer_discovery: false,
            ..MockRadioConfig::default()
        })
        .await
        .unwrap();
        let options = RadioOptions {
            dialect: Dialect::Icom,
            port: Some(control.addr().port()),
            audio_port: Some(audio.addr().port()),
            ..RadioOptions::default()
        };
        let mut task = RadioTask::new(options, None);
        let link = task.link_state();

        task.on_start().await.unwrap();
        assert!(control.wait_for(PacketKind::Login, 1, WAIT).await);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!*link.borrow());
    }
}
