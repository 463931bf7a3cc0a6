//! Assembles the handset: tasks, audio wiring, and the supervisor.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use dvlink::task::{
    AudioFabric, BootStraps, HostPowerController, OperatingMode, PowerController, SequenceOutcome,
    Supervisor, SupervisorBuilder, TaskHandle, names,
};
use dvlink::{AudioNode, Dialect, Result, audio_channel};

use crate::audio::{
    BeeperTask, CodecTask, ComplianceTask, FreedvTask, MixerTask, NetworkAudio, PlaybackMeter,
};
use crate::peripheral::{Peripheral, UiTask};
use crate::radio::{RadioAudio, RadioOptions, RadioTask};

/// Frames buffered between the modem and the radio session.
const NETWORK_AUDIO_CAPACITY: usize = 16;

#[derive(Debug, Clone, Default)]
pub struct HandsetConfig {
    pub radio: RadioOptions,
    pub straps: BootStraps,
}

/// An assembled handset, ready to start.
pub struct Handset {
    supervisor: Supervisor,
    power: Arc<HostPowerController>,
    playback: PlaybackMeter,
    /// Radio link state. Always down in compliance mode.
    link: watch::Receiver<bool>,
}

impl Handset {
    /// Wire the audio fabric for the strapped mode and spawn every task.
    /// Must be called inside a tokio runtime.
    pub fn assemble(mut config: HandsetConfig) -> Result<Self> {
        let power = Arc::new(HostPowerController::new(config.straps));
        let mode = power.sample_straps().mode();
        if config.straps.override_network {
            warn!("network override strap set; using default radio port");
            config.radio.port = None;
        }

        let mut codec = CodecTask::new();
        let playback = codec.meter();
        let mut handles = Vec::new();
        let link;

        match mode {
            OperatingMode::Normal => {
                let (network, radio_audio) = match config.radio.dialect {
                    Dialect::Icom => {
                        let (to_radio, input) = audio_channel(NETWORK_AUDIO_CAPACITY);
                        let (output, from_radio) = audio_channel(NETWORK_AUDIO_CAPACITY);
                        (
                            Some(NetworkAudio { to_radio, from_radio }),
                            Some(RadioAudio { input, output }),
                        )
                    }
                    Dialect::Flex => (None, None),
                };

                let mut freedv = FreedvTask::new(network);
                let mut mixer = MixerTask::new();
                let mut beeper = BeeperTask::new();
                {
                    let mut nodes: [&mut dyn AudioNode; 4] =
                        [&mut codec, &mut freedv, &mut mixer, &mut beeper];
                    AudioFabric::normal().assemble(&mut nodes)?;
                }

                let radio = RadioTask::new(config.radio, radio_audio);
                link = radio.link_state();
                handles.push(TaskHandle::spawn(freedv));
                handles.push(TaskHandle::spawn(mixer));
                handles.push(TaskHandle::spawn(beeper));
                handles.push(TaskHandle::spawn(UiTask::new(link.clone())));
                handles.push(TaskHandle::spawn(radio));
            }
            OperatingMode::ComplianceTest => {
                let mut tones = ComplianceTask::new();
                {
                    let mut nodes: [&mut dyn AudioNode; 2] = [&mut codec, &mut tones];
                    AudioFabric::compliance().assemble(&mut nodes)?;
                }
                let (_, rx) = watch::channel(false);
                link = rx;
                handles.push(TaskHandle::spawn(tones));
            }
        }

        handles.push(TaskHandle::spawn(codec));
        let planned = match mode {
            OperatingMode::Normal => Peripheral::all().to_vec(),
            OperatingMode::ComplianceTest => vec![names::BATTERY, names::LEDS, names::BUTTONS],
        };
        for name in planned {
            handles.push(TaskHandle::spawn(Peripheral::new(name)));
        }

        let mut builder = SupervisorBuilder::new(Arc::clone(&power) as Arc<dyn PowerController>);
        for handle in handles {
            builder = builder.task(handle);
        }
        let supervisor = builder.build()?;
        info!(mode = ?supervisor.mode(), "handset assembled");

        Ok(Handset {
            supervisor,
            power,
            playback,
            link,
        })
    }

    pub fn mode(&self) -> OperatingMode {
        self.supervisor.mode()
    }

    pub async fn start(&self) -> Result<SequenceOutcome> {
        self.supervisor.start().await
    }

    pub async fn sleep(&self) -> Result<()> {
        self.supervisor.sleep().await
    }

    pub fn power(&self) -> &HostPowerController {
        &self.power
    }

    /// Whether the radio link is currently up.
    pub fn link_up(&self) -> bool {
        *self.link.borrow()
    }

    /// What the codec has played so far.
    pub fn playback(&self) -> PlaybackMeter {
        Arc::clone(&self.playback)
    }

    pub async fn shutdown(self) {
        self.supervisor.shutdown().await;
    }
}
