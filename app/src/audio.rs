//! Audio components wired together by the fabric.
//!
//! Each component owns an [`AudioPorts`] for assembly and moves the bound
//! endpoints into its task the first time it starts. Frames move on the
//! task's tick: inputs are drained without waiting and outputs are pushed
//! with `try_send`, so a stalled consumer drops frames instead of stalling
//! its producer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, trace};

use dvlink::task::{Task, names};
use dvlink::{AudioFrame, AudioNode, AudioPorts, AudioReceiver, AudioSender, ChannelLabel, Result};

use crate::tone::{CODEC_FRAME_SAMPLES, CODEC_SAMPLE_RATE, ToneGenerator};

/// Tick period of every audio component.
pub const AUDIO_TICK: Duration = Duration::from_millis(20);

/// Sample rate of the radio's network audio stream.
pub const NETWORK_SAMPLE_RATE: u32 = 8_000;

/// Frames buffered per input channel.
const PORT_CAPACITY: usize = 8;

const COMPLIANCE_LEFT_HZ: u32 = 400;
const COMPLIANCE_RIGHT_HZ: u32 = 700;
const COMPLIANCE_AMPLITUDE: i16 = 430;

const BEEP_HZ: u32 = 800;
const BEEP_AMPLITUDE: i16 = 2000;
const BEEP_FRAMES: usize = 5;

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// The channel ends a component's task owns after assembly.
#[derive(Debug, Default)]
struct Endpoints {
    inputs: HashMap<ChannelLabel, AudioReceiver>,
    outputs: HashMap<ChannelLabel, AudioSender>,
}

impl Endpoints {
    fn take(ports: &mut AudioPorts, inputs: &[ChannelLabel], outputs: &[ChannelLabel]) -> Self {
        let inputs = inputs
            .iter()
            .filter_map(|&label| ports.take_input(label).map(|rx| (label, rx)))
            .collect();
        let outputs = outputs
            .iter()
            .filter_map(|&label| ports.take_output(label).map(|tx| (label, tx)))
            .collect();
        Endpoints { inputs, outputs }
    }

    /// Every frame queued on input `label`.
    fn drain(&mut self, label: ChannelLabel) -> Vec<AudioFrame> {
        let mut frames = Vec::new();
        if let Some(rx) = self.inputs.get_mut(&label) {
            while let Some(frame) = rx.try_recv() {
                frames.push(frame);
            }
        }
        frames
    }

    /// Push a frame on output `label`. Unbound outputs discard it.
    fn emit(&self, component: &str, label: ChannelLabel, frame: AudioFrame) {
        let Some(tx) = self.outputs.get(&label) else {
            return;
        };
        match tx.try_send(frame) {
            Ok(true) => {}
            Ok(false) => trace!(component, channel = %label, "consumer full; frame dropped"),
            Err(_) => trace!(component, channel = %label, "consumer gone; frame dropped"),
        }
    }
}

/// Decimate 48 kHz codec audio to the network rate.
pub fn to_network_rate(frame: &AudioFrame) -> AudioFrame {
    let step = (frame.sample_rate / NETWORK_SAMPLE_RATE).max(1) as usize;
    let samples = frame.samples.iter().step_by(step).copied().collect();
    AudioFrame::new(samples, NETWORK_SAMPLE_RATE)
}

/// Repeat network-rate samples up to the codec rate.
pub fn to_codec_rate(frame: &AudioFrame) -> AudioFrame {
    let factor = (CODEC_SAMPLE_RATE / frame.sample_rate.max(1)).max(1) as usize;
    let samples = frame
        .samples
        .iter()
        .flat_map(|&s| std::iter::repeat_n(s, factor))
        .collect();
    AudioFrame::new(samples, CODEC_SAMPLE_RATE)
}

/// Sum two buffers sample by sample, clamping at the i16 limits. The
/// shorter buffer is treated as padded with silence.
pub fn mix(a: &[i16], b: &[i16]) -> Vec<i16> {
    (0..a.len().max(b.len()))
        .map(|i| {
            let x = a.get(i).copied().unwrap_or(0);
            let y = b.get(i).copied().unwrap_or(0);
            x.saturating_add(y)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// What the codec has played out, per output jack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Playback {
    pub user_frames: u64,
    pub radio_frames: u64,
    pub user_peak: i16,
    pub radio_peak: i16,
}

/// Shared view of a [`CodecTask`]'s playback counters.
pub type PlaybackMeter = Arc<Mutex<Playback>>;

/// The handset codec.
///
/// Captures the headset microphone on LEFT and the radio's receive audio on
/// RIGHT, and plays USER to the headset and RADIO to the radio. Without
/// audio hardware, capture is silence and playback is metered.
pub struct CodecTask {
    ports: AudioPorts,
    io: Option<Endpoints>,
    meter: PlaybackMeter,
}

impl CodecTask {
    pub fn new() -> Self {
        CodecTask {
            ports: AudioPorts::new(
                &[ChannelLabel::User, ChannelLabel::Radio],
                &[ChannelLabel::Left, ChannelLabel::Right],
                PORT_CAPACITY,
            ),
            io: None,
            meter: PlaybackMeter::default(),
        }
    }

    pub fn meter(&self) -> PlaybackMeter {
        Arc::clone(&self.meter)
    }
}

impl Default for CodecTask {
    fn default() -> Self {
        CodecTask::new()
    }
}

impl AudioNode for CodecTask {
    fn node_name(&self) -> &str {
        names::CODEC
    }

    fn ports(&self) -> &AudioPorts {
        &self.ports
    }

    fn ports_mut(&mut self) -> &mut AudioPorts {
        &mut self.ports
    }
}

#[async_trait]
impl Task for CodecTask {
    fn name(&self) -> &str {
        names::CODEC
    }

    async fn on_start(&mut self) -> Result<()> {
        if self.io.is_none() {
            self.io = Some(Endpoints::take(
                &mut self.ports,
                &[ChannelLabel::User, ChannelLabel::Radio],
                &[ChannelLabel::Left, ChannelLabel::Right],
            ));
        }
        info!(rate = CODEC_SAMPLE_RATE, "codec running");
        Ok(())
    }

    async fn on_sleep(&mut self) -> Result<()> {
        info!("codec powered down");
        Ok(())
    }

    fn tick_interval(&self) -> Option<Duration> {
        Some(AUDIO_TICK)
    }

    async fn on_tick(&mut self) -> Result<()> {
        let Some(io) = self.io.as_mut() else {
            return Ok(());
        };

        let user = io.drain(ChannelLabel::User);
        let radio = io.drain(ChannelLabel::Radio);
        {
            let mut meter = self.meter.lock().unwrap_or_else(|e| e.into_inner());
            for frame in &user {
                meter.user_frames += 1;
                meter.user_peak = meter.user_peak.max(peak(frame));
            }
            for frame in &radio {
                meter.radio_frames += 1;
                meter.radio_peak = meter.radio_peak.max(peak(frame));
            }
        }

        for label in [ChannelLabel::Left, ChannelLabel::Right] {
            io.emit(
                names::CODEC,
                label,
                AudioFrame::silence(CODEC_FRAME_SAMPLES, CODEC_SAMPLE_RATE),
            );
        }
        Ok(())
    }
}

fn peak(frame: &AudioFrame) -> i16 {
    frame
        .samples
        .iter()
        .map(|s| s.saturating_abs())
        .max()
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// FreeDV
// ---------------------------------------------------------------------------

/// Audio path to and from a networked radio.
#[derive(Debug)]
pub struct NetworkAudio {
    /// Microphone audio for the radio session, at the network rate.
    pub to_radio: AudioSender,
    /// Receive audio from the radio session, at the network rate.
    pub from_radio: AudioReceiver,
}

/// The digital-voice modem stage.
///
/// Microphone audio on LEFT goes out on RADIO and, when a network radio is
/// attached, to the radio session. Receive audio on RIGHT and from the
/// radio session comes out on USER.
pub struct FreedvTask {
    ports: AudioPorts,
    io: Option<Endpoints>,
    network: Option<NetworkAudio>,
}

impl FreedvTask {
    pub fn new(network: Option<NetworkAudio>) -> Self {
        FreedvTask {
            ports: AudioPorts::new(
                &[ChannelLabel::Left, ChannelLabel::Right],
                &[ChannelLabel::User, ChannelLabel::Radio],
                PORT_CAPACITY,
            ),
            io: None,
            network,
        }
    }
}

impl AudioNode for FreedvTask {
    fn node_name(&self) -> &str {
        names::FREEDV
    }

    fn ports(&self) -> &AudioPorts {
        &self.ports
    }

    fn ports_mut(&mut self) -> &mut AudioPorts {
        &mut self.ports
    }
}

#[async_trait]
impl Task for FreedvTask {
    fn name(&self) -> &str {
        names::FREEDV
    }

    async fn on_start(&mut self) -> Result<()> {
        if self.io.is_none() {
            self.io = Some(Endpoints::take(
                &mut self.ports,
                &[ChannelLabel::Left, ChannelLabel::Right],
                &[ChannelLabel::User, ChannelLabel::Radio],
            ));
        }
        info!(network = self.network.is_some(), "modem running");
        Ok(())
    }

    async fn on_sleep(&mut self) -> Result<()> {
        debug!("modem idle");
        Ok(())
    }

    fn tick_interval(&self) -> Option<Duration> {
        Some(AUDIO_TICK)
    }

    async fn on_tick(&mut self) -> Result<()> {
        let Some(io) = self.io.as_mut() else {
            return Ok(());
        };

        for frame in io.drain(ChannelLabel::Left) {
            if let Some(net) = &self.network {
                if let Ok(false) = net.to_radio.try_send(to_network_rate(&frame)) {
                    trace!("radio session full; frame dropped");
                }
            }
            io.emit(names::FREEDV, ChannelLabel::Radio, frame);
        }

        for frame in io.drain(ChannelLabel::Right) {
            io.emit(names::FREEDV, ChannelLabel::User, frame);
        }
        if let Some(net) = self.network.as_mut() {
            while let Some(frame) = net.from_radio.try_recv() {
                io.emit(names::FREEDV, ChannelLabel::User, to_codec_rate(&frame));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Mixer
// ---------------------------------------------------------------------------

/// Sums decoded speech (LEFT) and beeps (RIGHT) into the headset feed.
pub struct MixerTask {
    ports: AudioPorts,
    io: Option<Endpoints>,
}

impl MixerTask {
    pub fn new() -> Self {
        MixerTask {
            ports: AudioPorts::new(
                &[ChannelLabel::Left, ChannelLabel::Right],
                &[ChannelLabel::Left],
                PORT_CAPACITY,
            ),
            io: None,
        }
    }
}

impl Default for MixerTask {
    fn default() -> Self {
        MixerTask::new()
    }
}

impl AudioNode for MixerTask {
    fn node_name(&self) -> &str {
        names::MIXER
    }

    fn ports(&self) -> &AudioPorts {
        &self.ports
    }

    fn ports_mut(&mut self) -> &mut AudioPorts {
        &mut self.ports
    }
}

#[async_trait]
impl Task for MixerTask {
    fn name(&self) -> &str {
        names::MIXER
    }

    async fn on_start(&mut self) -> Result<()> {
        if self.io.is_none() {
            self.io = Some(Endpoints::take(
                &mut self.ports,
                &[ChannelLabel::Left, ChannelLabel::Right],
                &[ChannelLabel::Left],
            ));
        }
        Ok(())
    }

    async fn on_sleep(&mut self) -> Result<()> {
        Ok(())
    }

    fn tick_interval(&self) -> Option<Duration> {
        Some(AUDIO_TICK)
    }

    async fn on_tick(&mut self) -> Result<()> {
        let Some(io) = self.io.as_mut() else {
            return Ok(());
        };

        let mut left = io.drain(ChannelLabel::Left).into_iter();
        let mut right = io.drain(ChannelLabel::Right).into_iter();
        loop {
            let frame = match (left.next(), right.next()) {
                (Some(a), Some(b)) => AudioFrame::new(mix(&a.samples, &b.samples), a.sample_rate),
                (Some(a), None) => a,
                (None, Some(b)) => b,
                (None, None) => break,
            };
            io.emit(names::MIXER, ChannelLabel::Left, frame);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Beeper
// ---------------------------------------------------------------------------

/// Short confirmation tones on LEFT.
pub struct BeeperTask {
    ports: AudioPorts,
    io: Option<Endpoints>,
    tone: ToneGenerator,
    remaining: usize,
}

impl BeeperTask {
    pub fn new() -> Self {
        BeeperTask {
            ports: AudioPorts::new(&[], &[ChannelLabel::Left], PORT_CAPACITY),
            io: None,
            tone: ToneGenerator::new(BEEP_HZ, BEEP_AMPLITUDE, CODEC_SAMPLE_RATE),
            remaining: 0,
        }
    }
}

impl Default for BeeperTask {
    fn default() -> Self {
        BeeperTask::new()
    }
}

impl AudioNode for BeeperTask {
    fn node_name(&self) -> &str {
        names::BEEPER
    }

    fn ports(&self) -> &AudioPorts {
        &self.ports
    }

    fn ports_mut(&mut self) -> &mut AudioPorts {
        &mut self.ports
    }
}

#[async_trait]
impl Task for BeeperTask {
    fn name(&self) -> &str {
        names::BEEPER
    }

    /// Queues a ready beep.
    async fn on_start(&mut self) -> Result<()> {
        if self.io.is_none() {
            self.io = Some(Endpoints::take(&mut self.ports, &[], &[ChannelLabel::Left]));
        }
        self.remaining = BEEP_FRAMES;
        Ok(())
    }

    async fn on_sleep(&mut self) -> Result<()> {
        self.remaining = 0;
        Ok(())
    }

    fn tick_interval(&self) -> Option<Duration> {
        Some(AUDIO_TICK)
    }

    async fn on_tick(&mut self) -> Result<()> {
        if self.remaining == 0 {
            return Ok(());
        }
        self.remaining -= 1;
        if let Some(io) = &self.io {
            io.emit(
                names::BEEPER,
                ChannelLabel::Left,
                self.tone.next_frame(CODEC_FRAME_SAMPLES),
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Compliance tones
// ---------------------------------------------------------------------------

/// RF compliance self-test source: 400 Hz on LEFT, 700 Hz on RIGHT.
pub struct ComplianceTask {
    ports: AudioPorts,
    io: Option<Endpoints>,
    left: ToneGenerator,
    right: ToneGenerator,
}

impl ComplianceTask {
    pub fn new() -> Self {
        ComplianceTask {
            ports: AudioPorts::new(
                &[],
                &[ChannelLabel::Left, ChannelLabel::Right],
                PORT_CAPACITY,
            ),
            io: None,
            left: ToneGenerator::new(COMPLIANCE_LEFT_HZ, COMPLIANCE_AMPLITUDE, CODEC_SAMPLE_RATE),
            right: ToneGenerator::new(COMPLIANCE_RIGHT_HZ, COMPLIANCE_AMPLITUDE, CODEC_SAMPLE_RATE),
        }
    }
}

impl Default for ComplianceTask {
    fn default() -> Self {
        ComplianceTask::new()
    }
}

impl AudioNode for ComplianceTask {
    fn node_name(&self) -> &str {
        names::COMPLIANCE
    }

    fn ports(&self) -> &AudioPorts {
        &self.ports
    }

    fn ports_mut(&mut self) -> &mut AudioPorts {
        &mut self.ports
    }
}

#[async_trait]
impl Task for ComplianceTask {
    fn name(&self) -> &str {
        names::COMPLIANCE
    }

    async fn on_start(&mut self) -> Result<()> {
        if self.io.is_none() {
            self.io = Some(Endpoints::take(
                &mut self.ports,
                &[],
                &[ChannelLabel::Left, ChannelLabel::Right],
            ));
        }
        info!(
            left_hz = COMPLIANCE_LEFT_HZ,
            right_hz = COMPLIANCE_RIGHT_HZ,
            "compliance tones on"
        );
        Ok(())
    }

    async fn on_sleep(&mut self) -> Result<()> {
        info!("compliance tones off");
        Ok(())
    }

    fn tick_interval(&self) -> Option<Duration> {
        Some(AUDIO_TICK)
    }

    async fn on_tick(&mut self) -> Result<()> {
        if let Some(io) = &self.io {
            io.emit(
                names::COMPLIANCE,
                ChannelLabel::Left,
                self.left.next_frame(CODEC_FRAME_SAMPLES),
            );
            io.emit(
                names::COMPLIANCE,
                ChannelLabel::Right,
                self.right.next_frame(CODEC_FRAME_SAMPLES),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dvlink::audio_channel;
    use dvlink::task::AudioFabric;

    #[test]
    fn mix_saturates() {
        assert_eq!(mix(&[1, 2, 3], &[10, 20]), vec![11, 22, 3]);
        assert_eq!(mix(&[i16::MAX, i16::MIN], &[100, -100]), vec![i16::MAX, i16::MIN]);
        assert!(mix(&[], &[]).is_empty());
    }

    #[test]
    fn rate_conversion() {
        let codec = AudioFrame::new((0..960).map(|n| n as i16).collect(), CODEC_SAMPLE_RATE);
        let net = to_network_rate(&codec);
        assert_eq!(net.sample_rate, NETWORK_SAMPLE_RATE);
        assert_eq!(net.len(), 160);
        assert_eq!(&net.samples[..3], &[0, 6, 12]);

        let back = to_codec_rate(&net);
        assert_eq!(back.len(), 960);
        assert_eq!(&back.samples[..7], &[0, 0, 0, 0, 0, 0, 6]);
    }

    #[tokio::test]
    async fn mixer_sums_both_inputs() {
        let mut mixer = MixerTask::new();
        let (out_tx, mut out_rx) = audio_channel(4);
        let left = mixer.ports.claim_input(ChannelLabel::Left).unwrap();
        let right = mixer.ports.claim_input(ChannelLabel::Right).unwrap();
        mixer.ports.bind_output(ChannelLabel::Left, out_tx).unwrap();
        mixer.on_start().await.unwrap();

        left.send(AudioFrame::new(vec![100, 200], 48_000)).await.unwrap();
        right.send(AudioFrame::new(vec![i16::MAX, 5], 48_000)).await.unwrap();
        right.send(AudioFrame::new(vec![7], 48_000)).await.unwrap();
        mixer.on_tick().await.unwrap();

        assert_eq!(out_rx.recv().await.unwrap().samples, vec![i16::MAX, 205]);
        assert_eq!(out_rx.recv().await.unwrap().samples, vec![7]);
        assert!(out_rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn compliance_tones_reach_codec() {
        let mut codec = CodecTask::new();
        let mut tones = ComplianceTask::new();
        let meter = codec.meter();
        {
            let mut nodes: [&mut dyn AudioNode; 2] = [&mut codec, &mut tones];
            AudioFabric::compliance().assemble(&mut nodes).unwrap();
        }
        codec.on_start().await.unwrap();
        tones.on_start().await.unwrap();

        tones.on_tick().await.unwrap();
        tones.on_tick().await.unwrap();
        codec.on_tick().await.unwrap();

        let played = *meter.lock().unwrap();
        assert_eq!(played.user_frames, 2);
        assert_eq!(played.radio_frames, 2);
        assert_eq!(played.user_peak, COMPLIANCE_AMPLITUDE);
        assert!(played.radio_peak > 400 && played.radio_peak <= COMPLIANCE_AMPLITUDE);
    }

    #[tokio::test]
    async fn freedv_bridges_network_audio() {
        let (to_radio, mut radio_in) = audio_channel(4);
        let (radio_out, from_radio) = audio_channel(4);
        let mut freedv = FreedvTask::new(Some(NetworkAudio {
            to_radio,
            from_radio,
        }));
        let mic = freedv.ports.claim_input(ChannelLabel::Left).unwrap();
        let (user_tx, mut user_rx) = audio_channel(4);
        freedv.ports.bind_output(ChannelLabel::User, user_tx).unwrap();
        freedv.on_start().await.unwrap();

        mic.send(AudioFrame::new(vec![3; 960], CODEC_SAMPLE_RATE)).await.unwrap();
        radio_out.send(AudioFrame::new(vec![9; 160], NETWORK_SAMPLE_RATE)).await.unwrap();
        freedv.on_tick().await.unwrap();

        let sent = radio_in.recv().await.unwrap();
        assert_eq!((sent.len(), sent.sample_rate), (160, NETWORK_SAMPLE_RATE));
        let heard = user_rx.recv().await.unwrap();
        assert_eq!((heard.len(), heard.sample_rate), (960, CODEC_SAMPLE_RATE));
        assert!(heard.samples.iter().all(|&s| s == 9));
    }

    #[tokio::test]
    async fn beeper_stops_after_one_beep() {
        let mut beeper = BeeperTask::new();
        let (tx, mut rx) = audio_channel(16);
        beeper.ports.bind_output(ChannelLabel::Left, tx).unwrap();
        beeper.on_start().await.unwrap();
        for _ in 0..BEEP_FRAMES + 3 {
            beeper.on_tick().await.unwrap();
        }
        let mut frames = 0;
        while rx.try_recv().is_some() {
            frames += 1;
        }
        assert_eq!(frames, BEEP_FRAMES);
    }
}
