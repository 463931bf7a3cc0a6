//! Audio frame, channel, and port types.
//!
//! Audio moves between components as [`AudioFrame`]s of 16-bit mono PCM
//! through bounded [`tokio::sync::mpsc`] channels wrapped in
//! [`AudioSender`] and [`AudioReceiver`]. A channel behaves like a FIFO
//! between exactly one producer and one consumer: producers use
//! [`AudioSender::try_send`] from their tick and drop the frame when the
//! consumer has fallen behind, rather than blocking the tick.
//!
//! Every audio-bearing component owns an [`AudioPorts`] table that declares
//! its named input and output channels. Inputs are created by the consumer;
//! outputs start unbound and are bound exactly once at assembly time by the
//! routing fabric (see `dvlink_task::fabric`).

use std::collections::HashMap;
use std::fmt;

use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::error::{Error, Result};

/// Default capacity of an audio channel, in frames.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;

// ---------------------------------------------------------------------------
// ChannelLabel
// ---------------------------------------------------------------------------

/// Name of an audio channel endpoint on a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelLabel {
    Left,
    Right,
    /// Audio heard by the operator (speaker/headset side).
    User,
    /// Audio exchanged with the radio.
    Radio,
}

impl fmt::Display for ChannelLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelLabel::Left => write!(f, "LEFT"),
            ChannelLabel::Right => write!(f, "RIGHT"),
            ChannelLabel::User => write!(f, "USER"),
            ChannelLabel::Radio => write!(f, "RADIO"),
        }
    }
}

// ---------------------------------------------------------------------------
// AudioFrame
// ---------------------------------------------------------------------------

/// A block of mono 16-bit PCM samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        AudioFrame {
            samples,
            sample_rate,
        }
    }

    /// A frame of `len` zero samples.
    pub fn silence(len: usize, sample_rate: u32) -> Self {
        AudioFrame::new(vec![0; len], sample_rate)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration of this frame in milliseconds. Zero for a zero sample rate.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }
}

// ---------------------------------------------------------------------------
// AudioSender / AudioReceiver
// ---------------------------------------------------------------------------

/// Producer end of an audio channel.
///
/// Deliberately not `Clone`: each channel has exactly one producer.
#[derive(Debug)]
pub struct AudioSender {
    tx: mpsc::Sender<AudioFrame>,
}

impl AudioSender {
    /// Push a frame without waiting.
    ///
    /// Returns `Ok(false)` when the channel is full and the frame was
    /// dropped, and [`Error::StreamClosed`] when the consumer is gone.
    pub fn try_send(&self, frame: AudioFrame) -> Result<bool> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(_)) => Ok(false),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::StreamClosed),
        }
    }

    /// Push a frame, waiting for space.
    pub async fn send(&self, frame: AudioFrame) -> Result<()> {
        self.tx.send(frame).await.map_err(|_| Error::StreamClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer end of an audio channel.
#[derive(Debug)]
pub struct AudioReceiver {
    rx: mpsc::Receiver<AudioFrame>,
}

impl AudioReceiver {
    /// Wait for the next frame. `None` once the producer is dropped.
    pub async fn recv(&mut self) -> Option<AudioFrame> {
        self.rx.recv().await
    }

    /// Take the next frame if one is queued.
    pub fn try_recv(&mut self) -> Option<AudioFrame> {
        self.rx.try_recv().ok()
    }
}

/// Create a bounded audio channel.
pub fn audio_channel(capacity: usize) -> (AudioSender, AudioReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (AudioSender { tx }, AudioReceiver { rx })
}

// ---------------------------------------------------------------------------
// AudioPorts
// ---------------------------------------------------------------------------

struct InputPort {
    /// Producer end, handed out once to the fabric.
    sender: Option<AudioSender>,
    /// Consumer end, taken once by the owning component's task.
    receiver: Option<AudioReceiver>,
}

/// The named input and output channels of one component.
pub struct AudioPorts {
    inputs: HashMap<ChannelLabel, InputPort>,
    outputs: HashMap<ChannelLabel, Option<AudioSender>>,
}

impl AudioPorts {
    /// Declare a component's channels. Input channels are created here
    /// with `capacity` frames of buffering.
    pub fn new(inputs: &[ChannelLabel], outputs: &[ChannelLabel], capacity: usize) -> Self {
        let inputs = inputs
            .iter()
            .map(|&label| {
                let (sender, receiver) = audio_channel(capacity);
                (
                    label,
                    InputPort {
                        sender: Some(sender),
                        receiver: Some(receiver),
                    },
                )
            })
            .collect();
        let outputs = outputs.iter().map(|&label| (label, None)).collect();
        AudioPorts { inputs, outputs }
    }

    /// Whether the component declares an input named `label`.
    pub fn has_input(&self, label: ChannelLabel) -> bool {
        self.inputs.contains_key(&label)
    }

    /// Whether the component declares an output named `label`.
    pub fn has_output(&self, label: ChannelLabel) -> bool {
        self.outputs.contains_key(&label)
    }

    /// Claim the producer end of input `label` so another component can
    /// feed it. Succeeds at most once per input.
    pub fn claim_input(&mut self, label: ChannelLabel) -> Result<AudioSender> {
        let Some(port) = self.inputs.get_mut(&label) else {
            warn!(channel = %label, "claim refused: no such input");
            return Err(Error::Configuration(format!("no input channel {label}")));
        };
        port.sender.take().ok_or_else(|| {
            warn!(channel = %label, "claim refused: input already bound");
            Error::Configuration(format!("input channel {label} already bound"))
        })
    }

    /// Bind output `label` to a producer end obtained from
    /// [`claim_input`](AudioPorts::claim_input) on the consumer.
    pub fn bind_output(&mut self, label: ChannelLabel, sender: AudioSender) -> Result<()> {
        let Some(slot) = self.outputs.get_mut(&label) else {
            warn!(channel = %label, "bind refused: no such output");
            return Err(Error::Configuration(format!("no output channel {label}")));
        };
        if slot.is_some() {
            warn!(channel = %label, "bind refused: output already bound");
            return Err(Error::Configuration(format!(
                "output channel {label} already bound"
            )));
        }
        *slot = Some(sender);
        trace!(channel = %label, "output bound");
        Ok(())
    }

    /// Take the consumer end of input `label` for the component's own task.
    pub fn take_input(&mut self, label: ChannelLabel) -> Option<AudioReceiver> {
        self.inputs.get_mut(&label).and_then(|p| p.receiver.take())
    }

    /// Take the bound producer end of output `label` for the component's
    /// own task. `None` if the output was never bound.
    pub fn take_output(&mut self, label: ChannelLabel) -> Option<AudioSender> {
        self.outputs.get_mut(&label).and_then(Option::take)
    }

    /// Whether the producer end of input `label` has been handed out.
    pub fn is_input_claimed(&self, label: ChannelLabel) -> bool {
        matches!(self.inputs.get(&label), Some(InputPort { sender: None, .. }))
    }

    /// Whether output `label` is currently bound.
    pub fn is_output_bound(&self, label: ChannelLabel) -> bool {
        matches!(self.outputs.get(&label), Some(Some(_)))
    }
}

impl fmt::Debug for AudioPorts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut inputs: Vec<_> = self.inputs.keys().collect();
        inputs.sort();
        let mut outputs: Vec<_> = self.outputs.keys().collect();
        outputs.sort();
        f.debug_struct("AudioPorts")
            .field("inputs", &inputs)
            .field("outputs", &outputs)
            .finish()
    }
}

/// A component with named audio endpoints that the fabric can wire up.
pub trait AudioNode {
    /// Name used by routes to refer to this component.
    fn node_name(&self) -> &str;

    fn ports(&self) -> &AudioPorts;

    fn ports_mut(&mut self) -> &mut AudioPorts;
}
