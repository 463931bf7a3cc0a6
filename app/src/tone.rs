//! Table-driven sine tone generator.

use dvlink::AudioFrame;

/// Sample rate of the handset codec.
pub const CODEC_SAMPLE_RATE: u32 = 48_000;

/// Samples per 20 ms codec frame.
pub const CODEC_FRAME_SAMPLES: usize = 960;

/// Emits a fixed sine tone from a precomputed table.
///
/// The table holds the shortest whole number of cycles that ends exactly
/// on a sample boundary, so successive frames join without a phase step.
#[derive(Debug, Clone)]
pub struct ToneGenerator {
    table: Vec<i16>,
    pos: usize,
    sample_rate: u32,
}

impl ToneGenerator {
    pub fn new(freq_hz: u32, amplitude: i16, sample_rate: u32) -> Self {
        let period = (sample_rate / gcd(freq_hz, sample_rate)) as usize;
        let table = (0..period)
            .map(|n| {
                let phase = 2.0 * std::f64::consts::PI * f64::from(freq_hz) * n as f64
                    / f64::from(sample_rate);
                (f64::from(amplitude) * phase.sin()).round() as i16
            })
            .collect();
        ToneGenerator {
            table,
            pos: 0,
            sample_rate,
        }
    }

    pub fn next_frame(&mut self, len: usize) -> AudioFrame {
        let mut samples = Vec::with_capacity(len);
        for _ in 0..len {
            samples.push(self.table[self.pos]);
            self.pos = (self.pos + 1) % self.table.len();
        }
        AudioFrame::new(samples, self.sample_rate)
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.max(1)
}
