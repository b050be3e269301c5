//! Reverb stage - Freeverb-style comb/allpass network
//!
//! Parallel comb filters build the decaying tail, serial allpass filters
//! diffuse it. The right channel runs slightly longer delay lines for
//! stereo spread. An optional soft-clip drive on the wet path adds
//! saturation for denser, dirtier tails.

use serde::{Deserialize, Serialize};

use super::Stage;
use crate::types::StereoBuffer;

/// Comb filter delay line lengths (in samples at 44.1kHz)
/// Prime-ish numbers to avoid resonances; scaled to the actual rate.
const COMB_LENGTHS: [usize; 8] = [1557, 1617, 1491, 1422, 1277, 1356, 1188, 1116];

/// Allpass filter delay line lengths
const ALLPASS_LENGTHS: [usize; 4] = [225, 556, 441, 341];

/// Stereo spread offset for right channel delay lines (in samples)
const STEREO_SPREAD: usize = 23;

/// Fixed high-frequency damping inside the comb feedback path
const DAMPING: f32 = 0.4;

/// Allpass feedback coefficient
const ALLPASS_FEEDBACK: f32 = 0.5;

/// Gain compensation for comb filter summing
const COMB_GAIN: f32 = 0.2;

/// Reverb stage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbConfig {
    pub enabled: bool,
    /// Dry/wet balance (0.0 = dry, 1.0 = wet only)
    pub mix: f32,
    /// Tail length (0.0 = tight room, 1.0 = long hall)
    pub decay: f32,
    /// Soft-clip drive on the wet path (0.0 = clean)
    pub saturation: f32,
}

impl Default for ReverbConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mix: 0.25,
            decay: 0.5,
            saturation: 0.0,
        }
    }
}

/// Comb filter with damped feedback
struct CombFilter {
    buffer: Vec<f32>,
    pos: usize,
    filter_state: f32,
}

impl CombFilter {
    fn new(length: usize, sr_scale: f32) -> Self {
        let scaled_len = ((length as f32 * sr_scale) as usize).max(1);
        Self {
            buffer: vec![0.0; scaled_len],
            pos: 0,
            filter_state: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32) -> f32 {
        let output = self.buffer[self.pos];

        // One-pole lowpass in the feedback path damps high frequencies
        self.filter_state = output * (1.0 - DAMPING) + self.filter_state * DAMPING;

        self.buffer[self.pos] = input + self.filter_state * feedback;
        self.pos = (self.pos + 1) % self.buffer.len();

        output
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.filter_state = 0.0;
    }
}

/// Allpass filter for diffusion
struct AllpassFilter {
    buffer: Vec<f32>,
    pos: usize,
}

impl AllpassFilter {
    fn new(length: usize, sr_scale: f32) -> Self {
        let scaled_len = ((length as f32 * sr_scale) as usize).max(1);
        Self {
            buffer: vec![0.0; scaled_len],
            pos: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let buffered = self.buffer[self.pos];
        let output = -input + buffered;
        self.buffer[self.pos] = input + buffered * ALLPASS_FEEDBACK;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
    }
}

/// Soft clipper for the wet path
///
/// Cubic waveshaper: transparent at low drive, saturates smoothly toward
/// the rails as drive increases.
#[inline]
fn soft_clip(x: f32, drive: f32) -> f32 {
    let scaled = (x * drive).clamp(-1.5, 1.5);
    let shaped = scaled - (scaled * scaled * scaled) / 6.75;
    shaped / drive.max(1.0)
}

/// Freeverb-style stereo reverb
pub struct Reverb {
    config: ReverbConfig,
    combs_l: Vec<CombFilter>,
    combs_r: Vec<CombFilter>,
    allpass_l: Vec<AllpassFilter>,
    allpass_r: Vec<AllpassFilter>,
}

impl Reverb {
    /// Create a reverb at the given sample rate
    pub fn new(sample_rate: u32) -> Self {
        let sr_scale = sample_rate as f32 / 44100.0;

        let combs_l = COMB_LENGTHS
            .iter()
            .map(|&len| CombFilter::new(len, sr_scale))
            .collect();
        let combs_r = COMB_LENGTHS
            .iter()
            .map(|&len| CombFilter::new(len + STEREO_SPREAD, sr_scale))
            .collect();

        let allpass_l = ALLPASS_LENGTHS
            .iter()
            .map(|&len| AllpassFilter::new(len, sr_scale))
            .collect();
        let allpass_r = ALLPASS_LENGTHS
            .iter()
            .map(|&len| AllpassFilter::new(len + STEREO_SPREAD, sr_scale))
            .collect();

        Self {
            config: ReverbConfig::default(),
            combs_l,
            combs_r,
            allpass_l,
            allpass_r,
        }
    }

    /// Apply a new config
    pub fn set_config(&mut self, config: &ReverbConfig) {
        self.config = ReverbConfig {
            enabled: config.enabled,
            mix: config.mix.clamp(0.0, 1.0),
            decay: config.decay.clamp(0.0, 1.0),
            saturation: config.saturation.clamp(0.0, 1.0),
        };
    }

    /// Comb feedback derived from decay (0.7..0.98 keeps the tail stable)
    fn feedback(&self) -> f32 {
        0.7 + self.config.decay * 0.28
    }
}

impl Stage for Reverb {
    fn process(&mut self, buffer: &mut StereoBuffer) {
        if !self.config.enabled {
            return;
        }

        let feedback = self.feedback();
        let wet = self.config.mix;
        let dry = 1.0 - wet;
        let drive = 1.0 + self.config.saturation * 4.0;
        let saturate = self.config.saturation > 0.001;

        for sample in buffer.iter_mut() {
            let input = (sample.left + sample.right) * 0.5;

            let mut out_l = 0.0f32;
            let mut out_r = 0.0f32;

            for comb in &mut self.combs_l {
                out_l += comb.process(input, feedback);
            }
            for comb in &mut self.combs_r {
                out_r += comb.process(input, feedback);
            }

            out_l *= COMB_GAIN;
            out_r *= COMB_GAIN;

            for ap in &mut self.allpass_l {
                out_l = ap.process(out_l);
            }
            for ap in &mut self.allpass_r {
                out_r = ap.process(out_r);
            }

            if saturate {
                out_l = soft_clip(out_l, drive);
                out_r = soft_clip(out_r, drive);
            }

            sample.left = sample.left * dry + out_l * wet;
            sample.right = sample.right * dry + out_r * wet;
        }
    }

    fn reset(&mut self) {
        for comb in self.combs_l.iter_mut().chain(self.combs_r.iter_mut()) {
            comb.reset();
        }
        for ap in self.allpass_l.iter_mut().chain(self.allpass_r.iter_mut()) {
            ap.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StereoSample;

    fn enabled(mix: f32) -> ReverbConfig {
        ReverbConfig {
            enabled: true,
            mix,
            ..ReverbConfig::default()
        }
    }

    #[test]
    fn test_disabled_is_passthrough() {
        let mut reverb = Reverb::new(48000);
        let mut buffer = StereoBuffer::silence(64);
        buffer[0] = StereoSample::new(1.0, 1.0);

        reverb.process(&mut buffer);

        assert_eq!(buffer[0].left, 1.0);
        assert_eq!(buffer[32].left, 0.0);
    }

    #[test]
    fn test_full_dry_matches_input() {
        let mut reverb = Reverb::new(48000);
        reverb.set_config(&enabled(0.0));

        let mut buffer = StereoBuffer::silence(64);
        buffer[0] = StereoSample::new(1.0, 1.0);

        reverb.process(&mut buffer);

        assert!((buffer[0].left - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_impulse_builds_a_tail() {
        let mut reverb = Reverb::new(48000);
        reverb.set_config(&enabled(1.0));

        let mut buffer = StereoBuffer::silence(8192);
        buffer[0] = StereoSample::new(1.0, 1.0);

        reverb.process(&mut buffer);

        // Energy should appear after the shortest comb delay (~1200 samples
        // at 48kHz) even though the input was a single impulse
        let tail_energy: f32 = buffer.iter().skip(1500).map(|s| s.left.abs()).sum();
        assert!(tail_energy > 0.0, "impulse should produce a reverb tail");
    }

    #[test]
    fn test_stereo_spread_decorrelates_channels() {
        let mut reverb = Reverb::new(48000);
        reverb.set_config(&enabled(1.0));

        let mut buffer = StereoBuffer::silence(8192);
        buffer[0] = StereoSample::new(1.0, 1.0);

        reverb.process(&mut buffer);

        let diff_count = buffer
            .iter()
            .skip(1500)
            .take(2000)
            .filter(|s| (s.left - s.right).abs() > 1e-4)
            .count();
        assert!(diff_count > 0, "left/right tails should differ");
    }

    #[test]
    fn test_longer_decay_holds_more_energy() {
        let run = |decay: f32| -> f32 {
            let mut reverb = Reverb::new(48000);
            reverb.set_config(&ReverbConfig {
                enabled: true,
                mix: 1.0,
                decay,
                saturation: 0.0,
            });
            let mut buffer = StereoBuffer::silence(48000);
            buffer[0] = StereoSample::new(1.0, 1.0);
            reverb.process(&mut buffer);
            buffer.iter().skip(24000).map(|s| s.left.abs()).sum()
        };

        let short = run(0.0);
        let long = run(1.0);
        assert!(long > short, "decay=1 tail {} should outlast decay=0 tail {}", long, short);
    }

    #[test]
    fn test_reset_clears_tail() {
        let mut reverb = Reverb::new(48000);
        reverb.set_config(&enabled(1.0));

        let mut buffer = StereoBuffer::silence(4096);
        for s in buffer.iter_mut() {
            *s = StereoSample::new(1.0, 1.0);
        }
        reverb.process(&mut buffer);

        reverb.reset();

        let mut silence = StereoBuffer::silence(64);
        reverb.process(&mut silence);

        let energy: f32 = silence.iter().map(|s| s.left.abs() + s.right.abs()).sum();
        assert!(energy < 0.01, "tail should be gone after reset, got {}", energy);
    }

    #[test]
    fn test_soft_clip_bounded() {
        for x in [-10.0, -1.0, 0.0, 0.5, 10.0] {
            let y = soft_clip(x, 5.0);
            assert!(y.abs() <= 1.0, "soft clip output {} out of range for input {}", y, x);
        }
    }
}
