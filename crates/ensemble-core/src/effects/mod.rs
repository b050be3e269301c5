//! Master effects chain - fixed-order processing stages with live parameters
//!
//! The chain sits between the stem sum and the device output:
//!
//!   stem sum → parametric EQ → compressor/limiter → reverb →
//!   stereo expander → master volume → output
//!
//! Each stage carries an `enabled` flag and a serde config struct that the
//! session owns as the source of truth; the audio thread receives config
//! updates through the command queue and never hands state back. Gain-like
//! parameter changes are ramped over a short time constant so live edits
//! never click.

pub mod dynamics;
pub mod eq;
pub mod expander;
pub mod reverb;

pub use dynamics::{Compressor, CompressorConfig, CompressionTier, GainReductionMeter, TierCompressor};
pub use eq::{EqBand, EqConfig, FilterShape, ParametricEq};
pub use expander::{ExpanderBand, ExpanderConfig, StereoExpander};
pub use reverb::{Reverb, ReverbConfig};

use serde::{Deserialize, Serialize};

use crate::types::{Sample, StereoBuffer};

/// Ramp time constant for parameter changes (keeps live edits click-free)
pub const PARAM_SMOOTHING_MS: f32 = 15.0;

/// One processing stage of the master chain
///
/// Stages process stereo buffers in-place. `reset` clears DSP state
/// (filter memories, delay lines, envelopes) without touching parameters;
/// restoring a stage's default *parameters* is the session's job since the
/// session owns the config.
pub trait Stage: Send {
    /// Process a stereo buffer in-place
    fn process(&mut self, buffer: &mut StereoBuffer);

    /// Clear DSP state (called on load and after long stops)
    fn reset(&mut self);
}

/// One-pole parameter smoother
///
/// Exponential approach to the target value with `PARAM_SMOOTHING_MS` time
/// constant. Call `next()` once per sample on the audio thread.
#[derive(Debug, Clone)]
pub struct Smoothed {
    current: Sample,
    target: Sample,
    coeff: Sample,
}

impl Smoothed {
    /// Create a smoother at the given starting value
    pub fn new(value: Sample, sample_rate: u32) -> Self {
        let tau = PARAM_SMOOTHING_MS / 1000.0;
        Self {
            current: value,
            target: value,
            coeff: (-1.0 / (tau * sample_rate as f32)).exp(),
        }
    }

    /// Set a new target; the output ramps there over the smoothing window
    pub fn set_target(&mut self, target: Sample) {
        self.target = target;
    }

    /// Jump to a value without ramping (load/reset paths)
    pub fn snap(&mut self, value: Sample) {
        self.current = value;
        self.target = value;
    }

    /// Current target (last value set, not the ramped output)
    pub fn target(&self) -> Sample {
        self.target
    }

    /// Advance one sample and return the smoothed value
    #[inline]
    pub fn next(&mut self) -> Sample {
        self.current = self.target + (self.current - self.target) * self.coeff;
        self.current
    }
}

/// Aggregate configuration for the whole chain, persisted per recording
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectsConfig {
    pub eq: EqConfig,
    pub compressor: CompressorConfig,
    pub reverb: ReverbConfig,
    pub expander: ExpanderConfig,
}

/// Identifies one stage of the chain (for per-stage reset/update calls)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageId {
    Eq,
    Compressor,
    Reverb,
    Expander,
}

/// The fixed-order master chain plus master volume
///
/// Lives on the audio thread inside the engine. Stage order is part of the
/// contract and never changes at runtime.
pub struct EffectsRack {
    eq: ParametricEq,
    compressor: Compressor,
    reverb: Reverb,
    expander: StereoExpander,
    master_volume: Smoothed,
}

impl EffectsRack {
    /// Create a rack with default stage configs at the given sample rate
    pub fn new(sample_rate: u32) -> Self {
        Self {
            eq: ParametricEq::new(sample_rate),
            compressor: Compressor::new(sample_rate),
            reverb: Reverb::new(sample_rate),
            expander: StereoExpander::new(sample_rate),
            master_volume: Smoothed::new(1.0, sample_rate),
        }
    }

    /// Shared gain-reduction meter handle for lock-free UI reads
    pub fn gain_reduction_meter(&self) -> GainReductionMeter {
        self.compressor.meter()
    }

    /// Apply a full config (load/restore path)
    pub fn set_config(&mut self, config: &EffectsConfig) {
        self.eq.set_config(&config.eq);
        self.compressor.set_config(&config.compressor);
        self.reverb.set_config(&config.reverb);
        self.expander.set_config(&config.expander);
    }

    /// Apply one stage's config (live update path)
    pub fn set_eq(&mut self, config: &EqConfig) {
        self.eq.set_config(config);
    }

    pub fn set_compressor(&mut self, config: &CompressorConfig) {
        self.compressor.set_config(config);
    }

    pub fn set_reverb(&mut self, config: &ReverbConfig) {
        self.reverb.set_config(config);
    }

    pub fn set_expander(&mut self, config: &ExpanderConfig) {
        self.expander.set_config(config);
    }

    /// Set master volume (linear, clamped to [0, 1], ramped)
    pub fn set_master_volume(&mut self, volume: f32) {
        self.master_volume.set_target(volume.clamp(0.0, 1.0));
    }

    /// Current master volume target
    pub fn master_volume(&self) -> f32 {
        self.master_volume.target()
    }

    /// Run the chain over one buffer
    pub fn process(&mut self, buffer: &mut StereoBuffer) {
        self.eq.process(buffer);
        self.compressor.process(buffer);
        self.reverb.process(buffer);
        self.expander.process(buffer);

        for sample in buffer.iter_mut() {
            *sample *= self.master_volume.next();
        }
    }

    /// Clear all stage DSP state (reverb tails, filter memories, envelopes)
    pub fn reset(&mut self) {
        self.eq.reset();
        self.compressor.reset();
        self.reverb.reset();
        self.expander.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StereoSample;

    #[test]
    fn test_smoothed_converges() {
        let mut s = Smoothed::new(0.0, 48000);
        s.set_target(1.0);

        // 200ms is over a dozen smoothing time constants
        let mut last = 0.0;
        for _ in 0..9600 {
            last = s.next();
        }
        assert!((last - 1.0).abs() < 1e-4, "smoother should converge, got {}", last);
    }

    #[test]
    fn test_smoothed_snap_is_immediate() {
        let mut s = Smoothed::new(0.0, 48000);
        s.snap(0.7);
        assert_eq!(s.next(), 0.7);
    }

    #[test]
    fn test_rack_master_volume_clamps() {
        let mut rack = EffectsRack::new(48000);
        rack.set_master_volume(1.5);
        assert_eq!(rack.master_volume(), 1.0);
        rack.set_master_volume(-0.2);
        assert_eq!(rack.master_volume(), 0.0);
    }

    #[test]
    fn test_rack_passthrough_when_disabled() {
        // All stages default to disabled except none are destructive;
        // with defaults the chain at unity volume passes audio through.
        let mut rack = EffectsRack::new(48000);
        let config = EffectsConfig::default();
        rack.set_config(&config);

        let mut buffer = StereoBuffer::silence(256);
        for s in buffer.iter_mut() {
            *s = StereoSample::new(0.25, -0.25);
        }
        rack.process(&mut buffer);

        assert!((buffer[128].left - 0.25).abs() < 1e-4);
        assert!((buffer[128].right + 0.25).abs() < 1e-4);
    }
}
