//! Dynamics processing - master compressor/limiter and per-stem tiers
//!
//! The master compressor is a feed-forward peak compressor with
//! attack/hold/release envelope smoothing. It only ever reduces gain.
//! Current gain reduction is published through an atomic so the UI can
//! meter it without touching the audio thread.
//!
//! Per-stem dynamics are a separate, simpler mechanism: each stem lane may
//! run a preset compressor (off/low/medium/high tier). Tiers and the master
//! compressor are independent, composable stages.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::Stage;
use crate::types::StereoBuffer;

/// Master compressor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressorConfig {
    pub enabled: bool,
    /// Threshold in dBFS; peaks above it are reduced to it
    pub threshold_db: f32,
    /// Attack time in milliseconds
    pub attack_ms: f32,
    /// Hold time in milliseconds (gain is frozen before release begins)
    pub hold_ms: f32,
    /// Release time in milliseconds
    pub release_ms: f32,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold_db: -18.0,
            attack_ms: 10.0,
            hold_ms: 50.0,
            release_ms: 200.0,
        }
    }
}

/// Lock-free read handle for the compressor's gain reduction meter
///
/// The audio thread stores the current reduction once per block; any number
/// of readers can poll it. Value is dB of reduction, >= 0, decaying toward
/// 0 once the signal falls below threshold.
#[derive(Debug, Clone)]
pub struct GainReductionMeter {
    bits: Arc<AtomicU32>,
}

impl GainReductionMeter {
    fn new() -> Self {
        Self {
            bits: Arc::new(AtomicU32::new(0.0_f32.to_bits())),
        }
    }

    /// Current gain reduction in dB (>= 0)
    pub fn db(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    fn store(&self, db: f32) {
        self.bits.store(db.to_bits(), Ordering::Relaxed);
    }
}

/// Feed-forward master compressor/limiter
///
/// Peaks above the threshold pull the gain envelope down at the attack
/// rate; once the signal drops, the gain holds for `hold_ms` and then
/// recovers at the release rate. Gain never exceeds unity.
pub struct Compressor {
    config: CompressorConfig,
    sample_rate: u32,
    /// Threshold in linear amplitude (derived from config)
    threshold: f32,
    /// Current smoothed gain (1.0 = unity)
    gain: f32,
    /// Remaining hold samples before release may begin
    hold_remaining: u32,
    attack_coeff: f32,
    release_coeff: f32,
    hold_samples: u32,
    meter: GainReductionMeter,
}

impl Compressor {
    /// Create a compressor with default settings
    pub fn new(sample_rate: u32) -> Self {
        let mut c = Self {
            config: CompressorConfig::default(),
            sample_rate,
            threshold: 1.0,
            gain: 1.0,
            hold_remaining: 0,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            hold_samples: 0,
            meter: GainReductionMeter::new(),
        };
        c.derive_coefficients();
        c
    }

    /// Shared meter handle for UI reads
    pub fn meter(&self) -> GainReductionMeter {
        self.meter.clone()
    }

    /// Apply a new config
    pub fn set_config(&mut self, config: &CompressorConfig) {
        self.config = config.clone();
        self.derive_coefficients();
    }

    fn derive_coefficients(&mut self) {
        let sr = self.sample_rate as f32;
        self.threshold = 10.0_f32.powf(self.config.threshold_db / 20.0);

        // First-order exponential envelopes: coeff = exp(-1 / (tau * fs))
        let attack_s = (self.config.attack_ms / 1000.0).max(1e-4);
        let release_s = (self.config.release_ms / 1000.0).max(1e-4);
        self.attack_coeff = (-1.0 / (attack_s * sr)).exp();
        self.release_coeff = (-1.0 / (release_s * sr)).exp();
        self.hold_samples = ((self.config.hold_ms / 1000.0) * sr).round() as u32;
    }
}

impl Stage for Compressor {
    fn process(&mut self, buffer: &mut StereoBuffer) {
        if !self.config.enabled {
            // Bypassed: let any residual reduction show as decayed
            self.gain = 1.0;
            self.hold_remaining = 0;
            self.meter.store(0.0);
            return;
        }

        for sample in buffer.iter_mut() {
            let peak = sample.peak();

            let target = if peak > self.threshold {
                self.threshold / peak
            } else {
                1.0
            };

            if target < self.gain {
                // Attack: converge toward the required reduction
                self.gain = self.gain * self.attack_coeff + target * (1.0 - self.attack_coeff);
                self.hold_remaining = self.hold_samples;
            } else if self.hold_remaining > 0 {
                // Hold: freeze the envelope before recovering
                self.hold_remaining -= 1;
            } else {
                // Release: slow return toward unity
                self.gain = self.gain * self.release_coeff + target * (1.0 - self.release_coeff);
            }

            *sample *= self.gain;
        }

        // One store per block is plenty for display
        let reduction_db = if self.gain < 1.0 {
            -20.0 * self.gain.max(1e-6).log10()
        } else {
            0.0
        };
        self.meter.store(reduction_db);
    }

    fn reset(&mut self) {
        self.gain = 1.0;
        self.hold_remaining = 0;
        self.meter.store(0.0);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-stem dynamics tiers
// ─────────────────────────────────────────────────────────────────────────────

/// Per-stem dynamics preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionTier {
    #[default]
    Off,
    Low,
    Medium,
    High,
}

impl CompressionTier {
    /// Cycle to the next tier (off → low → medium → high → off)
    pub fn next(self) -> Self {
        match self {
            CompressionTier::Off => CompressionTier::Low,
            CompressionTier::Low => CompressionTier::Medium,
            CompressionTier::Medium => CompressionTier::High,
            CompressionTier::High => CompressionTier::Off,
        }
    }

    /// Preset parameters: (threshold_db, attack_ms, release_ms, makeup_db)
    fn params(self) -> Option<(f32, f32, f32, f32)> {
        match self {
            CompressionTier::Off => None,
            CompressionTier::Low => Some((-10.0, 15.0, 150.0, 1.5)),
            CompressionTier::Medium => Some((-16.0, 10.0, 120.0, 3.0)),
            CompressionTier::High => Some((-22.0, 5.0, 80.0, 5.0)),
        }
    }
}

/// Lightweight per-lane compressor driven by a tier preset
///
/// Same envelope math as the master compressor minus the hold stage and
/// metering; adds preset makeup gain so heavier tiers don't just get
/// quieter.
pub struct TierCompressor {
    tier: CompressionTier,
    sample_rate: u32,
    threshold: f32,
    makeup: f32,
    gain: f32,
    attack_coeff: f32,
    release_coeff: f32,
}

impl TierCompressor {
    pub fn new(sample_rate: u32) -> Self {
        let mut c = Self {
            tier: CompressionTier::Off,
            sample_rate,
            threshold: 1.0,
            makeup: 1.0,
            gain: 1.0,
            attack_coeff: 0.0,
            release_coeff: 0.0,
        };
        c.set_tier(CompressionTier::Off);
        c
    }

    pub fn tier(&self) -> CompressionTier {
        self.tier
    }

    pub fn set_tier(&mut self, tier: CompressionTier) {
        self.tier = tier;
        if let Some((threshold_db, attack_ms, release_ms, makeup_db)) = tier.params() {
            let sr = self.sample_rate as f32;
            self.threshold = 10.0_f32.powf(threshold_db / 20.0);
            self.makeup = 10.0_f32.powf(makeup_db / 20.0);
            self.attack_coeff = (-1.0 / ((attack_ms / 1000.0) * sr)).exp();
            self.release_coeff = (-1.0 / ((release_ms / 1000.0) * sr)).exp();
        }
        self.gain = 1.0;
    }

    /// Process one lane buffer in-place; no-op when the tier is Off
    pub fn process(&mut self, buffer: &mut StereoBuffer) {
        if self.tier == CompressionTier::Off {
            return;
        }

        for sample in buffer.iter_mut() {
            let peak = sample.peak();
            let target = if peak > self.threshold {
                self.threshold / peak
            } else {
                1.0
            };

            let coeff = if target < self.gain {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.gain = self.gain * coeff + target * (1.0 - coeff);

            *sample *= self.gain * self.makeup;
        }
    }

    pub fn reset(&mut self) {
        self.gain = 1.0;
    }
}
