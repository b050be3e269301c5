//! Stereo expander stage - multiband width and dynamics
//!
//! Splits the signal into three bands with Linkwitz-Riley 24dB/oct
//! crossovers (two crossover frequencies), then applies per-band mid/side
//! width scaling and an optional per-band compression amount before summing
//! the bands back together. LR24 crossovers sum to unity with no phase
//! issues at the crossover frequency.

use serde::{Deserialize, Serialize};

use super::Stage;
use crate::types::{StereoBuffer, StereoSample};

/// Number of bands (low / mid / high from two crossover points)
pub const NUM_BANDS: usize = 3;

/// Per-band compression threshold in linear amplitude (-12 dBFS)
const BAND_THRESHOLD: f32 = 0.251;

/// Per-band envelope attack time in seconds
const BAND_ATTACK_SECS: f32 = 0.005;

/// Per-band envelope release time in seconds
const BAND_RELEASE_SECS: f32 = 0.12;

/// Per-band width/compression settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpanderBand {
    /// Stereo width: 0.0 = mono, 1.0 = unchanged, up to 2.0 = widened
    pub width: f32,
    /// Compression amount: 0.0 = none, 1.0 = full band compression
    pub compression: f32,
}

impl Default for ExpanderBand {
    fn default() -> Self {
        Self {
            width: 1.0,
            compression: 0.0,
        }
    }
}

/// Expander stage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpanderConfig {
    pub enabled: bool,
    /// Low/mid crossover frequency in Hz
    pub low_crossover_hz: f32,
    /// Mid/high crossover frequency in Hz
    pub high_crossover_hz: f32,
    /// Per-band settings, low to high
    pub bands: [ExpanderBand; NUM_BANDS],
}

impl Default for ExpanderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            low_crossover_hz: 220.0,
            high_crossover_hz: 3800.0,
            bands: [ExpanderBand::default(); NUM_BANDS],
        }
    }
}

/// Two-pole (12dB/octave) state-variable filter
///
/// Building block for the LR24 crossover; SVF topology is numerically
/// stable and provides LP and HP outputs simultaneously.
#[derive(Clone)]
struct SvfFilter {
    ic1eq_l: f32,
    ic2eq_l: f32,
    ic1eq_r: f32,
    ic2eq_r: f32,
    g: f32,
    k: f32,
    a1: f32,
    a2: f32,
    a3: f32,
}

impl SvfFilter {
    fn new(cutoff: f32, sample_rate: f32) -> Self {
        let mut f = Self {
            ic1eq_l: 0.0,
            ic2eq_l: 0.0,
            ic1eq_r: 0.0,
            ic2eq_r: 0.0,
            g: 0.0,
            k: 0.0,
            a1: 0.0,
            a2: 0.0,
            a3: 0.0,
        };
        f.set_frequency(cutoff, sample_rate);
        f
    }

    /// Set cutoff with Butterworth Q (0.707), which cascades to LR24
    fn set_frequency(&mut self, cutoff: f32, sample_rate: f32) {
        let cutoff = cutoff.clamp(20.0, 20000.0);
        let q = std::f32::consts::FRAC_1_SQRT_2;

        self.g = (std::f32::consts::PI * cutoff / sample_rate).tan();
        self.k = 1.0 / q;
        self.a1 = 1.0 / (1.0 + self.g * (self.g + self.k));
        self.a2 = self.g * self.a1;
        self.a3 = self.g * self.a2;
    }

    /// Process stereo sample, returns (lowpass, highpass)
    #[inline]
    fn process(&mut self, input: StereoSample) -> (StereoSample, StereoSample) {
        let v3_l = input.left - self.ic2eq_l;
        let v1_l = self.a1 * self.ic1eq_l + self.a2 * v3_l;
        let v2_l = self.ic2eq_l + self.a2 * self.ic1eq_l + self.a3 * v3_l;
        self.ic1eq_l = 2.0 * v1_l - self.ic1eq_l;
        self.ic2eq_l = 2.0 * v2_l - self.ic2eq_l;

        let low_l = v2_l;
        let band_l = v1_l;
        let high_l = input.left - self.k * band_l - low_l;

        let v3_r = input.right - self.ic2eq_r;
        let v1_r = self.a1 * self.ic1eq_r + self.a2 * v3_r;
        let v2_r = self.ic2eq_r + self.a2 * self.ic1eq_r + self.a3 * v3_r;
        self.ic1eq_r = 2.0 * v1_r - self.ic1eq_r;
        self.ic2eq_r = 2.0 * v2_r - self.ic2eq_r;

        let low_r = v2_r;
        let band_r = v1_r;
        let high_r = input.right - self.k * band_r - low_r;

        (
            StereoSample::new(low_l, low_r),
            StereoSample::new(high_l, high_r),
        )
    }

    fn reset(&mut self) {
        self.ic1eq_l = 0.0;
        self.ic2eq_l = 0.0;
        self.ic1eq_r = 0.0;
        self.ic2eq_r = 0.0;
    }
}

/// One LR24 crossover point: two cascaded Butterworth stages per path
#[derive(Clone)]
struct CrossoverPoint {
    lp1: SvfFilter,
    lp2: SvfFilter,
    hp1: SvfFilter,
    hp2: SvfFilter,
}

impl CrossoverPoint {
    fn new(frequency: f32, sample_rate: f32) -> Self {
        Self {
            lp1: SvfFilter::new(frequency, sample_rate),
            lp2: SvfFilter::new(frequency, sample_rate),
            hp1: SvfFilter::new(frequency, sample_rate),
            hp2: SvfFilter::new(frequency, sample_rate),
        }
    }

    fn set_frequency(&mut self, frequency: f32, sample_rate: f32) {
        self.lp1.set_frequency(frequency, sample_rate);
        self.lp2.set_frequency(frequency, sample_rate);
        self.hp1.set_frequency(frequency, sample_rate);
        self.hp2.set_frequency(frequency, sample_rate);
    }

    /// Split into (low_band, high_band) at 24dB/oct
    #[inline]
    fn process(&mut self, input: StereoSample) -> (StereoSample, StereoSample) {
        let (lp1_out, _) = self.lp1.process(input);
        let (low, _) = self.lp2.process(lp1_out);

        let (_, hp1_out) = self.hp1.process(input);
        let (_, high) = self.hp2.process(hp1_out);

        (low, high)
    }

    fn reset(&mut self) {
        self.lp1.reset();
        self.lp2.reset();
        self.hp1.reset();
        self.hp2.reset();
    }
}

/// Per-band envelope-driven gain reduction
#[derive(Clone)]
struct BandEnvelope {
    gain: f32,
    attack_coeff: f32,
    release_coeff: f32,
}

impl BandEnvelope {
    fn new(sample_rate: f32) -> Self {
        Self {
            gain: 1.0,
            attack_coeff: (-1.0 / (BAND_ATTACK_SECS * sample_rate)).exp(),
            release_coeff: (-1.0 / (BAND_RELEASE_SECS * sample_rate)).exp(),
        }
    }

    /// Advance the envelope for one sample; returns the reduction gain
    /// scaled by `amount` (0 = unity, 1 = full reduction).
    #[inline]
    fn next(&mut self, peak: f32, amount: f32) -> f32 {
        let target = if peak > BAND_THRESHOLD {
            BAND_THRESHOLD / peak
        } else {
            1.0
        };

        let coeff = if target < self.gain {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.gain = self.gain * coeff + target * (1.0 - coeff);

        1.0 + (self.gain - 1.0) * amount
    }

    fn reset(&mut self) {
        self.gain = 1.0;
    }
}

/// The stereo expander stage
pub struct StereoExpander {
    config: ExpanderConfig,
    sample_rate: f32,
    low_split: CrossoverPoint,
    high_split: CrossoverPoint,
    envelopes: [BandEnvelope; NUM_BANDS],
}

impl StereoExpander {
    /// Create an expander with default crossovers at the given sample rate
    pub fn new(sample_rate: u32) -> Self {
        let config = ExpanderConfig::default();
        let sr = sample_rate as f32;
        Self {
            low_split: CrossoverPoint::new(config.low_crossover_hz, sr),
            high_split: CrossoverPoint::new(config.high_crossover_hz, sr),
            envelopes: std::array::from_fn(|_| BandEnvelope::new(sr)),
            sample_rate: sr,
            config,
        }
    }

    /// Apply a new config
    pub fn set_config(&mut self, config: &ExpanderConfig) {
        // Keep the crossovers ordered so the mid band never inverts
        let low = config.low_crossover_hz.clamp(20.0, 20000.0);
        let high = config.high_crossover_hz.clamp(low, 20000.0);

        self.config = ExpanderConfig {
            enabled: config.enabled,
            low_crossover_hz: low,
            high_crossover_hz: high,
            bands: config.bands,
        };
        self.low_split.set_frequency(low, self.sample_rate);
        self.high_split.set_frequency(high, self.sample_rate);
    }
}

impl Stage for StereoExpander {
    fn process(&mut self, buffer: &mut StereoBuffer) {
        if !self.config.enabled {
            return;
        }

        for sample in buffer.iter_mut() {
            // Split: input → [low | rest], rest → [mid | high]
            let (low, rest) = self.low_split.process(*sample);
            let (mid, high) = self.high_split.process(rest);

            let mut out = StereoSample::silence();
            for (band_idx, band_sample) in [low, mid, high].into_iter().enumerate() {
                let band = &self.config.bands[band_idx];

                let reduction = self.envelopes[band_idx]
                    .next(band_sample.peak(), band.compression.clamp(0.0, 1.0));

                let width = band.width.clamp(0.0, 2.0);
                let shaped = StereoSample::from_mid_side(
                    band_sample.mid(),
                    band_sample.side() * width,
                );

                out += shaped * reduction;
            }

            *sample = out;
        }
    }

    fn reset(&mut self) {
        self.low_split.reset();
        self.high_split.reset();
        for env in &mut self.envelopes {
            env.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_config() -> ExpanderConfig {
        ExpanderConfig {
            enabled: true,
            ..ExpanderConfig::default()
        }
    }

    #[test]
    fn test_disabled_is_passthrough() {
        let mut expander = StereoExpander::new(48000);
        let mut buffer = StereoBuffer::silence(64);
        buffer[0] = StereoSample::new(0.5, -0.5);

        expander.process(&mut buffer);

        assert_eq!(buffer[0].left, 0.5);
        assert_eq!(buffer[0].right, -0.5);
    }

    #[test]
    fn test_bands_sum_near_unity() {
        let mut expander = StereoExpander::new(48000);
        expander.set_config(&enabled_config());

        // Steady DC input settles to unity through the LR24 splits
        let mut last = StereoSample::silence();
        for _ in 0..200 {
            let mut buffer = StereoBuffer::silence(64);
            for s in buffer.iter_mut() {
                *s = StereoSample::new(0.5, 0.5);
            }
            expander.process(&mut buffer);
            last = buffer[63];
        }

        assert!(
            (last.left - 0.5).abs() < 0.01,
            "bands should sum back to the input, got {}",
            last.left
        );
    }

    #[test]
    fn test_zero_width_collapses_to_mono() {
        let mut config = enabled_config();
        for band in &mut config.bands {
            band.width = 0.0;
        }

        let mut expander = StereoExpander::new(48000);
        expander.set_config(&config);

        // Decorrelated input: left-only signal
        let mut buffer = StereoBuffer::silence(4096);
        for (i, s) in buffer.iter_mut().enumerate() {
            let v = (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 48000.0).sin() * 0.4;
            *s = StereoSample::new(v, 0.0);
        }
        expander.process(&mut buffer);

        for s in buffer.iter().skip(1024) {
            assert!(
                (s.left - s.right).abs() < 1e-3,
                "width 0 should produce identical channels: {} vs {}",
                s.left,
                s.right
            );
        }
    }

    #[test]
    fn test_compression_reduces_hot_band() {
        let run = |compression: f32| -> f32 {
            let mut config = enabled_config();
            for band in &mut config.bands {
                band.compression = compression;
            }
            let mut expander = StereoExpander::new(48000);
            expander.set_config(&config);

            // Loud low-frequency tone, well above the band threshold
            let mut buffer = StereoBuffer::silence(48000);
            for (i, s) in buffer.iter_mut().enumerate() {
                let v = (2.0 * std::f32::consts::PI * 80.0 * i as f32 / 48000.0).sin() * 0.9;
                *s = StereoSample::new(v, v);
            }
            expander.process(&mut buffer);
            buffer.as_slice()[40000..].iter().map(|s| s.peak()).fold(0.0, f32::max)
        };

        let clean = run(0.0);
        let compressed = run(1.0);
        assert!(
            compressed < clean * 0.7,
            "full compression should tame the band: {} vs {}",
            compressed,
            clean
        );
    }

    #[test]
    fn test_crossovers_stay_ordered() {
        let mut expander = StereoExpander::new(48000);
        let mut config = enabled_config();
        config.low_crossover_hz = 5000.0;
        config.high_crossover_hz = 1000.0;
        expander.set_config(&config);

        assert!(expander.config.high_crossover_hz >= expander.config.low_crossover_hz);
    }
}
