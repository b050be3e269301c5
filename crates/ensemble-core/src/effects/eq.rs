//! Parametric EQ stage - ordered biquad band list
//!
//! Each band is an RBJ biquad (shelf, peak, or pass filter) with its own
//! frequency/gain/Q and enable flag. Coefficients are cached and only
//! recomputed when the config changes; filter state is kept across
//! coefficient updates so live edits don't click.

use serde::{Deserialize, Serialize};

use super::Stage;
use crate::types::StereoBuffer;

/// Shelf slope factor shared by both shelf filters
const SHELF_SLOPE: f32 = 0.9;

/// Filter shape of one EQ band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterShape {
    LowShelf,
    Peak,
    HighShelf,
    LowPass,
    HighPass,
}

/// One parametric band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqBand {
    /// Stable identifier (bands are addressed by id, not position)
    pub id: u32,
    /// Center/corner frequency in Hz
    pub frequency: f32,
    /// Boost/cut in dB (ignored for LowPass/HighPass)
    pub gain_db: f32,
    /// Q factor
    pub q: f32,
    /// Filter shape
    pub shape: FilterShape,
    /// Per-band enable
    pub enabled: bool,
}

impl EqBand {
    fn new(id: u32, frequency: f32, shape: FilterShape) -> Self {
        Self {
            id,
            frequency,
            gain_db: 0.0,
            q: 0.7,
            shape,
            enabled: true,
        }
    }
}

/// EQ stage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EqConfig {
    pub enabled: bool,
    pub bands: Vec<EqBand>,
}

impl Default for EqConfig {
    fn default() -> Self {
        // Standard 5-band layout: low shelf, three peaks, high shelf
        Self {
            enabled: false,
            bands: vec![
                EqBand::new(0, 90.0, FilterShape::LowShelf),
                EqBand::new(1, 250.0, FilterShape::Peak),
                EqBand::new(2, 1000.0, FilterShape::Peak),
                EqBand::new(3, 4000.0, FilterShape::Peak),
                EqBand::new(4, 10000.0, FilterShape::HighShelf),
            ],
        }
    }
}

/// Biquad filter coefficients (RBJ cookbook)
#[derive(Debug, Clone)]
struct BiquadCoeffs {
    b0: f32, b1: f32, b2: f32,
    a1: f32, a2: f32,
}

impl BiquadCoeffs {
    /// Passthrough (unity gain, no filtering)
    fn passthrough() -> Self {
        Self { b0: 1.0, b1: 0.0, b2: 0.0, a1: 0.0, a2: 0.0 }
    }

    /// Low shelf at `freq` with `gain_db` boost/cut
    fn low_shelf(freq: f32, gain_db: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / 2.0 * ((a + 1.0 / a) * (1.0 / SHELF_SLOPE - 1.0) + 2.0).sqrt();

        let a0 = (a + 1.0) + (a - 1.0) * cos_w0 + 2.0 * a.sqrt() * alpha;
        Self {
            b0: (a * ((a + 1.0) - (a - 1.0) * cos_w0 + 2.0 * a.sqrt() * alpha)) / a0,
            b1: (2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0)) / a0,
            b2: (a * ((a + 1.0) - (a - 1.0) * cos_w0 - 2.0 * a.sqrt() * alpha)) / a0,
            a1: (-2.0 * ((a - 1.0) + (a + 1.0) * cos_w0)) / a0,
            a2: ((a + 1.0) + (a - 1.0) * cos_w0 - 2.0 * a.sqrt() * alpha) / a0,
        }
    }

    /// Peaking EQ at `freq` with `gain_db` and `q`
    fn peaking(freq: f32, gain_db: f32, q: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * q);

        let a0 = 1.0 + alpha / a;
        Self {
            b0: (1.0 + alpha * a) / a0,
            b1: (-2.0 * cos_w0) / a0,
            b2: (1.0 - alpha * a) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha / a) / a0,
        }
    }

    /// High shelf at `freq` with `gain_db` boost/cut
    fn high_shelf(freq: f32, gain_db: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / 2.0 * ((a + 1.0 / a) * (1.0 / SHELF_SLOPE - 1.0) + 2.0).sqrt();

        let a0 = (a + 1.0) - (a - 1.0) * cos_w0 + 2.0 * a.sqrt() * alpha;
        Self {
            b0: (a * ((a + 1.0) + (a - 1.0) * cos_w0 + 2.0 * a.sqrt() * alpha)) / a0,
            b1: (-2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0)) / a0,
            b2: (a * ((a + 1.0) + (a - 1.0) * cos_w0 - 2.0 * a.sqrt() * alpha)) / a0,
            a1: (2.0 * ((a - 1.0) - (a + 1.0) * cos_w0)) / a0,
            a2: ((a + 1.0) - (a - 1.0) * cos_w0 - 2.0 * a.sqrt() * alpha) / a0,
        }
    }

    /// 12dB/oct low pass at `freq` with `q`
    fn low_pass(freq: f32, q: f32, sample_rate: f32) -> Self {
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);

        let a0 = 1.0 + alpha;
        Self {
            b0: ((1.0 - cos_w0) / 2.0) / a0,
            b1: (1.0 - cos_w0) / a0,
            b2: ((1.0 - cos_w0) / 2.0) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    /// 12dB/oct high pass at `freq` with `q`
    fn high_pass(freq: f32, q: f32, sample_rate: f32) -> Self {
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);

        let a0 = 1.0 + alpha;
        Self {
            b0: ((1.0 + cos_w0) / 2.0) / a0,
            b1: (-(1.0 + cos_w0)) / a0,
            b2: ((1.0 + cos_w0) / 2.0) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    /// Build coefficients for one band
    fn for_band(band: &EqBand, sample_rate: f32) -> Self {
        let freq = band.frequency.clamp(20.0, 20000.0);
        let q = band.q.clamp(0.1, 10.0);

        // Flat bands pass through without burning a filter
        let is_gain_shape = matches!(
            band.shape,
            FilterShape::LowShelf | FilterShape::Peak | FilterShape::HighShelf
        );
        if is_gain_shape && band.gain_db.abs() < 0.05 {
            return Self::passthrough();
        }

        match band.shape {
            FilterShape::LowShelf => Self::low_shelf(freq, band.gain_db, sample_rate),
            FilterShape::Peak => Self::peaking(freq, band.gain_db, q, sample_rate),
            FilterShape::HighShelf => Self::high_shelf(freq, band.gain_db, sample_rate),
            FilterShape::LowPass => Self::low_pass(freq, q, sample_rate),
            FilterShape::HighPass => Self::high_pass(freq, q, sample_rate),
        }
    }
}

/// Biquad filter state (direct form 1, stereo)
#[derive(Debug, Clone, Default)]
struct BiquadState {
    x1_l: f32, x2_l: f32, y1_l: f32, y2_l: f32,
    x1_r: f32, x2_r: f32, y1_r: f32, y2_r: f32,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, input_l: f32, input_r: f32, coeffs: &BiquadCoeffs) -> (f32, f32) {
        let out_l = coeffs.b0 * input_l + coeffs.b1 * self.x1_l + coeffs.b2 * self.x2_l
            - coeffs.a1 * self.y1_l - coeffs.a2 * self.y2_l;
        self.x2_l = self.x1_l;
        self.x1_l = input_l;
        self.y2_l = self.y1_l;
        self.y1_l = out_l;

        let out_r = coeffs.b0 * input_r + coeffs.b1 * self.x1_r + coeffs.b2 * self.x2_r
            - coeffs.a1 * self.y1_r - coeffs.a2 * self.y2_r;
        self.x2_r = self.x1_r;
        self.x1_r = input_r;
        self.y2_r = self.y1_r;
        self.y1_r = out_r;

        (out_l, out_r)
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// The parametric EQ stage
pub struct ParametricEq {
    sample_rate: u32,
    config: EqConfig,
    coeffs: Vec<BiquadCoeffs>,
    states: Vec<BiquadState>,
    dirty: bool,
}

impl ParametricEq {
    /// Create an EQ with the default band layout
    pub fn new(sample_rate: u32) -> Self {
        let config = EqConfig::default();
        Self {
            sample_rate,
            coeffs: Vec::with_capacity(config.bands.len()),
            states: Vec::new(),
            config,
            dirty: true,
        }
    }

    /// Apply a new config; coefficients recompute lazily on the next block
    pub fn set_config(&mut self, config: &EqConfig) {
        self.config = config.clone();
        self.dirty = true;
    }

    fn update_coeffs(&mut self) {
        if !self.dirty {
            return;
        }

        let sr = self.sample_rate as f32;
        self.coeffs.clear();
        self.coeffs
            .extend(self.config.bands.iter().map(|b| BiquadCoeffs::for_band(b, sr)));

        // Keep existing filter state where the band list length is stable so
        // parameter edits don't click; band add/remove starts fresh states.
        if self.states.len() != self.config.bands.len() {
            self.states = vec![BiquadState::default(); self.config.bands.len()];
        }

        self.dirty = false;
    }
}

impl Stage for ParametricEq {
    fn process(&mut self, buffer: &mut StereoBuffer) {
        if !self.config.enabled {
            return;
        }

        self.update_coeffs();

        for sample in buffer.iter_mut() {
            let mut left = sample.left;
            let mut right = sample.right;

            for (band_idx, band) in self.config.bands.iter().enumerate() {
                if !band.enabled {
                    continue;
                }
                (left, right) =
                    self.states[band_idx].process(left, right, &self.coeffs[band_idx]);
            }

            sample.left = left;
            sample.right = right;
        }
    }

    fn reset(&mut self) {
        for state in &mut self.states {
            state.reset();
        }
    }
}
