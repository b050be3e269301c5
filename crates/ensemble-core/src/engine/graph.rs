//! Stem graph - per-stem gain staging, audibility gating, and summing
//!
//! For each loaded stem the graph owns a `StemLane`:
//!
//!   sample source → tier compressor → gain stage → audibility gate
//!
//! Lanes render in parallel (Rayon) into pre-allocated buffers and are then
//! summed into the master bus. Gain and gate changes are ramped so toggling
//! mute/solo or dragging a fader never clicks.
//!
//! Audibility is a property of the whole state set, not of one stem: the
//! arbitration lives in [`compute_audibility`] and the orchestrator applies
//! its result lane by lane. The graph itself only knows "audible or not".

use basedrop::Shared;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::effects::{CompressionTier, Smoothed, TierCompressor};
use crate::types::{StereoBuffer, StereoSample, MAX_BUFFER_SIZE};

/// Upper bound for per-stem gain (2.0 = +6dB over unity)
pub const GAIN_MAX: f32 = 2.0;

/// Mutable per-stem user state, persisted per recording
///
/// `gain == 0.0` and `muted` both silence a stem but are independent flags:
/// unmuting a zero-gain stem keeps it silent, and a muted stem remembers
/// its gain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StemUserState {
    /// Linear gain in [0, GAIN_MAX]
    pub gain: f32,
    pub muted: bool,
    pub soloed: bool,
    /// Per-stem dynamics preset, independent of the master compressor
    pub tier: CompressionTier,
}

impl Default for StemUserState {
    fn default() -> Self {
        Self {
            gain: 1.0,
            muted: false,
            soloed: false,
            tier: CompressionTier::Off,
        }
    }
}

/// Compute per-stem audibility from the full user-state set
///
/// If any stem is soloed, a stem is audible iff it is soloed; solo
/// dominates mute, so a muted-but-soloed stem plays. Otherwise a stem is
/// audible iff it is not muted. A single stem's flags are never meaningful
/// in isolation, which is why this takes the whole set.
pub fn compute_audibility(states: &[StemUserState]) -> Vec<bool> {
    let any_soloed = states.iter().any(|s| s.soloed);
    states
        .iter()
        .map(|s| if any_soloed { s.soloed } else { !s.muted })
        .collect()
}

/// Everything the audio thread needs to build one lane
///
/// Built by the orchestrator from loader output + persisted state and
/// shipped over the command queue. The buffer is `basedrop::Shared` so
/// dropping the previous recording's lanes on the audio thread defers the
/// (large) deallocation to the GC thread.
pub struct LaneInit {
    pub buffer: Shared<StereoBuffer>,
    pub gain: f32,
    pub audible: bool,
    pub tier: CompressionTier,
}

/// One stem's processing lane on the audio thread
struct StemLane {
    buffer: Shared<StereoBuffer>,
    /// Smoothed linear gain [0, GAIN_MAX]
    gain: Smoothed,
    /// Smoothed 0/1 audibility gate
    gate: Smoothed,
    tier: TierCompressor,
    /// Pre-allocated render buffer (capacity MAX_BUFFER_SIZE)
    work: StereoBuffer,
}

impl StemLane {
    fn new(init: LaneInit, sample_rate: u32) -> Self {
        let mut tier = TierCompressor::new(sample_rate);
        tier.set_tier(init.tier);

        Self {
            buffer: init.buffer,
            gain: Smoothed::new(init.gain.clamp(0.0, GAIN_MAX), sample_rate),
            gate: Smoothed::new(if init.audible { 1.0 } else { 0.0 }, sample_rate),
            tier,
            work: StereoBuffer::silence(MAX_BUFFER_SIZE),
        }
    }

    /// Length of this lane's source in samples
    fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Render one block starting at `position` into the work buffer
    fn render(&mut self, position: usize, block_len: usize) {
        self.work.set_len_from_capacity(block_len);

        let source = self.buffer.as_slice();
        let work = self.work.as_mut_slice();
        for (i, out) in work.iter_mut().enumerate() {
            let read_pos = position + i;
            *out = if read_pos < source.len() {
                source[read_pos]
            } else {
                StereoSample::silence()
            };
        }

        self.tier.process(&mut self.work);

        for sample in self.work.iter_mut() {
            *sample *= self.gain.next() * self.gate.next();
        }
    }
}

/// The set of lanes for the loaded recording
pub struct StemGraph {
    lanes: Vec<StemLane>,
    sample_rate: u32,
}

impl StemGraph {
    /// Create an empty graph
    pub fn new(sample_rate: u32) -> Self {
        Self {
            lanes: Vec::new(),
            sample_rate,
        }
    }

    /// Replace all lanes with a freshly loaded recording
    ///
    /// The previous lanes drop here on the audio thread; their Shared
    /// buffers are reclaimed by the GC thread.
    pub fn load(&mut self, lanes: Vec<LaneInit>) {
        self.lanes = lanes
            .into_iter()
            .map(|init| StemLane::new(init, self.sample_rate))
            .collect();
    }

    /// Tear down all lanes
    pub fn clear(&mut self) {
        self.lanes.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Duration in samples: the longest lane defines the recording length
    pub fn duration_samples(&self) -> usize {
        self.lanes.iter().map(|l| l.len()).max().unwrap_or(0)
    }

    /// Source length of one lane
    pub fn lane_len(&self, index: usize) -> usize {
        self.lanes.get(index).map(|l| l.len()).unwrap_or(0)
    }

    /// Set a lane's gain target (clamped to [0, GAIN_MAX], ramped)
    pub fn set_gain(&mut self, index: usize, gain: f32) {
        if let Some(lane) = self.lanes.get_mut(index) {
            lane.gain.set_target(gain.clamp(0.0, GAIN_MAX));
        }
    }

    /// Set a lane's audibility gate (ramped 0/1)
    pub fn set_audible(&mut self, index: usize, audible: bool) {
        if let Some(lane) = self.lanes.get_mut(index) {
            lane.gate.set_target(if audible { 1.0 } else { 0.0 });
        }
    }

    /// Set a lane's dynamics tier
    pub fn set_tier(&mut self, index: usize, tier: CompressionTier) {
        if let Some(lane) = self.lanes.get_mut(index) {
            lane.tier.set_tier(tier);
        }
    }

    /// Render all lanes at `position` and sum them into `output`
    ///
    /// Each lane renders into its own pre-allocated buffer in parallel,
    /// then the sum runs sequentially (fast O(n), no contention).
    pub fn process(&mut self, position: usize, output: &mut StereoBuffer) {
        let block_len = output.len();
        output.fill_silence();

        if self.lanes.is_empty() {
            return;
        }

        self.lanes
            .par_iter_mut()
            .for_each(|lane| lane.render(position, block_len));

        for lane in &self.lanes {
            output.add_buffer(&lane.work);
        }
    }

    /// Reset lane DSP state (tier compressor envelopes)
    pub fn reset(&mut self) {
        for lane in &mut self.lanes {
            lane.tier.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::gc::gc_handle;

    fn state(gain: f32, muted: bool, soloed: bool) -> StemUserState {
        StemUserState {
            gain,
            muted,
            soloed,
            tier: CompressionTier::Off,
        }
    }

    fn shared_constant(len: usize, value: f32) -> Shared<StereoBuffer> {
        let mut buf = StereoBuffer::silence(len);
        for s in buf.iter_mut() {
            *s = StereoSample::new(value, value);
        }
        Shared::new(&gc_handle(), buf)
    }

    fn lane(len: usize, value: f32, gain: f32, audible: bool) -> LaneInit {
        LaneInit {
            buffer: shared_constant(len, value),
            gain,
            audible,
            tier: CompressionTier::Off,
        }
    }

    #[test]
    fn test_audibility_no_solo_follows_mute() {
        let states = [state(1.0, false, false), state(1.0, true, false)];
        assert_eq!(compute_audibility(&states), vec![true, false]);
    }

    #[test]
    fn test_audibility_solo_dominates() {
        // bass soloed: drums (muted) and vocals (unmuted) are both silent
        let states = [
            state(1.0, false, false), // vocals
            state(1.0, true, false),  // drums
            state(1.0, false, true),  // bass
        ];
        assert_eq!(compute_audibility(&states), vec![false, false, true]);
    }

    #[test]
    fn test_audibility_muted_but_soloed_plays() {
        let states = [state(1.0, true, true), state(1.0, false, false)];
        assert_eq!(compute_audibility(&states), vec![true, false]);
    }

    #[test]
    fn test_audibility_unsolo_restores_mute_state() {
        // the §8 scenario: mute drums, solo bass, then unsolo bass
        let mut states = vec![
            state(1.0, false, false), // vocals
            state(1.0, true, false),  // drums
            state(1.0, false, true),  // bass
        ];
        assert_eq!(compute_audibility(&states), vec![false, false, true]);

        states[2].soloed = false;
        assert_eq!(compute_audibility(&states), vec![true, false, true]);
    }

    #[test]
    fn test_gain_zero_is_distinct_from_mute() {
        let states = [state(0.0, false, false)];
        // gain 0 silences through the gain stage, not the gate
        assert_eq!(compute_audibility(&states), vec![true]);
    }

    #[test]
    fn test_graph_duration_is_max_lane_len() {
        let mut graph = StemGraph::new(48000);
        graph.load(vec![
            lane(1000, 0.1, 1.0, true),
            lane(4000, 0.1, 1.0, true),
            lane(2000, 0.1, 1.0, true),
        ]);
        assert_eq!(graph.duration_samples(), 4000);
        assert_eq!(graph.lane_len(0), 1000);
    }

    #[test]
    fn test_graph_sums_lanes() {
        let mut graph = StemGraph::new(48000);
        graph.load(vec![lane(48000, 0.2, 1.0, true), lane(48000, 0.3, 1.0, true)]);

        // Let gain/gate smoothers settle at their snapped initial values
        let mut out = StereoBuffer::silence(256);
        graph.process(0, &mut out);

        assert!((out[128].left - 0.5).abs() < 1e-3, "got {}", out[128].left);
    }

    #[test]
    fn test_gate_silences_after_ramp() {
        let mut graph = StemGraph::new(48000);
        graph.load(vec![lane(48000, 0.5, 1.0, true)]);

        graph.set_audible(0, false);

        // Run ~200ms so the 15ms gate ramp fully settles
        let mut out = StereoBuffer::silence(512);
        for _ in 0..20 {
            graph.process(0, &mut out);
        }

        assert!(out[511].left.abs() < 1e-3, "gated lane should be silent");
    }

    #[test]
    fn test_gain_clamped_to_range() {
        let mut graph = StemGraph::new(48000);
        graph.load(vec![lane(48000, 0.25, 1.0, true)]);

        graph.set_gain(0, 5.0);

        let mut out = StereoBuffer::silence(512);
        for _ in 0..10 {
            graph.process(0, &mut out);
        }

        // 0.25 * clamp(5.0 → 2.0) = 0.5
        assert!((out[511].left - 0.5).abs() < 1e-3, "got {}", out[511].left);
    }

    #[test]
    fn test_reads_past_lane_end_are_silent() {
        let mut graph = StemGraph::new(48000);
        graph.load(vec![lane(100, 0.5, 1.0, true)]);

        let mut out = StereoBuffer::silence(256);
        graph.process(50, &mut out);

        assert!(out[0].left > 0.0);
        assert_eq!(out[200].left, 0.0);
    }
}
