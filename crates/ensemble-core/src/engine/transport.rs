//! Transport - the audio-side playback state machine
//!
//! One sample-accurate playhead drives every lane, so all stems always read
//! from the identical offset; there is no per-stem scheduling to drift.
//! Position is counted in samples rendered through the device callback,
//! i.e. it is derived from the audio clock, never from wall-clock timers.
//!
//! Stems may have differing lengths (decoders round block counts
//! differently), so the transport tracks per-lane completion against the
//! playhead and only declares natural end-of-media once EVERY lane has run
//! out. The end transition rewinds to position 0 in the Stopped state.
//!
//! The transport adopts whatever generation the last transport command
//! carried and stamps every event with it; the control side discards
//! events from superseded generations.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::types::PlayState;

use super::command::EngineEvent;

/// A loop region in samples; reaching `end` wraps the playhead to `start`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopRegion {
    pub start: usize,
    pub end: usize,
}

/// Lock-free transport state for control-thread reads
///
/// The audio thread writes these atomics whenever state changes; readers
/// never take a lock. All operations use `Ordering::Relaxed` since only
/// visibility is needed, not cross-variable synchronization.
pub struct TransportAtomics {
    /// Current playhead position in samples
    pub position: AtomicU64,
    /// Playback state: 0=Stopped, 1=Paused, 2=Playing
    pub state: AtomicU8,
    /// Generation currently executing on the audio thread
    pub generation: AtomicU64,
    /// Duration of the loaded recording in samples
    pub duration: AtomicU64,
}

impl TransportAtomics {
    pub fn new() -> Self {
        Self {
            position: AtomicU64::new(0),
            state: AtomicU8::new(0),
            generation: AtomicU64::new(0),
            duration: AtomicU64::new(0),
        }
    }

    /// Current position in samples (lock-free)
    #[inline]
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    /// Current play state (lock-free)
    #[inline]
    pub fn play_state(&self) -> PlayState {
        match self.state.load(Ordering::Relaxed) {
            2 => PlayState::Playing,
            1 => PlayState::Paused,
            _ => PlayState::Stopped,
        }
    }

    /// Check if playing (lock-free)
    #[inline]
    pub fn is_playing(&self) -> bool {
        self.state.load(Ordering::Relaxed) == 2
    }

    /// Duration in samples (lock-free)
    #[inline]
    pub fn duration(&self) -> u64 {
        self.duration.load(Ordering::Relaxed)
    }
}

impl Default for TransportAtomics {
    fn default() -> Self {
        Self::new()
    }
}

/// The audio-side transport state machine
pub struct Transport {
    state: PlayState,
    /// Playhead in samples, shared by every lane
    position: usize,
    /// Generation adopted from the last transport command
    generation: u64,
    loop_region: Option<LoopRegion>,
    /// Recording duration: max lane length
    duration: usize,
    atomics: Arc<TransportAtomics>,
}

impl Transport {
    pub fn new() -> Self {
        Self {
            state: PlayState::Stopped,
            position: 0,
            generation: 0,
            loop_region: None,
            duration: 0,
            atomics: Arc::new(TransportAtomics::new()),
        }
    }

    /// Shared atomics handle for the control thread
    pub fn atomics(&self) -> Arc<TransportAtomics> {
        Arc::clone(&self.atomics)
    }

    #[inline]
    fn sync_atomics(&self) {
        self.atomics.position.store(self.position as u64, Ordering::Relaxed);
        let state_val = match self.state {
            PlayState::Stopped => 0,
            PlayState::Paused => 1,
            PlayState::Playing => 2,
        };
        self.atomics.state.store(state_val, Ordering::Relaxed);
        self.atomics.generation.store(self.generation, Ordering::Relaxed);
        self.atomics.duration.store(self.duration as u64, Ordering::Relaxed);
    }

    pub fn state(&self) -> PlayState {
        self.state
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlayState::Playing
    }

    /// Called when a recording is (un)loaded; resets everything
    pub fn on_load(&mut self, duration: usize) {
        self.state = PlayState::Stopped;
        self.position = 0;
        self.duration = duration;
        self.loop_region = None;
        self.sync_atomics();
    }

    /// Start/resume under a new generation; no-op with nothing loaded
    pub fn play(&mut self, generation: u64) {
        self.generation = generation;
        if self.duration > 0 {
            self.state = PlayState::Playing;
        }
        self.sync_atomics();
    }

    /// Freeze the playhead at its current sample
    pub fn pause(&mut self, generation: u64) {
        self.generation = generation;
        if self.state == PlayState::Playing {
            self.state = PlayState::Paused;
        }
        self.sync_atomics();
    }

    /// Freeze and rewind to 0
    pub fn stop(&mut self, generation: u64) {
        self.generation = generation;
        self.state = PlayState::Stopped;
        self.position = 0;
        self.sync_atomics();
    }

    /// Jump the playhead; playback state is unchanged, so a seek while
    /// playing continues from the new offset (pause+play equivalence)
    pub fn seek(&mut self, position: usize, generation: u64) {
        self.generation = generation;
        self.position = position.min(self.duration);
        self.sync_atomics();
    }

    /// Set or clear the loop region (clamped to the recording)
    pub fn set_loop(&mut self, region: Option<LoopRegion>) {
        self.loop_region = region.and_then(|r| {
            let end = r.end.min(self.duration);
            let start = r.start.min(end);
            (start < end).then_some(LoopRegion { start, end })
        });
    }

    pub fn loop_region(&self) -> Option<LoopRegion> {
        self.loop_region
    }

    /// Advance the playhead after rendering one block
    ///
    /// `lane_lens` gives each lane's source length; a lane completes when
    /// the playhead passes its end. The natural-end transition fires only
    /// once the playhead passes the longest lane, i.e. after ALL lanes
    /// have completed, and rewinds to 0 in the Stopped state. Loop wrap
    /// suppresses completion for that block.
    pub fn advance(
        &mut self,
        block_len: usize,
        lane_lens: &[usize],
        events: &mut rtrb::Producer<EngineEvent>,
    ) {
        if self.state != PlayState::Playing {
            return;
        }

        let prev = self.position;
        self.position += block_len;

        // Loop wrap takes precedence over end-of-media
        if let Some(region) = self.loop_region {
            if self.position >= region.end {
                self.position = region.start;
                self.sync_atomics();
                return;
            }
        }

        // Per-lane completion: the playhead just crossed a lane's end
        for (lane, &len) in lane_lens.iter().enumerate() {
            if prev < len && self.position >= len && len < self.duration {
                let _ = events.push(EngineEvent::StemFinished {
                    lane,
                    generation: self.generation,
                });
            }
        }

        // Natural end: every lane is past its end once the playhead passes
        // the longest one
        if self.position >= self.duration {
            let _ = events.push(EngineEvent::PlaybackFinished {
                generation: self.generation,
            });
            self.state = PlayState::Stopped;
            self.position = 0;
        }

        self.sync_atomics();
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}
