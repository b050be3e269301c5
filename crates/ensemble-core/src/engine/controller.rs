//! Playback controller - the control-side transport authority
//!
//! Owns the monotonically increasing generation id. Every transport call
//! bumps the generation and ships it with the command; the audio thread
//! stamps its events with the generation it is executing, and
//! `poll_events` discards anything stale. That single counter is the only
//! cross-thread coordination needed: any number of play/pause/seek calls
//! may overlap an in-flight completion, and the superseded ones simply
//! never surface.
//!
//! Position and state reads go through the transport atomics, so reported
//! time is derived from the audio clock rather than a wall-clock timer.

use std::sync::Arc;

use crate::types::PlayState;

use super::command::{CommandSender, EngineCommand, EngineEvent, EventReceiver};
use super::graph::LaneInit;
use super::transport::{LoopRegion, TransportAtomics};

/// Playback events after generation filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// One stem's source ran out (others may still be playing)
    StemFinished { lane: usize },
    /// The whole recording finished; the engine is Stopped at 0
    Finished,
}

/// Control-side transport handle
pub struct PlaybackController {
    commands: CommandSender,
    events: EventReceiver,
    atomics: Arc<TransportAtomics>,
    /// Monotonic generation counter; bumped by every superseding call
    generation: u64,
    /// Mirror of the loaded recording's duration
    duration_samples: usize,
    sample_rate: u32,
}

impl PlaybackController {
    pub fn new(
        commands: CommandSender,
        events: EventReceiver,
        atomics: Arc<TransportAtomics>,
        sample_rate: u32,
    ) -> Self {
        Self {
            commands,
            events,
            atomics,
            generation: 0,
            duration_samples: 0,
            sample_rate,
        }
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Send a command, logging if the queue is saturated
    ///
    /// Also the funnel the orchestrator uses for graph/effects updates, so
    /// every engine mutation flows through one queue in order.
    pub fn apply(&mut self, cmd: EngineCommand) {
        if self.commands.send(cmd).is_err() {
            log::warn!("engine command queue full; command dropped");
        }
    }

    /// Ship a freshly loaded recording to the engine
    ///
    /// Supersedes any in-flight events from the previous recording.
    pub fn load(&mut self, lanes: Vec<LaneInit>) {
        self.duration_samples = lanes.iter().map(|l| l.buffer.len()).max().unwrap_or(0);
        self.next_generation();
        self.apply(EngineCommand::LoadRecording { lanes: Box::new(lanes) });
    }

    /// Tear down the engine's graph
    pub fn unload(&mut self) {
        self.duration_samples = 0;
        self.next_generation();
        self.apply(EngineCommand::UnloadRecording);
    }

    /// Start/resume playback; no-op if already playing or nothing loaded
    pub fn play(&mut self) {
        if self.is_playing() || self.duration_samples == 0 {
            return;
        }
        let generation = self.next_generation();
        self.apply(EngineCommand::Play { generation });
    }

    /// Pause at the current audio-clock position; no-op unless playing
    pub fn pause(&mut self) {
        if !self.is_playing() {
            return;
        }
        let generation = self.next_generation();
        self.apply(EngineCommand::Pause { generation });
    }

    /// Stop and rewind to 0 regardless of prior state
    pub fn stop(&mut self) {
        let generation = self.next_generation();
        self.apply(EngineCommand::Stop { generation });
    }

    /// Seek to a time in seconds, clamped to [0, duration]
    ///
    /// While playing this is equivalent to pause+play at the new offset:
    /// the engine continues from the clamped position under the new
    /// generation, all stems phase-locked to the single playhead.
    pub fn seek(&mut self, seconds: f64) {
        let clamped = seconds.clamp(0.0, self.duration());
        let position = (clamped * self.sample_rate as f64).round() as usize;
        let generation = self.next_generation();
        self.apply(EngineCommand::Seek { position, generation });
    }

    /// Set or clear a loop region given in seconds
    pub fn set_loop_region(&mut self, region: Option<(f64, f64)>) {
        let region = region.map(|(start, end)| {
            let start = (start.clamp(0.0, self.duration()) * self.sample_rate as f64) as usize;
            let end = (end.clamp(0.0, self.duration()) * self.sample_rate as f64) as usize;
            LoopRegion { start, end }
        });
        self.apply(EngineCommand::SetLoop { region });
    }

    /// Duration of the loaded recording in seconds
    pub fn duration(&self) -> f64 {
        self.duration_samples as f64 / self.sample_rate as f64
    }

    /// Whether the engine is currently playing (lock-free read)
    pub fn is_playing(&self) -> bool {
        self.atomics.is_playing()
    }

    /// Current transport state (lock-free read)
    pub fn play_state(&self) -> PlayState {
        self.atomics.play_state()
    }

    /// Current position in seconds, clamped to [0, duration]
    ///
    /// Out-of-range recovery: a position past the duration (stale persisted
    /// state, device glitch) resets the transport to Stopped at 0 rather
    /// than propagating an invalid position.
    pub fn current_time(&mut self) -> f64 {
        let position = self.atomics.position() as usize;
        if position > self.duration_samples {
            log::warn!(
                "observed position {} past duration {}; resetting transport",
                position,
                self.duration_samples
            );
            self.stop();
            return 0.0;
        }
        position as f64 / self.sample_rate as f64
    }

    /// Drain engine events, discarding any from superseded generations
    pub fn poll_events(&mut self) -> Vec<PlaybackEvent> {
        let mut out = Vec::new();
        while let Some(event) = self.events.try_recv() {
            match event {
                EngineEvent::StemFinished { lane, generation } => {
                    if generation == self.generation {
                        out.push(PlaybackEvent::StemFinished { lane });
                    }
                }
                EngineEvent::PlaybackFinished { generation } => {
                    if generation == self.generation {
                        out.push(PlaybackEvent::Finished);
                    }
                }
            }
        }
        out
    }
}
