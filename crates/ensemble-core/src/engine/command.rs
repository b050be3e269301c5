//! Lock-free command and event queues between control and audio threads
//!
//! The control thread sends [`EngineCommand`]s through an rtrb SPSC ring
//! buffer; the audio thread drains them at block boundaries and answers
//! with [`EngineEvent`]s on a second ring buffer. Neither side ever blocks:
//! a push or pop is ~50ns, so the audio callback never waits on the
//! orchestrator and the orchestrator never waits on audio.
//!
//! Large payloads (the loaded lane set) are boxed so the command enum stays
//! small for cache-efficient queueing. Every transport command and every
//! event carries the generation id it was issued under; stale events are
//! discarded by the controller, which is the sole mechanism preventing
//! races between overlapping play/pause/seek calls.

use crate::effects::{
    CompressionTier, CompressorConfig, EqConfig, ExpanderConfig, ReverbConfig,
};

use super::graph::LaneInit;
use super::transport::LoopRegion;

/// Queue capacity for commands/events (plenty for a UI's worst case)
const CHANNEL_CAPACITY: usize = 256;

/// Commands sent from the control thread to the audio thread
///
/// Each variant is an atomic operation on the engine, applied at the start
/// of the next audio block.
pub enum EngineCommand {
    /// Replace the stem graph with a freshly loaded recording
    ///
    /// Boxed: the lane set carries Shared buffer handles and per-lane
    /// settings, far too large to inline in the enum.
    LoadRecording { lanes: Box<Vec<LaneInit>> },
    /// Tear down the stem graph (previous buffers reclaimed via GC)
    UnloadRecording,

    /// Start/resume playback under a new generation
    Play { generation: u64 },
    /// Freeze the playhead where the audio clock has it
    Pause { generation: u64 },
    /// Freeze and rewind to position 0
    Stop { generation: u64 },
    /// Jump to a sample position (already clamped by the controller)
    Seek { position: usize, generation: u64 },
    /// Set or clear the loop region
    SetLoop { region: Option<LoopRegion> },

    /// Set one lane's gain target (ramped on the audio thread)
    SetStemGain { lane: usize, gain: f32 },
    /// Set one lane's audibility gate (ramped on the audio thread)
    SetStemAudible { lane: usize, audible: bool },
    /// Set one lane's dynamics tier
    SetStemTier { lane: usize, tier: CompressionTier },

    /// Set master volume (linear [0, 1])
    SetMasterVolume { volume: f32 },
    /// Replace the EQ stage config (boxed: carries the band list)
    SetEq(Box<EqConfig>),
    /// Replace the compressor stage config
    SetCompressor(CompressorConfig),
    /// Replace the reverb stage config
    SetReverb(ReverbConfig),
    /// Replace the stereo expander stage config
    SetExpander(Box<ExpanderConfig>),
}

/// Events reported from the audio thread to the control thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// One lane's source ran out (stems may have differing lengths)
    StemFinished { lane: usize, generation: u64 },
    /// All lanes of this generation completed; the engine is now Stopped
    /// at position 0
    PlaybackFinished { generation: u64 },
}

/// Command sender for the control thread
///
/// Wraps the lock-free producer. All operations are non-blocking.
pub struct CommandSender {
    producer: rtrb::Producer<EngineCommand>,
}

impl CommandSender {
    /// Send a command to the audio engine (non-blocking)
    ///
    /// Returns `Err(cmd)` if the queue is full; the caller may retry on the
    /// next tick.
    pub fn send(&mut self, cmd: EngineCommand) -> Result<(), EngineCommand> {
        self.producer.push(cmd).map_err(|e| match e {
            rtrb::PushError::Full(value) => value,
        })
    }
}

/// Event receiver for the control thread
pub struct EventReceiver {
    consumer: rtrb::Consumer<EngineEvent>,
}

impl EventReceiver {
    /// Pop the next pending event, if any (non-blocking)
    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        self.consumer.pop().ok()
    }
}

/// Create the control→audio command channel
pub fn command_channel() -> (CommandSender, rtrb::Consumer<EngineCommand>) {
    let (producer, consumer) = rtrb::RingBuffer::new(CHANNEL_CAPACITY);
    (CommandSender { producer }, consumer)
}

/// Create the audio→control event channel
pub fn event_channel() -> (rtrb::Producer<EngineEvent>, EventReceiver) {
    let (producer, consumer) = rtrb::RingBuffer::new(CHANNEL_CAPACITY);
    (producer, EventReceiver { consumer })
}
