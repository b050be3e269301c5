//! Player engine - owns the stem graph, transport, and effects rack
//!
//! Lives exclusively on the audio thread. Each callback drains pending
//! commands, renders the stem sum at the current playhead, runs the master
//! chain, and advances the transport. The effects rack keeps running while
//! stopped so reverb tails ring out and the compressor meter decays
//! naturally.

use crate::effects::{EffectsRack, GainReductionMeter};
use crate::types::StereoBuffer;

use super::command::{EngineCommand, EngineEvent};
use super::graph::StemGraph;
use super::transport::{Transport, TransportAtomics};

/// The audio engine
pub struct PlayerEngine {
    graph: StemGraph,
    rack: EffectsRack,
    transport: Transport,
    commands: rtrb::Consumer<EngineCommand>,
    events: rtrb::Producer<EngineEvent>,
    /// Cached per-lane source lengths (avoids touching lanes during advance)
    lane_lens: Vec<usize>,
}

impl PlayerEngine {
    /// Create an engine for the given device sample rate
    pub fn new(
        sample_rate: u32,
        commands: rtrb::Consumer<EngineCommand>,
        events: rtrb::Producer<EngineEvent>,
    ) -> Self {
        Self {
            graph: StemGraph::new(sample_rate),
            rack: EffectsRack::new(sample_rate),
            transport: Transport::new(),
            commands,
            events,
            lane_lens: Vec::new(),
        }
    }

    /// Shared transport atomics for control-thread reads
    pub fn transport_atomics(&self) -> std::sync::Arc<TransportAtomics> {
        self.transport.atomics()
    }

    /// Shared compressor gain-reduction meter
    pub fn gain_reduction_meter(&self) -> GainReductionMeter {
        self.rack.gain_reduction_meter()
    }

    /// Drain and apply all pending commands (called at block start)
    fn process_commands(&mut self) {
        while let Ok(cmd) = self.commands.pop() {
            match cmd {
                EngineCommand::LoadRecording { lanes } => {
                    self.graph.load(*lanes);
                    self.lane_lens = (0..self.graph.lane_count())
                        .map(|i| self.graph.lane_len(i))
                        .collect();
                    self.transport.on_load(self.graph.duration_samples());
                    self.rack.reset();
                }
                EngineCommand::UnloadRecording => {
                    self.graph.clear();
                    self.lane_lens.clear();
                    self.transport.on_load(0);
                    self.rack.reset();
                }
                EngineCommand::Play { generation } => self.transport.play(generation),
                EngineCommand::Pause { generation } => self.transport.pause(generation),
                EngineCommand::Stop { generation } => self.transport.stop(generation),
                EngineCommand::Seek { position, generation } => {
                    self.transport.seek(position, generation)
                }
                EngineCommand::SetLoop { region } => self.transport.set_loop(region),
                EngineCommand::SetStemGain { lane, gain } => self.graph.set_gain(lane, gain),
                EngineCommand::SetStemAudible { lane, audible } => {
                    self.graph.set_audible(lane, audible)
                }
                EngineCommand::SetStemTier { lane, tier } => self.graph.set_tier(lane, tier),
                EngineCommand::SetMasterVolume { volume } => self.rack.set_master_volume(volume),
                EngineCommand::SetEq(config) => self.rack.set_eq(&config),
                EngineCommand::SetCompressor(config) => self.rack.set_compressor(&config),
                EngineCommand::SetReverb(config) => self.rack.set_reverb(&config),
                EngineCommand::SetExpander(config) => self.rack.set_expander(&config),
            }
        }
    }

    /// Process one audio block into `output`
    pub fn process(&mut self, output: &mut StereoBuffer) {
        self.process_commands();

        if self.transport.is_playing() {
            self.graph.process(self.transport.position(), output);
        } else {
            output.fill_silence();
        }

        // The chain runs regardless of transport state: tails decay, the
        // meter falls back to zero, and parameter ramps keep settling.
        self.rack.process(output);

        let block_len = output.len();
        self.transport
            .advance(block_len, &self.lane_lens, &mut self.events);
    }
}
