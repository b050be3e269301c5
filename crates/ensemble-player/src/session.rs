//! Session - the orchestrator tying loader, store, and engine together
//!
//! The session owns the live, mutable view of a loaded recording: per-stem
//! user state, the effects config, and the master volume. It is the single
//! writer; the engine and any UI are passive readers. Every mutation
//! follows the same one-way path:
//!
//!   1. update the in-memory state,
//!   2. push the change into the engine as commands (explicit data flow,
//!      recomputed from the full state set where needed),
//!   3. queue an asynchronous persist.
//!
//! Persistence runs on its own thread and its failures are logged, never
//! surfaced: playback must never block on, or fail because of, store I/O.

use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;

use ensemble_core::effects::{
    CompressorConfig, EffectsConfig, EqConfig, ExpanderConfig, GainReductionMeter, ReverbConfig,
    StageId,
};
use ensemble_core::engine::{
    compute_audibility, CommandSender, EngineCommand, EventReceiver, LaneInit,
    PlaybackController, PlaybackEvent, StemUserState, TransportAtomics,
};
use ensemble_core::loader::{LoadedRecording, StemMetadata};

use crate::store::{ConfigStore, SessionSnapshot};

/// View-model for one loaded stem: immutable metadata plus mutable state
pub struct StemControl {
    pub metadata: StemMetadata,
    pub state: StemUserState,
}

/// The player session
pub struct Session {
    controller: PlaybackController,
    store: Arc<dyn ConfigStore>,
    persist_tx: Sender<(String, SessionSnapshot)>,
    gain_reduction: GainReductionMeter,

    /// Key of the loaded recording (empty when nothing is loaded)
    key: String,
    stems: Vec<StemControl>,
    effects: EffectsConfig,
    master_volume: f32,
    /// Last position the user explicitly chose (persisted)
    last_position: f64,
}

impl Session {
    /// Build a session over a started audio system
    pub fn new(
        commands: CommandSender,
        events: EventReceiver,
        transport: Arc<TransportAtomics>,
        gain_reduction: GainReductionMeter,
        sample_rate: u32,
        store: Arc<dyn ConfigStore>,
    ) -> Self {
        let controller = PlaybackController::new(commands, events, transport, sample_rate);

        // Persist worker: swallows store failures after logging them
        let (persist_tx, persist_rx) =
            std::sync::mpsc::channel::<(String, SessionSnapshot)>();
        let store_for_thread = Arc::clone(&store);
        thread::Builder::new()
            .name("session-persist".to_string())
            .spawn(move || {
                while let Ok((key, snapshot)) = persist_rx.recv() {
                    if let Err(e) = store_for_thread.set(&key, &snapshot) {
                        log::warn!("failed to persist session for '{}': {}", key, e);
                    }
                }
            })
            .expect("Failed to spawn session persist thread");

        Self {
            controller,
            store,
            persist_tx,
            gain_reduction,
            key: String::new(),
            stems: Vec::new(),
            effects: EffectsConfig::default(),
            master_volume: 1.0,
            last_position: 0.0,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Recording lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Install a loaded recording, reconciling persisted state
    ///
    /// Per stem: persisted user state wins when present, otherwise the
    /// manifest's initial gain with mute/solo off. The previous recording's
    /// graph is torn down before the new one is built.
    pub fn load_recording(&mut self, recording: LoadedRecording) {
        self.controller.unload();

        let snapshot = self.store.get(&recording.key).unwrap_or_default();

        self.key = recording.key;
        self.effects = snapshot.effects;
        self.master_volume = snapshot.master_volume.clamp(0.0, 1.0);

        // Reconcile each stem: persisted state wins, manifest defaults
        // otherwise; then derive the gates from the whole state set
        let states: Vec<StemUserState> = recording
            .stems
            .iter()
            .map(|stem| {
                snapshot
                    .stems
                    .get(&stem.metadata.name)
                    .cloned()
                    .map(|mut s| {
                        s.gain = s.gain.clamp(0.0, ensemble_core::engine::GAIN_MAX);
                        s
                    })
                    .unwrap_or_else(|| StemUserState {
                        gain: stem.metadata.initial_gain,
                        ..StemUserState::default()
                    })
            })
            .collect();
        let audible = compute_audibility(&states);

        let mut lanes: Vec<LaneInit> = Vec::with_capacity(recording.stems.len());
        let mut controls: Vec<StemControl> = Vec::with_capacity(recording.stems.len());
        for ((stem, state), audible) in recording.stems.into_iter().zip(states).zip(audible) {
            lanes.push(LaneInit {
                buffer: stem.buffer,
                gain: state.gain,
                audible,
                tier: state.tier,
            });
            controls.push(StemControl {
                metadata: stem.metadata,
                state,
            });
        }
        self.stems = controls;
        self.controller.load(lanes);

        // Push the effects chain and master volume
        self.push_stage(StageId::Eq);
        self.push_stage(StageId::Compressor);
        self.push_stage(StageId::Reverb);
        self.push_stage(StageId::Expander);
        self.controller.apply(EngineCommand::SetMasterVolume {
            volume: self.master_volume,
        });

        // Restore the persisted position; stale out-of-range values reset
        // to a stopped transport at 0 instead of propagating
        let position = snapshot.playback_position;
        if position > 0.0 && position <= self.controller.duration() {
            self.controller.seek(position);
            self.last_position = position;
        } else {
            if position != 0.0 {
                log::warn!(
                    "persisted position {:.1}s out of range for '{}'; starting at 0",
                    position,
                    self.key
                );
            }
            self.last_position = 0.0;
        }
    }

    /// Tear down the loaded recording
    pub fn unload(&mut self) {
        self.controller.unload();
        self.stems.clear();
        self.key.clear();
        self.last_position = 0.0;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Transport surface
    // ─────────────────────────────────────────────────────────────────────

    pub fn play(&mut self) {
        self.controller.play();
    }

    pub fn pause(&mut self) {
        self.controller.pause();
        self.last_position = self.controller.current_time();
        self.persist();
    }

    pub fn stop(&mut self) {
        self.controller.stop();
        self.last_position = 0.0;
        self.persist();
    }

    pub fn seek(&mut self, seconds: f64) {
        let clamped = seconds.clamp(0.0, self.controller.duration());
        self.controller.seek(clamped);
        self.last_position = clamped;
        self.persist();
    }

    /// Set or clear a loop region in seconds
    pub fn set_loop_region(&mut self, region: Option<(f64, f64)>) {
        self.controller.set_loop_region(region);
    }

    pub fn current_time(&mut self) -> f64 {
        self.controller.current_time()
    }

    pub fn duration(&self) -> f64 {
        self.controller.duration()
    }

    pub fn is_playing(&self) -> bool {
        self.controller.is_playing()
    }

    /// Compressor gain reduction in dB (>= 0), for metering
    pub fn gain_reduction_db(&self) -> f32 {
        self.gain_reduction.db()
    }

    /// Drain playback events; a natural end rewinds the persisted position
    pub fn poll_events(&mut self) -> Vec<PlaybackEvent> {
        let events = self.controller.poll_events();
        if events.contains(&PlaybackEvent::Finished) {
            self.last_position = 0.0;
            self.persist();
        }
        events
    }

    // ─────────────────────────────────────────────────────────────────────
    // Stem surface
    // ─────────────────────────────────────────────────────────────────────

    /// Loaded stems in manifest order
    pub fn stems(&self) -> &[StemControl] {
        &self.stems
    }

    pub fn recording_key(&self) -> &str {
        &self.key
    }

    fn stem_index(&self, name: &str) -> Option<usize> {
        self.stems.iter().position(|s| s.metadata.name == name)
    }

    /// Set a stem's gain; stores `clamp(value, 0, 2)`
    pub fn set_stem_gain(&mut self, name: &str, value: f32) {
        let Some(idx) = self.stem_index(name) else { return };
        let gain = value.clamp(0.0, ensemble_core::engine::GAIN_MAX);
        self.stems[idx].state.gain = gain;
        self.controller
            .apply(EngineCommand::SetStemGain { lane: idx, gain });
        self.persist();
    }

    /// Restore a stem's gain to the manifest's default mix level
    pub fn reset_stem_gain(&mut self, name: &str) {
        let Some(idx) = self.stem_index(name) else { return };
        let gain = self.stems[idx].metadata.initial_gain;
        self.stems[idx].state.gain = gain;
        self.controller
            .apply(EngineCommand::SetStemGain { lane: idx, gain });
        self.persist();
    }

    pub fn toggle_mute(&mut self, name: &str) {
        let Some(idx) = self.stem_index(name) else { return };
        self.stems[idx].state.muted = !self.stems[idx].state.muted;
        self.apply_audibility();
        self.persist();
    }

    pub fn toggle_solo(&mut self, name: &str) {
        let Some(idx) = self.stem_index(name) else { return };
        self.stems[idx].state.soloed = !self.stems[idx].state.soloed;
        self.apply_audibility();
        self.persist();
    }

    /// Cycle a stem's dynamics tier (off → low → medium → high → off)
    pub fn cycle_compression_tier(&mut self, name: &str) {
        let Some(idx) = self.stem_index(name) else { return };
        let tier = self.stems[idx].state.tier.next();
        self.stems[idx].state.tier = tier;
        self.controller
            .apply(EngineCommand::SetStemTier { lane: idx, tier });
        self.persist();
    }

    /// Recompute audibility from the full state set and push every gate
    ///
    /// Mute/solo are never evaluated per stem in isolation: one toggle can
    /// flip the gate of every other lane.
    fn apply_audibility(&mut self) {
        let states: Vec<StemUserState> = self.stems.iter().map(|s| s.state.clone()).collect();
        for (lane, audible) in compute_audibility(&states).into_iter().enumerate() {
            self.controller
                .apply(EngineCommand::SetStemAudible { lane, audible });
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Master surface
    // ─────────────────────────────────────────────────────────────────────

    /// Set master volume (linear, clamped to [0, 1])
    pub fn set_master_volume(&mut self, volume: f32) {
        self.master_volume = volume.clamp(0.0, 1.0);
        self.controller.apply(EngineCommand::SetMasterVolume {
            volume: self.master_volume,
        });
        self.persist();
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    // ─────────────────────────────────────────────────────────────────────
    // Effects surface
    // ─────────────────────────────────────────────────────────────────────

    pub fn effects(&self) -> &EffectsConfig {
        &self.effects
    }

    pub fn update_eq(&mut self, config: EqConfig) {
        self.effects.eq = config;
        self.push_stage(StageId::Eq);
        self.persist();
    }

    pub fn update_compressor(&mut self, config: CompressorConfig) {
        self.effects.compressor = config;
        self.push_stage(StageId::Compressor);
        self.persist();
    }

    pub fn update_reverb(&mut self, config: ReverbConfig) {
        self.effects.reverb = config;
        self.push_stage(StageId::Reverb);
        self.persist();
    }

    pub fn update_expander(&mut self, config: ExpanderConfig) {
        self.effects.expander = config;
        self.push_stage(StageId::Expander);
        self.persist();
    }

    /// Enable/disable one stage without touching its parameters
    pub fn set_stage_enabled(&mut self, stage: StageId, enabled: bool) {
        match stage {
            StageId::Eq => self.effects.eq.enabled = enabled,
            StageId::Compressor => self.effects.compressor.enabled = enabled,
            StageId::Reverb => self.effects.reverb.enabled = enabled,
            StageId::Expander => self.effects.expander.enabled = enabled,
        }
        self.push_stage(stage);
        self.persist();
    }

    /// Restore one stage to its defaults, leaving the others untouched
    pub fn reset_stage(&mut self, stage: StageId) {
        match stage {
            StageId::Eq => self.effects.eq = EqConfig::default(),
            StageId::Compressor => self.effects.compressor = CompressorConfig::default(),
            StageId::Reverb => self.effects.reverb = ReverbConfig::default(),
            StageId::Expander => self.effects.expander = ExpanderConfig::default(),
        }
        self.push_stage(stage);
        self.persist();
    }

    /// Send one stage's current config to the engine
    fn push_stage(&mut self, stage: StageId) {
        let cmd = match stage {
            StageId::Eq => EngineCommand::SetEq(Box::new(self.effects.eq.clone())),
            StageId::Compressor => EngineCommand::SetCompressor(self.effects.compressor.clone()),
            StageId::Reverb => EngineCommand::SetReverb(self.effects.reverb.clone()),
            StageId::Expander => EngineCommand::SetExpander(Box::new(self.effects.expander.clone())),
        };
        self.controller.apply(cmd);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Persistence
    // ─────────────────────────────────────────────────────────────────────

    /// Queue an asynchronous persist of the full session snapshot
    fn persist(&self) {
        if self.key.is_empty() {
            return;
        }
        let snapshot = SessionSnapshot {
            stems: self
                .stems
                .iter()
                .map(|s| (s.metadata.name.clone(), s.state.clone()))
                .collect(),
            effects: self.effects.clone(),
            playback_position: self.last_position,
            master_volume: self.master_volume,
        };
        if self.persist_tx.send((self.key.clone(), snapshot)).is_err() {
            log::warn!("persist worker is gone; session changes will not be saved");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use basedrop::Shared;
    use ensemble_core::effects::{CompressionTier, Compressor};
    use ensemble_core::engine::gc::gc_handle;
    use ensemble_core::engine::{command_channel, event_channel};
    use ensemble_core::loader::{LoadMetrics, LoadedStem};
    use ensemble_core::types::{StemKind, StereoBuffer};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// In-memory store; `fail` simulates an unavailable backend
    struct MemStore {
        snapshots: Mutex<HashMap<String, SessionSnapshot>>,
        fail: bool,
    }

    impl MemStore {
        fn new() -> Self {
            Self {
                snapshots: Mutex::new(HashMap::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                snapshots: Mutex::new(HashMap::new()),
                fail: true,
            }
        }

        fn seeded(key: &str, snapshot: SessionSnapshot) -> Self {
            let store = Self::new();
            store.snapshots.lock().unwrap().insert(key.into(), snapshot);
            store
        }

        fn snapshot(&self, key: &str) -> Option<SessionSnapshot> {
            self.snapshots.lock().unwrap().get(key).cloned()
        }
    }

    impl ConfigStore for MemStore {
        fn get(&self, recording_key: &str) -> Option<SessionSnapshot> {
            self.snapshot(recording_key)
        }

        fn set(&self, recording_key: &str, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
            if self.fail {
                return Err(StoreError::Io("store unavailable".into()));
            }
            self.snapshots
                .lock()
                .unwrap()
                .insert(recording_key.into(), snapshot.clone());
            Ok(())
        }
    }

    struct Rig {
        session: Session,
        command_rx: rtrb::Consumer<EngineCommand>,
        store: Arc<MemStore>,
    }

    fn rig_with_store(store: MemStore) -> Rig {
        let (commands, command_rx) = command_channel();
        let (_event_tx, events) = event_channel();
        let transport = Arc::new(ensemble_core::engine::TransportAtomics::new());
        let meter = Compressor::new(48000).meter();
        let store = Arc::new(store);
        let session = Session::new(
            commands,
            events,
            transport,
            meter,
            48000,
            Arc::clone(&store) as Arc<dyn ConfigStore>,
        );
        Rig {
            session,
            command_rx,
            store,
        }
    }

    fn stem(name: &str, kind: StemKind, initial_gain: f32, seconds: f32) -> LoadedStem {
        let len = (seconds * 48000.0) as usize;
        LoadedStem {
            metadata: StemMetadata {
                name: name.into(),
                kind,
                initial_gain,
                waveform: None,
            },
            buffer: Shared::new(&gc_handle(), StereoBuffer::silence(len)),
        }
    }

    fn recording(key: &str, stems: Vec<LoadedStem>) -> LoadedRecording {
        let duration_samples = stems.iter().map(|s| s.buffer.len()).max().unwrap_or(0);
        LoadedRecording {
            key: key.into(),
            stems,
            failures: Vec::new(),
            duration_samples,
            metrics: LoadMetrics::default(),
        }
    }

    fn band_recording(key: &str) -> LoadedRecording {
        recording(
            key,
            vec![
                stem("vocals", StemKind::Vocals, 1.0, 2.0),
                stem("drums", StemKind::Drums, 0.8, 2.0),
                stem("bass", StemKind::Bass, 1.0, 2.0),
            ],
        )
    }

    fn drain(rx: &mut rtrb::Consumer<EngineCommand>) -> Vec<EngineCommand> {
        let mut out = Vec::new();
        while let Ok(cmd) = rx.pop() {
            out.push(cmd);
        }
        out
    }

    fn wait_until(mut predicate: impl FnMut() -> bool) {
        for _ in 0..500 {
            if predicate() {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("timed out waiting for condition");
    }

    #[test]
    fn test_load_uses_manifest_defaults_without_snapshot() {
        let mut r = rig_with_store(MemStore::new());
        r.session.load_recording(band_recording("rec"));

        let drums = &r.session.stems()[1];
        assert_eq!(drums.state.gain, 0.8);
        assert!(!drums.state.muted);
        assert!(!drums.state.soloed);
        assert_eq!(drums.state.tier, CompressionTier::Off);
    }

    #[test]
    fn test_load_prefers_persisted_state() {
        let mut snapshot = SessionSnapshot::default();
        snapshot.stems.insert(
            "drums".into(),
            StemUserState {
                gain: 1.6,
                muted: true,
                soloed: false,
                tier: CompressionTier::High,
            },
        );
        snapshot.master_volume = 0.5;

        let mut r = rig_with_store(MemStore::seeded("rec", snapshot));
        r.session.load_recording(band_recording("rec"));

        let drums = &r.session.stems()[1];
        assert_eq!(drums.state.gain, 1.6);
        assert!(drums.state.muted);
        assert_eq!(drums.state.tier, CompressionTier::High);
        assert_eq!(r.session.master_volume(), 0.5);
    }

    #[test]
    fn test_set_stem_gain_clamps() {
        let mut r = rig_with_store(MemStore::new());
        r.session.load_recording(band_recording("rec"));
        drain(&mut r.command_rx);

        r.session.set_stem_gain("bass", 3.0);

        assert_eq!(r.session.stems()[2].state.gain, 2.0);
        let cmds = drain(&mut r.command_rx);
        assert!(cmds.iter().any(|c| matches!(
            c,
            EngineCommand::SetStemGain { lane: 2, gain } if *gain == 2.0
        )));
    }

    #[test]
    fn test_reset_stem_gain_restores_initial() {
        let mut r = rig_with_store(MemStore::new());
        r.session.load_recording(band_recording("rec"));

        r.session.set_stem_gain("drums", 1.9);
        r.session.reset_stem_gain("drums");

        assert_eq!(r.session.stems()[1].state.gain, 0.8);
    }

    #[test]
    fn test_solo_scenario_gates_whole_set() {
        let mut r = rig_with_store(MemStore::new());
        r.session.load_recording(band_recording("rec"));

        // mute drums, then solo bass: only bass is audible
        r.session.toggle_mute("drums");
        drain(&mut r.command_rx);
        r.session.toggle_solo("bass");

        let cmds = drain(&mut r.command_rx);
        let gates: Vec<(usize, bool)> = cmds
            .iter()
            .filter_map(|c| match c {
                EngineCommand::SetStemAudible { lane, audible } => Some((*lane, *audible)),
                _ => None,
            })
            .collect();
        assert_eq!(gates, vec![(0, false), (1, false), (2, true)]);

        // unsolo bass: drums stay muted, others return
        r.session.toggle_solo("bass");
        let cmds = drain(&mut r.command_rx);
        let gates: Vec<(usize, bool)> = cmds
            .iter()
            .filter_map(|c| match c {
                EngineCommand::SetStemAudible { lane, audible } => Some((*lane, *audible)),
                _ => None,
            })
            .collect();
        assert_eq!(gates, vec![(0, true), (1, false), (2, true)]);
    }

    #[test]
    fn test_mutations_are_persisted() {
        let mut r = rig_with_store(MemStore::new());
        r.session.load_recording(band_recording("rec"));

        r.session.set_stem_gain("vocals", 1.25);

        let store = Arc::clone(&r.store);
        wait_until(move || {
            store
                .snapshot("rec")
                .map(|s| s.stems.get("vocals").map(|v| v.gain) == Some(1.25))
                .unwrap_or(false)
        });
    }

    #[test]
    fn test_store_failure_never_blocks_mutations() {
        let mut r = rig_with_store(MemStore::failing());
        r.session.load_recording(band_recording("rec"));

        r.session.set_stem_gain("vocals", 0.4);
        r.session.toggle_mute("drums");

        // State is updated even though every persist fails
        assert_eq!(r.session.stems()[0].state.gain, 0.4);
        assert!(r.session.stems()[1].state.muted);

        // Give the persist worker a beat to swallow the failures
        std::thread::sleep(Duration::from_millis(50));
        assert!(r.store.snapshot("rec").is_none());
    }

    #[test]
    fn test_stale_persisted_position_resets_to_zero() {
        let mut snapshot = SessionSnapshot::default();
        snapshot.playback_position = 500.0; // way past the 2s recording

        let mut r = rig_with_store(MemStore::seeded("rec", snapshot));
        r.session.load_recording(band_recording("rec"));

        let cmds = drain(&mut r.command_rx);
        assert!(
            !cmds.iter().any(|c| matches!(c, EngineCommand::Seek { .. })),
            "stale position must not be restored"
        );
        assert_eq!(r.session.current_time(), 0.0);
    }

    #[test]
    fn test_valid_persisted_position_is_restored() {
        let mut snapshot = SessionSnapshot::default();
        snapshot.playback_position = 1.5;

        let mut r = rig_with_store(MemStore::seeded("rec", snapshot));
        r.session.load_recording(band_recording("rec"));

        let cmds = drain(&mut r.command_rx);
        assert!(cmds.iter().any(|c| matches!(
            c,
            EngineCommand::Seek { position, .. } if *position == 72000
        )));
    }

    #[test]
    fn test_reset_stage_leaves_other_stages_alone() {
        let mut r = rig_with_store(MemStore::new());
        r.session.load_recording(band_recording("rec"));

        let mut reverb = ReverbConfig::default();
        reverb.enabled = true;
        reverb.mix = 0.7;
        r.session.update_reverb(reverb);

        let mut comp = CompressorConfig::default();
        comp.enabled = true;
        comp.threshold_db = -30.0;
        r.session.update_compressor(comp);

        r.session.reset_stage(StageId::Compressor);

        assert_eq!(r.session.effects().compressor, CompressorConfig::default());
        assert_eq!(r.session.effects().reverb.mix, 0.7);
        assert!(r.session.effects().reverb.enabled);
    }

    #[test]
    fn test_unknown_stem_name_is_ignored() {
        let mut r = rig_with_store(MemStore::new());
        r.session.load_recording(band_recording("rec"));
        drain(&mut r.command_rx);

        r.session.set_stem_gain("theremin", 1.0);
        r.session.toggle_mute("theremin");

        assert!(drain(&mut r.command_rx).is_empty());
    }
}
