//! Config store - persisted per-recording session state
//!
//! The store is a collaborator interface: the session reads one snapshot at
//! load time and writes snapshots after mutations. It must tolerate being
//! absent or broken - a `None` from `get` means "use defaults", and `set`
//! failures are logged by the caller, never surfaced as playback errors.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ensemble_core::config::{load_config, save_config, sessions_dir};
use ensemble_core::effects::EffectsConfig;
use ensemble_core::engine::StemUserState;

/// Persistence failure; logged only, never blocks a user action
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to persist session: {0}")]
    Io(String),
}

/// Everything persisted for one recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSnapshot {
    /// Per-stem user state keyed by stem name
    pub stems: BTreeMap<String, StemUserState>,
    pub effects: EffectsConfig,
    /// Last playback position in seconds
    pub playback_position: f64,
    /// Master volume, linear [0, 1]
    pub master_volume: f32,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            stems: BTreeMap::new(),
            effects: EffectsConfig::default(),
            playback_position: 0.0,
            master_volume: 1.0,
        }
    }
}

/// The store collaborator interface
pub trait ConfigStore: Send + Sync {
    /// Fetch the snapshot for a recording, or `None` if there isn't one
    fn get(&self, recording_key: &str) -> Option<SessionSnapshot>;

    /// Persist a snapshot for a recording
    fn set(&self, recording_key: &str, snapshot: &SessionSnapshot) -> Result<(), StoreError>;
}

/// YAML-file store: one file per recording under the sessions directory
pub struct YamlConfigStore {
    dir: PathBuf,
}

impl YamlConfigStore {
    /// Store sessions under an explicit directory
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Store sessions under the standard ensemble config location
    pub fn default_store() -> Self {
        Self::new(sessions_dir())
    }

    fn path_for(&self, recording_key: &str) -> PathBuf {
        // Keys come from manifest names; keep filenames tame
        let safe: String = recording_key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        self.dir.join(format!("{safe}.yaml"))
    }
}

impl ConfigStore for YamlConfigStore {
    fn get(&self, recording_key: &str) -> Option<SessionSnapshot> {
        let path = self.path_for(recording_key);
        if !path.exists() {
            return None;
        }
        // Corrupt files fall back to defaults inside load_config
        Some(load_config(&path))
    }

    fn set(&self, recording_key: &str, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
        save_config(snapshot, &self.path_for(recording_key))
            .map_err(|e| StoreError::Io(e.to_string()))
    }
}
