//! Recording loader - manifest parsing, per-stem decode, load metrics
//!
//! A recording is described by a YAML manifest naming its stems: per stem a
//! display name, a type tag, a default mix gain, and a file reference for
//! the audio bytes. The loader reads and decodes every stem to the engine
//! rate, tolerating per-stem failures: a stem that fails to fetch, decode,
//! or parse is reported in `failures` and excluded from the graph while the
//! rest of the recording loads normally. Duration is computed from whatever
//! succeeded.
//!
//! Loading is expensive (file I/O + decode), so `StemLoader` runs it on a
//! background thread with non-blocking `load()` / `try_recv()` (the result
//! arrives as a message); the synchronous [`load_recording`] underneath is
//! what tests exercise. Granular timing is logged in `[PERF]` lines and
//! returned as a [`LoadMetrics`] record.

mod decode;

pub use decode::decode_stem;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use basedrop::Shared;
use serde::Deserialize;
use thiserror::Error;

use crate::engine::gc::gc_handle;
use crate::types::{StemKind, StereoBuffer};

/// Per-stem load failure taxonomy
///
/// Non-fatal to the recording as a whole; a failed stem is simply absent
/// from the graph. There are no automatic retries - reloading the recording
/// is the retry.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// The stem's byte stream could not be fetched
    #[error("failed to fetch stem data: {0}")]
    Fetch(String),
    /// The bytes fetched could not be decoded as audio
    #[error("failed to decode stem audio: {0}")]
    Decode(String),
    /// The stem's manifest entry is malformed
    #[error("malformed stem metadata: {0}")]
    Metadata(String),
}

/// Immutable per-stem metadata from the manifest
#[derive(Debug, Clone)]
pub struct StemMetadata {
    pub name: String,
    pub kind: StemKind,
    /// Default mix level (linear, clamped to [0, 2])
    pub initial_gain: f32,
    /// Opaque display handle for waveform rendering; not owned by the core
    pub waveform: Option<String>,
}

/// One successfully loaded stem: metadata plus decoded samples
///
/// The buffer is `basedrop::Shared` so the graph can adopt it and later
/// drop it on the audio thread without a blocking deallocation.
pub struct LoadedStem {
    pub metadata: StemMetadata,
    pub buffer: Shared<StereoBuffer>,
}

impl std::fmt::Debug for LoadedStem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedStem")
            .field("metadata", &self.metadata)
            .field("buffer", &*self.buffer)
            .finish()
    }
}

/// A stem that failed to load, kept for reporting
#[derive(Debug)]
pub struct StemFailure {
    pub name: String,
    pub error: LoadError,
}

/// Timing and size record for one stem
#[derive(Debug, Clone)]
pub struct StemLoadMetrics {
    pub name: String,
    /// Time reading the byte stream
    pub fetch: Duration,
    /// Time decoding + resampling
    pub decode: Duration,
    /// Payload size in bytes
    pub bytes: u64,
    /// Decoded length in samples
    pub samples: usize,
}

/// Aggregate load metrics for a recording
#[derive(Debug, Clone, Default)]
pub struct LoadMetrics {
    pub stems: Vec<StemLoadMetrics>,
    pub total: Duration,
    pub total_bytes: u64,
}

/// The result of loading a recording
#[derive(Debug)]
pub struct LoadedRecording {
    /// Recording key (manifest `name`, falling back to the file stem)
    pub key: String,
    pub stems: Vec<LoadedStem>,
    pub failures: Vec<StemFailure>,
    /// Max decoded length across stems (failed stems excluded)
    pub duration_samples: usize,
    pub metrics: LoadMetrics,
}

impl LoadedRecording {
    /// Duration in seconds at the given engine rate
    pub fn duration_seconds(&self, sample_rate: u32) -> f64 {
        self.duration_samples as f64 / sample_rate as f64
    }
}

/// Raw manifest shape; stem entries stay untyped so one malformed entry
/// degrades that stem only instead of failing the whole parse
#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    stems: Vec<serde_yaml::Value>,
}

/// One validated stem entry
#[derive(Debug, Deserialize)]
struct StemEntry {
    name: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    initial_gain: Option<f32>,
    file: PathBuf,
    #[serde(default)]
    waveform: Option<String>,
}

/// Load a recording synchronously
///
/// Fails outright only when the manifest itself is unreadable; stem-level
/// problems land in `failures`.
pub fn load_recording(
    manifest_path: &Path,
    target_sample_rate: u32,
) -> Result<LoadedRecording, LoadError> {
    let total_start = Instant::now();

    let manifest_text = std::fs::read_to_string(manifest_path)
        .map_err(|e| LoadError::Fetch(format!("{}: {e}", manifest_path.display())))?;
    let manifest: RawManifest = serde_yaml::from_str(&manifest_text)
        .map_err(|e| LoadError::Metadata(format!("{}: {e}", manifest_path.display())))?;

    let key = manifest.name.clone().unwrap_or_else(|| {
        manifest_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("recording")
            .to_string()
    });
    let base_dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));

    let mut stems = Vec::new();
    let mut failures = Vec::new();
    let mut metrics = LoadMetrics::default();

    for (idx, raw_entry) in manifest.stems.into_iter().enumerate() {
        let entry: StemEntry = match serde_yaml::from_value(raw_entry) {
            Ok(entry) => entry,
            Err(e) => {
                // No usable name either; report by position
                failures.push(StemFailure {
                    name: format!("stem #{idx}"),
                    error: LoadError::Metadata(e.to_string()),
                });
                continue;
            }
        };

        let name = entry.name.clone();
        match load_stem(entry, base_dir, target_sample_rate, &mut metrics) {
            Ok(stem) => stems.push(stem),
            Err(error) => {
                log::warn!("stem '{}' failed to load: {}", name, error);
                failures.push(StemFailure { name, error });
            }
        }
    }

    let duration_samples = stems.iter().map(|s| s.buffer.len()).max().unwrap_or(0);
    metrics.total = total_start.elapsed();

    log::info!(
        "[PERF] Loader: '{}' loaded {} stems ({} failed), {} samples, {:.1} MB in {:?}",
        key,
        stems.len(),
        failures.len(),
        duration_samples,
        metrics.total_bytes as f64 / 1_000_000.0,
        metrics.total
    );

    Ok(LoadedRecording {
        key,
        stems,
        failures,
        duration_samples,
        metrics,
    })
}

/// Fetch and decode one stem
fn load_stem(
    entry: StemEntry,
    base_dir: &Path,
    target_sample_rate: u32,
    metrics: &mut LoadMetrics,
) -> Result<LoadedStem, LoadError> {
    let initial_gain = entry.initial_gain.unwrap_or(1.0);
    if !initial_gain.is_finite() {
        return Err(LoadError::Metadata(format!(
            "initial_gain {initial_gain} is not a number"
        )));
    }

    let metadata = StemMetadata {
        name: entry.name.clone(),
        kind: StemKind::from_tag(entry.kind.as_deref().unwrap_or("other")),
        initial_gain: initial_gain.clamp(0.0, 2.0),
        waveform: entry.waveform,
    };

    let path = if entry.file.is_absolute() {
        entry.file.clone()
    } else {
        base_dir.join(&entry.file)
    };
    let extension = path.extension().and_then(|e| e.to_str()).map(str::to_owned);

    let fetch_start = Instant::now();
    let bytes = std::fs::read(&path)
        .map_err(|e| LoadError::Fetch(format!("{}: {e}", path.display())))?;
    let fetch = fetch_start.elapsed();
    let byte_count = bytes.len() as u64;

    let decode_start = Instant::now();
    let buffer = decode_stem(bytes, extension.as_deref(), target_sample_rate)?;
    let decode = decode_start.elapsed();

    log::info!(
        "[PERF] Loader: stem '{}' fetched {} bytes in {:?}, decoded {} samples in {:?}",
        metadata.name,
        byte_count,
        fetch,
        buffer.len(),
        decode
    );

    metrics.total_bytes += byte_count;
    metrics.stems.push(StemLoadMetrics {
        name: metadata.name.clone(),
        fetch,
        decode,
        bytes: byte_count,
        samples: buffer.len(),
    });

    Ok(LoadedStem {
        metadata,
        buffer: Shared::new(&gc_handle(), buffer),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Background loader thread
// ─────────────────────────────────────────────────────────────────────────────

/// Request to load a recording in the background
#[derive(Debug)]
pub struct LoadRequest {
    /// Recording key used by the caller to match the result
    pub key: String,
    /// Path to the recording manifest
    pub path: PathBuf,
}

/// Result of a background load
pub struct LoadResult {
    pub key: String,
    pub result: Result<LoadedRecording, LoadError>,
}

/// Handle to the background loader thread
pub struct StemLoader {
    tx: Sender<LoadRequest>,
    rx: Receiver<LoadResult>,
    target_sample_rate: Arc<AtomicU32>,
    _handle: JoinHandle<()>,
}

impl StemLoader {
    /// Spawn the background loader thread
    pub fn spawn(target_sample_rate: u32) -> Self {
        let (request_tx, request_rx) = std::sync::mpsc::channel::<LoadRequest>();
        let (result_tx, result_rx) = std::sync::mpsc::channel::<LoadResult>();

        let rate = Arc::new(AtomicU32::new(target_sample_rate));
        let rate_for_thread = rate.clone();

        let handle = thread::Builder::new()
            .name("stem-loader".to_string())
            .spawn(move || {
                loader_thread(request_rx, result_tx, rate_for_thread);
            })
            .expect("Failed to spawn stem loader thread");

        log::info!("StemLoader spawned with target sample rate: {} Hz", target_sample_rate);

        Self {
            tx: request_tx,
            rx: result_rx,
            target_sample_rate: rate,
            _handle: handle,
        }
    }

    /// Update the target sample rate (if the device rate changes)
    pub fn set_sample_rate(&self, sample_rate: u32) {
        self.target_sample_rate.store(sample_rate, Ordering::SeqCst);
    }

    /// Request loading a recording (non-blocking)
    pub fn load(&self, key: String, path: PathBuf) -> Result<(), String> {
        self.tx
            .send(LoadRequest { key, path })
            .map_err(|e| format!("Loader thread disconnected: {e}"))
    }

    /// Try to receive a completed load result (non-blocking)
    pub fn try_recv(&self) -> Option<LoadResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                log::error!("Loader thread disconnected unexpectedly");
                None
            }
        }
    }
}

/// The background loader thread function
fn loader_thread(
    rx: Receiver<LoadRequest>,
    tx: Sender<LoadResult>,
    target_sample_rate: Arc<AtomicU32>,
) {
    log::info!("Stem loader thread started");

    while let Ok(request) = rx.recv() {
        let sample_rate = target_sample_rate.load(Ordering::SeqCst);
        let result = load_recording(&request.path, sample_rate);
        let _ = tx.send(LoadResult {
            key: request.key,
            result,
        });
    }

    log::info!("Stem loader thread shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(dir: &Path, name: &str, seconds: f32, rate: u32, channels: u16) -> PathBuf {
        let path = dir.join(name);
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        let frames = (seconds * rate as f32) as usize;
        for i in 0..frames {
            let v = ((i as f32 * 0.05).sin() * 8000.0) as i16;
            for _ in 0..channels {
                writer.write_sample(v).unwrap();
            }
        }
        writer.finalize().unwrap();
        path
    }

    fn write_manifest(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("recording.yaml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_load_complete_recording() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(dir.path(), "vocals.wav", 0.5, 48000, 2);
        write_wav(dir.path(), "drums.wav", 0.4, 48000, 2);

        let manifest = write_manifest(
            dir.path(),
            concat!(
                "name: practice-night\n",
                "stems:\n",
                "  - name: vocals\n",
                "    type: vocals\n",
                "    initial_gain: 0.9\n",
                "    file: vocals.wav\n",
                "  - name: drums\n",
                "    type: drums\n",
                "    file: drums.wav\n",
            ),
        );

        let recording = load_recording(&manifest, 48000).unwrap();

        assert_eq!(recording.key, "practice-night");
        assert_eq!(recording.stems.len(), 2);
        assert!(recording.failures.is_empty());
        // Duration comes from the longest stem
        assert_eq!(recording.duration_samples, 24000);

        let vocals = &recording.stems[0];
        assert_eq!(vocals.metadata.kind, StemKind::Vocals);
        assert!((vocals.metadata.initial_gain - 0.9).abs() < 1e-6);
        // Missing initial_gain defaults to unity
        assert_eq!(recording.stems[1].metadata.initial_gain, 1.0);
    }

    #[test]
    fn test_missing_file_degrades_that_stem_only() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(dir.path(), "drums.wav", 0.25, 48000, 2);

        let manifest = write_manifest(
            dir.path(),
            concat!(
                "stems:\n",
                "  - name: vocals\n",
                "    file: missing.wav\n",
                "  - name: drums\n",
                "    file: drums.wav\n",
            ),
        );

        let recording = load_recording(&manifest, 48000).unwrap();

        assert_eq!(recording.stems.len(), 1);
        assert_eq!(recording.failures.len(), 1);
        assert_eq!(recording.failures[0].name, "vocals");
        assert!(matches!(recording.failures[0].error, LoadError::Fetch(_)));
        // Duration from the survivor
        assert_eq!(recording.duration_samples, 12000);
    }

    #[test]
    fn test_malformed_entry_degrades_that_stem_only() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(dir.path(), "bass.wav", 0.25, 48000, 2);

        // First entry has no `file` field at all
        let manifest = write_manifest(
            dir.path(),
            concat!(
                "stems:\n",
                "  - name: vocals\n",
                "  - name: bass\n",
                "    file: bass.wav\n",
            ),
        );

        let recording = load_recording(&manifest, 48000).unwrap();

        assert_eq!(recording.stems.len(), 1);
        assert_eq!(recording.stems[0].metadata.name, "bass");
        assert!(matches!(recording.failures[0].error, LoadError::Metadata(_)));
    }

    #[test]
    fn test_unreadable_manifest_fails_whole_load() {
        let err = load_recording(Path::new("/nonexistent/rec.yaml"), 48000).unwrap_err();
        assert!(matches!(err, LoadError::Fetch(_)));
    }

    #[test]
    fn test_initial_gain_clamped() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(dir.path(), "bass.wav", 0.1, 48000, 2);

        let manifest = write_manifest(
            dir.path(),
            concat!(
                "stems:\n",
                "  - name: bass\n",
                "    initial_gain: 7.5\n",
                "    file: bass.wav\n",
            ),
        );

        let recording = load_recording(&manifest, 48000).unwrap();
        assert_eq!(recording.stems[0].metadata.initial_gain, 2.0);
    }

    #[test]
    fn test_mono_source_upmixes_and_resamples() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(dir.path(), "other.wav", 0.5, 44100, 1);

        let manifest = write_manifest(
            dir.path(),
            concat!("stems:\n", "  - name: other\n", "    file: other.wav\n"),
        );

        let recording = load_recording(&manifest, 48000).unwrap();
        let stem = &recording.stems[0];

        // 0.5s at the target rate regardless of source rate
        assert!((stem.buffer.len() as i64 - 24000).abs() <= 2);
        // Upmixed: channels identical
        let s = stem.buffer[1000];
        assert_eq!(s.left, s.right);
    }

    #[test]
    fn test_metrics_recorded_per_stem() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(dir.path(), "vocals.wav", 0.2, 48000, 2);

        let manifest = write_manifest(
            dir.path(),
            concat!("stems:\n", "  - name: vocals\n", "    file: vocals.wav\n"),
        );

        let recording = load_recording(&manifest, 48000).unwrap();
        let metrics = &recording.metrics;

        assert_eq!(metrics.stems.len(), 1);
        assert_eq!(metrics.stems[0].name, "vocals");
        assert!(metrics.stems[0].bytes > 0);
        assert_eq!(metrics.stems[0].samples, 9600);
        assert_eq!(metrics.total_bytes, metrics.stems[0].bytes);
    }

    #[test]
    fn test_background_loader_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(dir.path(), "drums.wav", 0.1, 48000, 2);
        let manifest = write_manifest(
            dir.path(),
            concat!("stems:\n", "  - name: drums\n", "    file: drums.wav\n"),
        );

        let loader = StemLoader::spawn(48000);
        loader.load("key-1".into(), manifest).unwrap();

        // Poll until the background thread answers
        let mut result = None;
        for _ in 0..500 {
            if let Some(r) = loader.try_recv() {
                result = Some(r);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }

        let result = result.expect("loader thread should answer");
        assert_eq!(result.key, "key-1");
        assert_eq!(result.result.unwrap().stems.len(), 1);
    }
}
