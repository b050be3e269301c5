//! Headless practice player
//!
//! Usage: `ensemble-player <recording.yaml>`
//!
//! Starts the audio system, loads the recording's stems, restores the
//! persisted session, and plays to the natural end while printing the
//! transport position and compressor meter.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use ensemble_core::audio::{start_audio_system, AudioSystemResult};
use ensemble_core::engine::PlaybackEvent;
use ensemble_core::loader::load_recording;
use ensemble_player::{Session, YamlConfigStore};

fn main() -> Result<()> {
    env_logger::init();

    let Some(manifest) = std::env::args().nth(1) else {
        bail!("usage: ensemble-player <recording.yaml>");
    };

    let AudioSystemResult {
        handle,
        commands,
        events,
        transport,
        gain_reduction,
        sample_rate,
        ..
    } = start_audio_system().context("cannot start audio")?;

    log::info!(
        "audio running at {} Hz (~{:.1}ms latency)",
        sample_rate,
        handle.latency_ms()
    );

    let recording =
        load_recording(Path::new(&manifest), sample_rate).context("cannot load recording")?;

    for failure in &recording.failures {
        eprintln!("warning: stem '{}' skipped: {}", failure.name, failure.error);
    }
    if recording.stems.is_empty() {
        bail!("no stems could be loaded from {manifest}");
    }

    let store = Arc::new(YamlConfigStore::default_store());
    let mut session = Session::new(
        commands,
        events,
        transport,
        gain_reduction,
        sample_rate,
        store,
    );
    session.load_recording(recording);

    println!("{}: {} stems, {:.1}s", session.recording_key(), session.stems().len(), session.duration());
    session.play();

    loop {
        std::thread::sleep(Duration::from_millis(200));

        if session.poll_events().contains(&PlaybackEvent::Finished) {
            println!("\ndone");
            break;
        }

        print!(
            "\r{:6.1}s / {:.1}s   GR {:4.1} dB ",
            session.current_time(),
            session.duration(),
            session.gain_reduction_db()
        );
        use std::io::Write;
        let _ = std::io::stdout().flush();
    }

    Ok(())
}
