//! CPAL audio backend
//!
//! Owns the single output stream. The stream callback exclusively owns the
//! `PlayerEngine`; the control thread talks to it only through the
//! lock-free command queue and reads state back through atomics:
//!
//! ```text
//! ┌──────────────────┐                    ┌─────────────────────┐
//! │  Control thread  │───push()──────────►│   Command queue     │
//! │  (orchestrator)  │                    │  (lock-free SPSC)   │
//! └──────────────────┘                    └──────────┬──────────┘
//!         ▲                                          │ pop()
//!         │ Relaxed atomics + event queue            ▼
//! ┌──────────────────┐                    ┌─────────────────────┐
//! │ TransportAtomics │◄───────────────────│  CPAL audio thread  │
//! │ GainReduction    │     sync writes    │ (owns PlayerEngine) │
//! └──────────────────┘                    └─────────────────────┘
//! ```

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleFormat, Stream, StreamConfig, SupportedBufferSize};

use std::sync::Arc;

use crate::effects::GainReductionMeter;
use crate::engine::{
    command_channel, event_channel, CommandSender, EventReceiver, PlayerEngine, TransportAtomics,
};
use crate::types::{StereoBuffer, MAX_BUFFER_SIZE};

use super::error::{AudioError, AudioResult};

/// Preferred callback size in frames (~10.7ms at 48kHz)
const PREFERRED_BUFFER_SIZE: u32 = 512;

/// Handle to the running audio system
///
/// Keeps the output stream alive. Drop this to stop audio.
pub struct AudioHandle {
    _stream: Stream,
    sample_rate: u32,
    buffer_size: u32,
}

impl AudioHandle {
    /// Sample rate of the audio system
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Requested callback size in frames
    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    /// One-way output latency in milliseconds
    pub fn latency_ms(&self) -> f32 {
        (self.buffer_size as f32 / self.sample_rate as f32) * 1000.0
    }
}

/// Everything the control thread needs after startup
pub struct AudioSystemResult {
    /// Keeps audio alive (drop to stop)
    pub handle: AudioHandle,
    /// Lock-free command sender into the engine
    pub commands: CommandSender,
    /// Lock-free event receiver from the engine
    pub events: EventReceiver,
    /// Transport state for lock-free reads
    pub transport: Arc<TransportAtomics>,
    /// Compressor gain-reduction meter
    pub gain_reduction: GainReductionMeter,
    pub sample_rate: u32,
    pub buffer_size: u32,
    pub latency_ms: f32,
}

/// Start the audio system on the default output device
pub fn start_audio_system() -> AudioResult<AudioSystemResult> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(AudioError::NoDevice)?;

    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Using audio device: {}", device_name);

    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::DeviceConfig(e.to_string()))?;

    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();

    // Prefer a fixed buffer size when the device advertises a usable range
    let (cpal_buffer_size, buffer_size) = match supported.buffer_size() {
        SupportedBufferSize::Range { min, max } => {
            let frames = PREFERRED_BUFFER_SIZE.clamp(*min, *max);
            (CpalBufferSize::Fixed(frames), frames)
        }
        SupportedBufferSize::Unknown => (CpalBufferSize::Default, PREFERRED_BUFFER_SIZE),
    };

    let stream_config = StreamConfig {
        channels,
        sample_rate: supported.sample_rate(),
        buffer_size: cpal_buffer_size,
    };

    let latency_ms = (buffer_size as f32 / sample_rate as f32) * 1000.0;
    log::info!(
        "Audio config: {} channels, {}Hz, {} frames (~{:.1}ms latency)",
        channels,
        sample_rate,
        buffer_size,
        latency_ms
    );

    let (commands, command_rx) = command_channel();
    let (event_tx, events) = event_channel();

    let mut engine = PlayerEngine::new(sample_rate, command_rx, event_tx);
    let transport = engine.transport_atomics();
    let gain_reduction = engine.gain_reduction_meter();

    if supported.sample_format() != SampleFormat::F32 {
        return Err(AudioError::UnsupportedFormat(format!(
            "{:?}",
            supported.sample_format()
        )));
    }

    // Pre-allocated work buffer; the callback never allocates
    let mut work = StereoBuffer::silence(MAX_BUFFER_SIZE);
    let out_channels = channels as usize;

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let frames = data.len() / out_channels;
                work.set_len_from_capacity(frames.min(MAX_BUFFER_SIZE));
                engine.process(&mut work);
                write_interleaved(&work, data, out_channels);
            },
            |e| log::error!("audio stream error: {}", e),
            None,
        )
        .map_err(|e| AudioError::StreamBuild(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamPlay(e.to_string()))?;

    log::info!("Audio stream started");

    Ok(AudioSystemResult {
        handle: AudioHandle {
            _stream: stream,
            sample_rate,
            buffer_size,
        },
        commands,
        events,
        transport,
        gain_reduction,
        sample_rate,
        buffer_size,
        latency_ms,
    })
}

/// Spread the stereo work buffer across the device's channel layout
fn write_interleaved(work: &StereoBuffer, data: &mut [f32], channels: usize) {
    match channels {
        1 => {
            for (frame, sample) in data.iter_mut().zip(work.iter()) {
                *frame = (sample.left + sample.right) * 0.5;
            }
        }
        2 => {
            let interleaved = work.as_interleaved();
            let n = interleaved.len().min(data.len());
            data[..n].copy_from_slice(&interleaved[..n]);
            data[n..].fill(0.0);
        }
        n => {
            for (frame, sample) in data.chunks_mut(n).zip(work.iter()) {
                frame.fill(0.0);
                frame[0] = sample.left;
                if frame.len() > 1 {
                    frame[1] = sample.right;
                }
            }
        }
    }
}
