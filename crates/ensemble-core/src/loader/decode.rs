//! Stem audio decoding via Symphonia
//!
//! Decodes whatever byte stream the stem reference points at (WAV, FLAC,
//! MP3, OGG, AAC - everything Symphonia's `all` feature covers) into a
//! stereo f32 buffer at the engine's sample rate. Mono sources are upmixed,
//! multichannel sources are downmixed to the first stereo pair, and rate
//! mismatches are resolved with linear resampling at load time.

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::types::{StereoBuffer, StereoSample};

use super::LoadError;

/// Decode stem bytes to a stereo buffer at `target_rate`
pub fn decode_stem(
    bytes: Vec<u8>,
    extension: Option<&str>,
    target_rate: u32,
) -> Result<StereoBuffer, LoadError> {
    let (samples, source_rate, channels) = decode_bytes(bytes, extension)?;
    let stereo = to_stereo(&samples, channels);
    Ok(resample_linear(&stereo, source_rate, target_rate))
}

/// Decode bytes to interleaved f32 samples plus (rate, channel count)
fn decode_bytes(
    bytes: Vec<u8>,
    extension: Option<&str>,
) -> Result<(Vec<f32>, u32, u16), LoadError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| LoadError::Decode(format!("unsupported format: {e}")))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| LoadError::Decode("no audio track found".into()))?;

    let track_id = track.id;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| LoadError::Decode("unknown sample rate".into()))?;

    let channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(2);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| LoadError::Decode(format!("no decoder: {e}")))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => {
                log::warn!("error reading packet: {}", e);
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(e) => {
                log::warn!("error decoding packet: {}", e);
                continue;
            }
        };

        if sample_buf.is_none() {
            let spec = *decoded.spec();
            let duration = decoded.capacity() as u64;
            sample_buf = Some(SampleBuffer::new(duration, spec));
        }

        if let Some(ref mut buf) = sample_buf {
            buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buf.samples());
        }
    }

    if samples.is_empty() {
        return Err(LoadError::Decode("stream decoded to zero samples".into()));
    }

    Ok((samples, sample_rate, channels))
}

/// Fold interleaved samples of any channel count into a stereo buffer
fn to_stereo(samples: &[f32], channels: u16) -> StereoBuffer {
    match channels {
        0 | 1 => StereoBuffer::from_vec(samples.iter().map(|&s| StereoSample::mono(s)).collect()),
        2 => StereoBuffer::from_interleaved(&samples[..samples.len() - samples.len() % 2]),
        n => {
            // Keep the first stereo pair of wider layouts
            let n = n as usize;
            StereoBuffer::from_vec(
                samples
                    .chunks_exact(n)
                    .map(|frame| StereoSample::new(frame[0], frame[1]))
                    .collect(),
            )
        }
    }
}

/// Linear-interpolation resampler
///
/// Load-time quality tradeoff: linear interpolation is transparent enough
/// for practice material and costs one pass. Returns the input unchanged
/// when the rates already match.
fn resample_linear(input: &StereoBuffer, from_rate: u32, to_rate: u32) -> StereoBuffer {
    if from_rate == to_rate || input.is_empty() {
        return input.clone();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((input.len() as f64) / ratio).round() as usize;
    let src = input.as_slice();

    let mut out = StereoBuffer::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let idx = pos as usize;
        let frac = (pos - idx as f64) as f32;

        let a = src[idx.min(src.len() - 1)];
        let b = src[(idx + 1).min(src.len() - 1)];

        out.push(StereoSample::new(
            a.left + (b.left - a.left) * frac,
            a.right + (b.right - a.right) * frac,
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_upmix() {
        let samples = [0.1, 0.2, 0.3];
        let stereo = to_stereo(&samples, 1);
        assert_eq!(stereo.len(), 3);
        assert_eq!(stereo[1].left, 0.2);
        assert_eq!(stereo[1].right, 0.2);
    }

    #[test]
    fn test_multichannel_downmix_keeps_first_pair() {
        // 4-channel frames
        let samples = [0.1, 0.2, 0.9, 0.9, 0.3, 0.4, 0.9, 0.9];
        let stereo = to_stereo(&samples, 4);
        assert_eq!(stereo.len(), 2);
        assert_eq!(stereo[0].left, 0.1);
        assert_eq!(stereo[0].right, 0.2);
        assert_eq!(stereo[1].left, 0.3);
        assert_eq!(stereo[1].right, 0.4);
    }

    #[test]
    fn test_resample_identity() {
        let input = StereoBuffer::from_interleaved(&[0.1, 0.1, 0.2, 0.2]);
        let out = resample_linear(&input, 48000, 48000);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_resample_scales_length() {
        let input = StereoBuffer::silence(44100);
        let out = resample_linear(&input, 44100, 48000);
        assert_eq!(out.len(), 48000);
    }

    #[test]
    fn test_resample_interpolates_ramp() {
        // Linear ramp survives linear resampling exactly
        let mut input = StereoBuffer::silence(100);
        for (i, s) in input.iter_mut().enumerate() {
            *s = StereoSample::mono(i as f32 / 100.0);
        }
        let out = resample_linear(&input, 48000, 24000);
        assert_eq!(out.len(), 50);
        assert!((out[25].left - 0.5).abs() < 0.02);
    }

    #[test]
    fn test_decode_wav_bytes() {
        // Synthesize a small 16-bit stereo WAV in memory
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 48000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut bytes = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut bytes, spec).unwrap();
            for i in 0..4800 {
                let v = ((i as f32 * 0.01).sin() * 10000.0) as i16;
                writer.write_sample(v).unwrap();
                writer.write_sample(v).unwrap();
            }
            writer.finalize().unwrap();
        }

        let buffer = decode_stem(bytes.into_inner(), Some("wav"), 48000).unwrap();
        assert_eq!(buffer.len(), 4800);
        assert!(buffer.peak() > 0.1);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = decode_stem(vec![0u8; 64], Some("wav"), 48000).unwrap_err();
        assert!(matches!(err, LoadError::Decode(_)));
    }
}
