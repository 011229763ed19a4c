//! Audio test file generation
//!
//! Writes small 16-bit WAV files with known content so the decode, rate
//! conversion and mix stages can be checked sample by sample.

use hound::{SampleFormat, WavSpec, WavWriter};
use std::f32::consts::PI;
use std::path::Path;

fn wav_spec(sample_rate: u32, channels: u16) -> WavSpec {
    WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Generate a WAV file holding `frames` frames of a constant level.
///
/// `level` is in -1.0..1.0 and is quantized as `level * 32768`, so 0.5 and
/// 0.25 decode back exactly.
pub fn generate_constant_wav<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    channels: u16,
    frames: usize,
    level: f32,
) -> Result<(), hound::Error> {
    let mut writer = WavWriter::create(path, wav_spec(sample_rate, channels))?;
    let value = (level * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;

    for _ in 0..frames * channels as usize {
        writer.write_sample(value)?;
    }

    writer.finalize()?;
    Ok(())
}

/// Generate a sine wave WAV file, same value on every channel.
pub fn generate_sine_wav<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    channels: u16,
    duration_ms: u64,
    frequency_hz: f32,
    amplitude: f32,
) -> Result<(), hound::Error> {
    let mut writer = WavWriter::create(path, wav_spec(sample_rate, channels))?;
    let total_frames = (sample_rate as u64 * duration_ms) / 1000;

    for frame in 0..total_frames {
        let t = frame as f32 / sample_rate as f32;
        let value = ((2.0 * PI * frequency_hz * t).sin() * amplitude * i16::MAX as f32) as i16;
        for _ in 0..channels {
            writer.write_sample(value)?;
        }
    }

    writer.finalize()?;
    Ok(())
}
