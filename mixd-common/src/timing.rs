//! Frame and period timing helpers
//!
//! The daemon moves audio in fixed-size blocks: one block per scheduler tick.
//! All conversions here work in **frames** (one sample per channel), never in
//! individual interleaved samples, so they hold for any channel count.
//!
//! # Examples
//!
//! ```rust
//! use mixd_common::timing::*;
//! use std::time::Duration;
//!
//! // 10 ms tick at 44.1 kHz
//! assert_eq!(frames_per_tick(44100, Duration::from_millis(10)), 441);
//!
//! // 200 ms of stereo audio at 48 kHz, in interleaved samples
//! assert_eq!(ms_to_samples(200, 48000, 2), 19_200);
//! ```

use std::time::Duration;

/// Lowest sample rate the daemon accepts
pub const MIN_SAMPLE_RATE: u32 = 8_000;

/// Highest sample rate the daemon accepts
pub const MAX_SAMPLE_RATE: u32 = 192_000;

/// Number of frames produced by one scheduler tick.
///
/// Truncates toward zero but never returns less than one frame, so a valid
/// configuration always moves audio.
pub fn frames_per_tick(sample_rate: u32, interval: Duration) -> usize {
    let frames = (sample_rate as u128 * interval.as_micros()) / 1_000_000;
    (frames as usize).max(1)
}

/// Convert a duration in milliseconds to frames at `sample_rate`.
pub fn ms_to_frames(milliseconds: u64, sample_rate: u32) -> usize {
    ((milliseconds as u128 * sample_rate as u128) / 1000) as usize
}

/// Convert a duration in milliseconds to interleaved samples.
pub fn ms_to_samples(milliseconds: u64, sample_rate: u32, channels: u16) -> usize {
    ms_to_frames(milliseconds, sample_rate) * channels as usize
}

/// Convert a frame count at `sample_rate` to milliseconds (truncating).
pub fn frames_to_ms(frames: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    ((frames as u128 * 1000) / sample_rate as u128) as u64
}

/// True if `sample_rate` lies within the supported range.
pub fn is_supported_rate(sample_rate: u32) -> bool {
    (MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate)
}
