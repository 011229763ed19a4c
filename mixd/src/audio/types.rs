//! Core audio data types
//!
//! Defines the format descriptor and the in-memory PCM buffer used throughout
//! the pipeline.
//!
//! **Format:**
//! - Samples are f32 (floating point -1.0 to 1.0)
//! - Interleaved: [c0, c1, ..., cN, c0, c1, ...]
//! - One "frame" = one sample per channel

use std::fmt;

/// Sample rate and channel count of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    /// Frames per second
    pub sample_rate: u32,

    /// Interleaved channel count
    pub channels: u16,
}

impl AudioFormat {
    /// Create a format descriptor
    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// CD-quality stereo, the daemon's usual output format
    pub const fn cd_stereo() -> Self {
        Self::new(44100, 2)
    }

    /// Interleaved sample count for `frames` frames
    pub fn samples_for(&self, frames: usize) -> usize {
        frames * self.channels as usize
    }

    /// Whole frames contained in `samples` interleaved samples
    pub fn frames_in(&self, samples: usize) -> usize {
        if self.channels == 0 {
            return 0;
        }
        samples / self.channels as usize
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Hz/{}ch", self.sample_rate, self.channels)
    }
}

/// PcmBuffer holds a fully decoded source in RAM.
///
/// Sources are decoded once on the control thread when a branch is opened, so
/// the real-time thread only ever copies from memory.
#[derive(Debug, Clone)]
pub struct PcmBuffer {
    /// Interleaved samples at `format`
    samples: Vec<f32>,

    /// Native format of the decoded source
    format: AudioFormat,
}

impl PcmBuffer {
    /// Wrap decoded samples. Trailing samples that do not form a whole frame are dropped.
    pub fn new(mut samples: Vec<f32>, format: AudioFormat) -> Self {
        let whole = format.samples_for(format.frames_in(samples.len()));
        samples.truncate(whole);
        Self { samples, format }
    }

    /// Native format
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Interleaved samples
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Number of frames
    pub fn frames(&self) -> usize {
        self.format.frames_in(self.samples.len())
    }

    /// True when the buffer holds no frames
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        mixd_common::timing::frames_to_ms(self.frames(), self.format.sample_rate)
    }
}
