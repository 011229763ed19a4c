//! Source stages: the head of every branch chain
//!
//! A source produces interleaved f32 frames at its own native format. The
//! real-time thread calls [`SourceStage::read`] once per tick, so
//! implementations must not block, allocate or touch the filesystem there.

use crate::audio::types::{AudioFormat, PcmBuffer};
use tracing::debug;

/// Result of one source read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceRead {
    /// Frames written to the output slice
    pub frames: usize,

    /// Source has no more data; `frames` may be short
    pub exhausted: bool,

    /// Number of times the source rewound to its start during this read
    pub restarts: u32,
}

/// Head stage of a branch
pub trait SourceStage: Send {
    /// Native format of the produced frames
    fn format(&self) -> AudioFormat;

    /// Fill `out` with interleaved frames.
    ///
    /// `out.len()` is a whole number of frames in [`SourceStage::format`].
    fn read(&mut self, out: &mut [f32]) -> SourceRead;

    /// Enable or disable restart on exhaustion.
    ///
    /// Sources that cannot rewind ignore it.
    fn set_loop(&mut self, _enabled: bool) {}
}

/// File-backed source playing a fully decoded buffer
pub struct PcmFileSource {
    buffer: PcmBuffer,
    /// Next sample index (not frame)
    position: usize,
    looping: bool,
}

impl PcmFileSource {
    /// Wrap a decoded buffer, positioned at its start
    pub fn new(buffer: PcmBuffer) -> Self {
        debug!(
            "File source: {} frames at {}",
            buffer.frames(),
            buffer.format()
        );
        Self {
            buffer,
            position: 0,
            looping: false,
        }
    }

    /// Current position in frames
    pub fn position_frames(&self) -> usize {
        self.buffer.format().frames_in(self.position)
    }

    /// True when looping is enabled
    pub fn is_looping(&self) -> bool {
        self.looping
    }
}

impl SourceStage for PcmFileSource {
    fn format(&self) -> AudioFormat {
        self.buffer.format()
    }

    fn read(&mut self, out: &mut [f32]) -> SourceRead {
        let samples = self.buffer.samples();
        let channels = self.buffer.format().channels.max(1) as usize;
        let wanted = out.len() - out.len() % channels;
        let mut filled = 0;
        let mut result = SourceRead::default();

        while filled < wanted {
            let available = samples.len() - self.position;
            if available == 0 {
                if self.looping && !samples.is_empty() {
                    self.position = 0;
                    result.restarts += 1;
                    continue;
                }
                result.exhausted = true;
                break;
            }

            let n = available.min(wanted - filled);
            out[filled..filled + n].copy_from_slice(&samples[self.position..self.position + n]);
            self.position += n;
            filled += n;
        }

        // A file ending exactly on a read boundary reports exhaustion now rather than
        // one silent tick later
        if !self.looping && self.position == samples.len() {
            result.exhausted = true;
        }

        result.frames = filled / channels;
        result
    }

    fn set_loop(&mut self, enabled: bool) {
        self.looping = enabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(frames: usize, channels: u16) -> PcmFileSource {
        let samples = (0..frames * channels as usize).map(|i| i as f32).collect();
        PcmFileSource::new(PcmBuffer::new(samples, AudioFormat::new(8000, channels)))
    }

    #[test]
    fn test_reads_in_order_then_exhausts() {
        let mut source = ramp(5, 1);
        let mut out = [0.0; 3];

        let first = source.read(&mut out);
        assert_eq!(first.frames, 3);
        assert!(!first.exhausted);
        assert_eq!(out, [0.0, 1.0, 2.0]);

        let second = source.read(&mut out);
        assert_eq!(second.frames, 2);
        assert!(second.exhausted);
        assert_eq!(&out[..2], &[3.0, 4.0]);
    }

    #[test]
    fn test_exact_boundary_reports_exhaustion() {
        let mut source = ramp(4, 2);
        let mut out = [0.0; 8];
        let read = source.read(&mut out);
        assert_eq!(read.frames, 4);
        assert!(read.exhausted);
    }

    #[test]
    fn test_loop_wraps_and_counts_restarts() {
        let mut source = ramp(2, 1);
        source.set_loop(true);
        let mut out = [0.0; 7];

        let read = source.read(&mut out);
        assert_eq!(read.frames, 7);
        assert!(!read.exhausted);
        assert_eq!(read.restarts, 3);
        assert_eq!(out, [0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0]);
        assert_eq!(source.position_frames(), 1);
    }

    #[test]
    fn test_disabling_loop_lets_source_end() {
        let mut source = ramp(2, 1);
        source.set_loop(true);
        let mut out = [0.0; 3];
        source.read(&mut out);

        source.set_loop(false);
        let read = source.read(&mut out);
        assert_eq!(read.frames, 1);
        assert!(read.exhausted);
    }
}
