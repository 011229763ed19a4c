//! Channel count adaptation stage
//!
//! Maps interleaved frames from a source channel layout to the daemon's
//! output layout. Pure per-sample arithmetic, no allocation: safe on the
//! real-time thread.
//!
//! Mapping rules:
//! - Same count: copy
//! - 1 → N: duplicate the mono sample to every output channel
//! - N → 1: average all input channels
//! - N → M, M > N: repeat input channels cyclically
//! - N → M, 1 < M < N: keep the first M channels

/// Channel adapter configured for one input/output channel pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelAdapter {
    input_channels: u16,
    output_channels: u16,
}

impl ChannelAdapter {
    /// Create an adapter. Both counts must be at least 1.
    pub fn new(input_channels: u16, output_channels: u16) -> Self {
        Self {
            input_channels: input_channels.max(1),
            output_channels: output_channels.max(1),
        }
    }

    /// Input channel count
    pub fn input_channels(&self) -> u16 {
        self.input_channels
    }

    /// Output channel count
    pub fn output_channels(&self) -> u16 {
        self.output_channels
    }

    /// True when no conversion is needed
    pub fn is_passthrough(&self) -> bool {
        self.input_channels == self.output_channels
    }

    /// Convert interleaved frames.
    ///
    /// Processes `min(input frames, output frames)` frames and returns that count.
    pub fn process(&self, input: &[f32], output: &mut [f32]) -> usize {
        let in_ch = self.input_channels as usize;
        let out_ch = self.output_channels as usize;
        let frames = (input.len() / in_ch).min(output.len() / out_ch);

        if in_ch == out_ch {
            let n = frames * in_ch;
            output[..n].copy_from_slice(&input[..n]);
            return frames;
        }

        for (in_frame, out_frame) in input
            .chunks_exact(in_ch)
            .zip(output.chunks_exact_mut(out_ch))
            .take(frames)
        {
            if out_ch == 1 {
                let sum: f32 = in_frame.iter().sum();
                out_frame[0] = sum / in_ch as f32;
            } else if in_ch == 1 {
                out_frame.fill(in_frame[0]);
            } else {
                for (o, sample) in out_frame.iter_mut().enumerate() {
                    // Cyclic repeat when widening; truncation falls out when narrowing
                    *sample = in_frame[o % in_ch];
                }
            }
        }

        frames
    }
}
