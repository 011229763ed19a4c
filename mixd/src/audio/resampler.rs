//! Rate conversion stage using rubato
//!
//! Converts a source's native rate to the daemon's output rate, one tick at a
//! time. Uses `FastFixedOut` so every call yields exactly one tick of output
//! frames while the input requirement floats.
//!
//! All buffers are sized at construction from the resampler's own maxima; the
//! per-tick path only copies.

use crate::audio::source::{SourceRead, SourceStage};
use crate::error::{Error, Result};
use rubato::{FastFixedOut, PolynomialDegree, Resampler as RubatoResampler};
use tracing::debug;

/// Per-branch rate converter
pub struct RateConverter {
    channels: usize,
    frames_per_tick: usize,
    resampling: Option<Resampling>,
}

/// Working state when rates differ
struct Resampling {
    resampler: FastFixedOut<f32>,
    /// Interleaved staging buffer for one source read
    interleaved: Vec<f32>,
    planar_in: Vec<Vec<f32>>,
    planar_out: Vec<Vec<f32>>,
    /// Output frames of interpolator delay still to emit once the source ended
    flush_remaining: Option<usize>,
}

impl RateConverter {
    /// Create a converter from `input_rate` to `output_rate`.
    ///
    /// # Arguments
    /// - `channels`: Channel count of the source (conversion is per channel)
    /// - `frames_per_tick`: Output frames produced per call
    pub fn new(
        input_rate: u32,
        output_rate: u32,
        channels: u16,
        frames_per_tick: usize,
    ) -> Result<Self> {
        let channels = channels.max(1) as usize;

        if input_rate == output_rate {
            debug!("Rate converter passthrough at {}Hz", output_rate);
            return Ok(Self {
                channels,
                frames_per_tick,
                resampling: None,
            });
        }

        if input_rate == 0 || output_rate == 0 {
            return Err(Error::Wiring(format!(
                "Invalid rate conversion {}Hz -> {}Hz",
                input_rate, output_rate
            )));
        }

        debug!(
            "Rate converter {}Hz -> {}Hz ({} channels, {} frames/tick)",
            input_rate, output_rate, channels, frames_per_tick
        );

        let resampler = FastFixedOut::<f32>::new(
            output_rate as f64 / input_rate as f64,
            1.0, // fixed ratio, never adjusted at runtime
            PolynomialDegree::Septic,
            frames_per_tick,
            channels,
        )
        .map_err(|e| Error::Wiring(format!("Failed to create resampler: {}", e)))?;

        let max_in = resampler.input_frames_max();
        let max_out = resampler.output_frames_max();

        Ok(Self {
            channels,
            frames_per_tick,
            resampling: Some(Resampling {
                resampler,
                interleaved: vec![0.0; max_in * channels],
                planar_in: vec![vec![0.0; max_in]; channels],
                planar_out: vec![vec![0.0; max_out]; channels],
                flush_remaining: None,
            }),
        })
    }

    /// True when input and output rates match
    pub fn is_passthrough(&self) -> bool {
        self.resampling.is_none()
    }

    /// Output frames produced per call
    pub fn frames_per_tick(&self) -> usize {
        self.frames_per_tick
    }

    /// Output frames the interpolator lags behind its input
    pub fn output_delay(&self) -> usize {
        self.resampling
            .as_ref()
            .map_or(0, |state| state.resampler.output_delay())
    }

    /// Pull one tick from `source` and convert it into `out`.
    ///
    /// `out` must hold at least `frames_per_tick × channels` samples. The
    /// returned frame count refers to `out`. A source that runs short is padded
    /// with silence so the last partial chunk is still converted, and
    /// exhaustion is only reported once the interpolator delay has been
    /// flushed out with silent input.
    pub fn pull(&mut self, source: &mut dyn SourceStage, out: &mut [f32]) -> SourceRead {
        let channels = self.channels;
        let Some(state) = self.resampling.as_mut() else {
            let n = (self.frames_per_tick * channels).min(out.len());
            return source.read(&mut out[..n]);
        };

        if state.flush_remaining == Some(0) {
            return SourceRead {
                frames: 0,
                exhausted: true,
                restarts: 0,
            };
        }

        let needed = state.resampler.input_frames_next();
        let staging = &mut state.interleaved[..needed * channels];
        let mut flushing = state.flush_remaining.is_some();
        let read = if flushing {
            staging.fill(0.0);
            SourceRead::default()
        } else {
            let read = source.read(staging);
            staging[read.frames * channels..].fill(0.0);
            read
        };

        if read.exhausted {
            state.flush_remaining = Some(state.resampler.output_delay());
            // Nothing left of the source: this chunk is already the flush
            flushing = read.frames == 0;
        }

        for (frame_idx, frame) in staging.chunks_exact(channels).enumerate() {
            for (ch_idx, sample) in frame.iter().enumerate() {
                state.planar_in[ch_idx][frame_idx] = *sample;
            }
        }

        let produced = match state
            .resampler
            .process_into_buffer(&state.planar_in, &mut state.planar_out, None)
        {
            Ok((_, frames_out)) => frames_out,
            Err(_) => {
                return SourceRead {
                    frames: 0,
                    exhausted: true,
                    restarts: read.restarts,
                };
            }
        };

        let mut frames = produced.min(out.len() / channels);
        let exhausted = match state.flush_remaining.as_mut() {
            None => false,
            Some(remaining) if flushing => {
                frames = frames.min(*remaining);
                *remaining -= frames;
                *remaining == 0
            }
            Some(remaining) => *remaining == 0,
        };

        for (frame_idx, frame) in out.chunks_exact_mut(channels).take(frames).enumerate() {
            for (ch_idx, sample) in frame.iter_mut().enumerate() {
                *sample = state.planar_out[ch_idx][frame_idx];
            }
        }

        SourceRead {
            frames,
            exhausted,
            restarts: read.restarts,
        }
    }
}
