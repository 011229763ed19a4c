//! In-memory capture device
//!
//! Records every mixed sample instead of playing it. Used for headless runs
//! and by the test suites, which never need audio hardware.

use crate::audio::device::{OutputSink, PlaybackDevice};
use crate::audio::types::AudioFormat;
use crate::error::Result;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Upper bound on retained samples; older samples are discarded past it
const DEFAULT_MAX_SAMPLES: usize = 44100 * 2 * 120;

#[derive(Debug, Default)]
struct Recording {
    samples: Vec<f32>,
    format: Option<AudioFormat>,
    writes: u64,
}

/// Capture device handle. Clones share the same recording.
#[derive(Debug, Clone)]
pub struct CaptureDevice {
    name: String,
    /// Format imposed on opened sinks (None = accept the requested format)
    forced_format: Option<AudioFormat>,
    max_samples: usize,
    recording: Arc<Mutex<Recording>>,
}

impl CaptureDevice {
    /// Capture device accepting any requested format
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            forced_format: None,
            max_samples: DEFAULT_MAX_SAMPLES,
            recording: Arc::new(Mutex::new(Recording::default())),
        }
    }

    /// Capture device that behaves like hardware fixed at `format`
    pub fn with_format(name: impl Into<String>, format: AudioFormat) -> Self {
        Self {
            forced_format: Some(format),
            ..Self::new(name)
        }
    }

    /// Copy of everything recorded so far
    pub fn samples(&self) -> Vec<f32> {
        self.lock().samples.clone()
    }

    /// Drain everything recorded so far
    pub fn take_samples(&self) -> Vec<f32> {
        std::mem::take(&mut self.lock().samples)
    }

    /// Number of `write` calls received
    pub fn writes(&self) -> u64 {
        self.lock().writes
    }

    /// Format of the most recently opened sink
    pub fn format(&self) -> Option<AudioFormat> {
        self.lock().format
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recording> {
        // A panicking test thread must not hide the recording from the others
        self.recording.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PlaybackDevice for CaptureDevice {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn open(&self, requested: AudioFormat, _buffer_frames: Option<u32>) -> Result<Box<dyn OutputSink>> {
        let format = self.forced_format.unwrap_or(requested);
        debug!("Capture device '{}' opened at {}", self.name, format);

        let mut recording = self.lock();
        recording.format = Some(format);
        recording.samples.clear();
        recording.writes = 0;
        drop(recording);

        Ok(Box::new(CaptureSink {
            format,
            max_samples: self.max_samples,
            recording: Arc::clone(&self.recording),
        }))
    }
}

/// Sink half of a [`CaptureDevice`]
pub struct CaptureSink {
    format: AudioFormat,
    max_samples: usize,
    recording: Arc<Mutex<Recording>>,
}

impl OutputSink for CaptureSink {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn write(&mut self, samples: &[f32]) {
        // try_lock: a reader holding the lock costs one dropped block, never a stall
        let Ok(mut recording) = self.recording.try_lock() else {
            return;
        };
        recording.writes += 1;
        recording.samples.extend_from_slice(samples);
        if recording.samples.len() > self.max_samples {
            let excess = recording.samples.len() - self.max_samples / 2;
            recording.samples.drain(..excess);
        }
    }
}
