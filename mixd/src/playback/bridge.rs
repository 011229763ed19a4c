//! Inter-thread bridge between a virtual device writer and branch 0
//!
//! Producers (any thread) push interleaved samples under a short mutex hold.
//! When the queue is full the oldest samples are overwritten. The real-time
//! consumer only ever `try_lock`s: on contention it plays silence for that
//! tick instead of waiting.

use crate::audio::source::{SourceRead, SourceStage};
use crate::audio::types::AudioFormat;
use ringbuf::{traits::*, HeapRb};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Bounded sample queue in one fixed format
pub struct Bridge {
    ring: Mutex<HeapRb<f32>>,
    format: AudioFormat,
    capacity: usize,
    dropped: AtomicU64,
    contended: AtomicU64,
}

impl Bridge {
    /// Create a bridge holding `capacity_frames` frames of `format`
    pub fn new(format: AudioFormat, capacity_frames: usize) -> Self {
        let capacity = format.samples_for(capacity_frames.max(1));
        Self {
            ring: Mutex::new(HeapRb::new(capacity)),
            format,
            capacity,
            dropped: AtomicU64::new(0),
            contended: AtomicU64::new(0),
        }
    }

    /// Sample format carried by the bridge
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Capacity in samples
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Push interleaved samples, overwriting the oldest on overflow.
    ///
    /// A trailing partial frame is ignored. Returns the number of samples
    /// dropped to make room.
    pub fn push(&self, samples: &[f32]) -> usize {
        let whole = self.format.samples_for(self.format.frames_in(samples.len()));
        let samples = &samples[..whole];
        if samples.is_empty() {
            return 0;
        }

        let mut ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        let dropped = (ring.occupied_len() + samples.len()).saturating_sub(self.capacity);
        ring.push_slice_overwrite(samples);
        drop(ring);

        if dropped > 0 {
            self.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
        }
        dropped
    }

    /// Pop up to `out.len()` samples without blocking.
    ///
    /// Returns None when a producer holds the lock.
    pub fn try_pop(&self, out: &mut [f32]) -> Option<usize> {
        match self.ring.try_lock() {
            Ok(mut ring) => Some(ring.pop_slice(out)),
            Err(_) => {
                self.contended.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Samples currently queued
    pub fn occupied(&self) -> usize {
        self.ring
            .lock()
            .map(|ring| ring.occupied_len())
            .unwrap_or(0)
    }

    /// Total samples dropped by overflow
    pub fn dropped_samples(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Ticks that found the bridge locked by a producer
    pub fn contended_reads(&self) -> u64 {
        self.contended.load(Ordering::Relaxed)
    }
}

/// Source stage draining a [`Bridge`]. Never exhausts.
pub struct BridgeSource {
    bridge: Arc<Bridge>,
}

impl BridgeSource {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self { bridge }
    }
}

impl SourceStage for BridgeSource {
    fn format(&self) -> AudioFormat {
        self.bridge.format()
    }

    fn read(&mut self, out: &mut [f32]) -> SourceRead {
        let popped = self.bridge.try_pop(out).unwrap_or(0);
        out[popped..].fill(0.0);
        SourceRead {
            frames: self.bridge.format().frames_in(out.len()),
            exhausted: false,
            restarts: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_then_read_in_order() {
        let bridge = Arc::new(Bridge::new(AudioFormat::new(8000, 1), 8));
        assert_eq!(bridge.push(&[0.1, 0.2, 0.3]), 0);

        let mut source = BridgeSource::new(Arc::clone(&bridge));
        let mut out = [9.0; 4];
        let read = source.read(&mut out);
        assert_eq!(read.frames, 4);
        assert!(!read.exhausted);
        assert_eq!(out, [0.1, 0.2, 0.3, 0.0]);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let bridge = Bridge::new(AudioFormat::new(8000, 2), 2);
        assert_eq!(bridge.capacity(), 4);

        bridge.push(&[1.0, 1.0, 2.0, 2.0]);
        let dropped = bridge.push(&[3.0, 3.0]);
        assert_eq!(dropped, 2);
        assert_eq!(bridge.dropped_samples(), 2);

        let mut out = [0.0; 4];
        assert_eq!(bridge.try_pop(&mut out), Some(4));
        assert_eq!(out, [2.0, 2.0, 3.0, 3.0]);
    }

    #[test]
    fn test_partial_frame_is_ignored() {
        let bridge = Bridge::new(AudioFormat::new(8000, 2), 4);
        bridge.push(&[0.5, 0.5, 0.7]);
        assert_eq!(bridge.occupied(), 2);
    }

    #[test]
    fn test_contended_read_yields_silence() {
        let bridge = Arc::new(Bridge::new(AudioFormat::new(8000, 1), 4));
        bridge.push(&[0.5, 0.5]);
        let mut source = BridgeSource::new(Arc::clone(&bridge));

        let guard = bridge.ring.lock().unwrap();
        let mut out = [9.0; 2];
        let read = source.read(&mut out);
        drop(guard);

        assert_eq!(read.frames, 2);
        assert_eq!(out, [0.0, 0.0]);
        assert_eq!(bridge.contended_reads(), 1);
        assert_eq!(bridge.occupied(), 2);
    }
}
