//! Lock-free sample ring between the ticker and the device callback
//!
//! Single producer (the ticker thread writing mixed ticks) and single consumer
//! (the cpal callback). Neither side ever blocks: a full ring drops the tail
//! of the write (overrun), an empty ring yields silence (underrun).

use ringbuf::{traits::*, HeapRb};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Shared counters, readable from the control thread
#[derive(Debug, Default)]
pub struct RingCounters {
    underruns: AtomicU64,
    overruns: AtomicU64,
}

impl RingCounters {
    /// Callbacks that found fewer samples than requested
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Writes that did not fit entirely
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }
}

/// Sample ring buffer, split before use
pub struct SampleRingBuffer {
    buffer: HeapRb<f32>,
    counters: Arc<RingCounters>,
}

impl SampleRingBuffer {
    /// Create a ring holding `capacity` interleaved samples
    pub fn new(capacity: usize) -> Self {
        debug!("Creating sample ring buffer with capacity: {} samples", capacity);
        Self {
            buffer: HeapRb::new(capacity.max(1)),
            counters: Arc::new(RingCounters::default()),
        }
    }

    /// Split into producer and consumer halves
    pub fn split(self) -> (SampleProducer, SampleConsumer) {
        let (producer, consumer) = self.buffer.split();
        (
            SampleProducer {
                producer,
                counters: Arc::clone(&self.counters),
            },
            SampleConsumer {
                consumer,
                counters: self.counters,
            },
        )
    }
}

/// Producer half (ticker thread)
pub struct SampleProducer {
    producer: ringbuf::HeapProd<f32>,
    counters: Arc<RingCounters>,
}

impl SampleProducer {
    /// Push as many samples as fit. Returns the number pushed.
    pub fn push(&mut self, samples: &[f32]) -> usize {
        let pushed = self.producer.push_slice(samples);
        if pushed < samples.len() {
            self.counters.overruns.fetch_add(1, Ordering::Relaxed);
        }
        pushed
    }

    /// Shared counters
    pub fn counters(&self) -> Arc<RingCounters> {
        Arc::clone(&self.counters)
    }

    /// Samples currently queued
    pub fn occupied_len(&self) -> usize {
        self.producer.occupied_len()
    }

    /// Ring capacity in samples
    pub fn capacity(&self) -> usize {
        self.producer.capacity().into()
    }
}

/// Consumer half (device callback)
pub struct SampleConsumer {
    consumer: ringbuf::HeapCons<f32>,
    counters: Arc<RingCounters>,
}

impl SampleConsumer {
    /// Fill `out` from the ring, padding with silence on underrun.
    ///
    /// Returns the number of real samples copied.
    pub fn pop_into(&mut self, out: &mut [f32]) -> usize {
        let popped = self.consumer.pop_slice(out);
        if popped < out.len() {
            out[popped..].fill(0.0);
            self.counters.underruns.fetch_add(1, Ordering::Relaxed);
        }
        popped
    }

    /// Samples currently queued
    pub fn occupied_len(&self) -> usize {
        self.consumer.occupied_len()
    }
}
