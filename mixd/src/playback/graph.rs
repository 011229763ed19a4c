//! The playback graph driven by the ticker
//!
//! `branches[i] → mixer input i → sink`. One tick:
//! 1. apply mixer commands, clear the mix block
//! 2. per branch: apply its commands, pull it if its input is connected
//! 3. write the mix block to the sink

use crate::audio::device::{OutputSink, SinkStats};
use crate::playback::branch::Branch;
use crate::playback::events::Outbox;
use crate::playback::mixer::Mixer;
use crate::playback::ticker::Tick;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Sink counters copied out by the ticker every tick
#[derive(Debug, Default)]
pub struct SinkStatsMirror {
    underruns: AtomicU64,
    overruns: AtomicU64,
}

impl SinkStatsMirror {
    pub fn load(&self) -> SinkStats {
        SinkStats {
            underruns: self.underruns.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
        }
    }

    fn store(&self, stats: SinkStats) {
        self.underruns.store(stats.underruns, Ordering::Relaxed);
        self.overruns.store(stats.overruns, Ordering::Relaxed);
    }
}

pub struct Graph {
    mixer: Mixer,
    branches: Vec<Branch>,
    sink: Box<dyn OutputSink>,
    outbox: Outbox,
    sink_stats: Arc<SinkStatsMirror>,
}

impl Graph {
    /// Assemble a graph. `branches[i]` must carry `BranchId::new(i)`.
    pub fn new(mixer: Mixer, branches: Vec<Branch>, sink: Box<dyn OutputSink>, outbox: Outbox) -> Self {
        debug_assert!(branches.iter().enumerate().all(|(i, b)| b.id().index() == i));
        debug_assert_eq!(branches.len(), mixer.input_count());
        Self {
            mixer,
            branches,
            sink,
            outbox,
            sink_stats: Arc::new(SinkStatsMirror::default()),
        }
    }

    /// Sink at the end of the graph
    pub fn sink(&self) -> &dyn OutputSink {
        self.sink.as_ref()
    }

    /// Sink counters, readable while the graph is attached
    pub fn sink_stats(&self) -> Arc<SinkStatsMirror> {
        Arc::clone(&self.sink_stats)
    }

    /// Tear down in order: branch chains by index, then the sink, then the mixer.
    ///
    /// Must only be called once the ticker has handed the graph back.
    pub fn teardown(self) {
        let Graph {
            mixer,
            mut branches,
            sink,
            outbox,
            ..
        } = self;

        for branch in branches.iter_mut() {
            if branch.take_chain().is_some() {
                debug!("Closed {} at teardown", branch.id());
            }
        }
        drop(branches);
        drop(sink);
        drop(mixer);
        drop(outbox);
    }
}

impl Tick for Graph {
    fn tick(&mut self) {
        self.mixer.begin();

        for branch in self.branches.iter_mut() {
            branch.apply_commands(&mut self.outbox);
            let input = branch.id().index();
            if !self.mixer.is_connected(input) {
                continue;
            }
            if let Some(block) = branch.pull(&mut self.outbox) {
                self.mixer.accumulate(input, block);
            }
        }

        self.sink.write(self.mixer.output());
        self.sink_stats.store(self.sink.stats());
    }
}
