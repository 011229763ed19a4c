//! Daemon facade: device ownership, branch allocation and lifecycle
//!
//! **Lifecycle:**
//! - [`Daemon::create`] opens the output device, builds the whole graph
//!   (bridge branch 0, player branches `1..=capacity`, mixer, sink), starts the
//!   event dispatcher and attaches the ticker
//! - [`Daemon::destroy`] detaches the ticker first (joining its thread), then
//!   tears down branches in index order, the sink and the mixer, and finally
//!   stops the dispatcher
//!
//! Every control operation only touches atomics or enqueues commands, so it
//! is safe from any thread and never waits for the real-time thread.

use crate::audio::decoder::SimpleDecoder;
use crate::audio::device::DeviceRegistry;
use crate::audio::source::PcmFileSource;
use crate::audio::types::AudioFormat;
use crate::error::{Error, Result};
use crate::playback::branch::{Branch, BranchCommand, BranchState, BranchStatus, Chain};
use crate::playback::events::{self, EventDispatcher};
use crate::playback::graph::{Graph, SinkStatsMirror};
use crate::playback::mixer::{self, MixerControl, UNITY_GAIN};
use crate::playback::pool::{BranchPool, CompletionCallback, UserTag};
use crate::playback::ticker::{Ticker, TickerStats};
use crate::playback::virtual_device::VirtualDevice;
use mixd_common::{timing, BranchId, DaemonConfig, DaemonEvent};
use serde::Serialize;
use std::any::Any;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Broadcast channel depth for public events
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Real-time notification ring entries per branch
const EVENT_RING_PER_BRANCH: usize = 16;

/// Runtime counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DaemonStats {
    /// Ticks executed
    pub ticks: u64,
    /// Ticks that started after their deadline
    pub late_ticks: u64,
    /// Device callbacks that found too little audio
    pub sink_underruns: u64,
    /// Ticks whose mix did not fit the device queue
    pub sink_overruns: u64,
    /// Samples dropped by virtual device bridge overflow
    pub bridge_dropped_samples: u64,
    /// Branches currently playing
    pub playing_branches: usize,
}

/// The sound mixing daemon
pub struct Daemon {
    pool: Arc<BranchPool>,
    mixer: MixerControl,
    ticker: Ticker<Graph>,
    dispatcher: Option<EventDispatcher>,
    virtual_device: VirtualDevice,
    events: broadcast::Sender<DaemonEvent>,
    output: AudioFormat,
    frames_per_tick: usize,
    device_name: String,
    ticker_stats: Arc<TickerStats>,
    sink_stats: Arc<SinkStatsMirror>,
    destroyed: bool,
}

impl Daemon {
    /// Open the output device and start mixing.
    ///
    /// # Arguments
    /// - `registry`: Where devices are looked up
    /// - `device_name`: Preferred device; falls back to `config.device`, then
    ///   to the registry default
    /// - `config`: Daemon configuration
    ///
    /// # Errors
    /// - `NoDeviceAvailable`: neither the named device nor a default exists
    /// - `Config`: invalid configuration
    /// - `AudioOutput`: the device could not be opened
    /// - `Wiring`: a worker thread could not be started
    pub fn create(
        registry: &dyn DeviceRegistry,
        device_name: Option<&str>,
        config: &DaemonConfig,
    ) -> Result<Self> {
        config.validate()?;

        let wanted = device_name.or(config.device.as_deref());
        let device = match wanted {
            Some(name) => registry.find(name).or_else(|| {
                warn!("Requested device '{}' not found, falling back to default device", name);
                registry.default_device()
            }),
            None => registry.default_device(),
        }
        .ok_or(Error::NoDeviceAvailable)?;

        let device_name = device.name();
        let requested = AudioFormat::new(config.sample_rate, config.channels);
        let sink = device.open(requested, config.sink_buffer_frames)?;
        let output = sink.format();

        let frames_per_tick = timing::frames_per_tick(output.sample_rate, config.tick_interval());
        let block_samples = output.samples_for(frames_per_tick);
        info!(
            "Opened '{}' at {} ({} frames per {} ms tick)",
            device_name, output, frames_per_tick, config.tick_interval_ms
        );

        let (pool, receivers) = BranchPool::new(config.capacity);
        let pool = Arc::new(pool);

        let (mixer, mixer_control) = mixer::mixer(config.capacity + 1, block_samples);
        let branches: Vec<Branch> = receivers
            .into_iter()
            .enumerate()
            .map(|(index, (status, commands))| {
                Branch::new(BranchId::new(index), status, commands, block_samples)
            })
            .collect();
        for id in pool.ids() {
            mixer_control.connect(id.index());
        }

        let (outbox, inbox) = events::outbox((config.capacity + 1) * EVENT_RING_PER_BRANCH);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let dispatcher = EventDispatcher::start(
            inbox,
            Arc::clone(&pool),
            events_tx.clone(),
            config.tick_interval(),
        )?;

        let graph = Graph::new(mixer, branches, sink, outbox);
        let sink_stats = graph.sink_stats();

        let mut ticker = Ticker::new(config.tick_interval());
        let ticker_stats = ticker.stats();
        ticker.attach(graph)?;

        let virtual_device = VirtualDevice::new(
            config.virtual_device_name.clone(),
            Arc::clone(&pool),
            output,
            frames_per_tick,
            config.bridge_capacity_ms,
            events_tx.clone(),
        );

        info!(
            "Daemon started: {} player branches, virtual device '{}'",
            config.capacity, config.virtual_device_name
        );

        Ok(Self {
            pool,
            mixer: mixer_control,
            ticker,
            dispatcher: Some(dispatcher),
            virtual_device,
            events: events_tx,
            output,
            frames_per_tick,
            device_name,
            ticker_stats,
            sink_stats,
            destroyed: false,
        })
    }

    /// Reserve a free player branch.
    ///
    /// The branch's gain is reset to unity and looping is turned off.
    ///
    /// # Errors
    /// `NoFreeBranch` when every player branch is in use
    pub fn allocate(&self) -> Result<BranchId> {
        let Some(id) = self.pool.allocate() else {
            warn!("No free branch (capacity {})", self.pool.capacity());
            return Err(Error::NoFreeBranch);
        };

        self.mixer.set_gain(id.index(), UNITY_GAIN);
        self.pool.send(id, BranchCommand::SetLoop(false));
        Ok(id)
    }

    /// Open `target` on `branch`, force-closing any current session first.
    ///
    /// The file is decoded fully on the calling thread. On failure the branch
    /// is left `Closed`.
    ///
    /// # Errors
    /// - `InvalidBranch`: bridge or out-of-range index
    /// - `CannotOpenTarget`: the file could not be read or decoded
    pub fn open(&self, branch: BranchId, target: impl AsRef<Path>) -> Result<()> {
        let status = self.player_status(branch)?;
        let target = target.as_ref();

        if status.state() != BranchState::Closed {
            debug!("{} not closed, closing before reopen", branch);
            self.close_session(branch, status);
        }

        let cannot_open = |reason: String| Error::CannotOpenTarget {
            target: target.display().to_string(),
            reason,
        };

        let buffer = SimpleDecoder::decode_file(target).map_err(|e| {
            warn!("Cannot open {} on {}: {}", target.display(), branch, e);
            cannot_open(e.to_string())
        })?;
        let source_format = buffer.format();

        let generation = status.begin_session();
        let chain = Chain::new(
            Box::new(PcmFileSource::new(buffer)),
            self.output,
            self.frames_per_tick,
            generation,
        )
        .map_err(|e| {
            status.close();
            cannot_open(e.to_string())
        })?;

        self.pool.send(branch, BranchCommand::Load(Box::new(chain)));
        info!(
            "{} opened {} ({} -> {})",
            branch,
            target.display(),
            source_format,
            self.output
        );
        Ok(())
    }

    /// Start or resume playback.
    ///
    /// A closed branch stays closed.
    ///
    /// # Errors
    /// `InvalidBranch`: bridge or out-of-range index
    pub fn play(&self, branch: BranchId) -> Result<()> {
        let status = self.player_status(branch)?;
        match status.transition(&[BranchState::Open, BranchState::Paused], BranchState::Playing) {
            Ok(_) => {
                self.pool.send(branch, BranchCommand::Play);
                debug!("{} playing", branch);
            }
            Err(BranchState::Playing) => {}
            Err(state) => warn!("Cannot play {}: {}", branch, state),
        }
        Ok(())
    }

    /// Pause playback. Idempotent; never fails.
    pub fn stop(&self, branch: BranchId) {
        let Ok(status) = self.player_status(branch) else {
            warn!("stop: invalid {}", branch);
            return;
        };
        if status
            .transition(&[BranchState::Playing], BranchState::Paused)
            .is_ok()
        {
            self.pool.send(branch, BranchCommand::Pause);
            debug!("{} paused", branch);
        }
    }

    /// Close any session and return the branch to the pool. Always succeeds.
    pub fn release(&self, branch: BranchId) {
        let Ok(status) = self.player_status(branch) else {
            warn!("release: invalid {}", branch);
            return;
        };
        self.close_session(branch, status);
        self.pool.unreserve(branch);
        debug!("{} released", branch);
    }

    /// Restart the source on exhaustion instead of closing.
    ///
    /// A no-op for the bridge branch, whose source never ends.
    pub fn set_loop(&self, branch: BranchId, enabled: bool) {
        if branch.is_bridge() {
            debug!("set_loop ignored for the bridge branch");
            return;
        }
        if self.player_status(branch).is_err() {
            warn!("set_loop: invalid {}", branch);
            return;
        }
        self.pool.send(branch, BranchCommand::SetLoop(enabled));
    }

    /// Set the mixer gain of `branch` (bridge included).
    pub fn set_gain(&self, branch: BranchId, gain: f32) {
        if branch.index() > self.pool.capacity() {
            warn!("set_gain: invalid {}", branch);
            return;
        }
        self.mixer.set_gain(branch.index(), gain);
    }

    /// Last requested gain of `branch`
    pub fn gain(&self, branch: BranchId) -> Option<f32> {
        self.mixer.gain(branch.index())
    }

    /// Current state of `branch` (bridge included)
    pub fn state(&self, branch: BranchId) -> Option<BranchState> {
        self.pool.status(branch).map(BranchStatus::state)
    }

    /// Run `callback` on the dispatcher thread when `branch`'s source ends.
    pub fn set_completion_callback<F>(&self, branch: BranchId, callback: F)
    where
        F: Fn(BranchId) + Send + Sync + 'static,
    {
        let callback: CompletionCallback = Arc::new(callback);
        self.pool.set_callback(branch, Some(callback));
    }

    /// Remove the completion callback of `branch`
    pub fn clear_completion_callback(&self, branch: BranchId) {
        self.pool.set_callback(branch, None);
    }

    /// Attach opaque caller data to `branch`
    pub fn set_user_tag<T>(&self, branch: BranchId, tag: T)
    where
        T: Any + Send + Sync,
    {
        if let Some(slot) = self.pool.lock().get_mut(branch.index()) {
            slot.tag = Some(Arc::new(tag));
        }
    }

    /// Caller data attached to `branch`
    pub fn user_tag(&self, branch: BranchId) -> Option<UserTag> {
        self.pool
            .lock()
            .get(branch.index())
            .and_then(|slot| slot.tag.clone())
    }

    /// Detach and return the caller data of `branch`
    pub fn take_user_tag(&self, branch: BranchId) -> Option<UserTag> {
        self.pool
            .lock()
            .get_mut(branch.index())
            .and_then(|slot| slot.tag.take())
    }

    /// Receive public events
    pub fn subscribe(&self) -> broadcast::Receiver<DaemonEvent> {
        self.events.subscribe()
    }

    /// Handle to the virtual output device feeding the bridge branch
    pub fn virtual_device(&self) -> VirtualDevice {
        self.virtual_device.clone()
    }

    /// Format of the mixed output, fixed for the daemon's lifetime
    pub fn output_format(&self) -> AudioFormat {
        self.output
    }

    /// Output frames mixed per tick
    pub fn frames_per_tick(&self) -> usize {
        self.frames_per_tick
    }

    /// Number of allocatable branches
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Name of the opened output device
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Runtime counters
    pub fn stats(&self) -> DaemonStats {
        let sink = self.sink_stats.load();
        let playing_branches = self
            .pool
            .ids()
            .filter(|&id| self.state(id) == Some(BranchState::Playing))
            .count();

        DaemonStats {
            ticks: self.ticker_stats.ticks(),
            late_ticks: self.ticker_stats.late_ticks(),
            sink_underruns: sink.underruns,
            sink_overruns: sink.overruns,
            bridge_dropped_samples: self.virtual_device.dropped_samples(),
            playing_branches,
        }
    }

    /// Names of every device in `registry`
    pub fn list_devices(registry: &dyn DeviceRegistry) -> Vec<String> {
        registry.device_names()
    }

    /// Stop mixing and free every stage.
    pub fn destroy(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        info!("Shutting down daemon");

        self.virtual_device.shut_down();

        // Nothing may be freed before the real-time thread is parked
        match self.ticker.detach() {
            Some(graph) => graph.teardown(),
            None => warn!("Ticker was not running at shutdown"),
        }

        if let Some(dispatcher) = self.dispatcher.take() {
            if let Some(mut inbox) = dispatcher.stop() {
                inbox.drain_retired();
            }
        }

        let stats = self.stats();
        info!(
            "Daemon destroyed after {} ticks ({} late, {} underruns)",
            stats.ticks, stats.late_ticks, stats.sink_underruns
        );
    }

    fn player_status(&self, branch: BranchId) -> Result<&BranchStatus> {
        if !self.pool.is_player(branch) {
            return Err(Error::InvalidBranch(branch.index()));
        }
        self.pool
            .status(branch)
            .ok_or(Error::InvalidBranch(branch.index()))
    }

    fn close_session(&self, branch: BranchId, status: &BranchStatus) {
        if status.close() != BranchState::Closed {
            self.pool.send(branch, BranchCommand::Close);
        }
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        self.shutdown();
    }
}
