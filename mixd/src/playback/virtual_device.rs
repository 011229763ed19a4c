//! Virtual output device backed by the bridge branch
//!
//! Presents the daemon itself as a [`PlaybackDevice`]: whatever a writer
//! pushes flows through a [`Bridge`] into branch 0 and is mixed like any other
//! branch. One writer at a time; the bridge is sized per writer from its
//! format.

use crate::audio::device::{OutputSink, PlaybackDevice};
use crate::audio::types::AudioFormat;
use crate::error::{Error, Result};
use crate::playback::branch::{BranchCommand, BranchState, Chain};
use crate::playback::bridge::{Bridge, BridgeSource};
use crate::playback::pool::BranchPool;
use mixd_common::{timing, BranchId, DaemonEvent};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

struct VirtualInner {
    name: String,
    pool: Arc<BranchPool>,
    output: AudioFormat,
    frames_per_tick: usize,
    bridge_ms: u64,
    writer_open: AtomicBool,
    alive: AtomicBool,
    total_dropped: AtomicU64,
    events: broadcast::Sender<DaemonEvent>,
}

/// Cloneable handle to the daemon's virtual device
#[derive(Clone)]
pub struct VirtualDevice {
    inner: Arc<VirtualInner>,
}

impl VirtualDevice {
    pub(crate) fn new(
        name: String,
        pool: Arc<BranchPool>,
        output: AudioFormat,
        frames_per_tick: usize,
        bridge_ms: u64,
        events: broadcast::Sender<DaemonEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(VirtualInner {
                name,
                pool,
                output,
                frames_per_tick,
                bridge_ms,
                writer_open: AtomicBool::new(false),
                alive: AtomicBool::new(true),
                total_dropped: AtomicU64::new(0),
                events,
            }),
        }
    }

    /// Advertised name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// True while a writer is open
    pub fn has_writer(&self) -> bool {
        self.inner.writer_open.load(Ordering::Acquire)
    }

    /// Samples dropped by bridge overflow across all closed writers
    pub fn dropped_samples(&self) -> u64 {
        self.inner.total_dropped.load(Ordering::Relaxed)
    }

    /// Daemon output format the writer's audio is converted to
    pub fn output_format(&self) -> AudioFormat {
        self.inner.output
    }

    /// Open the single writer.
    ///
    /// # Errors
    /// - `VirtualDeviceBusy`: a writer is already open
    /// - `AudioOutput`: the daemon is gone or `format` is unusable
    pub fn open_writer(&self, format: AudioFormat) -> Result<VirtualWriter> {
        let inner = &self.inner;
        if !inner.alive.load(Ordering::Acquire) {
            return Err(Error::AudioOutput(format!("Virtual device '{}' is closed", inner.name)));
        }
        if format.channels == 0 || !timing::is_supported_rate(format.sample_rate) {
            return Err(Error::AudioOutput(format!("Unsupported writer format {}", format)));
        }
        if inner
            .writer_open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::VirtualDeviceBusy);
        }

        let capacity_frames = timing::ms_to_frames(inner.bridge_ms, format.sample_rate);
        let bridge = Arc::new(Bridge::new(format, capacity_frames));

        let Some(status) = inner.pool.status(BranchId::BRIDGE) else {
            inner.writer_open.store(false, Ordering::Release);
            return Err(Error::Wiring("Bridge branch missing".to_string()));
        };

        let generation = status.begin_session();
        let chain = match Chain::new(
            Box::new(BridgeSource::new(Arc::clone(&bridge))),
            inner.output,
            inner.frames_per_tick,
            generation,
        ) {
            Ok(chain) => chain,
            Err(e) => {
                status.close();
                inner.writer_open.store(false, Ordering::Release);
                return Err(e);
            }
        };

        inner.pool.send(BranchId::BRIDGE, BranchCommand::Load(Box::new(chain)));
        let _ = status.transition(&[BranchState::Open], BranchState::Playing);
        inner.pool.send(BranchId::BRIDGE, BranchCommand::Play);

        info!(
            "Virtual device '{}' writer opened at {} ({} frame bridge)",
            inner.name, format, capacity_frames
        );
        let _ = inner.events.send(DaemonEvent::VirtualWriterOpened {
            sample_rate: format.sample_rate,
            channels: format.channels,
            timestamp: chrono::Utc::now(),
        });

        Ok(VirtualWriter {
            device: Arc::clone(inner),
            bridge,
        })
    }

    /// Refuse new writers. Called when the daemon is destroyed.
    pub(crate) fn shut_down(&self) {
        self.inner.alive.store(false, Ordering::Release);
    }
}

impl PlaybackDevice for VirtualDevice {
    fn name(&self) -> String {
        self.inner.name.clone()
    }

    fn open(&self, requested: AudioFormat, _buffer_frames: Option<u32>) -> Result<Box<dyn OutputSink>> {
        Ok(Box::new(self.open_writer(requested)?))
    }
}

/// Producer end of the virtual device. Dropping it closes branch 0.
pub struct VirtualWriter {
    device: Arc<VirtualInner>,
    bridge: Arc<Bridge>,
}

impl VirtualWriter {
    /// Writer format
    pub fn format(&self) -> AudioFormat {
        self.bridge.format()
    }

    /// Push interleaved f32 samples. Returns samples dropped to make room.
    pub fn write(&self, samples: &[f32]) -> usize {
        self.bridge.push(samples)
    }

    /// Push interleaved signed 16-bit samples
    pub fn write_i16(&self, samples: &[i16]) -> usize {
        let converted: Vec<f32> = samples
            .iter()
            .map(|&s| s as f32 / (i16::MAX as f32 + 1.0))
            .collect();
        self.bridge.push(&converted)
    }

    /// Samples currently waiting in the bridge
    pub fn queued_samples(&self) -> usize {
        self.bridge.occupied()
    }

    /// Samples dropped by overflow during this writer's lifetime
    pub fn dropped_samples(&self) -> u64 {
        self.bridge.dropped_samples()
    }
}

impl OutputSink for VirtualWriter {
    fn format(&self) -> AudioFormat {
        VirtualWriter::format(self)
    }

    fn write(&mut self, samples: &[f32]) {
        VirtualWriter::write(self, samples);
    }
}

impl Drop for VirtualWriter {
    fn drop(&mut self) {
        let device = &self.device;
        if let Some(status) = device.pool.status(BranchId::BRIDGE) {
            status.close();
        }
        device.pool.send(BranchId::BRIDGE, BranchCommand::Close);

        let dropped = self.bridge.dropped_samples();
        device.total_dropped.fetch_add(dropped, Ordering::Relaxed);
        device.writer_open.store(false, Ordering::Release);

        debug!("Virtual device writer closed ({} samples dropped)", dropped);
        let _ = device.events.send(DaemonEvent::VirtualWriterClosed {
            dropped_samples: dropped,
            timestamp: chrono::Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> (VirtualDevice, crate::playback::pool::BranchReceivers) {
        let (pool, receivers) = BranchPool::new(1);
        let (events, _) = broadcast::channel(8);
        let device = VirtualDevice::new(
            "Sound Daemon".to_string(),
            Arc::new(pool),
            AudioFormat::new(8000, 1),
            80,
            100,
            events,
        );
        (device, receivers)
    }

    #[test]
    fn test_second_writer_is_busy() {
        let (device, _receivers) = device();
        let writer = device.open_writer(AudioFormat::new(8000, 1)).unwrap();
        assert!(device.has_writer());
        assert!(matches!(
            device.open_writer(AudioFormat::new(8000, 1)),
            Err(Error::VirtualDeviceBusy)
        ));

        drop(writer);
        assert!(!device.has_writer());
        assert!(device.open_writer(AudioFormat::new(8000, 1)).is_ok());
    }

    #[test]
    fn test_writer_drives_bridge_branch_state() {
        let (device, receivers) = device();
        let status = Arc::clone(&receivers[0].0);

        let writer = device.open_writer(AudioFormat::new(8000, 1)).unwrap();
        assert_eq!(status.state(), BranchState::Playing);
        drop(writer);
        assert_eq!(status.state(), BranchState::Closed);
    }

    #[test]
    fn test_write_i16_scales() {
        let (device, _receivers) = device();
        let writer = device.open_writer(AudioFormat::new(8000, 1)).unwrap();
        writer.write_i16(&[16384, -32768]);
        assert_eq!(writer.queued_samples(), 2);
    }

    #[test]
    fn test_rejects_writer_after_shutdown() {
        let (device, _receivers) = device();
        device.shut_down();
        assert!(device.open_writer(AudioFormat::new(8000, 1)).is_err());
    }

    #[test]
    fn test_rejects_unusable_format() {
        let (device, _receivers) = device();
        assert!(device.open_writer(AudioFormat::new(8000, 0)).is_err());
        assert!(!device.has_writer());
    }
}
