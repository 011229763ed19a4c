//! Headless daemon harness
//!
//! Runs a real daemon (ticker, dispatcher, pool) on a [`CaptureDevice`] at
//! 8 kHz mono, so tests can inspect the mixed output without audio hardware.

use mixd::{CaptureDevice, Daemon, DaemonConfig, DaemonEvent, StaticRegistry};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::broadcast;

pub const TEST_SAMPLE_RATE: u32 = 8000;
pub const TEST_CHANNELS: u16 = 1;

/// Config for a small, fast daemon
pub fn test_config(capacity: usize) -> DaemonConfig {
    DaemonConfig {
        sample_rate: TEST_SAMPLE_RATE,
        channels: TEST_CHANNELS,
        capacity,
        tick_interval_ms: 10,
        bridge_capacity_ms: 200,
        ..DaemonConfig::default()
    }
}

/// Daemon plus the capture device it mixes into and a fixture directory
pub struct TestDaemon {
    pub daemon: Daemon,
    pub capture: CaptureDevice,
    pub dir: TempDir,
}

impl TestDaemon {
    pub fn start(capacity: usize) -> Self {
        Self::start_with(test_config(capacity))
    }

    pub fn start_with(config: DaemonConfig) -> Self {
        let capture = CaptureDevice::new("capture");
        let registry = StaticRegistry::with_device(capture.clone());
        let daemon = Daemon::create(&registry, None, &config).expect("daemon should start");
        Self {
            daemon,
            capture,
            dir: TempDir::new().expect("tempdir"),
        }
    }

    /// Path of a fixture file inside the harness directory
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write a constant-level fixture at the daemon's rate and layout
    pub fn constant_file(&self, name: &str, frames: usize, level: f32) -> PathBuf {
        let path = self.path(name);
        super::generate_constant_wav(&path, TEST_SAMPLE_RATE, TEST_CHANNELS, frames, level)
            .expect("fixture should be written");
        path
    }

    /// Largest absolute sample recorded so far
    pub fn peak(&self) -> f32 {
        self.capture
            .samples()
            .iter()
            .fold(0.0f32, |peak, s| peak.max(s.abs()))
    }
}

/// Poll `condition` every 5 ms until it holds or `timeout` elapses
pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Drain events until `done` returns true or `timeout` elapses.
///
/// Returns every event received, in order.
pub fn collect_events<F>(
    rx: &mut broadcast::Receiver<DaemonEvent>,
    timeout: Duration,
    mut done: F,
) -> Vec<DaemonEvent>
where
    F: FnMut(&[DaemonEvent]) -> bool,
{
    let mut events = Vec::new();
    wait_until(timeout, || {
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        done(&events)
    });
    events
}
