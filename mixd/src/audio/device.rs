//! Device abstractions: sinks, playback devices and registries
//!
//! The daemon never looks devices up through a process-wide singleton; callers
//! hand [`crate::Daemon::create`] a [`DeviceRegistry`] instead.

use crate::audio::types::AudioFormat;
use crate::error::Result;
use std::sync::Arc;

/// Terminal stage receiving the mixed stream
///
/// `write` is called from the ticker thread once per tick with
/// `frames_per_tick × channels` interleaved samples and must not block.
pub trait OutputSink: Send {
    /// Format the sink actually accepts
    fn format(&self) -> AudioFormat;

    /// Consume one block of interleaved samples
    fn write(&mut self, samples: &[f32]);

    /// Underrun/overrun counters, if the sink keeps any
    fn stats(&self) -> SinkStats {
        SinkStats::default()
    }
}

/// Sink health counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub underruns: u64,
    pub overruns: u64,
}

/// An addressable output device
pub trait PlaybackDevice: Send + Sync {
    /// Human-readable device name used for lookup
    fn name(&self) -> String;

    /// Open a sink on this device.
    ///
    /// `requested` is a preference; the returned sink reports the format the
    /// device actually settled on.
    fn open(&self, requested: AudioFormat, buffer_frames: Option<u32>) -> Result<Box<dyn OutputSink>>;
}

/// Lookup service for playback devices
pub trait DeviceRegistry {
    /// Device with exactly this name
    fn find(&self, name: &str) -> Option<Arc<dyn PlaybackDevice>>;

    /// Platform default device
    fn default_device(&self) -> Option<Arc<dyn PlaybackDevice>>;

    /// Names of every known device
    fn device_names(&self) -> Vec<String>;
}

/// Registry over a fixed list of devices. The first entry is the default.
#[derive(Default, Clone)]
pub struct StaticRegistry {
    devices: Vec<Arc<dyn PlaybackDevice>>,
}

impl StaticRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry containing `device`
    pub fn with_device(device: impl PlaybackDevice + 'static) -> Self {
        let mut registry = Self::new();
        registry.register(device);
        registry
    }

    /// Append a device
    pub fn register(&mut self, device: impl PlaybackDevice + 'static) {
        self.devices.push(Arc::new(device));
    }
}

impl DeviceRegistry for StaticRegistry {
    fn find(&self, name: &str) -> Option<Arc<dyn PlaybackDevice>> {
        self.devices.iter().find(|d| d.name() == name).cloned()
    }

    fn default_device(&self) -> Option<Arc<dyn PlaybackDevice>> {
        self.devices.first().cloned()
    }

    fn device_names(&self) -> Vec<String> {
        self.devices.iter().map(|d| d.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::CaptureDevice;

    #[test]
    fn test_empty_registry_has_no_default() {
        let registry = StaticRegistry::new();
        assert!(registry.default_device().is_none());
        assert!(registry.find("anything").is_none());
        assert!(registry.device_names().is_empty());
    }

    #[test]
    fn test_find_by_name_and_default_is_first() {
        let mut registry = StaticRegistry::new();
        registry.register(CaptureDevice::new("first"));
        registry.register(CaptureDevice::new("second"));

        assert_eq!(registry.default_device().unwrap().name(), "first");
        assert_eq!(registry.find("second").unwrap().name(), "second");
        assert_eq!(registry.device_names(), vec!["first", "second"]);
    }
}
