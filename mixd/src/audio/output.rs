//! Audio output using cpal
//!
//! [`CpalRegistry`] exposes the host's output devices as [`PlaybackDevice`]s.
//! Opening one yields a [`CpalSink`]: the ticker pushes mixed blocks into a
//! lock-free sample ring and the cpal callback drains it.
//!
//! cpal streams are not `Send` on every platform, so each stream lives on its
//! own owner thread for its whole life; dropping the sink stops that thread.

use crate::audio::device::{DeviceRegistry, OutputSink, PlaybackDevice, SinkStats};
use crate::audio::ring_buffer::{RingCounters, SampleConsumer, SampleProducer, SampleRingBuffer};
use crate::audio::types::AudioFormat;
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Milliseconds of audio held between the ticker and the device callback
const SINK_RING_MS: u64 = 200;

/// Registry over the default cpal host
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalRegistry;

impl CpalRegistry {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceRegistry for CpalRegistry {
    fn find(&self, name: &str) -> Option<Arc<dyn PlaybackDevice>> {
        let host = cpal::default_host();
        let mut devices = match host.output_devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Failed to enumerate devices: {}", e);
                return None;
            }
        };

        devices
            .find(|d| d.name().ok().as_deref() == Some(name))
            .map(|_| Arc::new(CpalDevice::named(name)) as Arc<dyn PlaybackDevice>)
    }

    fn default_device(&self) -> Option<Arc<dyn PlaybackDevice>> {
        let host = cpal::default_host();
        let device = host.default_output_device()?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Some(Arc::new(CpalDevice {
            name,
            use_default: true,
        }))
    }

    fn device_names(&self) -> Vec<String> {
        let host = cpal::default_host();
        match host.output_devices() {
            Ok(devices) => {
                let names: Vec<String> = devices.filter_map(|d| d.name().ok()).collect();
                debug!("Found {} output devices", names.len());
                names
            }
            Err(e) => {
                warn!("Failed to enumerate devices: {}", e);
                Vec::new()
            }
        }
    }
}

/// One cpal output device, resolved again on the owner thread at open
#[derive(Debug, Clone)]
pub struct CpalDevice {
    name: String,
    use_default: bool,
}

impl CpalDevice {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            use_default: false,
        }
    }

    fn resolve(&self) -> Result<Device> {
        let host = cpal::default_host();
        if self.use_default {
            return host
                .default_output_device()
                .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()));
        }

        host.output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .find(|d| d.name().ok().as_deref() == Some(self.name.as_str()))
            .ok_or_else(|| Error::AudioOutput(format!("Device '{}' disappeared", self.name)))
    }
}

impl PlaybackDevice for CpalDevice {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn open(&self, requested: AudioFormat, buffer_frames: Option<u32>) -> Result<Box<dyn OutputSink>> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(AudioFormat, SampleProducer)>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let device = self.clone();

        let thread = std::thread::Builder::new()
            .name("mixd-cpal".to_string())
            .spawn(move || {
                let stream = match device.start_stream(requested, buffer_frames) {
                    Ok((stream, format, producer)) => {
                        if ready_tx.send(Ok((format, producer))).is_err() {
                            return;
                        }
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Parked until the sink is dropped
                let _ = stop_rx.recv();
                if let Err(e) = stream.pause() {
                    warn!("Failed to pause stream: {}", e);
                }
                drop(stream);
                debug!("Audio stream owner thread exiting");
            })
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn stream thread: {}", e)))?;

        let (format, producer) = ready_rx
            .recv()
            .map_err(|_| Error::AudioOutput("Stream thread exited during setup".to_string()))??;

        let counters = producer.counters();
        Ok(Box::new(CpalSink {
            format,
            producer,
            counters,
            stop: Some(stop_tx),
            thread: Some(thread),
        }))
    }
}

impl CpalDevice {
    /// Build and start the stream. Runs on the owner thread.
    fn start_stream(
        &self,
        requested: AudioFormat,
        buffer_frames: Option<u32>,
    ) -> Result<(Stream, AudioFormat, SampleProducer)> {
        let device = self.resolve()?;
        info!("Opening audio device: {}", self.name);

        let (mut config, sample_format) = get_best_config(&device, requested)?;
        if let Some(size) = buffer_frames {
            config.buffer_size = cpal::BufferSize::Fixed(size);
            debug!("Using requested buffer size: {} frames", size);
        } else {
            debug!("Using device default buffer size");
        }

        let format = AudioFormat::new(config.sample_rate.0, config.channels);
        if format != requested {
            info!("Device imposes {} (requested {})", format, requested);
        }

        let ring_samples =
            mixd_common::timing::ms_to_samples(SINK_RING_MS, format.sample_rate, format.channels);
        let (producer, consumer) = SampleRingBuffer::new(ring_samples).split();
        let stream_errors = Arc::new(AtomicU32::new(0));

        let stream = match sample_format {
            SampleFormat::F32 => build_stream_f32(&device, &config, consumer, stream_errors)?,
            SampleFormat::I16 => build_stream_i16(&device, &config, consumer, stream_errors)?,
            SampleFormat::U16 => build_stream_u16(&device, &config, consumer, stream_errors)?,
            other => {
                return Err(Error::AudioOutput(format!(
                    "Unsupported sample format: {:?}",
                    other
                )));
            }
        };

        stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;

        info!(
            "Audio stream started: {} {:?} buffer={:?}",
            format, sample_format, config.buffer_size
        );
        Ok((stream, format, producer))
    }
}

/// Pick a supported configuration close to `requested`.
///
/// Prefers the exact rate and channel count in f32, then the same in any
/// convertible sample format, then the device default.
fn get_best_config(device: &Device, requested: AudioFormat) -> Result<(StreamConfig, SampleFormat)> {
    let supported: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?
        .collect();

    let matches = |format: SampleFormat| {
        supported.iter().find(|c| {
            c.channels() == requested.channels
                && c.min_sample_rate().0 <= requested.sample_rate
                && c.max_sample_rate().0 >= requested.sample_rate
                && c.sample_format() == format
        })
    };

    for sample_format in [SampleFormat::F32, SampleFormat::I16, SampleFormat::U16] {
        if let Some(range) = matches(sample_format) {
            let config = range
                .clone()
                .with_sample_rate(cpal::SampleRate(requested.sample_rate))
                .config();
            return Ok((config, sample_format));
        }
    }

    let fallback = device
        .default_output_config()
        .map_err(|e| Error::AudioOutput(format!("Failed to get default config: {}", e)))?;
    Ok((fallback.config(), fallback.sample_format()))
}

fn error_callback(errors: Arc<AtomicU32>) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| {
        let count = errors.fetch_add(1, Ordering::Relaxed) + 1;
        error!("Audio stream error: {} (total: {})", err, count);
    }
}

fn build_stream_f32(
    device: &Device,
    config: &StreamConfig,
    mut consumer: SampleConsumer,
    errors: Arc<AtomicU32>,
) -> Result<Stream> {
    device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                consumer.pop_into(data);
                for sample in data.iter_mut() {
                    *sample = sample.clamp(-1.0, 1.0);
                }
            },
            error_callback(errors),
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
}

fn build_stream_i16(
    device: &Device,
    config: &StreamConfig,
    mut consumer: SampleConsumer,
    errors: Arc<AtomicU32>,
) -> Result<Stream> {
    let mut scratch: Vec<f32> = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                // Grows once to the callback size, then reused
                scratch.resize(data.len(), 0.0);
                consumer.pop_into(&mut scratch);
                for (out, sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = to_i16(*sample);
                }
            },
            error_callback(errors),
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
}

fn build_stream_u16(
    device: &Device,
    config: &StreamConfig,
    mut consumer: SampleConsumer,
    errors: Arc<AtomicU32>,
) -> Result<Stream> {
    let mut scratch: Vec<f32> = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                consumer.pop_into(&mut scratch);
                for (out, sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = to_u16(*sample);
                }
            },
            error_callback(errors),
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
}

/// Clamp and convert to signed 16-bit
fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Clamp and convert from [-1.0, 1.0] to [0, 65535]
fn to_u16(sample: f32) -> u16 {
    ((sample.clamp(-1.0, 1.0) + 1.0) * 32767.5) as u16
}

/// Sink feeding a cpal stream
pub struct CpalSink {
    format: AudioFormat,
    producer: SampleProducer,
    counters: Arc<RingCounters>,
    stop: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl OutputSink for CpalSink {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn write(&mut self, samples: &[f32]) {
        self.producer.push(samples);
    }

    fn stats(&self) -> SinkStats {
        SinkStats {
            underruns: self.counters.underruns(),
            overruns: self.counters.overruns(),
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        info!("Stopping audio stream");
        drop(self.stop.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Audio stream owner thread panicked");
            }
        }
        debug!(
            "Audio sink closed: {} underruns, {} overruns",
            self.counters.underruns(),
            self.counters.overruns()
        );
    }
}
