//! Audio processing stages
//!
//! Leaf stages of the playback graph: decoding, rate conversion, channel
//! adaptation, sources and output sinks.

pub mod capture;
pub mod channel_adapter;
pub mod decoder;
pub mod device;
pub mod output;
pub mod resampler;
pub mod ring_buffer;
pub mod source;
pub mod types;

pub use capture::CaptureDevice;
pub use channel_adapter::ChannelAdapter;
pub use decoder::SimpleDecoder;
pub use device::{DeviceRegistry, OutputSink, PlaybackDevice, SinkStats, StaticRegistry};
pub use output::{CpalDevice, CpalRegistry, CpalSink};
pub use resampler::RateConverter;
pub use source::{PcmFileSource, SourceRead, SourceStage};
pub use types::{AudioFormat, PcmBuffer};
