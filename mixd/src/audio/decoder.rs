//! Audio decoder using symphonia
//!
//! Decodes sound files (WAV, MP3, FLAC, AAC, Vorbis) to interleaved f32 PCM at
//! their native sample rate and channel count. Rate and channel conversion are
//! left to the branch's own stages.

use crate::audio::types::{AudioFormat, PcmBuffer};
use crate::error::{Error, Result};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Whole-file decoder.
pub struct SimpleDecoder;

impl SimpleDecoder {
    /// Decode an entire audio file into memory.
    ///
    /// # Returns
    /// PCM buffer in the file's native format
    ///
    /// # Errors
    /// - Failed to open file
    /// - Unsupported container or codec
    /// - File decodes to zero frames
    ///
    /// Corrupt packets in the middle of a file are skipped with a warning rather
    /// than failing the whole decode.
    pub fn decode_file(path: &Path) -> Result<PcmBuffer> {
        debug!("Decoding entire file: {}", path.display());

        let file = File::open(path)
            .map_err(|e| Error::Decode(format!("Failed to open file {}: {}", path.display(), e)))?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        // Extension hint helps the probe pick a format reader
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| Error::Decode(format!("Failed to probe format: {}", e)))?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::Decode("No audio track found".to_string()))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| Error::Decode(format!("Failed to create decoder: {}", e)))?;

        // Some containers only reveal rate/channels in the first decoded packet
        let mut sample_rate = codec_params.sample_rate.unwrap_or(0);
        let mut channels = codec_params.channels.map(|c| c.count() as u16).unwrap_or(0);

        let mut samples: Vec<f32> = Vec::new();
        let mut sample_buf: Option<SampleBuffer<f32>> = None;
        let mut skipped_packets = 0usize;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => {
                    return Err(Error::Decode(format!("Failed to read packet: {}", e)));
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    skipped_packets += 1;
                    warn!("Skipping corrupt packet in {}: {}", path.display(), e);
                    continue;
                }
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(e) => {
                    return Err(Error::Decode(format!("Decode failed: {}", e)));
                }
            };

            let spec = *decoded.spec();
            sample_rate = spec.rate;
            channels = spec.channels.count() as u16;

            let needs_realloc = sample_buf
                .as_ref()
                .map_or(true, |buf| buf.capacity() < decoded.capacity());
            if needs_realloc {
                sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
            }

            if let Some(buf) = sample_buf.as_mut() {
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
        }

        if sample_rate == 0 || channels == 0 {
            return Err(Error::Decode("Sample rate or channel count not found".to_string()));
        }

        let buffer = PcmBuffer::new(samples, AudioFormat::new(sample_rate, channels));
        if buffer.is_empty() {
            return Err(Error::Decode("File contains no audio frames".to_string()));
        }

        debug!(
            "Decoded {}: {} frames, {}, {} ms, {} packets skipped",
            path.display(),
            buffer.frames(),
            buffer.format(),
            buffer.duration_ms(),
            skipped_packets
        );

        Ok(buffer)
    }
}
