//! Audio decoder using symphonia
//!
//! # Supported Formats
//!
//! Per Cargo.toml symphonia features: MP3, FLAC, AAC, MP4/M4A, Vorbis, and
//! WAV/PCM (symphonia defaults).
//!
//! # Sample Format
//!
//! - Output: Stereo f32 samples (interleaved: [L, R, L, R, ...])
//! - Mono files: duplicated to stereo
//! - Multi-channel: downmixed to stereo
//!
//! Every decoded sample format (integer or float) is converted to f32 through
//! symphonia's `SampleBuffer`.

use crate::error::{Error, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Audio decoder handle
///
/// ```ignore
/// let mut decoder = AudioDecoder::new("loop.mp3")?;
/// while let Some(chunk) = decoder.decode_chunk()? {
///     println!("{} frames at {} Hz", chunk.samples.len() / 2, chunk.sample_rate);
/// }
/// ```
pub struct AudioDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    native_sample_rate: u32,
    native_channels: usize,
    path: PathBuf,
}

impl AudioDecoder {
    /// Open and probe `file_path`
    pub fn new<P: AsRef<Path>>(file_path: P) -> Result<Self> {
        let path = file_path.as_ref().to_path_buf();
        let file = File::open(&path)
            .map_err(|e| Error::Decode(format!("{}: {}", path.display(), e)))?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| Error::Decode(format!("{}: unsupported format ({})", path.display(), e)))?;

        let format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| Error::Decode(format!("{}: no audio track found", path.display())))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let native_sample_rate = codec_params.sample_rate.unwrap_or(44100);
        let native_channels = codec_params.channels.map(|c| c.count()).unwrap_or(2);

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| Error::Decode(format!("{}: unsupported codec ({})", path.display(), e)))?;

        debug!(
            "Opened {} ({} Hz, {} channel(s))",
            path.display(),
            native_sample_rate,
            native_channels
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            native_sample_rate,
            native_channels,
            path,
        })
    }

    /// Decode the next packet, or `None` at end of file
    pub fn decode_chunk(&mut self) -> Result<Option<DecodedChunk>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(e) => {
                    return Err(Error::Decode(format!("{}: {}", self.path.display(), e)));
                }
            };

            // Skip packets from other tracks
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    // Corrupt packet; skip it and keep going
                    warn!("{}: skipping bad packet ({})", self.path.display(), e);
                    continue;
                }
                Err(e) => return Err(Error::Decode(format!("{}: {}", self.path.display(), e))),
            };

            let spec = *decoded.spec();
            let channels = spec.channels.count();
            let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            buffer.copy_interleaved_ref(decoded);

            return Ok(Some(DecodedChunk {
                samples: to_stereo(buffer.samples(), channels),
                sample_rate: self.native_sample_rate,
            }));
        }
    }

    /// Decode the whole file into memory
    pub fn decode_all(mut self) -> Result<DecodedTrack> {
        let mut samples = Vec::new();
        while let Some(chunk) = self.decode_chunk()? {
            samples.extend_from_slice(&chunk.samples);
        }
        Ok(DecodedTrack {
            samples,
            sample_rate: self.native_sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.native_sample_rate
    }

    pub fn channels(&self) -> usize {
        self.native_channels
    }
}

/// Convert interleaved samples with `channels` channels to interleaved stereo
pub fn to_stereo(interleaved: &[f32], channels: usize) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => interleaved.iter().flat_map(|&s| [s, s]).collect(),
        2 => interleaved.to_vec(),
        _ => {
            // Simple downmix: even channels left, odd channels right
            let half = channels as f32 / 2.0;
            let mut stereo = Vec::with_capacity(interleaved.len() / channels * 2);
            for frame in interleaved.chunks_exact(channels) {
                let mut left = 0.0f32;
                let mut right = 0.0f32;
                for (ch, &sample) in frame.iter().enumerate() {
                    if ch % 2 == 0 {
                        left += sample;
                    } else {
                        right += sample;
                    }
                }
                stereo.push(left / half);
                stereo.push(right / half);
            }
            stereo
        }
    }
}

/// Decoded audio chunk
#[derive(Debug)]
pub struct DecodedChunk {
    /// Interleaved stereo f32 samples [L, R, L, R, ...]
    pub samples: Vec<f32>,

    /// Sample rate of decoded audio
    pub sample_rate: u32,
}

/// A fully decoded track
#[derive(Debug, Clone)]
pub struct DecodedTrack {
    /// Interleaved stereo f32 samples
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedTrack {
    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }
}
