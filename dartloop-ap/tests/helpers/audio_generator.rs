//! Audio test file generation
//!
//! Writes small deterministic WAV files with hound for decoder tests.

use hound::{SampleFormat, WavSpec, WavWriter};
use std::f32::consts::PI;
use std::path::Path;

/// Write a 16-bit sine wave WAV file
pub fn generate_sine_wav<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    channels: u16,
    duration_ms: u64,
    frequency_hz: f32,
    amplitude: f32,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;

    let frames = sample_rate as u64 * duration_ms / 1000;
    for i in 0..frames {
        let t = i as f32 / sample_rate as f32;
        let value = (2.0 * PI * frequency_hz * t).sin() * amplitude;
        let sample = (value * i16::MAX as f32) as i16;
        for _ in 0..channels {
            writer.write_sample(sample)?;
        }
    }

    writer.finalize()
}

/// Write a silent 16-bit WAV file
pub fn generate_silent_wav<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    channels: u16,
    duration_ms: u64,
) -> Result<(), hound::Error> {
    generate_sine_wav(path, sample_rate, channels, duration_ms, 0.0, 0.0)
}
