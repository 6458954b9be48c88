//! Audio resampling using rubato
//!
//! Decoded tracks are converted once, at load time, to the sample rate of
//! the output device so the mixer can sum voices frame by frame.

use crate::error::{Error, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use tracing::debug;

/// Whole-buffer sample rate conversion
pub struct Resampler;

impl Resampler {
    /// Resample interleaved `input` from `input_rate` to `output_rate`
    ///
    /// Returns a copy when the rates already match.
    pub fn resample(
        input: &[f32],
        input_rate: u32,
        output_rate: u32,
        channels: u16,
    ) -> Result<Vec<f32>> {
        if channels == 0 || input_rate == 0 || output_rate == 0 {
            return Err(Error::InvalidInput(format!(
                "cannot resample {} channel(s) from {}Hz to {}Hz",
                channels, input_rate, output_rate
            )));
        }
        if input_rate == output_rate {
            return Ok(input.to_vec());
        }

        let planar_input = deinterleave(input, channels);
        let input_frames = planar_input.first().map_or(0, Vec::len);
        if input_frames == 0 {
            return Ok(Vec::new());
        }

        debug!(
            "Resampling {} frames from {}Hz to {}Hz",
            input_frames, input_rate, output_rate
        );

        let mut resampler = FastFixedIn::<f32>::new(
            output_rate as f64 / input_rate as f64,
            1.0,
            PolynomialDegree::Septic,
            input_frames,
            channels as usize,
        )
        .map_err(|e| Error::Decode(format!("Failed to create resampler: {}", e)))?;

        let mut planar_output = resampler
            .process(&planar_input, None)
            .map_err(|e| Error::Decode(format!("Resampling failed: {}", e)))?;

        // Flush the filter tail, then drop the leading delay so the output
        // lines up with the input and keeps its full length
        let tail = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(|e| Error::Decode(format!("Resampler flush failed: {}", e)))?;
        for (channel, rest) in planar_output.iter_mut().zip(tail) {
            channel.extend(rest);
        }

        let delay = resampler.output_delay();
        let expected = expected_frames(input_frames, input_rate, output_rate);
        for channel in &mut planar_output {
            channel.drain(..delay.min(channel.len()));
            channel.truncate(expected);
        }

        Ok(interleave(&planar_output))
    }
}

/// Output length of `frames` converted between rates, rounded to nearest
fn expected_frames(frames: usize, input_rate: u32, output_rate: u32) -> usize {
    let scaled = frames as u64 * output_rate as u64 + input_rate as u64 / 2;
    (scaled / input_rate as u64) as usize
}

/// `[L, R, L, R, ...]` to `[[L, L, ...], [R, R, ...]]`
fn deinterleave(samples: &[f32], channels: u16) -> Vec<Vec<f32>> {
    let channels = channels as usize;
    let frames = samples.len() / channels;
    let mut planar = vec![Vec::with_capacity(frames); channels];

    for frame in samples.chunks_exact(channels) {
        for (ch, &sample) in frame.iter().enumerate() {
            planar[ch].push(sample);
        }
    }
    planar
}

fn interleave(planar: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = planar.first() else {
        return Vec::new();
    };
    let frames = first.len();
    let mut interleaved = Vec::with_capacity(frames * planar.len());

    for frame in 0..frames {
        for channel in planar {
            interleaved.push(channel[frame]);
        }
    }
    interleaved
}
