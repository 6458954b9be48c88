//! Audio output using cpal
//!
//! A single output stream mixes every live voice of the voice table:
//! each playing voice contributes its samples scaled by its gain, and the
//! sum is clamped to [-1.0, 1.0].
//!
//! `cpal::Stream` is not `Send`, so the stream is built and kept alive on a
//! dedicated thread. [`AudioOutput`] only holds the control side.

use crate::audio::decode::DecodedTrack;
use crate::error::{Error, Result};
use crate::playback::backend::ChannelId;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// One mixer input
#[derive(Debug, Clone, Default)]
pub struct OutputVoice {
    /// Interleaved stereo samples at the device rate (None while decoding)
    pub track: Option<Arc<DecodedTrack>>,
    /// Next frame to play
    pub cursor: usize,
    pub playing: bool,
    pub gain: f32,
}

impl OutputVoice {
    pub fn frames(&self) -> usize {
        self.track.as_ref().map_or(0, |t| t.frames())
    }

    pub fn at_end(&self) -> bool {
        self.track.is_some() && self.cursor >= self.frames()
    }
}

/// Voices shared between the backend and the audio thread
pub type VoiceTable = Arc<Mutex<HashMap<ChannelId, OutputVoice>>>;

/// Mix every playing voice into `out` (interleaved, `channels` wide)
///
/// Voices that run off their end stop playing.
pub fn mix_voices(voices: &mut HashMap<ChannelId, OutputVoice>, out: &mut [f32], channels: usize) {
    out.fill(0.0);
    if channels == 0 {
        return;
    }

    for voice in voices.values_mut() {
        if !voice.playing {
            continue;
        }
        let Some(track) = voice.track.as_ref() else {
            continue;
        };

        let gain = voice.gain;
        let frames = track.frames();
        for frame in out.chunks_mut(channels) {
            if voice.cursor >= frames {
                voice.playing = false;
                break;
            }
            let left = track.samples[voice.cursor * 2];
            let right = track.samples[voice.cursor * 2 + 1];
            frame[0] += left * gain;
            if channels > 1 {
                frame[1] += right * gain;
            }
            voice.cursor += 1;
        }
    }

    for sample in out.iter_mut() {
        *sample = sample.clamp(-1.0, 1.0);
    }
}

/// Running output stream
pub struct AudioOutput {
    device_name: String,
    sample_rate: u32,
    channels: u16,
    error_flag: Arc<AtomicBool>,
    shutdown: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl AudioOutput {
    /// List available audio output devices
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open a device (default when `device_name` is None) and start mixing `voices`
    pub fn start(device_name: Option<String>, voices: VoiceTable) -> Result<Self> {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(String, u32, u16)>>();
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();
        let error_flag = Arc::new(AtomicBool::new(false));
        let thread_error_flag = Arc::clone(&error_flag);

        let thread = std::thread::Builder::new()
            .name("dartloop-output".to_string())
            .spawn(move || {
                let stream = match open_stream(device_name, voices, thread_error_flag) {
                    Ok((stream, info)) => {
                        let _ = ready_tx.send(Ok(info));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Park until shutdown is requested or the sender is dropped
                let _ = shutdown_rx.recv();
                if let Err(e) = stream.pause() {
                    warn!("Failed to pause output stream: {}", e);
                }
                drop(stream);
                debug!("Output thread exiting");
            })
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn output thread: {}", e)))?;

        let (device_name, sample_rate, channels) = ready_rx
            .recv()
            .map_err(|_| Error::AudioOutput("Output thread exited during setup".to_string()))??;

        info!(
            "Audio output running on '{}' ({} Hz, {} channels)",
            device_name, sample_rate, channels
        );

        Ok(Self {
            device_name,
            sample_rate,
            channels,
            error_flag,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Shared flag set by the stream error callback
    pub fn error_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.error_flag)
    }

    /// Stop the stream and join the output thread
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Output thread panicked");
            }
        }
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_stream(
    device_name: Option<String>,
    voices: VoiceTable,
    error_flag: Arc<AtomicBool>,
) -> Result<(Stream, (String, u32, u16))> {
    let host = cpal::default_host();

    let device = match device_name.as_ref() {
        Some(name) => {
            let mut devices = host
                .output_devices()
                .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;
            match devices.find(|d| d.name().ok().as_ref() == Some(name)) {
                Some(device) => device,
                None => {
                    warn!("Requested device '{}' not found, falling back to default device", name);
                    host.default_output_device().ok_or_else(|| {
                        Error::AudioOutput(format!(
                            "Device '{}' not found and no default device available",
                            name
                        ))
                    })?
                }
            }
        }
        None => host
            .default_output_device()
            .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?,
    };

    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    let (config, sample_format) = get_best_config(&device)?;
    debug!(
        "Audio config: sample_rate={}, channels={}, format={:?}",
        config.sample_rate.0, config.channels, sample_format
    );

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, voices, error_flag)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, voices, error_flag)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, voices, error_flag)?,
        other => {
            return Err(Error::AudioOutput(format!(
                "Unsupported sample format: {:?}",
                other
            )))
        }
    };

    stream
        .play()
        .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;

    Ok((stream, (name, config.sample_rate.0, config.channels)))
}

/// Prefer 44.1kHz stereo f32, else the device default
fn get_best_config(device: &Device) -> Result<(StreamConfig, SampleFormat)> {
    let mut supported = device
        .supported_output_configs()
        .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?;

    let preferred = supported.find(|c| {
        c.channels() == 2
            && c.min_sample_rate().0 <= 44100
            && c.max_sample_rate().0 >= 44100
            && c.sample_format() == SampleFormat::F32
    });

    if let Some(config) = preferred {
        let sample_format = config.sample_format();
        return Ok((config.with_sample_rate(cpal::SampleRate(44100)).config(), sample_format));
    }

    let config = device
        .default_output_config()
        .map_err(|e| Error::AudioOutput(format!("Failed to get default config: {}", e)))?;
    Ok((config.config(), config.sample_format()))
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    voices: VoiceTable,
    error_flag: Arc<AtomicBool>,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                match voices.try_lock() {
                    Ok(mut voices) => mix_voices(&mut voices, &mut scratch, channels),
                    // Control side holds the lock; play silence this period
                    Err(_) => scratch.fill(0.0),
                }
                for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(sample);
                }
            },
            move |err| {
                error!("Audio stream error: {}", err);
                error_flag.store(true, Ordering::SeqCst);
            },
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
}
