//! Device playback backend
//!
//! Resolves source identifiers to files under a media root, decodes them
//! with symphonia (off the async runtime), resamples to the device rate and
//! plays them through the shared cpal output mixer.
//!
//! Duration metadata becomes known once decoding finishes; until then a
//! channel reports `duration() == None` and a requested play is remembered.

use crate::audio::decode::{AudioDecoder, DecodedTrack};
use crate::audio::output::{AudioOutput, OutputVoice, VoiceTable};
use crate::audio::resampler::Resampler;
use crate::error::{Error, Result};
use crate::playback::backend::{
    AudioBackend, ChannelEvent, ChannelEventSender, ChannelId, PlaybackHandle, SourceId,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

type TrackCache = Arc<Mutex<HashMap<SourceId, Arc<DecodedTrack>>>>;

/// Backend playing decoded files on an output device
pub struct DeviceBackend {
    media_root: PathBuf,
    voices: VoiceTable,
    cache: TrackCache,
    sample_rate: u32,
    device_error: Arc<AtomicBool>,
    _output: AudioOutput,
}

impl DeviceBackend {
    /// Start the output device and serve sources from `media_root`
    pub fn open(media_root: PathBuf, device_name: Option<String>) -> Result<Self> {
        let voices: VoiceTable = Arc::new(Mutex::new(HashMap::new()));
        let output = AudioOutput::start(device_name, Arc::clone(&voices))?;
        info!(
            "Device backend ready: media root {}, output '{}'",
            media_root.display(),
            output.device_name()
        );

        Ok(Self {
            media_root,
            voices,
            cache: Arc::new(Mutex::new(HashMap::new())),
            sample_rate: output.sample_rate(),
            device_error: output.error_flag(),
            _output: output,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Absolute identifiers are used as is, others are joined to the media root
    pub fn resolve(&self, source: &SourceId) -> PathBuf {
        resolve_source(&self.media_root, source)
    }
}

pub fn resolve_source(media_root: &Path, source: &SourceId) -> PathBuf {
    let path = Path::new(source.as_str());
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        media_root.join(path)
    }
}

/// Decode `path` and convert it to `output_rate`
pub fn load_track(path: &Path, output_rate: u32) -> Result<DecodedTrack> {
    let decoded = AudioDecoder::new(path)?.decode_all()?;
    let samples = Resampler::resample(&decoded.samples, decoded.sample_rate, output_rate, 2)?;
    let track = DecodedTrack {
        samples,
        sample_rate: output_rate,
    };
    debug!(
        "Loaded {} ({:.2}s at {} Hz)",
        path.display(),
        track.duration().as_secs_f64(),
        output_rate
    );
    Ok(track)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AudioBackend for DeviceBackend {
    fn open(
        &mut self,
        channel: ChannelId,
        source: &SourceId,
        events: ChannelEventSender,
    ) -> Result<Box<dyn PlaybackHandle>> {
        let path = self.resolve(source);
        if !path.is_file() {
            return Err(Error::UnknownSource(format!(
                "{} ({})",
                source,
                path.display()
            )));
        }

        let cached = lock(&self.cache).get(source).cloned();
        lock(&self.voices).insert(
            channel,
            OutputVoice {
                track: cached.clone(),
                ..OutputVoice::default()
            },
        );

        match cached {
            Some(track) => {
                let _ = events.send(ChannelEvent::MetadataLoaded {
                    channel,
                    duration: track.duration(),
                });
            }
            None => {
                let voices = Arc::clone(&self.voices);
                let cache = Arc::clone(&self.cache);
                let source = source.clone();
                let rate = self.sample_rate;
                let job = move || match load_track(&path, rate) {
                    Ok(track) => {
                        let track = Arc::new(track);
                        let duration = track.duration();
                        lock(&cache).insert(source, Arc::clone(&track));
                        if let Some(voice) = lock(&voices).get_mut(&channel) {
                            voice.track = Some(track);
                        }
                        let _ = events.send(ChannelEvent::MetadataLoaded { channel, duration });
                    }
                    Err(e) => {
                        warn!("Failed to load '{}': {}", source, e);
                        let _ = events.send(ChannelEvent::MetadataFailed {
                            channel,
                            reason: e.to_string(),
                        });
                    }
                };

                match tokio::runtime::Handle::try_current() {
                    Ok(rt) => {
                        rt.spawn_blocking(job);
                    }
                    Err(_) => job(),
                }
            }
        }

        Ok(Box::new(DeviceHandle {
            id: channel,
            voices: Arc::clone(&self.voices),
            sample_rate: self.sample_rate,
            device_error: Arc::clone(&self.device_error),
        }))
    }

    fn name(&self) -> &'static str {
        "device"
    }
}

/// Handle to one mixer voice
struct DeviceHandle {
    id: ChannelId,
    voices: VoiceTable,
    sample_rate: u32,
    device_error: Arc<AtomicBool>,
}

impl DeviceHandle {
    fn with_voice<R>(&self, f: impl FnOnce(&mut OutputVoice) -> R) -> Option<R> {
        lock(&self.voices).get_mut(&self.id).map(f)
    }

    fn frames_to_duration(&self, frames: usize) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }
}

impl PlaybackHandle for DeviceHandle {
    fn play(&mut self) -> Result<()> {
        if self.device_error.load(Ordering::SeqCst) {
            return Err(Error::PlaybackBlocked("output device reported an error".to_string()));
        }
        self.with_voice(|voice| {
            // Playing an ended track starts it over
            if voice.at_end() {
                voice.cursor = 0;
            }
            voice.playing = true;
        })
        .ok_or_else(|| Error::InvalidInput(format!("voice {} not found", self.id)))
    }

    fn pause(&mut self) {
        self.with_voice(|voice| voice.playing = false);
    }

    fn seek(&mut self, position: Duration) {
        let frame = (position.as_secs_f64() * self.sample_rate as f64) as usize;
        self.with_voice(|voice| {
            voice.cursor = match voice.track {
                Some(_) => frame.min(voice.frames()),
                None => frame,
            };
        });
    }

    fn position(&self) -> Duration {
        let cursor = self.with_voice(|voice| voice.cursor).unwrap_or(0);
        self.frames_to_duration(cursor)
    }

    fn duration(&self) -> Option<Duration> {
        self.with_voice(|voice| voice.track.as_ref().map(|t| t.duration()))
            .flatten()
    }

    fn is_playing(&self) -> bool {
        self.with_voice(|voice| voice.playing && !voice.at_end())
            .unwrap_or(false)
    }

    fn set_gain(&mut self, gain: f32) {
        self.with_voice(|voice| voice.gain = gain);
    }

    fn release(&mut self) {
        lock(&self.voices).remove(&self.id);
    }
}
