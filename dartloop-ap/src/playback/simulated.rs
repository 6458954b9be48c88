//! Simulated playback backend
//!
//! Virtual tracks that "play" against the tokio clock. Used by tests (with a
//! paused clock) and by headless hosts. Supports autoplay blocking, delayed
//! or missing duration metadata, and records every gain write so callers can
//! verify that nothing touches a channel after it was stopped.

use crate::error::{Error, Result};
use crate::playback::backend::{
    AudioBackend, ChannelEvent, ChannelEventSender, ChannelId, PlaybackHandle, SourceId,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// When duration metadata of a virtual track becomes known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataMode {
    /// Known as soon as the source is opened
    Immediate,
    /// Known after a delay (needs a tokio runtime)
    Delayed(Duration),
    /// Known once `finish_loading` is called
    Manual,
    /// Never known
    Never,
}

/// One recorded gain write
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainWrite {
    pub channel: ChannelId,
    pub gain: f32,
    pub at: Instant,
}

/// Inspection view of a virtual voice
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceSnapshot {
    pub source: SourceId,
    pub playing: bool,
    pub position: Duration,
    pub gain: f32,
    pub released: bool,
}

struct SimSource {
    duration: Duration,
    mode: MetadataMode,
    loaded: bool,
}

struct SimVoice {
    source: SourceId,
    length: Duration,
    offset: Duration,
    playing_since: Option<Instant>,
    gain: f32,
    released: bool,
    duration_known: bool,
    events: ChannelEventSender,
}

impl SimVoice {
    fn position(&self, now: Instant) -> Duration {
        let elapsed = self
            .playing_since
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or(Duration::ZERO);
        (self.offset + elapsed).min(self.length)
    }

    fn is_playing(&self, now: Instant) -> bool {
        self.playing_since.is_some() && self.position(now) < self.length
    }
}

#[derive(Default)]
struct SimState {
    sources: HashMap<SourceId, SimSource>,
    voices: BTreeMap<ChannelId, SimVoice>,
    gain_writes: Vec<GainWrite>,
    autoplay_blocked: bool,
    opened: usize,
}

/// Backend producing virtual voices
#[derive(Clone, Default)]
pub struct SimulatedBackend {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        lock_state(&self.state)
    }

    /// Declare a virtual track
    pub fn add_source(&self, source: impl Into<SourceId>, duration: Duration, mode: MetadataMode) {
        let source = source.into();
        let loaded = mode == MetadataMode::Immediate;
        self.lock().sources.insert(source, SimSource { duration, mode, loaded });
    }

    /// Withdraw a virtual track; voices already open keep playing
    pub fn remove_source(&self, source: &SourceId) {
        self.lock().sources.remove(source);
    }

    /// Refuse (or allow again) every play attempt
    pub fn set_autoplay_blocked(&self, blocked: bool) {
        self.lock().autoplay_blocked = blocked;
    }

    /// Mark a source's metadata as loaded and notify its open voices
    pub fn finish_loading(&self, source: &SourceId) {
        let mut state = self.lock();
        let Some(entry) = state.sources.get_mut(source) else {
            warn!("finish_loading for unknown source '{}'", source);
            return;
        };
        entry.loaded = true;
        let duration = entry.duration;

        for (id, voice) in state.voices.iter_mut() {
            if &voice.source == source && !voice.duration_known && !voice.released {
                voice.duration_known = true;
                let _ = voice.events.send(ChannelEvent::MetadataLoaded {
                    channel: *id,
                    duration,
                });
            }
        }
    }

    /// Report a metadata failure to every open voice of `source`
    pub fn fail_loading(&self, source: &SourceId, reason: &str) {
        let state = self.lock();
        for (id, voice) in state.voices.iter() {
            if &voice.source == source && !voice.duration_known && !voice.released {
                let _ = voice.events.send(ChannelEvent::MetadataFailed {
                    channel: *id,
                    reason: reason.to_string(),
                });
            }
        }
    }

    pub fn voice(&self, channel: ChannelId) -> Option<VoiceSnapshot> {
        let now = Instant::now();
        self.lock().voices.get(&channel).map(|v| VoiceSnapshot {
            source: v.source.clone(),
            playing: v.is_playing(now),
            position: v.position(now),
            gain: v.gain,
            released: v.released,
        })
    }

    /// Voices opened and not yet released
    pub fn live_voices(&self) -> usize {
        self.lock().voices.values().filter(|v| !v.released).count()
    }

    /// Live voices of one source
    pub fn live_voices_for(&self, source: &SourceId) -> usize {
        self.lock()
            .voices
            .values()
            .filter(|v| !v.released && &v.source == source)
            .count()
    }

    /// Total voices ever opened
    pub fn opened_count(&self) -> usize {
        self.lock().opened
    }

    pub fn gain_writes(&self) -> Vec<GainWrite> {
        self.lock().gain_writes.clone()
    }

    pub fn gain_write_count(&self) -> usize {
        self.lock().gain_writes.len()
    }
}

impl AudioBackend for SimulatedBackend {
    fn open(
        &mut self,
        channel: ChannelId,
        source: &SourceId,
        events: ChannelEventSender,
    ) -> Result<Box<dyn PlaybackHandle>> {
        let (length, mode, loaded) = {
            let mut state = self.lock();
            let entry = state
                .sources
                .get(source)
                .ok_or_else(|| Error::UnknownSource(source.to_string()))?;
            let (length, mode, loaded) = (entry.duration, entry.mode, entry.loaded);

            state.voices.insert(
                channel,
                SimVoice {
                    source: source.clone(),
                    length,
                    offset: Duration::ZERO,
                    playing_since: None,
                    gain: 0.0,
                    released: false,
                    duration_known: loaded,
                    events,
                },
            );
            state.opened += 1;
            (length, mode, loaded)
        };

        if !loaded {
            if let MetadataMode::Delayed(delay) = mode {
                match tokio::runtime::Handle::try_current() {
                    Ok(rt) => {
                        let backend = self.clone();
                        let source = source.clone();
                        rt.spawn(async move {
                            tokio::time::sleep(delay).await;
                            backend.finish_loading(&source);
                        });
                    }
                    Err(_) => warn!("No runtime for delayed metadata of '{}'", source),
                }
            }
        }

        debug!("Simulated voice {} opened for '{}' ({:?})", channel, source, length);
        Ok(Box::new(SimulatedHandle {
            id: channel,
            state: Arc::clone(&self.state),
        }))
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

fn lock_state(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to one virtual voice
struct SimulatedHandle {
    id: ChannelId,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedHandle {
    fn with_voice<R>(&self, f: impl FnOnce(&mut SimVoice, Instant) -> R) -> Option<R> {
        let now = Instant::now();
        let mut state = lock_state(&self.state);
        state.voices.get_mut(&self.id).map(|v| f(v, now))
    }
}

impl PlaybackHandle for SimulatedHandle {
    fn play(&mut self) -> Result<()> {
        let now = Instant::now();
        let mut state = lock_state(&self.state);
        if state.autoplay_blocked {
            return Err(Error::PlaybackBlocked(
                "playback requires a user gesture".to_string(),
            ));
        }
        let voice = state
            .voices
            .get_mut(&self.id)
            .ok_or_else(|| Error::InvalidInput(format!("voice {} not found", self.id)))?;
        if voice.released {
            return Err(Error::InvalidInput(format!("voice {} was released", self.id)));
        }
        if voice.playing_since.is_none() {
            // Playing an ended track starts it over
            if voice.offset >= voice.length {
                voice.offset = Duration::ZERO;
            }
            voice.playing_since = Some(now);
        }
        Ok(())
    }

    fn pause(&mut self) {
        self.with_voice(|v, now| {
            v.offset = v.position(now);
            v.playing_since = None;
        });
    }

    fn seek(&mut self, position: Duration) {
        self.with_voice(|v, now| {
            v.offset = position.min(v.length);
            if v.playing_since.is_some() {
                v.playing_since = Some(now);
            }
        });
    }

    fn position(&self) -> Duration {
        self.with_voice(|v, now| v.position(now)).unwrap_or_default()
    }

    fn duration(&self) -> Option<Duration> {
        self.with_voice(|v, _| v.duration_known.then_some(v.length))
            .flatten()
    }

    fn is_playing(&self) -> bool {
        self.with_voice(|v, now| v.is_playing(now)).unwrap_or(false)
    }

    fn set_gain(&mut self, gain: f32) {
        let now = Instant::now();
        let mut state = lock_state(&self.state);
        if let Some(voice) = state.voices.get_mut(&self.id) {
            voice.gain = gain;
        }
        state.gain_writes.push(GainWrite {
            channel: self.id,
            gain,
            at: now,
        });
    }

    fn release(&mut self) {
        self.with_voice(|v, now| {
            v.offset = v.position(now);
            v.playing_since = None;
            v.released = true;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_position_follows_clock() {
        let mut backend = SimulatedBackend::new();
        backend.add_source("intro", Duration::from_secs(10), MetadataMode::Immediate);
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut handle = backend.open(ChannelId(7), &SourceId::new("intro"), tx).unwrap();

        handle.play().unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(handle.position(), Duration::from_secs(4));
        assert!(handle.is_playing());

        handle.pause();
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(handle.position(), Duration::from_secs(4));

        // Runs out at the track end
        handle.play().unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(handle.position(), Duration::from_secs(10));
        assert!(!handle.is_playing());
    }

    #[test]
    fn test_unknown_source_is_error() {
        let mut backend = SimulatedBackend::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = backend.open(ChannelId(1), &SourceId::new("missing"), tx);
        assert!(matches!(result, Err(Error::UnknownSource(_))));
    }

    #[test]
    fn test_manual_metadata_notifies_open_voices() {
        let mut backend = SimulatedBackend::new();
        backend.add_source("loop", Duration::from_secs(20), MetadataMode::Manual);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = backend.open(ChannelId(2), &SourceId::new("loop"), tx).unwrap();
        assert_eq!(handle.duration(), None);

        backend.finish_loading(&SourceId::new("loop"));
        assert_eq!(handle.duration(), Some(Duration::from_secs(20)));
        assert_eq!(
            rx.try_recv().unwrap(),
            ChannelEvent::MetadataLoaded {
                channel: ChannelId(2),
                duration: Duration::from_secs(20)
            }
        );

        // Later voices of a loaded source know their duration at once
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let later = backend.open(ChannelId(3), &SourceId::new("loop"), tx2).unwrap();
        assert_eq!(later.duration(), Some(Duration::from_secs(20)));
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn test_gain_writes_are_recorded() {
        let mut backend = SimulatedBackend::new();
        backend.add_source("loop", Duration::from_secs(20), MetadataMode::Immediate);
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut handle = backend.open(ChannelId(4), &SourceId::new("loop"), tx).unwrap();

        handle.set_gain(0.25);
        handle.set_gain(0.5);
        let writes = backend.gain_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1].gain, 0.5);
        assert_eq!(backend.voice(ChannelId(4)).unwrap().gain, 0.5);
    }
}
