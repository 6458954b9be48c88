//! Audio channel wrapper
//!
//! An [`AudioChannel`] owns one backend playback handle and tracks the
//! ramp-controlled volume separately from the output gain override
//! (mute / master volume), so muting never disturbs fade math.

use crate::error::Result;
use crate::playback::backend::{AudioBackend, ChannelEventSender, ChannelId, PlaybackHandle, SourceId};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Which slot a channel fills
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelRole {
    Intro,
    Loop,
}

/// Outcome of a play attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackStart {
    Started,
    /// Platform refused; the reason has already been logged
    Blocked(String),
}

impl PlaybackStart {
    pub fn is_blocked(&self) -> bool {
        matches!(self, PlaybackStart::Blocked(_))
    }
}

/// Multiplicative output override applied on top of ramp volume
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputGain {
    pub muted: bool,
    pub master_volume: f32,
}

impl OutputGain {
    pub fn factor(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.master_volume
        }
    }
}

impl Default for OutputGain {
    fn default() -> Self {
        Self {
            muted: false,
            master_volume: 1.0,
        }
    }
}

/// Point-in-time view of a channel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSnapshot {
    pub id: ChannelId,
    pub source: String,
    pub role: ChannelRole,
    pub volume: f32,
    pub position_seconds: f64,
    pub duration_seconds: Option<f64>,
    pub playing: bool,
    pub blocked: bool,
}

/// One playable audio resource owned by the scheduler
pub struct AudioChannel {
    id: ChannelId,
    source: SourceId,
    role: ChannelRole,
    handle: Box<dyn PlaybackHandle>,
    volume: f32,
    output_factor: f32,
    blocked: bool,
    released: bool,
}

impl AudioChannel {
    /// Open a new channel through the backend factory
    pub fn open<B: AudioBackend + ?Sized>(
        backend: &mut B,
        id: ChannelId,
        source: &SourceId,
        role: ChannelRole,
        events: ChannelEventSender,
        output: OutputGain,
    ) -> Result<Self> {
        let handle = backend.open(id, source, events)?;
        debug!("Opened {:?} channel {} for '{}'", role, id, source);

        let mut channel = Self {
            id,
            source: source.clone(),
            role,
            handle,
            volume: 0.0,
            output_factor: output.factor(),
            blocked: false,
            released: false,
        };
        channel.push_gain();
        Ok(channel)
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn source(&self) -> &SourceId {
        &self.source
    }

    pub fn role(&self) -> ChannelRole {
        self.role
    }

    /// Begin or resume playback
    ///
    /// Never propagates an error: a refused start is logged and reported as
    /// `PlaybackStart::Blocked`.
    pub fn play(&mut self) -> PlaybackStart {
        match self.handle.play() {
            Ok(()) => {
                self.blocked = false;
                PlaybackStart::Started
            }
            Err(e) => {
                warn!("Channel {} ('{}') could not start: {}", self.id, self.source, e);
                self.blocked = true;
                PlaybackStart::Blocked(e.to_string())
            }
        }
    }

    pub fn pause(&mut self) {
        self.handle.pause();
    }

    pub fn seek(&mut self, position: Duration) {
        self.handle.seek(position);
    }

    /// Pause and rewind to the start
    pub fn reset(&mut self) {
        self.handle.pause();
        self.handle.seek(Duration::ZERO);
    }

    /// Set the ramp volume, clamped to 0.0-1.0
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        self.push_gain();
    }

    /// Apply a new mute/master override without touching the ramp volume
    pub fn apply_output_gain(&mut self, output: OutputGain) {
        self.output_factor = output.factor();
        self.push_gain();
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Gain actually written to the backend
    pub fn effective_gain(&self) -> f32 {
        self.volume * self.output_factor
    }

    pub fn position(&self) -> Duration {
        self.handle.position()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.handle.duration()
    }

    pub fn is_playing(&self) -> bool {
        self.handle.is_playing()
    }

    /// Last play attempt was refused
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            id: self.id,
            source: self.source.to_string(),
            role: self.role,
            volume: self.volume,
            position_seconds: self.position().as_secs_f64(),
            duration_seconds: self.duration().map(|d| d.as_secs_f64()),
            playing: self.is_playing(),
            blocked: self.blocked,
        }
    }

    /// Pause and free the backend resource
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.handle.pause();
        self.handle.release();
        self.released = true;
        debug!("Released channel {} ('{}')", self.id, self.source);
    }

    fn push_gain(&mut self) {
        let gain = self.effective_gain();
        trace!("Channel {} gain {:.3}", self.id, gain);
        self.handle.set_gain(gain);
    }
}

impl Drop for AudioChannel {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl std::fmt::Debug for AudioChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioChannel")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("role", &self.role)
            .field("volume", &self.volume)
            .field("blocked", &self.blocked)
            .finish()
    }
}
