//! Platform playback seam
//!
//! The scheduler never decodes or outputs audio itself. It asks an
//! [`AudioBackend`] for one [`PlaybackHandle`] per channel and drives it
//! through play/pause/seek/gain calls. Duration metadata arrives
//! asynchronously as a [`ChannelEvent`].

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

/// Opaque identifier of a decodable audio resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of one channel instance, unique per scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// Asynchronous notifications from the backend about a channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Duration became known
    MetadataLoaded { channel: ChannelId, duration: Duration },

    /// The resource could not be loaded; duration will never be known
    MetadataFailed { channel: ChannelId, reason: String },
}

impl ChannelEvent {
    pub fn channel(&self) -> ChannelId {
        match self {
            ChannelEvent::MetadataLoaded { channel, .. } | ChannelEvent::MetadataFailed { channel, .. } => {
                *channel
            }
        }
    }
}

/// Sender half handed to the backend for metadata notifications
pub type ChannelEventSender = mpsc::UnboundedSender<ChannelEvent>;

/// Receiver half consumed by the scheduler service
pub type ChannelEventReceiver = mpsc::UnboundedReceiver<ChannelEvent>;

/// Factory for playback resources
pub trait AudioBackend: Send + 'static {
    /// Open a fresh, independent playback resource for `source`
    ///
    /// The handle starts paused at position 0. If the duration is not
    /// known yet, the backend must later send exactly one
    /// `MetadataLoaded` or `MetadataFailed` for `channel` on `events`.
    fn open(
        &mut self,
        channel: ChannelId,
        source: &SourceId,
        events: ChannelEventSender,
    ) -> Result<Box<dyn PlaybackHandle>>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}

/// One playable audio resource
pub trait PlaybackHandle: Send {
    /// Begin or resume playback from the current position
    ///
    /// Returns `Error::PlaybackBlocked` when the platform refuses.
    fn play(&mut self) -> Result<()>;

    /// Halt playback, keeping the position
    fn pause(&mut self);

    /// Move the playback position
    fn seek(&mut self, position: Duration);

    /// Current playback position
    fn position(&self) -> Duration;

    /// Track duration, if metadata has loaded
    fn duration(&self) -> Option<Duration>;

    /// True while audio is being produced
    fn is_playing(&self) -> bool;

    /// Effective output gain (0.0-1.0)
    fn set_gain(&mut self, gain: f32);

    /// Free the underlying playback resources
    fn release(&mut self);
}
