//! Event types for the dartloop event system
//!
//! Provides the shared event definitions and the EventBus used to publish
//! scheduler activity to observers (rendering layer, logging, tests).

mod playback_types;

pub use playback_types::{PlaybackPhase, TransitionKind};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Looper event types
///
/// Events are broadcast via EventBus and can be serialized as tagged JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LooperEvent {
    /// A new playback session began
    SessionStarted {
        session_id: Uuid,
        intro: String,
        loop_source: String,
        fade_seconds: f64,
        timestamp: DateTime<Utc>,
    },

    /// Scheduler phase changed
    PhaseChanged {
        session_id: Uuid,
        old_phase: PlaybackPhase,
        new_phase: PlaybackPhase,
        timestamp: DateTime<Utc>,
    },

    /// A transition timer was armed
    TransitionArmed {
        session_id: Uuid,
        kind: TransitionKind,
        /// Delay from arming until the timer fires
        fires_in_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A transition could not be armed or fired yet
    ///
    /// Either the track duration is still unknown, or a previous crossfade
    /// is still running.
    TransitionDeferred {
        session_id: Uuid,
        kind: TransitionKind,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Both fade ramps of a crossfade were started
    CrossfadeStarted {
        session_id: Uuid,
        kind: TransitionKind,
        fade_seconds: f64,
        timestamp: DateTime<Utc>,
    },

    /// Both fade ramps of a crossfade reached their targets
    CrossfadeCompleted {
        session_id: Uuid,
        kind: TransitionKind,
        timestamp: DateTime<Utc>,
    },

    /// A new loop instance was spawned
    LoopSpawned {
        session_id: Uuid,
        /// 1-based spawn count within the session
        iteration: u64,
        timestamp: DateTime<Utc>,
    },

    /// The platform refused to start playback (e.g. autoplay restriction)
    PlaybackBlocked {
        session_id: Uuid,
        source: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Mute flag or master volume changed
    OutputGainChanged {
        muted: bool,
        master_volume: f32,
        timestamp: DateTime<Utc>,
    },

    /// Session stopped and all resources released
    Stopped {
        session_id: Option<Uuid>,
        timers_cancelled: usize,
        channels_released: usize,
        timestamp: DateTime<Utc>,
    },
}

impl LooperEvent {
    /// Short event name (matches the serde tag)
    pub fn event_type(&self) -> &'static str {
        match self {
            LooperEvent::SessionStarted { .. } => "SessionStarted",
            LooperEvent::PhaseChanged { .. } => "PhaseChanged",
            LooperEvent::TransitionArmed { .. } => "TransitionArmed",
            LooperEvent::TransitionDeferred { .. } => "TransitionDeferred",
            LooperEvent::CrossfadeStarted { .. } => "CrossfadeStarted",
            LooperEvent::CrossfadeCompleted { .. } => "CrossfadeCompleted",
            LooperEvent::LoopSpawned { .. } => "LoopSpawned",
            LooperEvent::PlaybackBlocked { .. } => "PlaybackBlocked",
            LooperEvent::OutputGainChanged { .. } => "OutputGainChanged",
            LooperEvent::Stopped { .. } => "Stopped",
        }
    }

    /// Serialize to a JSON string
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Central event distribution bus
///
/// Wraps a tokio broadcast channel. Slow subscribers lose the oldest events
/// once `capacity` is exceeded.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LooperEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use dartloop_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<LooperEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: LooperEvent,
    ) -> Result<usize, broadcast::error::SendError<LooperEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: LooperEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
