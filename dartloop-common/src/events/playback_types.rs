//! Playback-related type definitions
//!
//! Supporting types for scheduler phase and transition reporting.

use serde::{Deserialize, Serialize};

/// Scheduler phase enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackPhase {
    /// Nothing started yet
    Idle,
    /// Intro track audible, waiting for the IntroToLoop transition
    PlayingIntro,
    /// Intro fading out while the first loop instance fades in
    CrossfadingToLoop,
    /// Loop chain running (including loop-to-loop crossfades)
    PlayingLoop,
    /// Session torn down, no timers pending
    Stopped,
}

impl PlaybackPhase {
    /// Phases in which a session owns live channels
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PlaybackPhase::PlayingIntro | PlaybackPhase::CrossfadingToLoop | PlaybackPhase::PlayingLoop
        )
    }
}

impl std::fmt::Display for PlaybackPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackPhase::Idle => write!(f, "Idle"),
            PlaybackPhase::PlayingIntro => write!(f, "PlayingIntro"),
            PlaybackPhase::CrossfadingToLoop => write!(f, "CrossfadingToLoop"),
            PlaybackPhase::PlayingLoop => write!(f, "PlayingLoop"),
            PlaybackPhase::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Scheduled transition kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// Intro track into the first loop instance
    IntroToLoop,
    /// Current loop instance into a freshly spawned one
    LoopToLoop,
}

impl std::fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionKind::IntroToLoop => write!(f, "IntroToLoop"),
            TransitionKind::LoopToLoop => write!(f, "LoopToLoop"),
        }
    }
}
