//! # dartloop Common Library
//!
//! Shared code for the dartloop audio components:
//! - Error type shared by config loading
//! - Configuration file resolution and TOML loading
//! - Event types (LooperEvent enum) and the broadcast EventBus
//! - Playback phase and transition kind definitions

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{EventBus, LooperEvent, PlaybackPhase, TransitionKind};
