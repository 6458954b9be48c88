//! # dartloop audio player library (dartloop-ap)
//!
//! Plays an intro track once, then loops a second track forever with
//! stepped linear crossfades between consecutive instances.
//!
//! **Architecture:** a single-task [`playback::CrossfadeScheduler`] drives
//! platform players through the [`playback::AudioBackend`] seam. The device
//! backend uses symphonia + rubato + cpal; the simulated backend plays
//! virtual tracks against the tokio clock.

pub mod audio;
pub mod config;
pub mod error;
pub mod playback;

pub use error::{Error, Result};
