//! Shared test utilities
//!
//! - `harness`: drives a scheduler over a paused tokio clock
//! - `audio_generator`: deterministic WAV fixtures

#![allow(dead_code)]

pub mod audio_generator;
pub mod harness;
