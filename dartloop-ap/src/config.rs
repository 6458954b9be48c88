//! Configuration management for dartloop-ap
//!
//! Bootstrap configuration is read from TOML (see `dartloop_common::config`
//! for file resolution) and overridden by command-line arguments.
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (--intro, --fade-seconds, ...)
//! 2. Environment variables (DARTLOOP_CONFIG selects the file)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "DARTLOOP_CONFIG";

/// Default crossfade overlap between outgoing and incoming track
pub const DEFAULT_FADE_SECONDS: f64 = 10.0;

/// Default number of volume steps per fade ramp
pub const DEFAULT_FADE_STEPS: u32 = 20;

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    /// Playback configuration
    #[serde(default)]
    pub audio: AudioConfig,

    /// Virtual track settings for the simulated backend
    #[serde(default)]
    pub simulated: SimulatedConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which playback backend the host binary drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Decode files and play through the default output device
    #[default]
    Device,
    /// Virtual playback against the runtime clock (no audio output)
    Simulated,
}

/// Playback configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// Intro track source identifier (played once)
    #[serde(default = "default_intro")]
    pub intro: String,

    /// Loop track source identifier (chained indefinitely)
    #[serde(default = "default_loop_track")]
    pub loop_track: String,

    /// Overlap between outgoing and incoming track, in seconds
    #[serde(default = "default_fade_seconds")]
    pub fade_seconds: f64,

    /// Volume steps per fade ramp
    #[serde(default = "default_fade_steps")]
    pub fade_steps: u32,

    /// Master volume multiplier (0.0-1.0)
    #[serde(default = "default_master_volume")]
    pub master_volume: f32,

    /// Start muted
    #[serde(default)]
    pub muted: bool,

    /// Folder that source identifiers are resolved against
    #[serde(default)]
    pub media_root: Option<PathBuf>,

    /// Playback backend selection
    #[serde(default)]
    pub backend: BackendKind,

    /// Output device name (None = system default)
    #[serde(default)]
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            intro: default_intro(),
            loop_track: default_loop_track(),
            fade_seconds: default_fade_seconds(),
            fade_steps: default_fade_steps(),
            master_volume: default_master_volume(),
            muted: false,
            media_root: None,
            backend: BackendKind::default(),
            output_device: None,
        }
    }
}

/// Virtual track durations for the simulated backend
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatedConfig {
    #[serde(default = "default_sim_intro_seconds")]
    pub intro_seconds: f64,

    #[serde(default = "default_sim_loop_seconds")]
    pub loop_seconds: f64,

    /// Delay before duration metadata becomes known (0 = immediately)
    #[serde(default)]
    pub metadata_delay_seconds: f64,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            intro_seconds: default_sim_intro_seconds(),
            loop_seconds: default_sim_loop_seconds(),
            metadata_delay_seconds: 0.0,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_intro() -> String {
    "intro.mp3".to_string()
}

fn default_loop_track() -> String {
    "loop.mp3".to_string()
}

fn default_fade_seconds() -> f64 {
    DEFAULT_FADE_SECONDS
}

fn default_fade_steps() -> u32 {
    DEFAULT_FADE_STEPS
}

fn default_master_volume() -> f32 {
    1.0
}

fn default_sim_intro_seconds() -> f64 {
    30.0
}

fn default_sim_loop_seconds() -> f64 {
    20.0
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Crossfade timing used by the scheduler
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossfadeSettings {
    /// Overlap between outgoing and incoming track
    pub fade: Duration,

    /// Volume steps per ramp (at least 1)
    pub step_count: u32,
}

impl Default for CrossfadeSettings {
    fn default() -> Self {
        Self {
            fade: Duration::from_secs_f64(DEFAULT_FADE_SECONDS),
            step_count: DEFAULT_FADE_STEPS,
        }
    }
}

impl CrossfadeSettings {
    pub fn new(fade: Duration, step_count: u32) -> Self {
        Self {
            fade,
            step_count: step_count.max(1),
        }
    }

    /// Build validated settings from the `[audio]` table
    pub fn from_config(audio: &AudioConfig) -> Result<Self> {
        if !audio.fade_seconds.is_finite() || audio.fade_seconds < 0.0 {
            return Err(Error::Config(format!(
                "fade_seconds must be a non-negative number, got {}",
                audio.fade_seconds
            )));
        }
        if audio.fade_steps == 0 {
            return Err(Error::Config("fade_steps must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&audio.master_volume) {
            return Err(Error::Config(format!(
                "master_volume must be within 0.0-1.0, got {}",
                audio.master_volume
            )));
        }

        Ok(Self::new(fade_duration(audio.fade_seconds), audio.fade_steps))
    }
}

/// Longest accepted crossfade
pub const MAX_FADE: Duration = Duration::from_secs(24 * 60 * 60);

/// Convert a caller-supplied fade length to a Duration
///
/// Negative, NaN and infinite values degrade to zero (instant switch).
/// Lengths above [`MAX_FADE`] are capped.
pub fn fade_duration(fade_seconds: f64) -> Duration {
    if !fade_seconds.is_finite() || fade_seconds < 0.0 {
        warn!("Invalid fade length {}s, using 0s", fade_seconds);
        return Duration::ZERO;
    }
    match Duration::try_from_secs_f64(fade_seconds) {
        Ok(fade) if fade <= MAX_FADE => fade,
        _ => {
            warn!(
                "Fade length {}s capped to {}s",
                fade_seconds,
                MAX_FADE.as_secs()
            );
            MAX_FADE
        }
    }
}
