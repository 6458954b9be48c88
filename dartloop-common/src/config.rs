//! Configuration file resolution and loading
//!
//! Config file resolution follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. User config file (`~/.config/dartloop/config.toml` on Linux)
//! 4. System config file (`/etc/dartloop/config.toml`, Linux only)
//!
//! A missing file is not fatal: callers fall back to built-in defaults.
//! An explicitly requested file (CLI or environment) that does not exist is
//! a configuration error.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Directory name used under the platform config directory
pub const CONFIG_DIR_NAME: &str = "dartloop";

/// File name of the bootstrap configuration
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Where a configuration file was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Path passed on the command line
    CommandLine(PathBuf),
    /// Path taken from an environment variable
    Environment(PathBuf),
    /// Discovered in a platform default location
    Discovered(PathBuf),
}

impl ConfigSource {
    pub fn path(&self) -> &Path {
        match self {
            ConfigSource::CommandLine(p) | ConfigSource::Environment(p) | ConfigSource::Discovered(p) => p,
        }
    }

    /// Explicit sources must exist; discovered ones were already checked
    fn is_explicit(&self) -> bool {
        !matches!(self, ConfigSource::Discovered(_))
    }
}

/// Resolve which configuration file to use, if any
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<ConfigSource> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(ConfigSource::CommandLine(path.to_path_buf()));
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(ConfigSource::Environment(PathBuf::from(path)));
        }
    }

    // Priority 3/4: Platform default locations
    default_config_candidates()
        .into_iter()
        .find(|p| p.exists())
        .map(ConfigSource::Discovered)
}

/// Platform default config file locations, in search order
pub fn default_config_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME));
    }

    if cfg!(target_os = "linux") {
        candidates.push(PathBuf::from("/etc").join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME));
    }

    candidates
}

/// Parse a TOML file into `T`
pub fn load_toml_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|source| Error::Toml {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolve and load the configuration, falling back to `T::default()`
///
/// Returns the loaded value together with the file it came from (None when
/// built-in defaults were used).
pub fn load_or_default<T>(cli_arg: Option<&Path>, env_var_name: &str) -> Result<(T, Option<PathBuf>)>
where
    T: DeserializeOwned + Default,
{
    let Some(source) = resolve_config_path(cli_arg, env_var_name) else {
        info!("No configuration file found, using built-in defaults");
        return Ok((T::default(), None));
    };

    let path = source.path().to_path_buf();
    if !path.exists() {
        if source.is_explicit() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        warn!("Config file disappeared before loading: {}", path.display());
        return Ok((T::default(), None));
    }

    debug!("Loading configuration from {}", path.display());
    let value = load_toml_file(&path)?;
    Ok((value, Some(path)))
}
