//! Configuration file discovery and TOML loading
//!
//! Config file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Platform config directory (`~/.config/ptsync/config.toml`, then `/etc/ptsync/config.toml`)
//! 4. Compiled defaults (no file)
//!
//! A missing discovered file is not an error: the caller runs on defaults.
//! A missing *explicit* file (CLI or ENV) is an error, since the operator asked for it.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Application directory name used under the platform config/data dirs
pub const APP_DIR_NAME: &str = "ptsync";

/// Where the configuration is coming from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Path given on the command line or through the environment
    Explicit(PathBuf),
    /// Path found in a platform config directory
    Discovered(PathBuf),
    /// No file; compiled defaults apply
    Defaults,
}

impl ConfigSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::Explicit(p) | ConfigSource::Discovered(p) => Some(p),
            ConfigSource::Defaults => None,
        }
    }
}

/// Locate the configuration file following the priority order above
pub fn locate_config_file(cli_arg: Option<&Path>, env_var_name: &str) -> ConfigSource {
    if let Some(path) = cli_arg {
        return ConfigSource::Explicit(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return ConfigSource::Explicit(PathBuf::from(path));
        }
    }

    let user_config = dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return ConfigSource::Discovered(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc").join(APP_DIR_NAME).join("config.toml");
        if system_config.exists() {
            return ConfigSource::Discovered(system_config);
        }
    }

    ConfigSource::Defaults
}

/// Load a TOML configuration of type `T` from the given source
pub fn load_toml_config<T>(source: &ConfigSource) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match source {
        ConfigSource::Defaults => {
            info!("No configuration file found, using compiled defaults");
            Ok(T::default())
        }
        ConfigSource::Explicit(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            parse_toml_file(path)
        }
        ConfigSource::Discovered(path) => match parse_toml_file(path) {
            Ok(config) => Ok(config),
            Err(Error::Io(e)) => {
                warn!("Could not read {}: {}. Using defaults.", path.display(), e);
                Ok(T::default())
            }
            Err(e) => Err(e),
        },
    }
}

fn parse_toml_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    info!("Configuration loaded from {}", path.display());
    Ok(config)
}

/// OS-dependent default data folder (holds the SQLite database)
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("./ptsync_data"))
}

/// Default destination database path
pub fn default_database_path() -> PathBuf {
    default_data_dir().join("ptsync.db")
}
