use std::fs;
use std::path::{Path, PathBuf};

use finchvoice_sdk::CallConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Config file name used when no path is given on the command line.
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to locate executable directory: {0}")]
    Locate(std::io::Error),

    #[error("Failed to read config {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("Failed to write config {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },

    #[error("Config {path} cannot be parsed: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub call: CallConfig,
    pub audio: AudioSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Input device name; the host default when unset.
    pub input_device: Option<String>,
    /// Output device name; the host default when unset.
    pub output_device: Option<String>,
    pub input_gain: f32,
    pub output_volume: f32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            input_gain: 1.0,
            output_volume: 1.0,
        }
    }
}

impl ClientConfig {
    /// `config.toml` next to the executable.
    ///
    /// # Errors
    /// Returns [`ConfigError::Locate`] if the executable path is unknown.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let exe_path = std::env::current_exe().map_err(ConfigError::Locate)?;
        Ok(exe_path
            .parent()
            .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), |dir| dir.join(DEFAULT_CONFIG_FILE)))
    }

    /// Load the config at `path`, writing a default one first if the file
    /// does not exist yet. The token may be overridden from the environment.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file cannot be read, parsed or created.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("Config file not found, creating default at {:?}", path);
            return Self::create_default_and_save(path);
        }

        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.call = config.call.with_env_overrides();
        Ok(config)
    }

    /// # Errors
    /// Returns [`ConfigError`] if the config cannot be serialized or written.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    fn create_default_and_save(path: &Path) -> Result<Self, ConfigError> {
        let default_config = Self::default();
        default_config.save(path)?;
        Ok(Self {
            call: default_config.call.with_env_overrides(),
            ..default_config
        })
    }
}
