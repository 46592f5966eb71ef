use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::DEFAULT_RETRY;
use crate::render::DEFAULT_FRAME_INTERVAL;

pub const DEFAULT_SERVER: &str = "http://127.0.0.1:5000";

/// Run watched when neither the command line nor the config names one.
pub const SAMPLE_RUN_ID: &str = "160414_NS500336_0115_AHY2YCBGXX";

/// Counter config, loaded from TOML. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CounterConfig {
    /// Base URL of the status server.
    pub server: Option<String>,
    /// Run ids to watch, one display row each.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runs: Vec<String>,
    /// Render loop period.
    pub frame_interval_ms: Option<u64>,
    /// Reconnection delay before the server advertises its own.
    pub retry_ms: Option<u64>,
}

impl CounterConfig {
    /// Load config from a TOML file path. Returns None if file doesn't exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        Ok(Some(config))
    }

    /// Load from `path`, or from the default location when `path` is None.
    /// A missing file yields the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path(),
        };
        match path {
            Some(p) => Ok(Self::load(&p)?.unwrap_or_default()),
            None => Ok(Self::default()),
        }
    }

    /// Save config to a TOML file path.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, contents)
            .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        Ok(())
    }

    pub fn server(&self) -> &str {
        self.server.as_deref().unwrap_or(DEFAULT_SERVER)
    }

    /// Configured runs, falling back to the sample run.
    pub fn runs(&self) -> Vec<String> {
        if self.runs.is_empty() {
            vec![SAMPLE_RUN_ID.to_string()]
        } else {
            self.runs.clone()
        }
    }

    /// Never zero: a zero-period interval cannot be scheduled.
    pub fn frame_interval(&self) -> Duration {
        self.frame_interval_ms
            .map(|ms| Duration::from_millis(ms.max(1)))
            .unwrap_or(DEFAULT_FRAME_INTERVAL)
    }

    pub fn retry(&self) -> Duration {
        self.retry_ms.map(Duration::from_millis).unwrap_or(DEFAULT_RETRY)
    }
}

/// `$XDG_CONFIG_HOME/base-counter/config.toml` or the platform equivalent.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("base-counter").join("config.toml"))
}

/// Errors that can occur when loading or saving config.
#[derive(Debug)]
pub enum ConfigError {
    ReadFailed(PathBuf, std::io::Error),
    ParseFailed(PathBuf, toml::de::Error),
    WriteFailed(PathBuf, std::io::Error),
    SerializeFailed(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFailed(path, e) => {
                write!(f, "Failed to read config {}: {}", path.display(), e)
            }
            Self::ParseFailed(path, e) => {
                write!(f, "Failed to parse config {}: {}", path.display(), e)
            }
            Self::WriteFailed(path, e) => {
                write!(f, "Failed to write config {}: {}", path.display(), e)
            }
            Self::SerializeFailed(e) => write!(f, "Failed to serialize config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}
