//! Configuration file handling for lane-motion.
//!
//! Loads configuration from `<config dir>/lane-motion/config.toml` or a custom path.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::capture::AcquisitionSettings;
use crate::motion::{DetectorSettings, MotionTuning};

/// Configuration file structure for lane-motion.
/// Every section and field is optional; missing values use the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub acquisition: AcquisitionSettings,
    #[serde(default)]
    pub motion: MotionTuning,
    #[serde(default)]
    pub detector: DetectorSettings,
}

/// Commented starting point written by `config init`.
pub const DEFAULT_CONFIG: &str = r#"# lane-motion configuration

[acquisition]
# How long to wait for the user/platform to grant camera access
permission_timeout_ms = 8000
# Retry budget after render failures (default depends on platform)
# render_retry_count = 2
# Render-health probe budgets
metadata_timeout_ms = 4000
play_timeout_ms = 3000
frame_health_timeout_ms = 2500
# Accepted frame-progress signals: media-clock, decoded-frames, presentation
frame_progress = ["media-clock", "decoded-frames", "presentation"]

[motion]
# Landmarks below this confidence are ignored
min_confidence = 0.35
# Lateral offset (normalized) needed to change lane at reference distance
lane_threshold = 0.12
# Minimum time between jumps
jump_cooldown_ms = 800

[detector]
# Maximum frames per second sent to the landmark detector
send_rate_hz = 35.0
# Give up initializing the detector after this long
init_deadline_secs = 180
"#;

impl Config {
    /// Load configuration from a file path.
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(PathBuf::from).unwrap_or_else(default_path);

        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
                path: path.clone(),
                source: e,
            })?;
            let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.clone(),
                source: e,
            })?;
            log::debug!("Loaded config from {}", path.display());
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::SerializeError)
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
    SerializeError(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError { path, source } => {
                write!(
                    f,
                    "Failed to read config file '{}': {}",
                    path.display(),
                    source
                )
            }
            ConfigError::ParseError { path, source } => {
                write!(
                    f,
                    "Failed to parse config file '{}': {}",
                    path.display(),
                    source
                )
            }
            ConfigError::SerializeError(source) => {
                write!(f, "Failed to render configuration: {}", source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError { source, .. } => Some(source),
            ConfigError::ParseError { source, .. } => Some(source),
            ConfigError::SerializeError(source) => Some(source),
        }
    }
}

/// Get the default config file path.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("lane-motion").join("config.toml"))
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config/lane-motion/config.toml")
        })
}
