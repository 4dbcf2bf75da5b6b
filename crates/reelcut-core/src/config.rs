//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ReelError, Result};

/// Global configuration for the export tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReelcutConfig {
    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Timeouts and limits for the export pipeline.
    pub pipeline: PipelineConfig,

    /// Preset used when none is given on the command line.
    pub default_preset: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "reelcut_export=trace,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,
}

/// Pipeline timing knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Timeout for a single codec dequeue call.
    pub dequeue_timeout_ms: u64,

    /// How long a codec may make no progress before the export fails.
    pub stall_timeout_ms: u64,

    /// Upper bound on the final end-of-stream drain of each encoder.
    pub drain_timeout_ms: u64,

    /// Frames submitted to the video encoder but not yet emitted before the
    /// processor blocks on the encoder.
    pub max_frames_in_flight: u32,

    /// Emit a progress event every N frames.
    pub progress_interval_frames: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dequeue_timeout_ms: 10,
            stall_timeout_ms: 10_000,
            drain_timeout_ms: 5_000,
            max_frames_in_flight: 8,
            progress_interval_frames: 10,
        }
    }
}

impl PipelineConfig {
    #[inline]
    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    #[inline]
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    #[inline]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl ReelcutConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = Self::default_path();
        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to load config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Load config from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| ReelError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<PathBuf> {
        let config_path = Self::default_path();
        self.save_to(&config_path)?;
        Ok(config_path)
    }

    /// Save config to an explicit path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ReelError::Serialization(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Standard config file location.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("reelcut")
            .join("config.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReelcutConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.pipeline.dequeue_timeout(), Duration::from_millis(10));
        assert!(config.default_preset.is_none());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: ReelcutConfig =
            serde_json::from_str(r#"{"pipeline": {"stall_timeout_ms": 250}}"#).unwrap();
        assert_eq!(config.pipeline.stall_timeout_ms, 250);
        assert_eq!(config.pipeline.dequeue_timeout_ms, 10);
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("reelcut-config-{}", std::process::id()));
        let path = dir.join("nested").join("config.json");
        let mut config = ReelcutConfig::default();
        config.default_preset = Some("SNS".to_string());
        config.save_to(&path).unwrap();

        let loaded = ReelcutConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let path = std::env::temp_dir().join(format!("reelcut-bad-{}.json", std::process::id()));
        std::fs::write(&path, "{ not json").unwrap();
        let err = ReelcutConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ReelError::Config(_)));
        std::fs::remove_file(&path).ok();
    }
}
