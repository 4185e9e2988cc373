//! TOML configuration loading for the Marklin workspace (§1.1 ambient stack).
//!
//! Mirrors the `evo_hal`/`evo_control_unit` pattern of a typed config struct
//! loaded with `toml::from_str` and validated before use.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Configuration loading/validation error.
#[derive(Debug)]
pub enum ConfigError {
    /// File I/O error.
    Io(String),
    /// TOML parse error.
    Parse(String),
    /// Parameter validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {e}"),
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Validation(e) => write!(f, "config validation: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Which hardcoded physical track layout to load (the two CS-452-style test
/// tracks the topology service knows about).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrackLayout {
    /// Layout A.
    A,
    /// Layout B.
    B,
}

impl fmt::Display for TrackLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackLayout::A => write!(f, "A"),
            TrackLayout::B => write!(f, "B"),
        }
    }
}

/// One train's static startup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Physical train id (matches the Märklin decoder address).
    pub train_id: u8,
    /// Name of the sensor the train starts at.
    pub start_sensor: String,
    /// Starting direction, `"forward"` or `"reverse"`.
    #[serde(default = "default_direction")]
    pub start_direction: String,
}

fn default_direction() -> String {
    "forward".to_string()
}

/// Top-level workspace configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarklinConfig {
    /// Track layout to load.
    pub layout: TrackLayout,
    /// Trains to spawn at startup.
    #[serde(default)]
    pub trains: Vec<TrainConfig>,
    /// Log level (`"trace"`, `"debug"`, `"info"`, `"warn"`, `"error"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl MarklinConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{:?}: {e}", path)))?;
        let config: MarklinConfig =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants: unique train ids, non-empty sensor names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        use std::collections::HashSet;
        let mut seen = HashSet::new();
        for train in &self.trains {
            if train.train_id == 0 {
                return Err(ConfigError::Validation(
                    "train_id 0 is reserved for \"no owner\"".to_string(),
                ));
            }
            if !seen.insert(train.train_id) {
                return Err(ConfigError::Validation(format!(
                    "duplicate train_id {}",
                    train.train_id
                )));
            }
            if train.start_sensor.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "train {} has an empty start_sensor",
                    train.train_id
                )));
            }
        }
        Ok(())
    }
}

impl Default for MarklinConfig {
    fn default() -> Self {
        Self {
            layout: TrackLayout::A,
            trains: Vec::new(),
            log_level: default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_minimal_config() {
        let toml = r#"
            layout = "A"

            [[trains]]
            train_id = 24
            start_sensor = "A1"
        "#;
        let config: MarklinConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.layout, TrackLayout::A);
        assert_eq!(config.trains.len(), 1);
        assert_eq!(config.trains[0].train_id, 24);
        assert_eq!(config.trains[0].start_direction, "forward");
        config.validate().unwrap();
    }

    #[test]
    fn rejects_duplicate_train_ids() {
        let toml = r#"
            layout = "B"

            [[trains]]
            train_id = 24
            start_sensor = "A1"

            [[trains]]
            train_id = 24
            start_sensor = "E7"
        "#;
        let config: MarklinConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_reserved_train_id_zero() {
        let toml = r#"
            layout = "A"

            [[trains]]
            train_id = 0
            start_sensor = "A1"
        "#;
        let config: MarklinConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_from_file_roundtrip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "layout = \"A\"").unwrap();
        let config = MarklinConfig::load(file.path()).unwrap();
        assert_eq!(config.layout, TrackLayout::A);
        assert!(config.trains.is_empty());
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = MarklinConfig::load(Path::new("/nonexistent/marklin.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
