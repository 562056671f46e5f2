use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read editor config at {config_path}: {source}")]
    Read {
        config_path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse editor config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub max_undo: usize,
    pub max_normalize_iterations: usize,
    pub trigger_char: char,
    /// Added to the projected caret `y` when placing the slash menu.
    pub menu_offset_y: f32,
    pub writeback_throttle_ms: u64,
    /// Panic on a transaction that would break the schema instead of
    /// logging and rejecting it.
    pub strict_invariants: bool,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            max_undo: 200,
            max_normalize_iterations: 100,
            trigger_char: '/',
            menu_offset_y: 24.0,
            writeback_throttle_ms: 100,
            strict_invariants: cfg!(debug_assertions),
        }
    }
}

impl EditorConfig {
    pub(crate) fn with_defaults(mut self) -> Self {
        let defaults = Self::default();
        if self.max_undo == 0 {
            self.max_undo = defaults.max_undo;
        }
        if self.max_normalize_iterations == 0 {
            self.max_normalize_iterations = defaults.max_normalize_iterations;
        }
        if self.writeback_throttle_ms == 0 {
            self.writeback_throttle_ms = defaults.writeback_throttle_ms;
        }
        if !self.menu_offset_y.is_finite() {
            self.menu_offset_y = defaults.menu_offset_y;
        }
        self
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: EditorConfig = serde_json::from_str(raw)?;
        Ok(config.with_defaults())
    }

    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config_path = config_path.as_ref();
        let content =
            std::fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
                config_path: config_path.to_path_buf(),
                source,
            })?;
        Self::from_json_str(&content)
    }

    pub fn writeback_throttle(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.writeback_throttle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_values_fall_back_to_defaults() {
        let config =
            EditorConfig::from_json_str(r##"{"max_undo":0,"trigger_char":"#","writeback_throttle_ms":0}"##)
                .unwrap();
        assert_eq!(config.max_undo, 200);
        assert_eq!(config.trigger_char, '#');
        assert_eq!(config.writeback_throttle_ms, 100);
    }

    #[test]
    fn bad_json_is_a_parse_error() {
        assert!(matches!(
            EditorConfig::from_json_str("{max_undo"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = EditorConfig::load_from_path("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
