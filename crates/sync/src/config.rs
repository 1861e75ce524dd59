use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tunables for a synchronization session. Missing fields take defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Ticks a spawn may wait for its parent before it is dropped.
    pub parent_wait_ticks: u64,
    /// Number of recent action ids remembered for at-most-once delivery.
    pub dedup_window: usize,
    /// Cap on actions applied per tick, treated as at least 1; `None` drains everything.
    pub max_actions_per_tick: Option<usize>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            parent_wait_ticks: 120,
            dedup_window: 4096,
            max_actions_per_tick: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config = SyncConfig::from_json_str(r#"{ "parent_wait_ticks": 5 }"#).unwrap();
        assert_eq!(config.parent_wait_ticks, 5);
        assert_eq!(config.dedup_window, SyncConfig::default().dedup_window);
        assert_eq!(config.max_actions_per_tick, None);
    }

    #[test]
    fn loads_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sync.json");
        std::fs::write(&path, r#"{ "max_actions_per_tick": 32, "dedup_window": 8 }"#).unwrap();

        let config = SyncConfig::from_json_file(&path).unwrap();
        assert_eq!(config.max_actions_per_tick, Some(32));
        assert_eq!(config.dedup_window, 8);
    }

    #[test]
    fn missing_file_is_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let result = SyncConfig::from_json_file(tmp.path().join("absent.json"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(
            SyncConfig::from_json_str("{ parent_wait_ticks: }"),
            Err(ConfigError::Json(_))
        ));
    }
}
