//! Configuration: a keyed, persisted document with typed accessors.
//!
//! Mirrors the external collaborator described in the workspace spec.
//! Absent or corrupt config files fall back to defaults rather than
//! failing startup.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown configuration key '{0}'")]
    UnknownKey(String),
    #[error("configuration key '{key}' must be a non-negative integer")]
    InvalidValue { key: String },
    #[error("failed to write configuration file: {0}")]
    Io(String),
}

/// The six numeric keys the original validates as non-negative integers
/// on `set`.
const NUMERIC_KEYS: &[&str] = &[
    "max_retries",
    "backoff_base",
    "backoff_max_delay",
    "worker_poll_interval",
    "worker_heartbeat_interval",
    "job_timeout",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub max_retries: i64,
    pub backoff_base: i64,
    pub backoff_max_delay: i64,
    pub worker_poll_interval: i64,
    pub worker_heartbeat_interval: i64,
    pub job_timeout: i64,
    pub db_path: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_retries: 3,
            backoff_base: 2,
            backoff_max_delay: 3600,
            worker_poll_interval: 1,
            worker_heartbeat_interval: 5,
            job_timeout: 300,
            db_path: "queuectl.db".to_string(),
            log_level: "INFO".to_string(),
        }
    }
}

impl Config {
    /// Load from `path`, falling back to defaults if the file is absent
    /// or fails to parse.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
            Err(_) => Config::default(),
        }
    }

    /// Persist as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Io(e.to_string()))?;
        std::fs::write(path, contents).map_err(|e| ConfigError::Io(e.to_string()))
    }

    fn as_map(&self) -> serde_json::Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }

    /// Get a configuration value by key.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.as_map().get(key).cloned()
    }

    /// Get every configured value as key/value pairs, sorted by key.
    pub fn get_all(&self) -> Vec<(String, Value)> {
        let mut entries: Vec<_> = self.as_map().into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Set a configuration value, validating numeric keys are
    /// non-negative integers, and persist the result.
    pub fn set(&mut self, path: &Path, key: &str, value: Value) -> Result<(), ConfigError> {
        let mut map = self.as_map();
        if !map.contains_key(key) {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }

        let value = if NUMERIC_KEYS.contains(&key) {
            let n = match &value {
                Value::Number(n) if n.is_i64() || n.is_u64() => n.as_i64().unwrap_or(-1),
                Value::String(s) => s
                    .parse::<i64>()
                    .map_err(|_| ConfigError::InvalidValue { key: key.to_string() })?,
                _ => return Err(ConfigError::InvalidValue { key: key.to_string() }),
            };
            if n < 0 {
                return Err(ConfigError::InvalidValue { key: key.to_string() });
            }
            Value::Number(n.into())
        } else {
            value
        };

        map.insert(key.to_string(), value);
        *self = serde_json::from_value(Value::Object(map))
            .map_err(|_| ConfigError::InvalidValue { key: key.to_string() })?;
        self.save(path)
    }

    /// Reset one key (or, if `key` is `None`, the whole configuration)
    /// to its default value, and persist the result.
    pub fn reset(&mut self, path: &Path, key: Option<&str>) -> Result<(), ConfigError> {
        let defaults = Config::default();
        match key {
            None => {
                *self = defaults;
            }
            Some(key) => {
                let mut map = self.as_map();
                let default_map = defaults.as_map();
                let default_value = default_map
                    .get(key)
                    .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
                map.insert(key.to_string(), default_value.clone());
                *self = serde_json::from_value(Value::Object(map))
                    .map_err(|_| ConfigError::UnknownKey(key.to_string()))?;
            }
        }
        self.save(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("queuectl-config-test-{name}-{}.json", std::process::id()))
    }

    #[test]
    fn absent_file_yields_defaults() {
        let path = temp_path("absent");
        let _ = std::fs::remove_file(&path);
        let config = Config::load(&path);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.db_path, "queuectl.db");
    }

    #[test]
    fn corrupt_file_yields_defaults() {
        let path = temp_path("corrupt");
        std::fs::write(&path, "{not json").unwrap();
        let config = Config::load(&path);
        assert_eq!(config.max_retries, 3);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn set_rejects_negative_numeric_value() {
        let path = temp_path("negative");
        let mut config = Config::default();
        let err = config.set(&path, "max_retries", Value::from(-1)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn set_persists_and_round_trips() {
        let path = temp_path("roundtrip");
        let mut config = Config::default();
        config.set(&path, "log_level", Value::from("DEBUG")).unwrap();
        assert_eq!(config.log_level, "DEBUG");
        let reloaded = Config::load(&path);
        assert_eq!(reloaded.log_level, "DEBUG");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn reset_single_key_restores_default() {
        let path = temp_path("reset-key");
        let mut config = Config::default();
        config.set(&path, "job_timeout", Value::from(999)).unwrap();
        config.reset(&path, Some("job_timeout")).unwrap();
        assert_eq!(config.job_timeout, 300);
        let _ = std::fs::remove_file(&path);
    }
}
