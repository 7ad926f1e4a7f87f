use crate::table::DEFAULT_CAPACITY;
use crate::tag::DEFAULT_MAX_WORKLOAD_LEN;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from workload.toml.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
#[derive(Default)]
pub struct MeterConfig {
    pub engine: EngineConfig,
    pub replay: ReplayConfig,
    pub serve: ServeConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Dynamic workload entries, not counting the two reserved ones.
    pub capacity: usize,
    /// Longest accepted workload tag, in bytes.
    pub max_workload_len: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Concurrent sessions used to replay statement logs.
    pub sessions: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServeConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber` filter directive; `RUST_LOG` takes precedence.
    pub filter: String,
}

// --- Default implementations ---

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_workload_len: DEFAULT_MAX_WORKLOAD_LEN,
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self { sessions: 4 }
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8420,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl MeterConfig {
    /// Load configuration from `path`.
    ///
    /// A missing file yields the defaults; an unreadable or malformed one
    /// is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        let config: Self = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.max_workload_len == 0 {
            return Err(ConfigError::Invalid(
                "engine.max_workload_len must be greater than 0".to_string(),
            ));
        }
        if self.replay.sessions == 0 {
            return Err(ConfigError::Invalid(
                "replay.sessions must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Errors from loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = MeterConfig::load(&dir.path().join("workload.toml")).unwrap();
        assert_eq!(config.engine.capacity, 5000);
        assert_eq!(config.engine.max_workload_len, 50);
        assert_eq!(config.replay.sessions, 4);
        assert_eq!(config.serve.port, 8420);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("workload.toml");
        std::fs::write(&path, "[engine]\ncapacity = 10\n").unwrap();

        let config = MeterConfig::load(&path).unwrap();
        assert_eq!(config.engine.capacity, 10);
        assert_eq!(config.engine.max_workload_len, 50);
        assert_eq!(config.serve.bind, "127.0.0.1");
    }

    #[test]
    fn test_full_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("workload.toml");
        std::fs::write(
            &path,
            r#"
[engine]
capacity = 100
max_workload_len = 32

[replay]
sessions = 16

[serve]
bind = "0.0.0.0"
port = 9000

[logging]
filter = "workload_meter=debug"
"#,
        )
        .unwrap();

        let config = MeterConfig::load(&path).unwrap();
        assert_eq!(config.engine.capacity, 100);
        assert_eq!(config.engine.max_workload_len, 32);
        assert_eq!(config.replay.sessions, 16);
        assert_eq!(config.serve.bind, "0.0.0.0");
        assert_eq!(config.serve.port, 9000);
        assert_eq!(config.logging.filter, "workload_meter=debug");
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("workload.toml");
        std::fs::write(&path, "[engine\ncapacity = ").unwrap();

        let err = MeterConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("failed to parse config"));
    }

    #[test]
    fn test_zero_max_len_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("workload.toml");
        std::fs::write(&path, "[engine]\nmax_workload_len = 0\n").unwrap();

        let err = MeterConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_zero_sessions_rejected() {
        let mut config = MeterConfig::default();
        config.replay.sessions = 0;
        assert!(config.validate().is_err());
    }
}
