//! YAML configuration.
//!
//! ```yaml
//! rooms: [22637261, 21452505]
//! storage:
//!   backend: jsonl
//!   path: ./data
//! log:
//!   level: info
//!   appender: file      # console | file
//!   dir: ./logs
//! monitor:
//!   danmu_batch_capacity: 256
//! client:
//!   heartbeat_interval_secs: 30
//! ```
//!
//! Everything except `rooms` has a default.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use livechat_batch::{BatchConfig, FlushMode};
use livechat_client::ClientConfig;
use serde::{Deserialize, Serialize};

/// Errors from loading or validating a [`Config`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Parse(#[from] serde_yaml_ng::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Keep events in process memory. Nothing survives a restart.
    Memory,
    /// One append-only JSON-lines file per event kind.
    #[default]
    Jsonl,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Output directory for the `jsonl` backend.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogAppender {
    /// Standard output.
    #[default]
    Console,
    /// Size-rotated files under `log.dir`.
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// An `EnvFilter` directive, e.g. `info` or `livechat_client=debug,info`.
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    pub appender: LogAppender,
    /// Colour output. Ignored for the file appender.
    pub ansi: bool,
    /// Include the module target in each line.
    pub target: bool,
    /// Directory for the file appender.
    pub dir: PathBuf,
    /// A new file is started once the current one reaches this many bytes.
    pub max_file_size: u64,
}

impl LogConfig {
    pub const DEFAULT_MAX_FILE_SIZE: u64 = 512 * 1024;
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            appender: LogAppender::default(),
            ansi: true,
            target: false,
            dir: PathBuf::from("./logs"),
            max_file_size: Self::DEFAULT_MAX_FILE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub danmu_batch_capacity: usize,
    pub danmu_batch_period_secs: u64,
    /// Pause between joining consecutive rooms.
    pub connect_stagger_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            danmu_batch_capacity: BatchConfig::DEFAULT_CAPACITY,
            danmu_batch_period_secs: BatchConfig::DEFAULT_PERIOD.as_secs(),
            connect_stagger_ms: 1000,
        }
    }
}

impl MonitorConfig {
    /// Chat lines are flushed on a fixed period, whatever the arrival rate.
    pub fn danmu_batch(&self) -> BatchConfig {
        BatchConfig::new(
            self.danmu_batch_capacity,
            Duration::from_secs(self.danmu_batch_period_secs),
        )
        .with_mode(FlushMode::Periodic)
    }

    pub fn connect_stagger(&self) -> Duration {
        Duration::from_millis(self.connect_stagger_ms)
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// The whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Room ids to monitor, as shown in the room URL.
    pub rooms: Vec<i64>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

impl Config {
    /// Parses YAML without validating it.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml_ng::from_str(yaml)?)
    }

    /// Reads and parses a file without validating it.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    /// Reads, parses and validates a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Replaces the room list, e.g. from command-line overrides.
    pub fn with_rooms(mut self, rooms: Vec<i64>) -> Self {
        self.rooms = rooms;
        self
    }

    /// Rejects configs the monitor cannot run with.
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] for an empty or duplicated room list, a
    /// non-positive room id, or any zero capacity, period or timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rooms.is_empty() {
            return Err(ConfigError::Invalid("no rooms to monitor".into()));
        }
        let mut seen = HashSet::new();
        for &room in &self.rooms {
            if room <= 0 {
                return Err(ConfigError::Invalid(format!("room id {room} must be positive")));
            }
            if !seen.insert(room) {
                return Err(ConfigError::Invalid(format!("room {room} listed twice")));
            }
        }

        let zero_checks = [
            ("monitor.danmu_batch_capacity", self.monitor.danmu_batch_capacity as u64),
            ("monitor.danmu_batch_period_secs", self.monitor.danmu_batch_period_secs),
            ("client.handshake_timeout_secs", self.client.handshake_timeout_secs),
            ("client.heartbeat_interval_secs", self.client.heartbeat_interval_secs),
            ("client.queue_capacity", self.client.queue_capacity as u64),
            ("log.max_file_size", self.log.max_file_size),
        ];
        for (field, value) in zero_checks {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{field} must be greater than 0")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
rooms: [22637261, 21452505]
storage:
  backend: memory
  path: /tmp/livechat
log:
  level: debug
  appender: file
  dir: /tmp/livechat/logs
  max_file_size: 4096
  ansi: false
monitor:
  danmu_batch_capacity: 128
  danmu_batch_period_secs: 30
  connect_stagger_ms: 250
client:
  handshake_timeout_secs: 3
  heartbeat_interval_secs: 20
  queue_capacity: 32
"#;

    #[test]
    fn test_full_config_parses() {
        let config = Config::from_yaml(FULL).unwrap();
        assert_eq!(config.rooms, vec![22637261, 21452505]);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.path, PathBuf::from("/tmp/livechat"));
        assert_eq!(config.log.level, "debug");
        assert!(!config.log.ansi);
        assert_eq!(config.log.appender, LogAppender::File);
        assert_eq!(config.log.dir, PathBuf::from("/tmp/livechat/logs"));
        assert_eq!(config.log.max_file_size, 4096);
        assert_eq!(config.monitor.connect_stagger(), Duration::from_millis(250));
        assert_eq!(config.client.queue_capacity, 32);
        config.validate().unwrap();
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_yaml("rooms: [1]").unwrap();
        assert_eq!(config.storage, StorageConfig::default());
        assert_eq!(config.log, LogConfig::default());
        assert_eq!(config.monitor, MonitorConfig::default());
        assert_eq!(config.client, ClientConfig::default());
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = Config::from_yaml("rooms: [1]\nmonitor:\n  connect_stagger_ms: 0\n").unwrap();
        assert_eq!(config.monitor.connect_stagger_ms, 0);
        assert_eq!(config.monitor.danmu_batch_capacity, 256);
    }

    #[test]
    fn test_log_appender_defaults_to_console() {
        let config = Config::from_yaml("rooms: [1]\nlog:\n  level: warn\n").unwrap();
        assert_eq!(config.log.appender, LogAppender::Console);
        assert_eq!(config.log.max_file_size, 512 * 1024);
        assert!(Config::from_yaml("rooms: [1]\nlog:\n  appender: syslog\n").is_err());
    }

    #[test]
    fn test_danmu_batch_is_periodic() {
        let batch = MonitorConfig::default().danmu_batch();
        assert_eq!(batch.capacity, 256);
        assert_eq!(batch.period, Duration::from_secs(60));
        assert_eq!(batch.mode, FlushMode::Periodic);
    }

    #[test]
    fn test_missing_rooms_is_parse_error() {
        assert!(matches!(
            Config::from_yaml("log:\n  level: info\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let base = Config::from_yaml("rooms: [1]").unwrap();

        let empty = base.clone().with_rooms(vec![]);
        assert!(matches!(empty.validate(), Err(ConfigError::Invalid(_))));

        let dup = base.clone().with_rooms(vec![5, 5]);
        assert!(matches!(dup.validate(), Err(ConfigError::Invalid(_))));

        let negative = base.clone().with_rooms(vec![-1]);
        assert!(matches!(negative.validate(), Err(ConfigError::Invalid(_))));

        let mut zero = base.clone();
        zero.monitor.danmu_batch_capacity = 0;
        let err = zero.validate().unwrap_err();
        assert!(err.to_string().contains("danmu_batch_capacity"));

        let mut zero = base.clone();
        zero.client.heartbeat_interval_secs = 0;
        assert!(matches!(zero.validate(), Err(ConfigError::Invalid(_))));

        let mut zero = base;
        zero.log.max_file_size = 0;
        assert!(zero.validate().unwrap_err().to_string().contains("max_file_size"));
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("livechat.yaml");
        std::fs::write(&path, FULL).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.rooms.len(), 2);

        let missing = Config::load(dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }
}
