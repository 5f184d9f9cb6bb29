//! Runtime configuration, loaded from TOML
//!
//! Every field has a default, so a missing file or a partial file both work:
//!
//! ```toml
//! [sync]
//! pending_ttl_ms = 5000
//! channel_name = "menuboard-sync"
//!
//! [cache]
//! max_capacity = 1000
//! ttl_secs = 300
//!
//! [snapshots]
//! backend = "file"
//! dir = "/var/lib/menuboard/snapshots"
//!
//! [log]
//! level = "info"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use common::broadcast::CHANNEL_NAME;
use common::invalidation::MemoryQueryCacheConfig;
use common::menu_sync::DEFAULT_PENDING_TTL;

pub const CONFIG_FILE_NAME: &str = "config.toml";
const SNAPSHOTS_DIR_NAME: &str = "snapshots";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub cache: CacheConfig,
    pub snapshots: SnapshotConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How long undelivered optimistic updates stay eligible, in milliseconds
    pub pending_ttl_ms: u64,
    /// Shared channel used for cross-context invalidation
    pub channel_name: String,
    /// Set to false to keep every context isolated
    pub broadcast: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            pending_ttl_ms: DEFAULT_PENDING_TTL.as_millis() as u64,
            channel_name: CHANNEL_NAME.to_string(),
            broadcast: true,
        }
    }
}

impl SyncConfig {
    pub fn pending_ttl(&self) -> Duration {
        Duration::from_millis(self.pending_ttl_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_capacity: u64,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let defaults = MemoryQueryCacheConfig::default();
        Self {
            max_capacity: defaults.max_capacity,
            ttl_secs: defaults.ttl.as_secs(),
        }
    }
}

impl From<&CacheConfig> for MemoryQueryCacheConfig {
    fn from(config: &CacheConfig) -> Self {
        MemoryQueryCacheConfig {
            max_capacity: config.max_capacity,
            ttl: Duration::from_secs(config.ttl_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub backend: SnapshotBackend,
    /// Directory for the file backend; defaults to the platform data dir
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl SnapshotConfig {
    pub fn resolve_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.dir {
            Some(dir) => Ok(dir.clone()),
            None => project_dirs()
                .map(|dirs| dirs.data_dir().join(SNAPSHOTS_DIR_NAME))
                .ok_or(ConfigError::NoProjectDirs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter; `RUST_LOG` takes precedence when set
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location when `None`
    ///
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::debug!(path = %path.display(), "loading config");
                Self::from_toml_str(&contents)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read { path, source }),
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.pending_ttl_ms == 0 {
            return Err(ConfigError::Invalid(
                "sync.pending_ttl_ms must be greater than zero".into(),
            ));
        }
        if self.sync.channel_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "sync.channel_name must not be empty".into(),
            ));
        }
        Ok(())
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("app", "menuboard", "menuboard")
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("could not determine a home directory for default paths")]
    NoProjectDirs,
}
