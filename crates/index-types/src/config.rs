//! Configuration for the indexing queue.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at `~/.config/index-queue/config.toml`.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::TypesError;

/// Commit policy override.
///
/// When unset the policy follows the engine: a centralized index commits
/// immediately, a local replica uses near-real-time batching.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicy {
    Immediate,
    NearRealTime,
}

/// Tuning knobs of the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Arrival queue or waiting set length above which the queue is overloaded
    #[serde(default = "default_max_queue_length")]
    pub max_queue_length: usize,

    /// Poll interval while a local writer waits for an overloaded queue
    #[serde(default = "default_overload_poll_ms")]
    pub overload_poll_ms: u64,

    /// Force a drain every N overload polls
    #[serde(default = "default_forced_drain_every")]
    pub forced_drain_every: u32,

    /// Arrival queue length above which queued activities drop their document
    #[serde(default = "default_payload_retention_limit")]
    pub payload_retention_limit: usize,

    /// Max activities loaded from the store per gap/range request
    #[serde(default = "default_load_chunk_size")]
    pub load_chunk_size: u64,

    /// Explicit commit policy (None = derive from the engine)
    #[serde(default)]
    pub commit_policy: Option<CommitPolicy>,

    /// Near-real-time: max time between commits while work is pending
    #[serde(default = "default_commit_max_wait_ms")]
    pub commit_max_wait_ms: u64,

    /// Near-real-time: quiet time after which the next activity commits at once
    #[serde(default = "default_commit_idle_ms")]
    pub commit_idle_ms: u64,

    /// Near-real-time: heartbeat interval of the commit timer
    #[serde(default = "default_commit_heartbeat_ms")]
    pub commit_heartbeat_ms: u64,

    /// Interval of the periodic health check
    #[serde(default = "default_health_check_secs")]
    pub health_check_secs: u64,

    /// Centralized: store poll interval
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Centralized: max random delay added to each poll (spreads processes)
    #[serde(default)]
    pub poll_jitter_ms: u64,

    /// Centralized: max executable activities claimed per poll
    #[serde(default = "default_poll_batch_size")]
    pub poll_batch_size: usize,

    /// Centralized: lease duration after which another process may take over
    #[serde(default = "default_lease_timeout_secs")]
    pub lease_timeout_secs: u64,

    /// Centralized: how often finished activities are purged from the store
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Centralized: concurrency of the startup replay
    #[serde(default = "default_startup_parallelism")]
    pub startup_parallelism: usize,
}

fn default_max_queue_length() -> usize {
    1000
}

fn default_overload_poll_ms() -> u64 {
    100
}

fn default_forced_drain_every() -> u32 {
    10
}

fn default_payload_retention_limit() -> usize {
    500
}

fn default_load_chunk_size() -> u64 {
    100
}

fn default_commit_max_wait_ms() -> u64 {
    10_000
}

fn default_commit_idle_ms() -> u64 {
    1_000
}

fn default_commit_heartbeat_ms() -> u64 {
    1_000
}

fn default_health_check_secs() -> u64 {
    180
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_poll_batch_size() -> usize {
    10
}

fn default_lease_timeout_secs() -> u64 {
    120
}

fn default_cleanup_interval_secs() -> u64 {
    300
}

fn default_startup_parallelism() -> usize {
    8
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_queue_length: default_max_queue_length(),
            overload_poll_ms: default_overload_poll_ms(),
            forced_drain_every: default_forced_drain_every(),
            payload_retention_limit: default_payload_retention_limit(),
            load_chunk_size: default_load_chunk_size(),
            commit_policy: None,
            commit_max_wait_ms: default_commit_max_wait_ms(),
            commit_idle_ms: default_commit_idle_ms(),
            commit_heartbeat_ms: default_commit_heartbeat_ms(),
            health_check_secs: default_health_check_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_jitter_ms: 0,
            poll_batch_size: default_poll_batch_size(),
            lease_timeout_secs: default_lease_timeout_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            startup_parallelism: default_startup_parallelism(),
        }
    }
}

impl QueueSettings {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_queue_length == 0 {
            return Err("max_queue_length must be > 0".to_string());
        }
        if self.load_chunk_size == 0 {
            return Err("load_chunk_size must be > 0".to_string());
        }
        if self.poll_batch_size == 0 {
            return Err("poll_batch_size must be > 0".to_string());
        }
        if self.startup_parallelism == 0 {
            return Err("startup_parallelism must be > 0".to_string());
        }
        if self.commit_heartbeat_ms == 0 || self.overload_poll_ms == 0 {
            return Err("timer intervals must be > 0".to_string());
        }
        if self.health_check_secs == 0 {
            return Err("health_check_secs must be > 0".to_string());
        }
        if self.cleanup_interval_secs == 0 {
            return Err("cleanup_interval_secs must be > 0".to_string());
        }
        Ok(())
    }

    pub fn commit_max_wait(&self) -> Duration {
        Duration::from_millis(self.commit_max_wait_ms)
    }

    pub fn commit_idle(&self) -> Duration {
        Duration::from_millis(self.commit_idle_ms)
    }

    pub fn commit_heartbeat(&self) -> Duration {
        Duration::from_millis(self.commit_heartbeat_ms)
    }

    pub fn overload_poll(&self) -> Duration {
        Duration::from_millis(self.overload_poll_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Settings of the admin tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminSettings {
    /// Path to the RocksDB activity store
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Path to the tantivy index directory
    #[serde(default = "default_index_path")]
    pub index_path: String,

    /// Whether the index is shared by all processes
    #[serde(default)]
    pub centralized: bool,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub queue: QueueSettings,
}

fn data_dir(leaf: &str) -> String {
    ProjectDirs::from("", "", "index-queue")
        .map(|p| p.data_local_dir().join(leaf))
        .unwrap_or_else(|| PathBuf::from(".").join(leaf))
        .to_string_lossy()
        .to_string()
}

fn default_db_path() -> String {
    data_dir("activities")
}

fn default_index_path() -> String {
    data_dir("index")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            index_path: default_index_path(),
            centralized: false,
            log_level: default_log_level(),
            queue: QueueSettings::default(),
        }
    }
}

impl AdminSettings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/index-queue/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (INDEXQ_*)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, TypesError> {
        let config_dir = ProjectDirs::from("", "", "index-queue")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("db_path", default_db_path())
            .map_err(|e| TypesError::Config(e.to_string()))?
            .set_default("index_path", default_index_path())
            .map_err(|e| TypesError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| TypesError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // INDEXQ_DB_PATH, INDEXQ_QUEUE__MAX_QUEUE_LENGTH, ...
        builder = builder.add_source(
            Environment::with_prefix("INDEXQ")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings: AdminSettings = builder
            .build()
            .map_err(|e| TypesError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| TypesError::Config(e.to_string()))?;

        settings.queue.validate().map_err(TypesError::Config)?;
        Ok(settings)
    }
}
