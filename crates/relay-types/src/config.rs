//! Configuration loading for file-relay.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/file-relay/config.toml.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to RocksDB storage directory
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// IANA timezone that schedules and date filters are evaluated in
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Seconds between scheduler ticks. Also the width of the "due" window.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Seconds to wait for in-flight executions on shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Skip dispatching a task while a previous run of it is still in flight
    #[serde(default)]
    pub skip_overlapping_runs: bool,

    /// Directory for download staging files (system temp dir when unset)
    #[serde(default)]
    pub temp_dir: Option<String>,

    /// Longest a remote connect, read or write may stall before the
    /// operation fails. Transfers that keep making progress are not capped.
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,

    /// Concurrent remote operations allowed per endpoint
    #[serde(default = "default_max_connections_per_endpoint")]
    pub max_connections_per_endpoint: usize,

    /// Files moved concurrently within one execution
    #[serde(default = "default_file_concurrency")]
    pub file_concurrency: usize,

    /// Directory under which credentialed network shares are mounted for
    /// the length of a session. Unset means shares are mounted ahead of time.
    #[serde(default)]
    pub share_mount_dir: Option<String>,
}

fn default_db_path() -> String {
    ProjectDirs::from("", "", "file-relay")
        .map(|p| p.data_local_dir().join("db"))
        .unwrap_or_else(|| PathBuf::from("./data"))
        .to_string_lossy()
        .to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_operation_timeout_secs() -> u64 {
    300
}

fn default_max_connections_per_endpoint() -> usize {
    4
}

fn default_file_concurrency() -> usize {
    1
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: default_log_level(),
            timezone: default_timezone(),
            poll_interval_secs: default_poll_interval_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            skip_overlapping_runs: false,
            temp_dir: None,
            operation_timeout_secs: default_operation_timeout_secs(),
            max_connections_per_endpoint: default_max_connections_per_endpoint(),
            file_concurrency: default_file_concurrency(),
            share_mount_dir: None,
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/file-relay/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (RELAY_*)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, RelayError> {
        let config_dir = ProjectDirs::from("", "", "file-relay")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("db_path", default_db_path())
            .map_err(|e| RelayError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| RelayError::Config(e.to_string()))?
            .set_default("timezone", default_timezone())
            .map_err(|e| RelayError::Config(e.to_string()))?
            .set_default("poll_interval_secs", default_poll_interval_secs() as i64)
            .map_err(|e| RelayError::Config(e.to_string()))?
            .set_default("shutdown_timeout_secs", default_shutdown_timeout_secs() as i64)
            .map_err(|e| RelayError::Config(e.to_string()))?
            .set_default("operation_timeout_secs", default_operation_timeout_secs() as i64)
            .map_err(|e| RelayError::Config(e.to_string()))?
            .set_default(
                "max_connections_per_endpoint",
                default_max_connections_per_endpoint() as i64,
            )
            .map_err(|e| RelayError::Config(e.to_string()))?
            .set_default("file_concurrency", default_file_concurrency() as i64)
            .map_err(|e| RelayError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Field names contain underscores, so nesting uses a double underscore:
        // RELAY_DB_PATH, RELAY_POLL_INTERVAL_SECS, ...
        builder = builder.add_source(
            Environment::with_prefix("RELAY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder
            .build()
            .map_err(|e| RelayError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| RelayError::Config(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.poll_interval_secs == 0 {
            return Err(RelayError::Config(
                "poll_interval_secs must be > 0".to_string(),
            ));
        }
        if self.max_connections_per_endpoint == 0 {
            return Err(RelayError::Config(
                "max_connections_per_endpoint must be > 0".to_string(),
            ));
        }
        if self.file_concurrency == 0 {
            return Err(RelayError::Config(
                "file_concurrency must be > 0".to_string(),
            ));
        }
        self.parse_timezone()?;
        Ok(())
    }

    /// Parse the configured timezone.
    pub fn parse_timezone(&self) -> Result<chrono_tz::Tz, RelayError> {
        self.timezone
            .parse()
            .map_err(|_| RelayError::Config(format!("Invalid timezone: {}", self.timezone)))
    }

    /// Scheduler tick period, which is also the evaluation window.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Inactivity bound for remote IO.
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Mount base for credentialed shares, with `~` expanded.
    pub fn share_mount_dir(&self) -> Option<PathBuf> {
        self.share_mount_dir.as_deref().map(expand_home)
    }

    /// Staging directory for downloads.
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Expand ~ in db_path to the home directory
    pub fn expanded_db_path(&self) -> PathBuf {
        expand_home(&self.db_path)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new() {
            return home.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}
