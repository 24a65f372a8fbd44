//! Orchestrator configuration.

use std::path::PathBuf;

use chrono_tz::Tz;

use relay_types::{RelayError, Settings};

/// Settings the transfer pipeline reads.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Reference timezone for pattern dates and the modification filter
    pub timezone: Tz,
    /// Where downloads are staged between source and destination
    pub temp_dir: PathBuf,
    /// Files moved concurrently within one execution (at least 1)
    pub file_concurrency: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            temp_dir: std::env::temp_dir(),
            file_concurrency: 1,
        }
    }
}

impl TransferConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self, RelayError> {
        Ok(Self {
            timezone: settings.parse_timezone()?,
            temp_dir: settings.temp_dir(),
            file_concurrency: settings.file_concurrency.max(1),
        })
    }

    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = temp_dir.into();
        self
    }

    pub fn with_file_concurrency(mut self, file_concurrency: usize) -> Self {
        self.file_concurrency = file_concurrency.max(1);
        self
    }
}
