//! Scheduler configuration.

use std::time::Duration;

use relay_types::Settings;
use serde::{Deserialize, Serialize};

use crate::overlap::OverlapPolicy;
use crate::SchedulerError;

/// Configuration for the scheduler service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Reference timezone for time slots and cron expressions (IANA name).
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Seconds between ticks. Also the width of the due window.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// How long shutdown waits for in-flight executions.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// What to do when a task comes due while its previous run is in flight.
    #[serde(default)]
    pub overlap_policy: OverlapPolicy,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_poll_interval() -> u64 {
    60
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            poll_interval_secs: default_poll_interval(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            overlap_policy: OverlapPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    /// Derive the scheduler's view of the daemon settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            timezone: settings.timezone.clone(),
            poll_interval_secs: settings.poll_interval_secs,
            shutdown_timeout_secs: settings.shutdown_timeout_secs,
            overlap_policy: if settings.skip_overlapping_runs {
                OverlapPolicy::Skip
            } else {
                OverlapPolicy::Concurrent
            },
        }
    }

    /// Parse the configured timezone string into a chrono_tz::Tz.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidTimezone` if the timezone string
    /// is not a valid IANA timezone identifier.
    pub fn parse_timezone(&self) -> Result<chrono_tz::Tz, SchedulerError> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| SchedulerError::InvalidTimezone(self.timezone.clone()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.timezone, "UTC");
        assert_eq!(config.poll_interval(), Duration::from_secs(60));
        assert_eq!(config.shutdown_timeout_secs, 30);
        assert_eq!(config.overlap_policy, OverlapPolicy::Concurrent);
    }

    #[test]
    fn test_parse_timezone_america_new_york() {
        let config = SchedulerConfig {
            timezone: "America/New_York".to_string(),
            ..Default::default()
        };
        let tz = config.parse_timezone().unwrap();
        assert_eq!(tz.name(), "America/New_York");
    }

    #[test]
    fn test_parse_timezone_invalid() {
        let config = SchedulerConfig {
            timezone: "Invalid/Timezone".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.parse_timezone(),
            Err(SchedulerError::InvalidTimezone(_))
        ));
    }

    #[test]
    fn test_from_settings_maps_overlap_flag() {
        let settings = Settings {
            timezone: "Europe/Madrid".to_string(),
            poll_interval_secs: 30,
            skip_overlapping_runs: true,
            ..Default::default()
        };
        let config = SchedulerConfig::from_settings(&settings);
        assert_eq!(config.timezone, "Europe/Madrid");
        assert_eq!(config.poll_interval_secs, 30);
        assert_eq!(config.overlap_policy, OverlapPolicy::Skip);
    }

    #[test]
    fn test_config_serialization() {
        let json = r#"{"timezone": "Asia/Tokyo", "overlap_policy": "skip"}"#;
        let config: SchedulerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.timezone, "Asia/Tokyo");
        assert_eq!(config.poll_interval_secs, 60);
        assert_eq!(config.overlap_policy, OverlapPolicy::Skip);
    }
}
