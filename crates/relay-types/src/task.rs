//! Transfer task definitions.
//!
//! A task names a source and a destination endpoint, the folders to move
//! between, an optional file pattern and the schedule that decides when it
//! runs. Tasks are read-only while they are evaluated or executed.

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// How a task's schedule is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Runs once at `one_time_instant`
    OneTime,
    /// Runs at every time slot, every day
    Daily,
    /// Runs at every time slot on the enabled weekdays
    Weekly,
    /// Runs at every time slot on one day of the month
    Monthly,
    /// Runs on a cron expression
    Custom,
}

impl std::fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleKind::OneTime => write!(f, "one_time"),
            ScheduleKind::Daily => write!(f, "daily"),
            ScheduleKind::Weekly => write!(f, "weekly"),
            ScheduleKind::Monthly => write!(f, "monthly"),
            ScheduleKind::Custom => write!(f, "custom"),
        }
    }
}

/// Days of the week a weekly task may run on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeekdayFlags {
    pub monday: bool,
    pub tuesday: bool,
    pub wednesday: bool,
    pub thursday: bool,
    pub friday: bool,
    pub saturday: bool,
    pub sunday: bool,
}

impl WeekdayFlags {
    /// Flags with only the given days enabled.
    pub fn only(days: &[Weekday]) -> Self {
        let mut flags = Self::default();
        for day in days {
            flags.set(*day, true);
        }
        flags
    }

    pub fn is_enabled(&self, day: Weekday) -> bool {
        match day {
            Weekday::Mon => self.monday,
            Weekday::Tue => self.tuesday,
            Weekday::Wed => self.wednesday,
            Weekday::Thu => self.thursday,
            Weekday::Fri => self.friday,
            Weekday::Sat => self.saturday,
            Weekday::Sun => self.sunday,
        }
    }

    pub fn set(&mut self, day: Weekday, enabled: bool) {
        let flag = match day {
            Weekday::Mon => &mut self.monday,
            Weekday::Tue => &mut self.tuesday,
            Weekday::Wed => &mut self.wednesday,
            Weekday::Thu => &mut self.thursday,
            Weekday::Fri => &mut self.friday,
            Weekday::Sat => &mut self.saturday,
            Weekday::Sun => &mut self.sunday,
        };
        *flag = enabled;
    }

    pub fn any(&self) -> bool {
        self.monday
            || self.tuesday
            || self.wednesday
            || self.thursday
            || self.friday
            || self.saturday
            || self.sunday
    }
}

/// A time of day at which a Daily, Weekly or Monthly task fires.
///
/// Serialized as `"HH:MM:SS"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeSlot(pub NaiveTime);

impl TimeSlot {
    /// Build a slot from hour, minute and second. Out-of-range values yield `None`.
    pub fn hms(hour: u32, minute: u32, second: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, second).map(TimeSlot)
    }

    pub fn time(&self) -> NaiveTime {
        self.0
    }
}

impl std::fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%H:%M:%S"))
    }
}

/// A scheduled file transfer between two endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferTask {
    /// Unique identifier
    pub id: String,

    /// Display name
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Endpoint the files are read from
    pub source_endpoint_id: String,

    /// Endpoint the files are written to
    pub destination_endpoint_id: String,

    /// Root folder on the source endpoint
    pub source_folder: String,

    /// Root folder on the destination endpoint
    pub destination_folder: String,

    /// Filter in the pattern mini-language; absent or blank matches everything
    #[serde(default)]
    pub file_pattern: Option<String>,

    /// Descend into subfolders of the source root
    #[serde(default)]
    pub recurse_subfolders: bool,

    /// Recreate the source sub-path under the destination root
    #[serde(default)]
    pub mirror_subfolder_structure: bool,

    /// Delete each source file after it was moved, then prune emptied folders
    #[serde(default)]
    pub delete_source_after_transfer: bool,

    pub schedule_kind: ScheduleKind,

    /// Firing instant for OneTime; its day-of-month anchors Monthly
    #[serde(default)]
    pub one_time_instant: Option<DateTime<Utc>>,

    /// Cron expression for Custom schedules
    #[serde(default)]
    pub cron_expression: Option<String>,

    #[serde(default)]
    pub weekdays: WeekdayFlags,

    /// Ordered, deduplicated slots for Daily, Weekly and Monthly schedules
    #[serde(default)]
    pub time_slots: Vec<TimeSlot>,

    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl TransferTask {
    /// Create an active task with no pattern, flags or slots.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        source_endpoint_id: impl Into<String>,
        destination_endpoint_id: impl Into<String>,
        schedule_kind: ScheduleKind,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            source_endpoint_id: source_endpoint_id.into(),
            destination_endpoint_id: destination_endpoint_id.into(),
            source_folder: "/".to_string(),
            destination_folder: "/".to_string(),
            file_pattern: None,
            recurse_subfolders: false,
            mirror_subfolder_structure: false,
            delete_source_after_transfer: false,
            schedule_kind,
            one_time_instant: None,
            cron_expression: None,
            weekdays: WeekdayFlags::default(),
            time_slots: Vec::new(),
            is_active: true,
        }
    }

    /// Set source and destination folders
    pub fn with_folders(mut self, source: impl Into<String>, destination: impl Into<String>) -> Self {
        self.source_folder = source.into();
        self.destination_folder = destination.into();
        self
    }

    /// Set the file pattern
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.file_pattern = Some(pattern.into());
        self
    }

    pub fn with_one_time_instant(mut self, instant: DateTime<Utc>) -> Self {
        self.one_time_instant = Some(instant);
        self
    }

    pub fn with_cron(mut self, expression: impl Into<String>) -> Self {
        self.cron_expression = Some(expression.into());
        self
    }

    pub fn with_weekdays(mut self, weekdays: WeekdayFlags) -> Self {
        self.weekdays = weekdays;
        self
    }

    /// Replace the time slots, keeping them sorted and unique
    pub fn with_time_slots(mut self, slots: impl IntoIterator<Item = TimeSlot>) -> Self {
        self.time_slots = slots.into_iter().collect();
        self.normalize_time_slots();
        self
    }

    pub fn with_recursion(mut self, recurse: bool, mirror: bool) -> Self {
        self.recurse_subfolders = recurse;
        self.mirror_subfolder_structure = mirror;
        self
    }

    pub fn with_delete_source(mut self, delete: bool) -> Self {
        self.delete_source_after_transfer = delete;
        self
    }

    /// Sort and deduplicate time slots.
    pub fn normalize_time_slots(&mut self) {
        self.time_slots.sort();
        self.time_slots.dedup();
    }

    /// Check the schedule and folder configuration.
    ///
    /// The schedule evaluator tolerates every mistake reported here by
    /// treating the task as never due; validation lets import surface them.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.id.trim().is_empty() {
            return Err(RelayError::InvalidInput("task id is empty".to_string()));
        }
        if self.source_folder.trim().is_empty() || self.destination_folder.trim().is_empty() {
            return Err(RelayError::InvalidInput(format!(
                "task {}: source and destination folders are required",
                self.id
            )));
        }
        match self.schedule_kind {
            ScheduleKind::OneTime if self.one_time_instant.is_none() => {
                Err(RelayError::InvalidInput(format!(
                    "task {}: one_time schedule needs one_time_instant",
                    self.id
                )))
            }
            ScheduleKind::Custom
                if self
                    .cron_expression
                    .as_deref()
                    .map_or(true, |c| c.trim().is_empty()) =>
            {
                Err(RelayError::InvalidInput(format!(
                    "task {}: custom schedule needs cron_expression",
                    self.id
                )))
            }
            ScheduleKind::Daily | ScheduleKind::Weekly | ScheduleKind::Monthly
                if self.time_slots.is_empty() =>
            {
                Err(RelayError::InvalidInput(format!(
                    "task {}: {} schedule needs at least one time slot",
                    self.id, self.schedule_kind
                )))
            }
            ScheduleKind::Weekly if !self.weekdays.any() => Err(RelayError::InvalidInput(
                format!("task {}: weekly schedule has no weekday enabled", self.id),
            )),
            ScheduleKind::Monthly if self.one_time_instant.is_none() => {
                Err(RelayError::InvalidInput(format!(
                    "task {}: monthly schedule takes its day of month from one_time_instant",
                    self.id
                )))
            }
            _ => Ok(()),
        }
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
