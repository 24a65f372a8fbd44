//! Decides whether a task is due at a given instant.
//!
//! A task is due when one of its scheduled instants falls inside the window
//! `[now - check_interval, now]`. With a tick every `check_interval` each
//! scheduled instant lands in exactly one window.

use chrono::{DateTime, Datelike, NaiveDate, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use croner::errors::CronError;
use croner::Cron;
use tracing::warn;

use relay_types::{ScheduleKind, TransferTask};

use crate::SchedulerError;

/// Parse a cron expression the way the evaluator does: five fields, or six
/// with a leading seconds field.
pub(crate) fn parse_cron(expr: &str) -> Result<Cron, CronError> {
    Cron::new(expr).with_seconds_optional().parse()
}

/// Validate a cron expression without scheduling anything.
///
/// # Example
///
/// ```
/// use relay_scheduler::validate_cron_expression;
///
/// assert!(validate_cron_expression("*/15 * * * *").is_ok());
/// assert!(validate_cron_expression("0 30 9 * * 1-5").is_ok());
/// assert!(validate_cron_expression("not a cron").is_err());
/// ```
pub fn validate_cron_expression(expr: &str) -> Result<(), SchedulerError> {
    parse_cron(expr)
        .map(|_| ())
        .map_err(|e| SchedulerError::InvalidCron(format!("'{}': {}", expr, e)))
}

/// The next `count` occurrences of a cron expression after `from`.
pub fn next_occurrences(
    expr: &str,
    tz: Tz,
    from: DateTime<Utc>,
    count: usize,
) -> Result<Vec<DateTime<Utc>>, SchedulerError> {
    let cron = parse_cron(expr)
        .map_err(|e| SchedulerError::InvalidCron(format!("'{}': {}", expr, e)))?;
    let mut cursor = from.with_timezone(&tz);
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        match cron.find_next_occurrence(&cursor, false) {
            Ok(next) => {
                out.push(next.with_timezone(&Utc));
                cursor = next;
            }
            Err(_) => break,
        }
    }
    Ok(out)
}

/// Pure due-check for tasks against a reference timezone.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleEvaluator {
    timezone: Tz,
    check_interval: TimeDelta,
}

impl ScheduleEvaluator {
    pub fn new(timezone: Tz, check_interval: std::time::Duration) -> Self {
        Self {
            timezone,
            check_interval: TimeDelta::from_std(check_interval).unwrap_or(TimeDelta::MAX),
        }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Whether `task` should run at `now`.
    ///
    /// Only the schedule is consulted; the active flag is the caller's
    /// concern.
    pub fn is_due(&self, task: &TransferTask, now: DateTime<Utc>) -> bool {
        match task.schedule_kind {
            ScheduleKind::OneTime => task
                .one_time_instant
                .is_some_and(|instant| self.in_window(instant, now)),
            ScheduleKind::Custom => self.cron_due(task, now),
            ScheduleKind::Daily => self.any_slot_due(task, now),
            ScheduleKind::Weekly => {
                let today = now.with_timezone(&self.timezone).weekday();
                task.weekdays.is_enabled(today) && self.any_slot_due(task, now)
            }
            ScheduleKind::Monthly => {
                let Some(anchor) = task.one_time_instant else {
                    return false;
                };
                let anchor_day = anchor.with_timezone(&self.timezone).day();
                now.with_timezone(&self.timezone).day() == anchor_day
                    && self.any_slot_due(task, now)
            }
        }
    }

    fn in_window(&self, scheduled: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let elapsed = now - scheduled;
        elapsed >= TimeDelta::zero() && elapsed <= self.check_interval
    }

    fn cron_due(&self, task: &TransferTask, now: DateTime<Utc>) -> bool {
        let Some(expr) = task.cron_expression.as_deref() else {
            return false;
        };
        let cron = match parse_cron(expr) {
            Ok(cron) => cron,
            Err(e) => {
                warn!(task_id = %task.id, expression = %expr, error = %e, "Invalid cron expression");
                return false;
            }
        };

        let start = (now - TimeDelta::minutes(1)).with_timezone(&self.timezone);
        match cron.find_next_occurrence(&start, false) {
            Ok(next) => {
                let next = next.with_timezone(&Utc);
                next <= now && self.in_window(next, now)
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "No next cron occurrence");
                false
            }
        }
    }

    fn any_slot_due(&self, task: &TransferTask, now: DateTime<Utc>) -> bool {
        let today = now.with_timezone(&self.timezone).date_naive();
        task.time_slots.iter().any(|slot| {
            self.slot_instant(today, slot.time())
                .is_some_and(|candidate| self.in_window(candidate, now))
        })
    }

    /// A local date and time as an instant. `None` inside a DST gap; the
    /// earlier instant when the local time is ambiguous.
    fn slot_instant(&self, date: NaiveDate, time: chrono::NaiveTime) -> Option<DateTime<Utc>> {
        self.timezone
            .from_local_datetime(&date.and_time(time))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;
    use relay_types::{TimeSlot, WeekdayFlags};
    use std::time::Duration;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn evaluator(tz: Tz) -> ScheduleEvaluator {
        ScheduleEvaluator::new(tz, Duration::from_secs(60))
    }

    fn task(kind: ScheduleKind) -> TransferTask {
        TransferTask::new("t1", "Task", "src", "dst", kind)
    }

    #[test]
    fn test_daily_window_bounds() {
        let eval = evaluator(Tz::UTC);
        let task = task(ScheduleKind::Daily).with_time_slots([TimeSlot::hms(9, 0, 0).unwrap()]);

        assert!(!eval.is_due(&task, utc("2024-05-01T08:59:59Z")));
        assert!(eval.is_due(&task, utc("2024-05-01T09:00:00Z")));
        assert!(eval.is_due(&task, utc("2024-05-01T09:01:00Z")));
        assert!(!eval.is_due(&task, utc("2024-05-01T09:01:01Z")));
    }

    #[test]
    fn test_daily_without_slots_never_due() {
        let eval = evaluator(Tz::UTC);
        assert!(!eval.is_due(&task(ScheduleKind::Daily), utc("2024-05-01T09:00:00Z")));
    }

    #[test]
    fn test_is_due_is_idempotent() {
        let eval = evaluator(Tz::UTC);
        let task = task(ScheduleKind::Daily).with_time_slots([TimeSlot::hms(9, 0, 0).unwrap()]);
        let now = utc("2024-05-01T09:00:30Z");
        assert!(eval.is_due(&task, now));
        assert!(eval.is_due(&task, now));
    }

    #[test]
    fn test_weekly_checks_weekday() {
        let eval = evaluator(Tz::UTC);
        let task = task(ScheduleKind::Weekly)
            .with_weekdays(WeekdayFlags::only(&[Weekday::Mon, Weekday::Tue]))
            .with_time_slots([TimeSlot::hms(9, 0, 0).unwrap()]);

        // 2024-05-06 is a Monday
        assert!(eval.is_due(&task, utc("2024-05-06T09:00:30Z")));
        assert!(eval.is_due(&task, utc("2024-05-07T09:00:30Z")));
        assert!(!eval.is_due(&task, utc("2024-05-08T09:00:30Z")));
        assert!(!eval.is_due(&task, utc("2024-05-06T10:00:30Z")));
    }

    #[test]
    fn test_weekly_monday_only() {
        let eval = evaluator(Tz::UTC);
        let task = task(ScheduleKind::Weekly)
            .with_weekdays(WeekdayFlags::only(&[Weekday::Mon]))
            .with_time_slots([TimeSlot::hms(9, 0, 0).unwrap()]);

        // Same time of day on Monday 2024-05-06 and Tuesday 2024-05-07
        assert!(eval.is_due(&task, utc("2024-05-06T09:00:00Z")));
        assert!(!eval.is_due(&task, utc("2024-05-07T09:00:00Z")));
    }

    #[test]
    fn test_weekday_follows_reference_timezone() {
        // 23:30 Sunday in UTC is already Monday in Tokyo
        let eval = evaluator(chrono_tz::Asia::Tokyo);
        let task = task(ScheduleKind::Weekly)
            .with_weekdays(WeekdayFlags::only(&[Weekday::Mon]))
            .with_time_slots([TimeSlot::hms(8, 30, 0).unwrap()]);
        assert!(eval.is_due(&task, utc("2024-05-05T23:30:10Z")));
    }

    #[test]
    fn test_one_time_window() {
        let eval = evaluator(Tz::UTC);
        let instant = utc("2024-05-01T12:00:00Z");
        let task = task(ScheduleKind::OneTime).with_one_time_instant(instant);

        assert!(!eval.is_due(&task, utc("2024-05-01T11:59:59Z")));
        assert!(eval.is_due(&task, instant));
        assert!(eval.is_due(&task, utc("2024-05-01T12:01:00Z")));
        assert!(!eval.is_due(&task, utc("2024-05-01T12:01:01Z")));
        assert!(!eval.is_due(&self::task(ScheduleKind::OneTime), instant));
    }

    #[test]
    fn test_monthly_matches_anchor_day() {
        let eval = evaluator(Tz::UTC);
        let task = task(ScheduleKind::Monthly)
            .with_one_time_instant(utc("2024-01-15T00:00:00Z"))
            .with_time_slots([TimeSlot::hms(6, 0, 0).unwrap()]);

        assert!(eval.is_due(&task, utc("2024-05-15T06:00:20Z")));
        assert!(!eval.is_due(&task, utc("2024-05-16T06:00:20Z")));

        let unanchored = self::task(ScheduleKind::Monthly)
            .with_time_slots([TimeSlot::hms(6, 0, 0).unwrap()]);
        assert!(!eval.is_due(&unanchored, utc("2024-05-15T06:00:20Z")));
    }

    #[test]
    fn test_custom_five_field_cron() {
        let eval = evaluator(Tz::UTC);
        let task = task(ScheduleKind::Custom).with_cron("*/5 * * * *");

        assert!(eval.is_due(&task, utc("2024-05-01T10:05:00Z")));
        assert!(eval.is_due(&task, utc("2024-05-01T10:05:30Z")));
        assert!(!eval.is_due(&task, utc("2024-05-01T10:07:00Z")));
    }

    #[test]
    fn test_custom_six_field_cron_in_timezone() {
        let eval = evaluator(chrono_tz::Europe::Madrid);
        let task = task(ScheduleKind::Custom).with_cron("0 30 9 * * *");

        // 09:30 in Madrid during summer time is 07:30 UTC
        assert!(eval.is_due(&task, utc("2024-07-01T07:30:20Z")));
        assert!(!eval.is_due(&task, utc("2024-07-01T09:30:20Z")));
    }

    #[test]
    fn test_custom_invalid_or_missing_cron_never_due() {
        let eval = evaluator(Tz::UTC);
        let now = utc("2024-05-01T10:05:00Z");
        assert!(!eval.is_due(&task(ScheduleKind::Custom).with_cron("bogus"), now));
        assert!(!eval.is_due(&task(ScheduleKind::Custom), now));
    }

    #[test]
    fn test_slot_in_dst_gap_is_skipped() {
        // 02:30 does not exist in New York on 2024-03-10
        let eval = evaluator(chrono_tz::America::New_York);
        let task = task(ScheduleKind::Daily).with_time_slots([TimeSlot::hms(2, 30, 0).unwrap()]);
        for minute in ["06:30:30", "07:30:30", "08:30:30"] {
            assert!(!eval.is_due(&task, utc(&format!("2024-03-10T{minute}Z"))));
        }
        // The next day it fires as usual (EDT, UTC-4)
        assert!(eval.is_due(&task, utc("2024-03-11T06:30:30Z")));
    }

    #[test]
    fn test_ambiguous_slot_uses_earliest_instant() {
        // 01:30 happens twice in New York on 2024-11-03
        let eval = evaluator(chrono_tz::America::New_York);
        let task = task(ScheduleKind::Daily).with_time_slots([TimeSlot::hms(1, 30, 0).unwrap()]);
        assert!(eval.is_due(&task, utc("2024-11-03T05:30:30Z")));
        assert!(!eval.is_due(&task, utc("2024-11-03T06:30:30Z")));
    }

    #[test]
    fn test_validate_cron_expression() {
        assert!(validate_cron_expression("0 0 * * *").is_ok());
        assert!(validate_cron_expression("0 0 0 * * *").is_ok());
        assert!(matches!(
            validate_cron_expression("* * *"),
            Err(SchedulerError::InvalidCron(_))
        ));
        assert!(validate_cron_expression("").is_err());
    }

    #[test]
    fn test_next_occurrences() {
        let next = next_occurrences("0 * * * *", Tz::UTC, utc("2024-05-01T10:15:00Z"), 3).unwrap();
        assert_eq!(
            next,
            vec![
                utc("2024-05-01T11:00:00Z"),
                utc("2024-05-01T12:00:00Z"),
                utc("2024-05-01T13:00:00Z"),
            ]
        );
    }
}
