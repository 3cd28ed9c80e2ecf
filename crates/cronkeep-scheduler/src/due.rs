//! Decides whether a task should run in the current invocation.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::schedule::{truncate_to_minute, CronSchedule};
use crate::types::StatusRecord;

/// Due-ness of `record` at `now`.
///
/// When the schedule matches the current minute the task is due unless it
/// already ran inside that same minute, which absorbs a trigger firing twice.
/// Otherwise the task is due only if an occurrence fell between the previous
/// check and now, i.e. the pipeline itself missed a window.
pub fn is_due(record: &StatusRecord, now: DateTime<Utc>) -> Result<bool> {
    let schedule = CronSchedule::parse(&record.schedule)?;
    is_due_with(&schedule, record, now)
}

/// Same as [`is_due`] with an already parsed schedule.
pub fn is_due_with(
    schedule: &CronSchedule,
    record: &StatusRecord,
    now: DateTime<Utc>,
) -> Result<bool> {
    if schedule.is_due(now) {
        return Ok(match record.last_run {
            None => true,
            Some(last_run) => truncate_to_minute(last_run) != truncate_to_minute(now),
        });
    }

    // Never checked: there is no baseline to detect a gap from.
    let Some(last_checked) = record.last_checked else {
        return Ok(false);
    };

    Ok(schedule.next_run_after(last_checked)? <= now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TaskPolicy, TaskStatus};
    use chrono::TimeZone;

    fn at(d: u32, h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2010, 6, d, h, m, s).unwrap()
    }

    fn hourly() -> StatusRecord {
        StatusRecord::new(
            "hourly".into(),
            "0 * * * *",
            TaskStatus::Pending,
            &TaskPolicy::default(),
        )
    }

    #[test]
    fn first_run_matches_exact_minute_only() {
        let rec = hourly();
        assert!(is_due(&rec, at(20, 13, 0, 10)).unwrap());
        assert!(!is_due(&rec, at(20, 13, 1, 10)).unwrap());
        assert!(!is_due(&rec, at(20, 12, 59, 50)).unwrap());
    }

    #[test]
    fn second_trigger_in_same_minute_is_suppressed() {
        let mut rec = hourly();
        rec.last_run = Some(at(20, 13, 0, 10));
        rec.last_checked = Some(at(20, 13, 0, 10));
        assert!(!is_due(&rec, at(20, 13, 0, 40)).unwrap());
        // The next hour's minute matches again.
        assert!(is_due(&rec, at(20, 14, 0, 5)).unwrap());
    }

    #[test]
    fn no_baseline_means_no_gap_recovery() {
        let mut rec = hourly();
        rec.last_run = Some(at(20, 13, 0, 10));
        assert!(!is_due(&rec, at(21, 13, 40, 0)).unwrap());
    }

    #[test]
    fn missed_occurrence_is_recovered_once() {
        let mut rec = hourly();
        rec.last_run = Some(at(20, 13, 0, 10));
        rec.last_checked = Some(at(20, 13, 40, 0));

        // 14:00 was missed; the 14:10 check picks it up.
        assert!(is_due(&rec, at(20, 14, 10, 0)).unwrap());

        // After that check is recorded the gap is closed.
        rec.last_checked = Some(at(20, 14, 10, 0));
        rec.last_run = Some(at(20, 14, 10, 0));
        assert!(!is_due(&rec, at(20, 14, 20, 0)).unwrap());
    }

    #[test]
    fn day_long_stall_is_detected() {
        let mut rec = hourly();
        rec.last_run = Some(at(20, 15, 0, 0));
        rec.last_checked = Some(at(20, 15, 0, 0));
        assert!(is_due(&rec, at(21, 13, 40, 0)).unwrap());
    }

    #[test]
    fn check_before_next_occurrence_is_not_due() {
        let mut rec = hourly();
        rec.last_run = Some(at(20, 13, 0, 10));
        rec.last_checked = Some(at(20, 13, 0, 40));
        assert!(!is_due(&rec, at(20, 13, 40, 0)).unwrap());
    }

    #[test]
    fn malformed_schedule_is_reported() {
        let mut rec = hourly();
        rec.schedule = "every hour".to_string();
        assert!(is_due(&rec, at(20, 13, 0, 0)).is_err());
    }
}
