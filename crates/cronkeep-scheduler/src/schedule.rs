//! Cron expression evaluation at minute granularity.

use std::str::FromStr;

use chrono::{DateTime, Duration, DurationRound, Utc};

use crate::error::{Result, SchedulerError};

const WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// A parsed schedule that answers "is it due" and "when is it next due".
///
/// A five-field expression restricting both day-of-month and day-of-week
/// fires when either matches, as Unix cron does. The `cron` crate requires
/// both, so such expressions are held as two schedules, one per day field.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    alternatives: Vec<cron::Schedule>,
}

impl CronSchedule {
    /// Parse a five-field Unix expression (`min hour dom mon dow`).
    ///
    /// Six- and seven-field expressions are handed to the `cron` crate as-is.
    pub fn parse(expression: &str) -> Result<Self> {
        let alternatives = to_cron_crate_format(expression)
            .iter()
            .map(|normalized| {
                cron::Schedule::from_str(normalized).map_err(|e| SchedulerError::ScheduleSyntax {
                    expression: expression.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            expression: expression.to_string(),
            alternatives,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// True when the minute containing `now` matches the schedule. Seconds are ignored.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        let minute = truncate_to_minute(now);
        self.alternatives.iter().any(|schedule| {
            schedule
                .after(&(minute - Duration::seconds(1)))
                .next()
                .is_some_and(|next| next < minute + Duration::minutes(1))
        })
    }

    /// The first scheduled instant strictly after `after`.
    pub fn next_run_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
        self.alternatives
            .iter()
            .filter_map(|schedule| schedule.after(&after).next())
            .min()
            .ok_or_else(|| SchedulerError::ScheduleSyntax {
                expression: self.expression.clone(),
                reason: "schedule has no upcoming occurrence".to_string(),
            })
    }
}

/// Reject expressions the evaluator cannot parse or that never fire
/// (`0 0 30 2 *`).
pub fn validate(expression: &str) -> Result<()> {
    CronSchedule::parse(expression)?
        .next_run_after(Utc::now())
        .map(|_| ())
}

/// Drop seconds and sub-seconds; two instants are "the same minute" when this agrees.
pub fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(Duration::minutes(1)).unwrap_or(ts)
}

/// Convert a standard 5-field Unix cron expression to the 7-field format
/// expected by the `cron` crate: a `0` seconds field in front, `*` year behind,
/// and numeric weekdays rewritten as names (Unix counts Sunday as 0 or 7,
/// the crate counts it as 1).
///
/// Returns two expressions when both day fields are restricted.
fn to_cron_crate_format(expression: &str) -> Vec<String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return vec![expression.to_string()];
    }
    let (minute, hour, dom, month) = (fields[0], fields[1], fields[2], fields[3]);
    let dow = translate_weekdays(fields[4]);
    let seven = |dom: &str, dow: &str| format!("0 {minute} {hour} {dom} {month} {dow} *");

    if is_unrestricted(dom) || is_unrestricted(fields[4]) {
        vec![seven(dom, &dow)]
    } else {
        vec![seven(dom, "*"), seven("*", &dow)]
    }
}

/// A day field starting with `*` (including `*/n`) does not restrict the day.
fn is_unrestricted(field: &str) -> bool {
    field.starts_with('*') || field == "?"
}

fn translate_weekdays(field: &str) -> String {
    let mut seen = Vec::new();
    field
        .split(',')
        .flat_map(translate_weekday_item)
        .filter(|part| {
            let fresh = !seen.contains(part);
            if fresh {
                seen.push(part.clone());
            }
            fresh
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// One comma-separated weekday item, as one or more crate-format items.
fn translate_weekday_item(item: &str) -> Vec<String> {
    let Some((span, step)) = item.split_once('/') else {
        return translate_weekday_span(item);
    };

    // Numeric stepped spans become explicit day lists; `*/n` and named
    // spans pass through unchanged.
    match (numeric_span(span), step.parse::<usize>()) {
        (Some((start, end)), Ok(step)) if step > 0 => (start..=end)
            .step_by(step)
            .map(|n| WEEKDAYS[n % 7].to_string())
            .collect(),
        _ => vec![format!("{span}/{step}")],
    }
}

fn translate_weekday_span(span: &str) -> Vec<String> {
    let translated = match span.split_once('-') {
        Some((start, end)) => match (weekday_number(start), weekday_number(end)) {
            // A range ending on 7 wraps onto Sunday, which the crate cannot express
            // as a single ascending span.
            (Some(0), Some(7)) => "SUN-SAT".to_string(),
            (Some(7), Some(7)) => "SUN".to_string(),
            (Some(a), Some(7)) => format!("{}-SAT,SUN", WEEKDAYS[a]),
            (Some(a), Some(b)) => format!("{}-{}", WEEKDAYS[a % 7], WEEKDAYS[b % 7]),
            _ => span.to_string(),
        },
        None => match weekday_number(span) {
            Some(n) => WEEKDAYS[n % 7].to_string(),
            None => span.to_string(),
        },
    };
    translated.split(',').map(String::from).collect()
}

/// `a-b` or a lone `a` (meaning `a` through 7) in Unix weekday numbers.
fn numeric_span(span: &str) -> Option<(usize, usize)> {
    match span.split_once('-') {
        Some((start, end)) => {
            let (a, b) = (weekday_number(start)?, weekday_number(end)?);
            (a <= b).then_some((a, b))
        }
        None => weekday_number(span).map(|a| (a, 7)),
    }
}

fn weekday_number(token: &str) -> Option<usize> {
    token.parse::<usize>().ok().filter(|n| *n <= 7)
}
