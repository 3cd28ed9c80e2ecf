//! Per-task report lines and where they go.

use std::io::Write;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use cronkeep_core::{TaskId, Verbosity};
use serde::Serialize;

/// What a cycle did with one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// The body ran to completion.
    Ran { started_at: DateTime<Utc> },
    /// The body returned an error or panicked; the lock was still released.
    Failed { reason: String },
    /// Another invocation holds the lock.
    SkippedLocked,
    /// Disabled, switched off, or without a schedule.
    SkippedDisabled,
    /// Parked in `Error`, or its schedule could not be evaluated.
    SkippedError { reason: Option<String> },
    /// Exceeded its execution time and was escalated to `Error` this cycle.
    Stuck { since: Option<DateTime<Utc>> },
    /// Not due; next occurrence shown.
    WillRunAt { at: DateTime<Utc> },
}

impl Outcome {
    /// Lowest verbosity at which this outcome is printed.
    pub fn level(&self) -> Verbosity {
        match self {
            Outcome::Ran { .. }
            | Outcome::Failed { .. }
            | Outcome::Stuck { .. }
            | Outcome::SkippedError { .. } => Verbosity::Normal,
            Outcome::SkippedLocked | Outcome::SkippedDisabled | Outcome::WillRunAt { .. } => {
                Verbosity::Debug
            }
        }
    }

    /// Human-readable line for `task_id`, without timestamp.
    pub fn message(&self, task_id: &TaskId) -> String {
        match self {
            Outcome::Ran { started_at } => format!(
                "{task_id} ran at {}.",
                started_at.format("%Y-%m-%d %H:%M:%S")
            ),
            Outcome::Failed { reason } => format!("{task_id} failed: {reason}"),
            Outcome::SkippedLocked => format!("{task_id} is locked by another run, skipped."),
            Outcome::SkippedDisabled => format!("{task_id} is disabled, skipped."),
            Outcome::SkippedError { reason: None } => {
                format!("{task_id} is in error state, skipped.")
            }
            Outcome::SkippedError {
                reason: Some(reason),
            } => format!("{task_id} skipped: {reason}"),
            Outcome::Stuck { since } => match since {
                Some(t) => format!(
                    "{task_id} has been running since {} and was marked as error.",
                    t.format("%Y-%m-%d %H:%M:%S")
                ),
                None => format!("{task_id} exceeded its execution time and was marked as error."),
            },
            Outcome::WillRunAt { at } => {
                format!("{task_id} will run at {}.", at.format("%Y-%m-%d %H:%M:%S"))
            }
        }
    }
}

/// Receives report lines from a cycle.
pub trait OutputSink: Send + Sync {
    fn emit(&self, line: &str);
}

/// Writes lines to stdout; used by the command-line entry point.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn emit(&self, line: &str) {
        let mut out = std::io::stdout().lock();
        // A closed stdout must not fail the cycle.
        let _ = writeln!(out, "{line}");
    }
}

/// Forwards lines to the tracing subscriber; used by the in-process ticker.
#[derive(Debug, Default)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn emit(&self, line: &str) {
        tracing::info!(target: "cronkeep::report", "{line}");
    }
}

/// Collects lines in memory; used by the HTTP endpoint and tests.
#[derive(Debug, Default)]
pub struct BufferSink {
    lines: Mutex<Vec<String>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl OutputSink for BufferSink {
    fn emit(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}

/// Applies the verbosity filter and timestamps each line.
pub struct Reporter<'a> {
    sink: &'a dyn OutputSink,
    verbosity: Verbosity,
}

impl<'a> Reporter<'a> {
    pub fn new(sink: &'a dyn OutputSink, verbosity: Verbosity) -> Self {
        Self { sink, verbosity }
    }

    /// Emit `message` if `level` is within the configured verbosity.
    pub fn say(&self, now: DateTime<Utc>, level: Verbosity, message: &str) {
        if level > self.verbosity || self.verbosity == Verbosity::Silent {
            return;
        }
        self.sink
            .emit(&format!("{} - {}", now.to_rfc2822(), message));
    }

    pub fn outcome(&self, now: DateTime<Utc>, task_id: &TaskId, outcome: &Outcome) {
        self.say(now, outcome.level(), &outcome.message(task_id));
    }
}
