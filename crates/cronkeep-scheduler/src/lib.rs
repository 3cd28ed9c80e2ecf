//! `cronkeep-scheduler` — cron-style recurring tasks with durable status in SQLite.
//!
//! # Overview
//!
//! Nothing stays resident between invocations: an external trigger calls
//! [`runner::TaskRunner::run_cycle`] about once a minute, and everything the
//! next invocation needs lives in the `cron_task_status` table.
//!
//! Per task and per cycle the runner:
//!
//! | Step | Component |
//! |------|-----------|
//! | load or create the status record | [`store::StatusStore`] |
//! | escalate runs over their time limit | [`state::is_stuck`] |
//! | take the exclusive lock | [`lock::LockManager`] |
//! | decide due-ness, including missed minutes | [`due::is_due`] |
//! | move through `Checking → Running → Pending` | [`state::StatusStateMachine`] |
//! | print one line, filtered by verbosity | [`output::Reporter`] |
//!
//! Schedules are standard five-field Unix cron expressions evaluated in UTC.

pub mod admin;
pub mod clock;
pub mod db;
pub mod due;
pub mod error;
pub mod lock;
pub mod output;
pub mod registry;
pub mod runner;
pub mod schedule;
pub mod state;
pub mod store;
pub mod types;

pub use admin::StatusAdmin;
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{Result, SchedulerError};
pub use output::{BufferSink, Outcome, OutputSink, StdoutSink};
pub use registry::{CronTask, TaskRegistry};
pub use runner::{CycleReport, TaskOutcome, TaskRunner};
pub use schedule::CronSchedule;
pub use store::{SqliteStatusStore, StatusStore};
pub use types::{StatusRecord, TaskPolicy, TaskStatus};
