//! Allowed status transitions and the persisted operations that perform them.
//!
//! ```text
//!            lock()              due
//!  Pending ─────────▶ Checking ──────▶ Running
//!  Off     ─────────▶    │                │ last instance done
//!                        │ not due        ▼
//!                        └────────────▶ Pending
//!  Checking/Running ──(over time limit)──▶ Error ──(admin reset)──▶ Pending
//! ```
//!
//! `unlock()` bypasses the table and always lands on `Pending`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cronkeep_core::TaskId;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{Result, SchedulerError};
use crate::store::StatusStore;
use crate::types::{StatusRecord, TaskStatus};

impl TaskStatus {
    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending | Off, Checking)
                | (Checking, Running)
                | (Checking, Pending)
                | (Running, Pending)
                | (Running | Checking, Error)
                | (Error, Pending)
                | (Pending | Error, Off)
                | (Off, Pending)
        )
    }
}

/// Move `record` to `to`, or fail without touching it.
fn transition(record: &mut StatusRecord, to: TaskStatus) -> Result<()> {
    if !record.status.can_transition_to(to) {
        return Err(SchedulerError::InvalidTransition {
            id: record.task_id.to_string(),
            from: record.status,
            to,
        });
    }
    record.status = to;
    Ok(())
}

/// True when `record` has been `Running` (or stuck in `Checking`) for longer
/// than `limit` at `now`.
///
/// Running time counts from `last_run`; a lingering check counts from the
/// moment its lock was taken, falling back to `last_run` for rows written
/// before the lock timestamp existed.
pub fn is_stuck(record: &StatusRecord, limit: Duration, now: DateTime<Utc>) -> bool {
    let since = match record.status {
        TaskStatus::Running => record.last_run,
        TaskStatus::Checking => record.locked_at.or(record.last_run),
        _ => return false,
    };
    let Ok(limit) = chrono::Duration::from_std(limit) else {
        return false;
    };
    since.is_some_and(|t| now - t > limit)
}

/// Performs every status change of a record. Each operation is one atomic
/// read-modify-write against the store, persisted before it returns.
pub struct StatusStateMachine {
    store: Arc<dyn StatusStore>,
    clock: Arc<dyn Clock>,
}

impl StatusStateMachine {
    pub fn new(store: Arc<dyn StatusStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Mark the start of an execution: `Checking → Running`, one more running
    /// instance, `last_run` and `last_checked` set to now.
    ///
    /// With `reentrant` set the task may also start from `Pending` or while
    /// another instance is still `Running`.
    pub fn begin_run(&self, task_id: &TaskId, reentrant: bool) -> Result<StatusRecord> {
        let now = self.clock.now();
        let record = self
            .store
            .update(task_id, &mut |rec: &mut StatusRecord| {
                if !rec.enabled {
                    return Err(SchedulerError::InvalidTransition {
                        id: rec.task_id.to_string(),
                        from: rec.status,
                        to: TaskStatus::Running,
                    });
                }
                let overlap = reentrant
                    && matches!(rec.status, TaskStatus::Pending | TaskStatus::Running);
                if overlap {
                    rec.status = TaskStatus::Running;
                } else {
                    transition(rec, TaskStatus::Running)?;
                }
                rec.running_instances += 1;
                rec.last_run = Some(now);
                touch_checked(rec, now);
                Ok(())
            })?;
        debug!(task_id = %task_id, instances = record.running_instances, "run started");
        Ok(record)
    }

    /// Mark the end of an execution, successful or not. The record returns
    /// to `Pending` once no instance is left running.
    pub fn finish_run(&self, task_id: &TaskId) -> Result<StatusRecord> {
        let record = self
            .store
            .update(task_id, &mut |rec: &mut StatusRecord| {
                rec.running_instances = rec.running_instances.saturating_sub(1);
                if rec.running_instances == 0 && rec.status == TaskStatus::Running {
                    transition(rec, TaskStatus::Pending)?;
                }
                Ok(())
            })?;
        debug!(task_id = %task_id, instances = record.running_instances, "run finished");
        Ok(record)
    }

    /// Record a check that decided not to run: `Checking → Pending` and
    /// `last_checked` advanced to now. Records not in `Checking` (re-entrant
    /// tasks check without the lock) keep their status.
    pub fn record_check(&self, task_id: &TaskId) -> Result<StatusRecord> {
        let now = self.clock.now();
        self.store.update(task_id, &mut |rec: &mut StatusRecord| {
            if rec.status == TaskStatus::Checking {
                transition(rec, TaskStatus::Pending)?;
            }
            touch_checked(rec, now);
            Ok(())
        })
    }

    /// Force a stuck record to `Error`, releasing its lock so the invariant
    /// "locked implies Checking or Running" keeps holding.
    pub fn escalate_stuck(&self, task_id: &TaskId) -> Result<StatusRecord> {
        let record = self
            .store
            .update(task_id, &mut |rec: &mut StatusRecord| {
                transition(rec, TaskStatus::Error)?;
                rec.is_locked = false;
                rec.locked_at = None;
                Ok(())
            })?;
        warn!(task_id = %task_id, last_run = ?record.last_run, "task exceeded its execution time");
        Ok(record)
    }

    /// Administrative reset: `Error → Pending`, clearing instances and lock.
    pub fn reset(&self, task_id: &TaskId) -> Result<StatusRecord> {
        let record = self
            .store
            .update(task_id, &mut |rec: &mut StatusRecord| {
                transition(rec, TaskStatus::Pending)?;
                rec.running_instances = 0;
                rec.is_locked = false;
                rec.locked_at = None;
                Ok(())
            })?;
        info!(task_id = %task_id, "task reset to pending");
        Ok(record)
    }

    /// Administrative switch. Disabling parks the record in `Off`; enabling
    /// moves `Off` back to `Pending`. A record mid-run keeps its status and
    /// only the flag changes, so the current execution finishes normally.
    pub fn set_enabled(&self, task_id: &TaskId, enabled: bool) -> Result<StatusRecord> {
        let record = self
            .store
            .update(task_id, &mut |rec: &mut StatusRecord| {
                rec.enabled = enabled;
                match (enabled, rec.status) {
                    (true, TaskStatus::Off) => transition(rec, TaskStatus::Pending)?,
                    (false, TaskStatus::Pending | TaskStatus::Error) => {
                        transition(rec, TaskStatus::Off)?
                    }
                    _ => {}
                }
                Ok(())
            })?;
        info!(task_id = %task_id, enabled, status = %record.status, "task enabled flag changed");
        Ok(record)
    }
}

/// `last_checked` never moves backwards, even if the clock does.
fn touch_checked(record: &mut StatusRecord, now: DateTime<Utc>) {
    record.last_checked = Some(match record.last_checked {
        Some(prev) if prev > now => prev,
        _ => now,
    });
}
