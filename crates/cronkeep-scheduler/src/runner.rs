//! One pass over every registered task.
//!
//! A cycle instantiates the registry, loads (or creates) each task's status
//! record, orders the tasks by priority and then walks them one at a time:
//! skip what is disabled or parked in `Error`, escalate what has been
//! running too long, take the lock, decide due-ness, run, release.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cronkeep_core::{TaskId, Verbosity};
use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::clock::Clock;
use crate::due;
use crate::error::{Result, SchedulerError};
use crate::lock::LockManager;
use crate::output::{Outcome, OutputSink, Reporter, TracingSink};
use crate::registry::{CronTask, TaskRegistry};
use crate::schedule::{self, CronSchedule};
use crate::state::{is_stuck, StatusStateMachine};
use crate::store::StatusStore;
use crate::types::{StatusRecord, TaskStatus};

/// Outcome of one task within a cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Summary of one cycle, in processing order.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: String,
    pub started_at: DateTime<Utc>,
    pub outcomes: Vec<TaskOutcome>,
}

impl CycleReport {
    /// Outcome recorded for `task_id`, if it was part of the cycle.
    pub fn outcome_for(&self, task_id: &TaskId) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|o| &o.task_id == task_id)
            .map(|o| &o.outcome)
    }

    /// Number of task bodies that were started.
    pub fn ran(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Ran { .. } | Outcome::Failed { .. }))
            .count()
    }
}

/// Drives cycles over a [`TaskRegistry`] against a shared [`StatusStore`].
pub struct TaskRunner {
    registry: Arc<TaskRegistry>,
    store: Arc<dyn StatusStore>,
    clock: Arc<dyn Clock>,
    locks: LockManager,
    machine: StatusStateMachine,
    initial_status: TaskStatus,
}

impl TaskRunner {
    /// New runner. Records created on first sight start out `Off`.
    pub fn new(
        registry: Arc<TaskRegistry>,
        store: Arc<dyn StatusStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            locks: LockManager::new(Arc::clone(&store), Arc::clone(&clock)),
            machine: StatusStateMachine::new(Arc::clone(&store), Arc::clone(&clock)),
            registry,
            store,
            clock,
            initial_status: TaskStatus::Off,
        }
    }

    /// Status given to records created on first sight.
    pub fn with_initial_status(mut self, status: TaskStatus) -> Self {
        self.initial_status = status;
        self
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Run one cycle, writing one report line per task to `sink` as allowed
    /// by `verbosity`.
    ///
    /// A failing task body never aborts the cycle. A failing store does: the
    /// current task's lock is released first when possible, then the error is
    /// returned.
    pub async fn run_cycle(
        &self,
        sink: &dyn OutputSink,
        verbosity: Verbosity,
    ) -> Result<CycleReport> {
        let cycle_id = Uuid::now_v7().to_string();
        let span = info_span!("cron_cycle", cycle_id = %cycle_id);
        self.run_cycle_inner(cycle_id, sink, verbosity)
            .instrument(span)
            .await
    }

    async fn run_cycle_inner(
        &self,
        cycle_id: String,
        sink: &dyn OutputSink,
        verbosity: Verbosity,
    ) -> Result<CycleReport> {
        let started_at = self.clock.now();
        let reporter = Reporter::new(sink, verbosity);
        let mut report = CycleReport {
            cycle_id,
            started_at,
            outcomes: Vec::new(),
        };

        let tasks = self.registry.instantiate();
        if tasks.is_empty() {
            reporter.say(started_at, Verbosity::Debug, "There are no tasks to run.");
            return Ok(report);
        }

        let mut queue = Vec::with_capacity(tasks.len());
        for (task_id, task) in tasks {
            match self.load_record(&task_id, task.as_ref()) {
                Ok(record) => queue.push((record, task)),
                Err(SchedulerError::ScheduleSyntax { expression, reason }) => {
                    warn!(task_id = %task_id, %expression, "default schedule rejected");
                    let outcome = Outcome::SkippedError {
                        reason: Some(format!("invalid schedule '{expression}': {reason}")),
                    };
                    reporter.outcome(self.clock.now(), &task_id, &outcome);
                    report.outcomes.push(TaskOutcome { task_id, outcome });
                }
                Err(e) => return Err(e),
            }
        }

        // Stable: equal priorities keep registration order.
        queue.sort_by_key(|(record, _)| record.priority);

        for (record, task) in queue {
            let task_id = record.task_id.clone();
            let outcome = self.process_task(record, task).await?;
            reporter.outcome(self.clock.now(), &task_id, &outcome);
            report.outcomes.push(TaskOutcome { task_id, outcome });
        }

        info!(tasks = report.outcomes.len(), ran = report.ran(), "cycle finished");
        Ok(report)
    }

    /// Existing record, or a fresh one built from the task's defaults.
    fn load_record(&self, task_id: &TaskId, task: &dyn CronTask) -> Result<StatusRecord> {
        if let Some(record) = self.store.find(task_id)? {
            return Ok(record);
        }
        let default_schedule = task.schedule();
        if !default_schedule.trim().is_empty() {
            schedule::validate(&default_schedule)?;
        }
        let template = StatusRecord::new(
            task_id.clone(),
            &default_schedule,
            self.initial_status,
            &task.policy(),
        );
        let record = self.store.get_or_create(&template)?;
        debug!(task_id = %task_id, status = %record.status, "status record created");
        Ok(record)
    }

    async fn process_task(
        &self,
        mut record: StatusRecord,
        task: Arc<dyn CronTask>,
    ) -> Result<Outcome> {
        if !record.is_runnable() {
            return Ok(Outcome::SkippedDisabled);
        }
        if record.status == TaskStatus::Error {
            return Ok(Outcome::SkippedError { reason: None });
        }

        let policy = task.policy();
        if is_stuck(&record, policy.max_execution_time, self.clock.now()) {
            let since = match record.status {
                TaskStatus::Running => record.last_run,
                _ => record.locked_at.or(record.last_run),
            };
            self.machine.escalate_stuck(&record.task_id)?;
            return Ok(Outcome::Stuck { since });
        }

        if policy.allow_multiple_instances {
            return self.check_and_run(&record.task_id, task, true).await;
        }

        if !self.locks.lock(&mut record)? {
            return Ok(Outcome::SkippedLocked);
        }
        let result = self.check_and_run(&record.task_id, task, false).await;
        let released = self.locks.unlock(&mut record);
        if let Err(e) = &released {
            error!(task_id = %record.task_id, "failed to release lock: {e}");
        }
        let outcome = result?;
        released?;
        Ok(outcome)
    }

    /// Due-detection and, when due, the execution itself. The record is read
    /// again so the decision sees what the lock holder sees.
    async fn check_and_run(
        &self,
        task_id: &TaskId,
        task: Arc<dyn CronTask>,
        reentrant: bool,
    ) -> Result<Outcome> {
        let record = self
            .store
            .find(task_id)?
            .ok_or_else(|| SchedulerError::TaskNotFound {
                id: task_id.to_string(),
            })?;
        let now = self.clock.now();

        let schedule = match CronSchedule::parse(&record.schedule) {
            Ok(s) => s,
            Err(e) => return unschedulable(task_id, e),
        };

        let due = match due::is_due_with(&schedule, &record, now) {
            Ok(due) => due,
            Err(e) => return unschedulable(task_id, e),
        };
        if !due {
            self.machine.record_check(task_id)?;
            return match schedule.next_run_after(now) {
                Ok(at) => Ok(Outcome::WillRunAt { at }),
                Err(e) => unschedulable(task_id, e),
            };
        }

        self.machine.begin_run(task_id, reentrant)?;
        info!(task_id = %task_id, "task starting");
        let result = AssertUnwindSafe(task.process()).catch_unwind().await;
        let finished = self.machine.finish_run(task_id);

        let outcome = match result {
            Ok(Ok(())) => {
                info!(task_id = %task_id, "task finished");
                Outcome::Ran { started_at: now }
            }
            Ok(Err(e)) => {
                warn!(task_id = %task_id, "task failed: {e:#}");
                Outcome::Failed {
                    reason: format!("{e:#}"),
                }
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!(task_id = %task_id, "task panicked: {reason}");
                Outcome::Failed { reason }
            }
        };
        finished?;
        Ok(outcome)
    }

    /// Run a cycle every `period` until `shutdown` flips to `true`. Report
    /// lines go to the tracing subscriber.
    pub async fn run_every(
        self: Arc<Self>,
        period: Duration,
        verbosity: Verbosity,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(period_secs = period.as_secs(), "cron ticker started");
        let sink = TracingSink;
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_cycle(&sink, verbosity).await {
                        error!("cron cycle error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("cron ticker shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// A schedule that cannot be evaluated skips its task; anything else is fatal.
fn unschedulable(task_id: &TaskId, e: SchedulerError) -> Result<Outcome> {
    match e {
        SchedulerError::ScheduleSyntax { .. } => {
            warn!(task_id = %task_id, "stored schedule rejected: {e}");
            Ok(Outcome::SkippedError {
                reason: Some(e.to_string()),
            })
        }
        other => Err(other),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
