use std::time::Duration;

use chrono::{DateTime, Utc};
use cronkeep_core::config::DEFAULT_MAX_EXECUTION_SECS;
use cronkeep_core::{Priority, TaskId};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a task's status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Idle and eligible to run on its next due minute.
    Pending,
    /// Lock held; due-detection in progress.
    Checking,
    /// Task body executing.
    Running,
    /// Exceeded its execution time; needs an administrative reset.
    Error,
    /// Switched off; never checked.
    Off,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Checking => "checking",
            TaskStatus::Running => "running",
            TaskStatus::Error => "error",
            TaskStatus::Off => "off",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "checking" => Ok(TaskStatus::Checking),
            "running" => Ok(TaskStatus::Running),
            "error" => Ok(TaskStatus::Error),
            "off" => Ok(TaskStatus::Off),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

impl From<cronkeep_core::config::InitialStatus> for TaskStatus {
    fn from(s: cronkeep_core::config::InitialStatus) -> Self {
        match s {
            cronkeep_core::config::InitialStatus::Off => TaskStatus::Off,
            cronkeep_core::config::InitialStatus::Pending => TaskStatus::Pending,
        }
    }
}

/// Per-task defaults and execution limits, supplied by the task itself.
#[derive(Debug, Clone)]
pub struct TaskPolicy {
    pub priority: Priority,
    /// Whether a freshly created record starts enabled.
    pub enabled: bool,
    /// Ceiling on a single run before the record is escalated to `Error`.
    pub max_execution_time: Duration,
    /// Opt-in to overlapping executions; such tasks bypass the exclusive lock.
    pub allow_multiple_instances: bool,
    /// Whether administrators may change the schedule at runtime.
    pub editable: bool,
}

impl Default for TaskPolicy {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            enabled: true,
            max_execution_time: Duration::from_secs(DEFAULT_MAX_EXECUTION_SECS),
            allow_multiple_instances: false,
            editable: false,
        }
    }
}

/// Durable scheduling state of one task; the source of truth between invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub task_id: TaskId,
    /// Cron expression currently governing the task.
    pub schedule: String,
    pub status: TaskStatus,
    pub enabled: bool,
    pub priority: Priority,
    /// Executions currently in flight.
    pub running_instances: u32,
    /// Last time a cycle examined the task, whether or not it ran.
    pub last_checked: Option<DateTime<Utc>>,
    /// Last time the task body was started.
    pub last_run: Option<DateTime<Utc>>,
    pub is_locked: bool,
    /// When the current lock was taken; `None` while unlocked.
    pub locked_at: Option<DateTime<Utc>>,
}

impl StatusRecord {
    /// A never-checked record carrying the task's declared defaults.
    pub fn new(task_id: TaskId, schedule: &str, status: TaskStatus, policy: &TaskPolicy) -> Self {
        Self {
            task_id,
            schedule: schedule.to_string(),
            status,
            enabled: policy.enabled,
            priority: policy.priority,
            running_instances: 0,
            last_checked: None,
            last_run: None,
            is_locked: false,
            locked_at: None,
        }
    }

    /// Whether the runner should consider this record at all.
    pub fn is_runnable(&self) -> bool {
        self.enabled && self.status != TaskStatus::Off && !self.schedule.trim().is_empty()
    }
}
