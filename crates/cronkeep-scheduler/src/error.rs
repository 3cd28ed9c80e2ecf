use thiserror::Error;

use crate::types::TaskStatus;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The cron expression could not be parsed.
    #[error("Invalid schedule '{expression}': {reason}")]
    ScheduleSyntax { expression: String, reason: String },

    /// No status record exists for the given task.
    #[error("Task not found: {id}")]
    TaskNotFound { id: String },

    /// A second registration used an identifier that is already taken.
    #[error("Task already registered: {id}")]
    DuplicateTask { id: String },

    /// The state machine refused the requested status change.
    #[error("Invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// The task does not allow administrators to edit its schedule.
    #[error("Task is not editable: {id}")]
    NotEditable { id: String },

    /// A persisted row holds a value that cannot be decoded.
    #[error("Corrupt status row for {id}: {reason}")]
    CorruptRecord { id: String, reason: String },
}

impl SchedulerError {
    /// Short error code string returned to HTTP clients.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Database(_) => "DATABASE_ERROR",
            SchedulerError::ScheduleSyntax { .. } => "INVALID_SCHEDULE",
            SchedulerError::TaskNotFound { .. } => "TASK_NOT_FOUND",
            SchedulerError::DuplicateTask { .. } => "DUPLICATE_TASK",
            SchedulerError::InvalidTransition { .. } => "INVALID_TRANSITION",
            SchedulerError::NotEditable { .. } => "NOT_EDITABLE",
            SchedulerError::CorruptRecord { .. } => "CORRUPT_RECORD",
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
