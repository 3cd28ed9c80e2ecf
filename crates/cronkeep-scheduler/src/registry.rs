//! Explicit task registration.
//!
//! Tasks are registered once at startup under a stable id; the registry
//! keeps registration order, which breaks ties between equal priorities.

use std::sync::Arc;

use async_trait::async_trait;
use cronkeep_core::TaskId;

use crate::error::{Result, SchedulerError};
use crate::types::TaskPolicy;

/// A unit of recurring work.
#[async_trait]
pub trait CronTask: Send + Sync {
    /// Default cron expression, used when the task's record is first created.
    /// An empty string registers the task without ever scheduling it.
    fn schedule(&self) -> String;

    /// Defaults and limits for this task.
    fn policy(&self) -> TaskPolicy {
        TaskPolicy::default()
    }

    /// The task body.
    async fn process(&self) -> anyhow::Result<()>;
}

/// Builds a fresh task instance for each cycle.
pub type TaskFactory = Box<dyn Fn() -> Arc<dyn CronTask> + Send + Sync>;

struct Registration {
    id: TaskId,
    factory: TaskFactory,
}

/// Mapping from task id to factory, in registration order.
#[derive(Default)]
pub struct TaskRegistry {
    entries: Vec<Registration>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `id`. Ids must be unique.
    pub fn register<F>(&mut self, id: impl Into<TaskId>, factory: F) -> Result<()>
    where
        F: Fn() -> Arc<dyn CronTask> + Send + Sync + 'static,
    {
        let id = id.into();
        if self.entries.iter().any(|e| e.id == id) {
            return Err(SchedulerError::DuplicateTask { id: id.to_string() });
        }
        tracing::debug!(task_id = %id, "task registered");
        self.entries.push(Registration {
            id,
            factory: Box::new(factory),
        });
        Ok(())
    }

    /// Register a shared instance that is reused on every cycle.
    pub fn register_instance(
        &mut self,
        id: impl Into<TaskId>,
        task: Arc<dyn CronTask>,
    ) -> Result<()> {
        self.register(id, move || Arc::clone(&task))
    }

    /// Registered ids in registration order.
    pub fn ids(&self) -> Vec<TaskId> {
        self.entries.iter().map(|e| e.id.clone()).collect()
    }

    /// Instantiate every registered task, in registration order.
    pub fn instantiate(&self) -> Vec<(TaskId, Arc<dyn CronTask>)> {
        self.entries
            .iter()
            .map(|e| (e.id.clone(), (e.factory)()))
            .collect()
    }

    /// Instantiate a single task by id.
    pub fn get(&self, id: &TaskId) -> Option<Arc<dyn CronTask>> {
        self.entries
            .iter()
            .find(|e| &e.id == id)
            .map(|e| (e.factory)())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
