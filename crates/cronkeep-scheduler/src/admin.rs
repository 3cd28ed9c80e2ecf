//! Administrative view and edit operations on status records.
//!
//! Records are never deleted; switching a task off is the supported way to
//! retire it.

use std::sync::Arc;

use cronkeep_core::{Priority, TaskId};
use tracing::info;

use crate::clock::Clock;
use crate::error::{Result, SchedulerError};
use crate::registry::TaskRegistry;
use crate::schedule;
use crate::state::StatusStateMachine;
use crate::store::StatusStore;
use crate::types::StatusRecord;

pub struct StatusAdmin {
    store: Arc<dyn StatusStore>,
    registry: Arc<TaskRegistry>,
    machine: StatusStateMachine,
}

impl StatusAdmin {
    pub fn new(
        store: Arc<dyn StatusStore>,
        registry: Arc<TaskRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            machine: StatusStateMachine::new(Arc::clone(&store), clock),
            store,
            registry,
        }
    }

    pub fn list(&self) -> Result<Vec<StatusRecord>> {
        self.store.list()
    }

    pub fn get(&self, task_id: &TaskId) -> Result<StatusRecord> {
        self.store
            .find(task_id)?
            .ok_or_else(|| not_found(task_id))
    }

    /// Replace the schedule of an editable task. The expression is validated
    /// before anything is written; an empty string unschedules the task.
    pub fn set_schedule(&self, task_id: &TaskId, expression: &str) -> Result<StatusRecord> {
        let task = self.registry.get(task_id).ok_or_else(|| not_found(task_id))?;
        if !task.policy().editable {
            return Err(SchedulerError::NotEditable {
                id: task_id.to_string(),
            });
        }
        let expression = expression.trim();
        if !expression.is_empty() {
            schedule::validate(expression)?;
        }
        let record = self.store.update(task_id, &mut |rec: &mut StatusRecord| {
            rec.schedule = expression.to_string();
            Ok(())
        })?;
        info!(task_id = %task_id, schedule = %record.schedule, "schedule changed");
        Ok(record)
    }

    pub fn set_priority(&self, task_id: &TaskId, priority: Priority) -> Result<StatusRecord> {
        let record = self.store.update(task_id, &mut |rec: &mut StatusRecord| {
            rec.priority = priority;
            Ok(())
        })?;
        info!(task_id = %task_id, %priority, "priority changed");
        Ok(record)
    }

    pub fn enable(&self, task_id: &TaskId) -> Result<StatusRecord> {
        self.machine.set_enabled(task_id, true)
    }

    pub fn disable(&self, task_id: &TaskId) -> Result<StatusRecord> {
        self.machine.set_enabled(task_id, false)
    }

    /// Bring a task out of `Error`.
    pub fn reset(&self, task_id: &TaskId) -> Result<StatusRecord> {
        self.machine.reset(task_id)
    }
}

fn not_found(task_id: &TaskId) -> SchedulerError {
    SchedulerError::TaskNotFound {
        id: task_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::registry::CronTask;
    use crate::store::SqliteStatusStore;
    use crate::types::{TaskPolicy, TaskStatus};
    use async_trait::async_trait;

    struct Job {
        editable: bool,
    }

    #[async_trait]
    impl CronTask for Job {
        fn schedule(&self) -> String {
            "0 * * * *".to_string()
        }

        fn policy(&self) -> TaskPolicy {
            TaskPolicy {
                editable: self.editable,
                ..TaskPolicy::default()
            }
        }

        async fn process(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn setup() -> (Arc<SqliteStatusStore>, StatusAdmin) {
        let mut reg = TaskRegistry::new();
        reg.register_instance("open", Arc::new(Job { editable: true }))
            .unwrap();
        reg.register_instance("fixed", Arc::new(Job { editable: false }))
            .unwrap();
        let store = Arc::new(SqliteStatusStore::open_in_memory().unwrap());
        for id in ["open", "fixed"] {
            store
                .create(&StatusRecord::new(
                    id.into(),
                    "0 * * * *",
                    TaskStatus::Pending,
                    &TaskPolicy::default(),
                ))
                .unwrap();
        }
        let admin = StatusAdmin::new(store.clone(), Arc::new(reg), Arc::new(SystemClock));
        (store, admin)
    }

    #[test]
    fn schedule_edit_is_validated() {
        let (store, admin) = setup();
        let rec = admin.set_schedule(&"open".into(), " */15 * * * * ").unwrap();
        assert_eq!(rec.schedule, "*/15 * * * *");

        let err = admin.set_schedule(&"open".into(), "sometimes").unwrap_err();
        assert!(matches!(err, SchedulerError::ScheduleSyntax { .. }));
        let stored = store.find(&"open".into()).unwrap().unwrap();
        assert_eq!(stored.schedule, "*/15 * * * *");
    }

    #[test]
    fn non_editable_schedule_is_refused() {
        let (_, admin) = setup();
        let err = admin.set_schedule(&"fixed".into(), "5 * * * *").unwrap_err();
        assert!(matches!(err, SchedulerError::NotEditable { .. }));
        assert_eq!(admin.get(&"fixed".into()).unwrap().schedule, "0 * * * *");
    }

    #[test]
    fn unknown_task_is_not_found() {
        let (_, admin) = setup();
        assert!(matches!(
            admin.get(&"ghost".into()).unwrap_err(),
            SchedulerError::TaskNotFound { .. }
        ));
        assert!(matches!(
            admin.set_schedule(&"ghost".into(), "* * * * *").unwrap_err(),
            SchedulerError::TaskNotFound { .. }
        ));
    }

    #[test]
    fn priority_and_enable_flags() {
        let (_, admin) = setup();
        let rec = admin.set_priority(&"fixed".into(), Priority::High).unwrap();
        assert_eq!(rec.priority, Priority::High);

        let rec = admin.disable(&"fixed".into()).unwrap();
        assert!(!rec.enabled);
        assert_eq!(rec.status, TaskStatus::Off);

        let rec = admin.enable(&"fixed".into()).unwrap();
        assert!(rec.enabled);
        assert_eq!(rec.status, TaskStatus::Pending);
        assert_eq!(admin.list().unwrap().len(), 2);
    }

    #[test]
    fn reset_requires_error_state() {
        let (store, admin) = setup();
        assert!(matches!(
            admin.reset(&"open".into()).unwrap_err(),
            SchedulerError::InvalidTransition { .. }
        ));

        let mut rec = store.find(&"open".into()).unwrap().unwrap();
        rec.status = TaskStatus::Error;
        rec.running_instances = 2;
        store.save(&rec).unwrap();

        let rec = admin.reset(&"open".into()).unwrap();
        assert_eq!(rec.status, TaskStatus::Pending);
        assert_eq!(rec.running_instances, 0);
    }
}
