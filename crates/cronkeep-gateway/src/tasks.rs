//! Built-in task implementations and registry assembly.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use cronkeep_core::config::CommandTaskConfig;
use cronkeep_core::{CronkeepConfig, Priority};
use cronkeep_scheduler::{CronTask, SqliteStatusStore, TaskPolicy, TaskRegistry};
use tracing::{debug, info};

/// Id under which the status-database housekeeping task is registered.
pub const MAINTENANCE_TASK_ID: &str = "database_maintenance";

/// Runs a shell command from `[[tasks]]` through `sh -c`.
pub struct CommandTask {
    config: CommandTaskConfig,
}

impl CommandTask {
    pub fn new(config: CommandTaskConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CronTask for CommandTask {
    fn schedule(&self) -> String {
        self.config.schedule.clone()
    }

    fn policy(&self) -> TaskPolicy {
        TaskPolicy {
            priority: self.config.priority,
            enabled: self.config.enabled,
            max_execution_time: Duration::from_secs(self.config.max_execution_secs),
            allow_multiple_instances: self.config.allow_multiple_instances,
            editable: self.config.editable,
        }
    }

    async fn process(&self) -> anyhow::Result<()> {
        debug!(task_id = %self.config.id, command = %self.config.command, "spawning command");
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.config.command)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to spawn `{}`", self.config.command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("exited with {}: {}", output.status, stderr.trim());
        }
        info!(
            task_id = %self.config.id,
            stdout_bytes = output.stdout.len(),
            "command finished"
        );
        Ok(())
    }
}

/// Nightly `PRAGMA optimize` and WAL checkpoint on the status database.
pub struct DatabaseMaintenanceTask {
    store: Arc<SqliteStatusStore>,
}

impl DatabaseMaintenanceTask {
    pub fn new(store: Arc<SqliteStatusStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CronTask for DatabaseMaintenanceTask {
    fn schedule(&self) -> String {
        "30 3 * * *".to_string()
    }

    fn policy(&self) -> TaskPolicy {
        TaskPolicy {
            priority: Priority::Low,
            editable: true,
            ..TaskPolicy::default()
        }
    }

    async fn process(&self) -> anyhow::Result<()> {
        self.store
            .execute_batch("PRAGMA optimize; PRAGMA wal_checkpoint(TRUNCATE);")?;
        info!("status database optimized");
        Ok(())
    }
}

/// Registry holding every `[[tasks]]` entry followed by the maintenance task.
pub fn build_registry(
    config: &CronkeepConfig,
    store: Arc<SqliteStatusStore>,
) -> anyhow::Result<TaskRegistry> {
    let mut registry = TaskRegistry::new();
    for task in &config.tasks {
        let id = task.id.clone();
        let instance: Arc<dyn CronTask> = Arc::new(CommandTask::new(task.clone()));
        registry
            .register_instance(id.as_str(), instance)
            .with_context(|| format!("registering task '{id}'"))?;
    }
    registry.register_instance(
        MAINTENANCE_TASK_ID,
        Arc::new(DatabaseMaintenanceTask::new(store)),
    )?;
    info!(tasks = registry.len(), "task registry built");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(id: &str, command: &str) -> CommandTaskConfig {
        CommandTaskConfig {
            id: id.to_string(),
            schedule: "*/5 * * * *".to_string(),
            command: command.to_string(),
            priority: Priority::High,
            max_execution_secs: 60,
            allow_multiple_instances: false,
            editable: false,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn command_exit_status_decides_success() {
        assert!(CommandTask::new(command("ok", "true")).process().await.is_ok());

        let err = CommandTask::new(command("bad", "echo nope >&2; exit 3"))
            .process()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nope"), "{err}");
    }

    #[test]
    fn command_policy_comes_from_config() {
        let task = CommandTask::new(command("c", "true"));
        let policy = task.policy();
        assert_eq!(policy.priority, Priority::High);
        assert_eq!(policy.max_execution_time, Duration::from_secs(60));
        assert!(!policy.editable);
        assert_eq!(task.schedule(), "*/5 * * * *");
    }

    #[tokio::test]
    async fn maintenance_runs_against_in_memory_store() {
        let store = Arc::new(SqliteStatusStore::open_in_memory().unwrap());
        DatabaseMaintenanceTask::new(store).process().await.unwrap();
    }

    #[test]
    fn duplicate_task_ids_fail_registry_build() {
        let store = Arc::new(SqliteStatusStore::open_in_memory().unwrap());
        let mut config = CronkeepConfig::default();
        config.tasks = vec![command("dup", "true"), command("dup", "false")];
        assert!(build_registry(&config, store.clone()).is_err());

        config.tasks.pop();
        let registry = build_registry(&config, store).unwrap();
        let ids: Vec<String> = registry.ids().iter().map(|id| id.to_string()).collect();
        assert_eq!(ids, vec!["dup", MAINTENANCE_TASK_ID]);
    }
}
