use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::types::{Priority, Verbosity};

pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Default ceiling on a single run before the stuck-task detector fires.
pub const DEFAULT_MAX_EXECUTION_SECS: u64 = 5 * 60;
/// Schedule given to tasks that do not declare one.
pub const DEFAULT_SCHEDULE: &str = "* * * * *";

/// Top-level config (cronkeep.toml + CRONKEEP_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CronkeepConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Shell-command tasks declared in the config file.
    #[serde(default)]
    pub tasks: Vec<CommandTaskConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    /// How long a writer waits on a locked database before giving up.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Bearer token required on every network call. When unset, the HTTP
    /// surface rejects all callers and only the local CLI can run cycles.
    pub admin_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            admin_token: None,
        }
    }
}

/// Status given to a task's record the first time the task is seen.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InitialStatus {
    /// New tasks stay parked until an administrator enables them.
    #[default]
    Off,
    /// New tasks are eligible on their first due minute.
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunnerConfig {
    #[serde(default)]
    pub initial_status: InitialStatus,
    /// Verbosity used when the caller passes neither `quiet` nor `debug`.
    #[serde(default)]
    pub verbosity: Verbosity,
    /// When set, `serve` also triggers a cycle every N seconds in-process.
    pub internal_tick_secs: Option<u64>,
}

/// A task that runs a shell command on a cron schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandTaskConfig {
    pub id: String,
    #[serde(default = "default_schedule")]
    pub schedule: String,
    pub command: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_max_execution_secs")]
    pub max_execution_secs: u64,
    #[serde(default)]
    pub allow_multiple_instances: bool,
    /// Whether administrators may change the schedule at runtime.
    #[serde(default = "bool_true")]
    pub editable: bool,
    #[serde(default = "bool_true")]
    pub enabled: bool,
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_schedule() -> String {
    DEFAULT_SCHEDULE.to_string()
}
fn default_max_execution_secs() -> u64 {
    DEFAULT_MAX_EXECUTION_SECS
}
fn default_busy_timeout_ms() -> u64 {
    5_000
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronkeep/cronkeep.db", home)
}

impl CronkeepConfig {
    /// Load config from a TOML file with CRONKEEP_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `CRONKEEP_GATEWAY__ADMIN_TOKEN` sets `gateway.admin_token`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CronkeepConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CRONKEEP_").split("__"))
            .extract()
            .map_err(|e| crate::error::CronkeepError::Config(e.to_string()))?;

        tracing::debug!(path = %path, tasks = config.tasks.len(), "config loaded");
        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronkeep/cronkeep.toml", home)
}
