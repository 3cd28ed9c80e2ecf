//! Command-line surface of the `cronkeep` binary.

use clap::{Args, Parser, Subcommand};
use cronkeep_core::{Priority, TaskId, Verbosity};
use cronkeep_scheduler::{StatusAdmin, StatusRecord};

/// cronkeep — cron-style recurring task runner
#[derive(Parser)]
#[command(name = "cronkeep")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CRONKEEP_CONFIG", global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one cycle over every registered task and exit
    Run(RunArgs),

    /// Serve the HTTP endpoints
    Serve,

    /// Inspect and edit task status records
    #[command(subcommand)]
    Status(StatusCommand),
}

#[derive(Args)]
pub struct RunArgs {
    /// Print nothing
    #[arg(short, long, conflicts_with = "debug")]
    pub quiet: bool,

    /// Also print skipped and not-yet-due tasks
    #[arg(short, long)]
    pub debug: bool,
}

impl RunArgs {
    pub fn verbosity(&self, fallback: Verbosity) -> Verbosity {
        if !self.quiet && !self.debug {
            return fallback;
        }
        Verbosity::from_flags(self.quiet, self.debug)
    }
}

#[derive(Subcommand)]
pub enum StatusCommand {
    /// List every status record
    List,
    /// Bring a task out of the error state
    Reset { task: String },
    /// Allow a task to run again
    Enable { task: String },
    /// Switch a task off
    Disable { task: String },
    /// Change a task's priority
    Priority { task: String, priority: Priority },
    /// Change an editable task's cron expression
    Schedule { task: String, expression: String },
}

/// Apply `command` and print the affected record(s).
pub fn run_status(admin: &StatusAdmin, command: StatusCommand) -> anyhow::Result<()> {
    let record = match command {
        StatusCommand::List => {
            let records = admin.list()?;
            if records.is_empty() {
                println!("No tasks have been seen yet.");
            }
            for record in &records {
                println!("{}", format_row(record));
            }
            return Ok(());
        }
        StatusCommand::Reset { task } => admin.reset(&TaskId::from(task))?,
        StatusCommand::Enable { task } => admin.enable(&TaskId::from(task))?,
        StatusCommand::Disable { task } => admin.disable(&TaskId::from(task))?,
        StatusCommand::Priority { task, priority } => {
            admin.set_priority(&TaskId::from(task), priority)?
        }
        StatusCommand::Schedule { task, expression } => {
            admin.set_schedule(&TaskId::from(task), &expression)?
        }
    };
    println!("{}", format_row(&record));
    Ok(())
}

fn format_row(record: &StatusRecord) -> String {
    let when = |ts: Option<chrono::DateTime<chrono::Utc>>| {
        ts.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string())
    };
    format!(
        "{:<24} {:<16} {:<9} {:<7} {:<8} last_run={} last_checked={}{}",
        record.task_id.as_str(),
        record.schedule,
        record.status.to_string(),
        record.priority.to_string(),
        if record.enabled { "enabled" } else { "disabled" },
        when(record.last_run),
        when(record.last_checked),
        if record.is_locked { " locked" } else { "" },
    )
}
