//! `cronkeep-core` — configuration and value types shared by every cronkeep crate.

pub mod config;
pub mod error;
pub mod types;

pub use config::CronkeepConfig;
pub use error::{CronkeepError, Result};
pub use types::{Priority, TaskId, Verbosity};
