use thiserror::Error;

#[derive(Debug, Error)]
pub enum CronkeepError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },
}

impl CronkeepError {
    /// Short error code string returned to HTTP clients.
    pub fn code(&self) -> &'static str {
        match self {
            CronkeepError::Config(_) => "CONFIG_ERROR",
            CronkeepError::AuthFailed(_) => "AUTH_FAILED",
            CronkeepError::PermissionDenied { .. } => "PERMISSION_DENIED",
        }
    }
}

pub type Result<T> = std::result::Result<T, CronkeepError>;
