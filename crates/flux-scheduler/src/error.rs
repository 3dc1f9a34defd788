use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The expression does not have the five crontab fields.
    #[error("Invalid cron expression {expr:?}: expected 5 fields, got {got}")]
    FieldCount { expr: String, got: usize },

    /// The expression has five fields but one of them is malformed.
    #[error("Invalid cron expression {expr:?}: {reason}")]
    InvalidCron { expr: String, reason: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
