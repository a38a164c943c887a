use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("job not found: {id}")]
    JobNotFound { id: String },

    #[error("job {id} is system-managed and cannot be removed")]
    SystemJobProtected { id: String },

    #[error("no window available for workspace")]
    NoWindow,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
