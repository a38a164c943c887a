use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid date (expected YYYY-MM-DD): {0}")]
    InvalidDate(String),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
