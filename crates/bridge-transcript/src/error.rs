use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("transcript io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed transcript entry: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, TranscriptError>;
