use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShareError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("hmac key error: {0}")]
    Hmac(String),
}

pub type Result<T> = std::result::Result<T, ShareError>;
