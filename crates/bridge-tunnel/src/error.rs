use thiserror::Error;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("download error: {0}")]
    Download(#[from] reqwest::Error),

    #[error("cloudflared failed to start within {0:?}")]
    StartTimeout(std::time::Duration),

    #[error("cloudflared exited before a URL was found")]
    NoUrl,
}

pub type Result<T> = std::result::Result<T, TunnelError>;
