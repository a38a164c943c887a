use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("memory error: {0}")]
    Memory(#[from] bridge_memory::MemoryError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WorkspaceError>;
