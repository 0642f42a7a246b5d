// Gateway error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("No step awaiting approval")]
    NoPendingApproval,

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
