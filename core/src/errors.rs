/// Error types for the Codeloom workflow core.
use thiserror::Error;

/// Core error type for external service calls (LLM generation and
/// code validation backends).
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Generation backend error: {0}")]
    BackendError(String),

    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Process spawning failed: {0}")]
    ProcessError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("Timeout waiting for response")]
    Timeout,

    #[error("Upstream input missing: {0}")]
    MissingInput(String),
}

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Core error type for checkpoint store operations.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<sqlx::Error> for CheckpointError {
    fn from(e: sqlx::Error) -> Self {
        CheckpointError::DatabaseError(e.to_string())
    }
}

/// Result type for checkpoint operations.
pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// Errors surfaced synchronously to the runner's caller. Everything
/// else is absorbed into workflow state as a FAILED stage.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Run already exists: {0}")]
    RunAlreadyExists(i64),

    #[error("Invalid approval request: {0}")]
    InvalidApproval(String),

    #[error("Invalid workflow topology: {0}")]
    InvalidTopology(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for runner operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;
