use thiserror::Error;

use super::stdio::ErrorCode;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("run expired: {0}")]
    RunExpired(String),

    #[error("run already exists: {0}")]
    RunExists(String),

    #[error("task '{task_id}' not found in run '{run_id}'")]
    TaskNotFound { run_id: String, task_id: String },

    #[error("invalid run id: {0}")]
    InvalidRunId(String),

    #[error("invalid transition for task '{task_id}': {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: String,
        to: String,
    },

    #[error("store io error: {0}")]
    Io(String),

    #[error("store serialization error: {0}")]
    Serde(String),
}

impl StoreError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::RunNotFound(_) => ErrorCode::RunNotFound,
            Self::RunExpired(_) => ErrorCode::RunExpired,
            Self::RunExists(_) | Self::InvalidRunId(_) => ErrorCode::ValidationError,
            Self::TaskNotFound { .. } => ErrorCode::TaskNotFound,
            Self::InvalidTransition { .. } | Self::Io(_) | Self::Serde(_) => ErrorCode::StoreError,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serde(e.to_string())
    }
}
