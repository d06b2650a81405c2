use thiserror::Error;

use super::stdio::{ErrorCode, StdioError};
use super::store::StoreError;

/// Errors raised while building the task graph or driving a run.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Duplicate task ID: {0}")]
    DuplicateTaskId(String),

    #[error("Dependency not found: task '{task_id}' depends on '{missing_dep}'")]
    DependencyNotFound {
        task_id: String,
        missing_dep: String,
    },

    #[error("Circular dependency detected: {}", render_cycle(.0))]
    CircularDependency(Vec<String>),

    #[error("STDIO error: {0}")]
    Stdio(#[from] StdioError),

    #[error("Run store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExecutorError {
    /// Map executor error to protocol error code
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::DuplicateTaskId(_) => ErrorCode::ValidationError,
            Self::DependencyNotFound { .. } => ErrorCode::DependencyError,
            Self::CircularDependency(_) => ErrorCode::CircularDependency,
            Self::Stdio(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
            Self::Config(_) => ErrorCode::ValidationError,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::Internal(_) => ErrorCode::GeneralError,
        }
    }
}

/// `[x, y]` renders as `x -> y -> x`.
fn render_cycle(cycle: &[String]) -> String {
    match cycle.first() {
        Some(first) => {
            let mut parts: Vec<&str> = cycle.iter().map(String::as_str).collect();
            parts.push(first);
            parts.join(" -> ")
        }
        None => "<empty>".to_string(),
    }
}
