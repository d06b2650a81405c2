use thiserror::Error;

use super::executor::ExecutorError;
use super::stdio::ErrorCode;
use super::store::StoreError;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("executor failed: {0}")]
    Executor(#[from] ExecutorError),
    #[error("run store: {0}")]
    Store(#[from] StoreError),
    #[error("command failed: {0}")]
    Command(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl CliError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Executor(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
            Self::Config(_) => ErrorCode::ValidationError,
            Self::Command(_) | Self::Io(_) | Self::Anyhow(_) => ErrorCode::GeneralError,
        }
    }
}

/// Failure of a single backend attempt.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("backend failed: {0}")]
    Failed(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
    #[error("attempt cancelled")]
    Cancelled,
}

impl BackendError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Unavailable(_) => ErrorCode::BackendUnavailable,
            Self::Network(_) => ErrorCode::NetworkError,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::Spawn(_) | Self::Failed(_) | Self::InvalidResponse(_) => ErrorCode::BackendError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_codes() {
        assert_eq!(
            BackendError::Unavailable("x".into()).error_code().as_u16(),
            21
        );
        assert_eq!(BackendError::Network("x".into()).error_code().as_u16(), 40);
        assert_eq!(BackendError::Cancelled.error_code().as_u16(), 31);
        assert_eq!(BackendError::Spawn("x".into()).error_code().as_u16(), 20);
    }

    #[test]
    fn cli_error_delegates_code() {
        let err = CliError::Store(StoreError::RunNotFound("r1".into()));
        assert_eq!(err.error_code(), ErrorCode::RunNotFound);
    }
}
