use thiserror::Error;

/// Stable protocol error codes carried by `error` / `warning` events and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    Success = 0,
    GeneralError = 1,
    ParseError = 2,
    ValidationError = 3,
    TaskNotFound = 10,
    DependencyError = 11,
    CircularDependency = 12,
    RunNotFound = 13,
    RunExpired = 14,
    BackendError = 20,
    BackendUnavailable = 21,
    Timeout = 30,
    Cancelled = 31,
    NetworkError = 40,
    FileNotFound = 60,
    FileAccessDenied = 61,
    FileTooLarge = 62,
    TooManyFiles = 63,
    InvalidPath = 64,
    PathTraversal = 65,
    GlobNoMatch = 66,
    EncodingError = 67,
    StoreError = 70,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Process exit code for a run aborted by this error.
    pub fn exit_code(self) -> i32 {
        self.as_u16() as i32
    }
}

/// Parse, validation and file-context errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StdioError {
    #[error("no task blocks found")]
    NoTasks,

    #[error("task block {block}: metadata missing required field '{field}'")]
    MissingField { block: usize, field: &'static str },

    #[error("line {line}: metadata line is invalid: {text}")]
    InvalidMetadataLine { line: usize, text: String },

    #[error("line {0}: missing ---CONTENT--- marker")]
    MissingContentMarker(usize),

    #[error("line {0}: missing ---END--- marker")]
    MissingEndMarker(usize),

    #[error("invalid task id: {0}")]
    InvalidId(String),

    #[error("duplicate task id: {0}")]
    DuplicateId(String),

    #[error("unknown dependency '{dep}' on task '{task}'")]
    UnknownDependency { task: String, dep: String },

    #[error("invalid number for {field}: {value}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("file access denied: {0}")]
    FileAccessDenied(String),

    #[error("file too large: {0} bytes (limit: {1} bytes)")]
    FileTooLarge(u64, u64),

    #[error("too many files: {0} files (limit: {1})")]
    TooManyFiles(usize, usize),

    #[error("invalid file path: {0}")]
    InvalidPath(String),

    #[error("path traversal detected: {0}")]
    PathTraversal(String),

    #[error("glob pattern matched no files: {0}")]
    GlobNoMatch(String),

    #[error("file encoding error: {0}")]
    EncodingError(String),

    #[error("{} errors: {}", .0.len(), join_errors(.0))]
    Batch(Vec<StdioError>),
}

impl StdioError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NoTasks => ErrorCode::ParseError,
            Self::MissingField { .. } => ErrorCode::ParseError,
            Self::InvalidMetadataLine { .. } => ErrorCode::ParseError,
            Self::MissingContentMarker(_) => ErrorCode::ParseError,
            Self::MissingEndMarker(_) => ErrorCode::ParseError,
            Self::InvalidId(_) => ErrorCode::ValidationError,
            Self::DuplicateId(_) => ErrorCode::ValidationError,
            Self::UnknownDependency { .. } => ErrorCode::DependencyError,
            Self::InvalidNumber { .. } => ErrorCode::ValidationError,
            Self::InvalidValue { .. } => ErrorCode::ValidationError,
            Self::FileNotFound(_) => ErrorCode::FileNotFound,
            Self::FileAccessDenied(_) => ErrorCode::FileAccessDenied,
            Self::FileTooLarge(_, _) => ErrorCode::FileTooLarge,
            Self::TooManyFiles(_, _) => ErrorCode::TooManyFiles,
            Self::InvalidPath(_) => ErrorCode::InvalidPath,
            Self::PathTraversal(_) => ErrorCode::PathTraversal,
            Self::GlobNoMatch(_) => ErrorCode::GlobNoMatch,
            Self::EncodingError(_) => ErrorCode::EncodingError,
            Self::Batch(errors) => errors
                .first()
                .map(StdioError::error_code)
                .unwrap_or(ErrorCode::ValidationError),
        }
    }

    /// Collapses collected errors: one stays as-is, several become `Batch`.
    pub fn from_collected(mut errors: Vec<StdioError>) -> Option<StdioError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Batch(errors)),
        }
    }

    /// Flattened view of the individual errors.
    pub fn errors(&self) -> Vec<&StdioError> {
        match self {
            Self::Batch(errors) => errors.iter().collect(),
            other => vec![other],
        }
    }
}

fn join_errors(errors: &[StdioError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collected_single_error_is_unwrapped() {
        let err = StdioError::from_collected(vec![StdioError::DuplicateId("a".into())]);
        assert_eq!(err, Some(StdioError::DuplicateId("a".into())));
        assert_eq!(StdioError::from_collected(vec![]), None);
    }

    #[test]
    fn batch_reports_every_message_and_first_code() {
        let err = StdioError::from_collected(vec![
            StdioError::UnknownDependency {
                task: "a".into(),
                dep: "zz".into(),
            },
            StdioError::InvalidId("1bad".into()),
        ])
        .unwrap();
        let text = err.to_string();
        assert!(text.starts_with("2 errors"));
        assert!(text.contains("zz"));
        assert!(text.contains("1bad"));
        assert_eq!(err.error_code(), ErrorCode::DependencyError);
        assert_eq!(err.errors().len(), 2);
    }
}
