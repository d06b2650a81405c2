//! Task descriptor parser trait
//!
//! Defines the abstraction for parsing task-block input into tasks, plus the
//! validation report returned by `validate_format`.

use std::collections::HashSet;

use crate::error::stdio::{ErrorCode, StdioError};
use crate::stdio::types::StdioTask;

/// Task descriptor parser.
///
/// Implementations must be thread-safe (Send + Sync) to support concurrent parsing.
pub trait StdioProtocolParser: Send + Sync {
    /// Returns the parser name (e.g., "standard")
    fn name(&self) -> &str;

    /// Parses input string into a list of tasks
    ///
    /// # Errors
    ///
    /// Structural problems (missing markers, malformed metadata) abort with
    /// the first error. Field and batch validation problems are collected and
    /// returned together as `StdioError::Batch` when there is more than one.
    fn parse_tasks(&self, input: &str) -> Result<Vec<StdioTask>, StdioError> {
        self.parse_tasks_with(input, &ParseContext::default())
    }

    /// Same as `parse_tasks`, with ids already known from a prior run.
    fn parse_tasks_with(
        &self,
        input: &str,
        ctx: &ParseContext,
    ) -> Result<Vec<StdioTask>, StdioError>;

    /// Validates input format without executing anything.
    fn validate_format(&self, input: &str) -> FormatValidation;

    /// Returns a format identifier for auto-detection
    fn format_identifier(&self) -> &str;
}

/// Ids that dependencies may reference without being part of the batch.
#[derive(Debug, Clone, Default)]
pub struct ParseContext {
    pub known_ids: HashSet<String>,
}

impl ParseContext {
    pub fn with_known_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known_ids: ids.into_iter().map(Into::into).collect(),
        }
    }
}

/// One finding of `validate_format`.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatIssue {
    /// 1-indexed line, `None` when the finding is about the whole input.
    pub line: Option<usize>,
    pub code: ErrorCode,
    pub message: String,
}

impl FormatIssue {
    pub fn new(line: Option<usize>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            line,
            code,
            message: message.into(),
        }
    }

    pub fn from_error(line: Option<usize>, err: &StdioError) -> Self {
        Self::new(line, err.error_code(), err.to_string())
    }
}

/// Format validation result
///
/// Hard errors prevent parsing; warnings are style issues.
#[derive(Debug, Clone, Default)]
pub struct FormatValidation {
    pub task_count: usize,
    pub errors: Vec<FormatIssue>,
    pub warnings: Vec<FormatIssue>,
}

impl FormatValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}
