use std::collections::HashMap;

use crate::error::ErrorCode;
use crate::state::{RunStatus, TaskStatus};

/// Result of executing a task batch.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub run_id: String,

    /// Set when the run was created by resume.
    pub parent_run_id: Option<String>,

    pub status: RunStatus,

    pub total_tasks: usize,

    /// Tasks that succeeded.
    pub completed: usize,

    /// Tasks that did not succeed (failed, timed out, blocked, cancelled).
    pub failed: usize,

    pub duration_ms: u64,

    /// Individual task results (task_id -> TaskResult)
    pub task_results: HashMap<String, TaskResult>,

    pub waves: Vec<Vec<String>>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

/// Result of one task after all its attempts.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task_id: String,

    pub status: TaskStatus,

    /// Backend calls made, primary and fallback alike.
    pub attempts: u32,

    /// Rounds beyond the first.
    pub retries: u32,

    pub duration_ms: u64,

    pub output: Option<String>,

    pub continuation: Option<serde_json::Value>,

    pub error: Option<String>,

    pub error_code: Option<ErrorCode>,
}

impl TaskResult {
    /// Result for a task that never reached a backend.
    pub fn not_attempted(
        task_id: impl Into<String>,
        status: TaskStatus,
        error: impl Into<String>,
        code: ErrorCode,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            status,
            attempts: 0,
            retries: 0,
            duration_ms: 0,
            output: None,
            continuation: None,
            error: Some(error.into()),
            error_code: Some(code),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }
}
