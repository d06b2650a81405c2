//! Run, task and attempt records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::{BackendAction, BackendRole};
use crate::error::StoreError;
use crate::stdio::StdioTask;

use super::transitions::TaskTransition;

/// Lifecycle of one task within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Retrying,
    Succeeded,
    Failed,
    TimedOut,
    /// Never attempted because a dependency did not succeed.
    Blocked,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Retrying => "retrying",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::TimedOut | Self::Blocked | Self::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    PartiallyFailed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::PartiallyFailed => "partially_failed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Status of a finished run from its task counts.
    pub fn from_counts(succeeded: usize, total: usize, cancelled: bool) -> Self {
        if cancelled {
            Self::Cancelled
        } else if succeeded == total {
            Self::Completed
        } else if succeeded == 0 {
            Self::Failed
        } else {
            Self::PartiallyFailed
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure,
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendUsed {
    pub role: BackendRole,
    pub name: String,
}

/// One backend call for one task. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionAttempt {
    pub task_id: String,
    /// 1-based, increasing across the whole task.
    pub attempt_number: u32,
    /// 0 for the initial round, n for the n-th retry.
    pub round: u32,
    pub backend_used: BackendUsed,
    pub outcome: AttemptOutcome,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<BackendAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u16>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task: StdioTask,
    pub status: TaskStatus,
    #[serde(default)]
    pub attempts: Vec<ExecutionAttempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn id(&self) -> &str {
        &self.task.id
    }
}

/// Status change plus final output for a single task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub output: Option<String>,
    pub continuation: Option<Value>,
    pub error: Option<String>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_output(mut self, output: Option<String>) -> Self {
        self.output = output;
        self
    }

    pub fn with_continuation(mut self, continuation: Option<Value>) -> Self {
        self.continuation = continuation;
        self
    }

    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = error;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,
    pub status: RunStatus,
    /// Batch order.
    pub tasks: Vec<TaskRecord>,
    #[serde(default)]
    pub waves: Vec<Vec<String>>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    /// New running record with every task pending.
    pub fn new(
        run_id: impl Into<String>,
        parent_run_id: Option<String>,
        tasks: &[StdioTask],
        waves: Vec<Vec<String>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            parent_run_id,
            status: RunStatus::Running,
            tasks: tasks
                .iter()
                .map(|task| TaskRecord {
                    task: task.clone(),
                    status: TaskStatus::Pending,
                    attempts: Vec::new(),
                    output: None,
                    continuation: None,
                    error: None,
                    updated_at: now,
                })
                .collect(),
            waves,
            started_at: now,
            ended_at: None,
        }
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskRecord> {
        self.tasks.iter().find(|t| t.id() == task_id)
    }

    fn task_mut(&mut self, task_id: &str) -> Result<&mut TaskRecord, StoreError> {
        let run_id = self.run_id.clone();
        self.tasks
            .iter_mut()
            .find(|t| t.task.id == task_id)
            .ok_or_else(|| StoreError::TaskNotFound {
                run_id,
                task_id: task_id.to_string(),
            })
    }

    pub fn apply_update(&mut self, task_id: &str, update: TaskUpdate) -> Result<(), StoreError> {
        let record = self.task_mut(task_id)?;
        if let Some(next) = update.status {
            TaskTransition::validate(record.status, next).map_err(|_| {
                StoreError::InvalidTransition {
                    task_id: task_id.to_string(),
                    from: record.status.to_string(),
                    to: next.to_string(),
                }
            })?;
            record.status = next;
        }
        if update.output.is_some() {
            record.output = update.output;
        }
        if update.continuation.is_some() {
            record.continuation = update.continuation;
        }
        if update.error.is_some() {
            record.error = update.error;
        }
        record.updated_at = Utc::now();
        Ok(())
    }

    pub fn push_attempt(&mut self, attempt: ExecutionAttempt) -> Result<(), StoreError> {
        let record = self.task_mut(&attempt.task_id)?;
        record.attempts.push(attempt);
        record.updated_at = Utc::now();
        Ok(())
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.ended_at = Some(Utc::now());
    }

    /// Older than `retention`, measured from the end of the run (or its start
    /// while it never finished).
    pub fn is_expired(&self, retention: Option<Duration>, now: DateTime<Utc>) -> bool {
        match retention {
            Some(retention) => now - self.ended_at.unwrap_or(self.started_at) > retention,
            None => false,
        }
    }

    pub fn summary(&self) -> RunSummary {
        let succeeded = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Succeeded)
            .count();
        RunSummary {
            run_id: self.run_id.clone(),
            parent_run_id: self.parent_run_id.clone(),
            status: self.status,
            total_tasks: self.tasks.len(),
            succeeded,
            failed: self.tasks.len() - succeeded,
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub parent_run_id: Option<String>,
    pub status: RunStatus,
    pub total_tasks: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}
