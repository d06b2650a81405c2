//! Backend capability: the one interface every execution backend implements.

mod prompt;
mod registry;

pub use prompt::{compose_prompt, DependencyOutput};
pub use registry::{BackendRegistry, BackendResolver, ChainLink, FallbackChain};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::BackendError;
use crate::events::TaskEventTap;
use crate::stdio::ResolvedFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendRole {
    Primary,
    Fallback,
}

impl BackendRole {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendRole::Primary => "primary",
            BackendRole::Fallback => "fallback",
        }
    }
}

/// Opaque action returned by a backend. Recorded and emitted, never interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendAction {
    pub action: String,
    #[serde(default)]
    pub args: Value,
}

impl BackendAction {
    pub fn new(action: impl Into<String>, args: Value) -> Self {
        Self {
            action: action.into(),
            args,
        }
    }
}

/// Everything a backend gets for one attempt.
#[derive(Clone)]
pub struct BackendRequest {
    pub run_id: String,
    pub task_id: String,
    pub content: String,
    pub files: Vec<ResolvedFile>,
    pub dependency_outputs: Vec<DependencyOutput>,
    pub model: Option<String>,
    pub model_provider: Option<String>,
    pub workdir: PathBuf,
    /// 1-based attempt number across the task.
    pub attempt: u32,
    /// Fires on timeout or run cancellation.
    pub cancel: CancellationToken,
    pub events: TaskEventTap,
}

impl BackendRequest {
    /// Content, dependency outputs and files rendered as one prompt.
    pub fn prompt(&self) -> String {
        compose_prompt(&self.content, &self.dependency_outputs, &self.files)
    }
}

impl std::fmt::Debug for BackendRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRequest")
            .field("run_id", &self.run_id)
            .field("task_id", &self.task_id)
            .field("files", &self.files.len())
            .field("dependency_outputs", &self.dependency_outputs.len())
            .field("model", &self.model)
            .field("workdir", &self.workdir)
            .field("attempt", &self.attempt)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendOutput {
    pub output: String,
    #[serde(default)]
    pub actions: Vec<BackendAction>,
    /// Opaque state handed to dependents and to resumed runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation: Option<Value>,
}

impl BackendOutput {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Self::default()
        }
    }

    pub fn with_action(mut self, action: BackendAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_continuation(mut self, continuation: Value) -> Self {
        self.continuation = Some(continuation);
        self
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    /// Runs one attempt. Implementations should watch `request.cancel` and
    /// return `BackendError::Cancelled` promptly once it fires.
    async fn execute(&self, request: &BackendRequest) -> Result<BackendOutput, BackendError>;
}

pub type BackendHandle = Arc<dyn Backend>;
