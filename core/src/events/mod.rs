//! Run event model.
//!
//! The engine emits one `RunEvent` per transition. Renderers turn the same
//! events into text or JSONL; `events_out` tees the JSONL form to a file.

mod emitter;
mod jsonl;
mod tap;

pub use emitter::{EventEmitter, EventSink};
pub use jsonl::{JsonlEvent, PROTOCOL_VERSION};
pub use tap::TaskEventTap;

use chrono::Local;
use serde_json::Value;

use crate::error::ErrorCode;
use crate::state::{RunStatus, TaskStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct RunEvent {
    pub ts: String,
    pub run_id: String,
    pub task_id: Option<String>,
    pub kind: EventKind,
}

impl RunEvent {
    pub fn new(run_id: impl Into<String>, task_id: Option<String>, kind: EventKind) -> Self {
        Self {
            ts: Local::now().to_rfc3339(),
            run_id: run_id.into(),
            task_id,
            kind,
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    pub fn to_jsonl(&self) -> JsonlEvent {
        JsonlEvent::from(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    RunStart {
        total_tasks: usize,
        total_waves: usize,
        resumed_from: Option<String>,
    },
    RunEnd {
        status: RunStatus,
        total_tasks: usize,
        completed: usize,
        failed: usize,
        duration_ms: u64,
    },
    TaskStart {
        backend: String,
        attempt: u32,
        fallback: bool,
    },
    TaskEnd {
        status: TaskStatus,
        duration_ms: u64,
        retries: u32,
        attempt: u32,
        /// No further attempt follows for this task.
        is_final: bool,
        error: Option<String>,
    },
    AssistantOutput {
        output: String,
    },
    AssistantAction {
        action: String,
        args: Value,
    },
    ToolCall {
        tool: String,
        args: Value,
    },
    ToolResult {
        tool: String,
        result: Value,
    },
    Warning {
        message: String,
        code: Option<ErrorCode>,
    },
    Error {
        message: String,
        code: ErrorCode,
    },
    Info {
        message: String,
        metadata: Option<Value>,
    },
}

impl EventKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStart { .. } => "run.start",
            Self::RunEnd { .. } => "run.end",
            Self::TaskStart { .. } => "task.start",
            Self::TaskEnd { .. } => "task.end",
            Self::AssistantOutput { .. } => "assistant.output",
            Self::AssistantAction { .. } => "assistant.action",
            Self::ToolCall { .. } => "tool.call",
            Self::ToolResult { .. } => "tool.result",
            Self::Warning { .. } => "warning",
            Self::Error { .. } => "error",
            Self::Info { .. } => "info",
        }
    }
}
