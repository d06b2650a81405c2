use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{EventEmitter, EventKind};

/// Per-attempt event handle given to a backend.
///
/// Once the attempt ends the engine closes the tap; anything a backend emits
/// afterwards is dropped, so no backend event can trail the attempt's
/// `task.end`.
#[derive(Clone)]
pub struct TaskEventTap {
    inner: Arc<TapInner>,
}

struct TapInner {
    emitter: Option<EventEmitter>,
    task_id: String,
    open: Mutex<bool>,
    outputs: AtomicUsize,
}

impl TaskEventTap {
    pub fn new(emitter: EventEmitter, task_id: impl Into<String>) -> Self {
        Self::build(Some(emitter), task_id.into())
    }

    /// Tap connected to nothing, for calling backends outside an engine.
    pub fn detached(task_id: impl Into<String>) -> Self {
        Self::build(None, task_id.into())
    }

    fn build(emitter: Option<EventEmitter>, task_id: String) -> Self {
        Self {
            inner: Arc::new(TapInner {
                emitter,
                task_id,
                open: Mutex::new(true),
                outputs: AtomicUsize::new(0),
            }),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.inner.task_id
    }

    async fn send(&self, kind: EventKind) -> bool {
        let open = self.inner.open.lock().await;
        if !*open {
            tracing::debug!(task_id = %self.inner.task_id, "dropping event from closed tap");
            return false;
        }
        if let Some(emitter) = &self.inner.emitter {
            emitter.task_event(&self.inner.task_id, kind).await;
        }
        true
    }

    /// Streams a chunk of backend output as `assistant.output`.
    pub async fn output(&self, text: impl Into<String>) {
        if self
            .send(EventKind::AssistantOutput {
                output: text.into(),
            })
            .await
        {
            self.inner.outputs.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub async fn tool_call(&self, tool: impl Into<String>, args: Value) {
        self.send(EventKind::ToolCall {
            tool: tool.into(),
            args,
        })
        .await;
    }

    pub async fn tool_result(&self, tool: impl Into<String>, result: Value) {
        self.send(EventKind::ToolResult {
            tool: tool.into(),
            result,
        })
        .await;
    }

    pub async fn info(&self, message: impl Into<String>) {
        self.send(EventKind::Info {
            message: message.into(),
            metadata: None,
        })
        .await;
    }

    /// Number of `assistant.output` events that went through.
    pub fn streamed_outputs(&self) -> usize {
        self.inner.outputs.load(Ordering::Relaxed)
    }

    /// Waits for any in-flight emission, then shuts the tap.
    pub async fn close(&self) {
        *self.inner.open.lock().await = false;
    }

    pub async fn is_open(&self) -> bool {
        *self.inner.open.lock().await
    }
}
