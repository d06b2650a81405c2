#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use taskmux_core::api::{
    Backend, BackendError, BackendOutput, BackendRegistry, BackendRequest, EventKind, EventSink,
    ExecutionConfig, ExecutionEngine, FallbackConfig, InMemoryRunStore, RunEvent, RunStoreHandle,
};

/// What a scripted backend does for one task.
#[derive(Clone)]
pub enum Script {
    Succeed(String),
    Fail(String),
    /// Fails the first n calls, then succeeds.
    FailTimes(usize),
    /// Never answers; ends only when the attempt is cancelled.
    Hang,
}

/// In-memory backend with a fixed outcome per task id.
pub struct ScriptedBackend {
    name: String,
    scripts: HashMap<String, Script>,
    default: Script,
    delay: Duration,
    calls: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedBackend {
    pub fn succeeding(name: &str) -> Self {
        Self::with_default(name, Script::Succeed(String::new()))
    }

    pub fn failing(name: &str) -> Self {
        Self::with_default(name, Script::Fail(format!("{name} is down")))
    }

    pub fn with_default(name: &str, default: Script) -> Self {
        Self {
            name: name.to_string(),
            scripts: HashMap::new(),
            default,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn script(mut self, task_id: &str, script: Script) -> Self {
        self.scripts.insert(task_id.to_string(), script);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Task ids in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, task_id: &str) -> usize {
        self.calls().iter().filter(|id| *id == task_id).count()
    }

    /// Highest number of overlapping calls seen.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, request: &BackendRequest) -> Result<BackendOutput, BackendError> {
        let previous = {
            let mut calls = self.calls.lock().unwrap();
            let previous = calls.iter().filter(|id| **id == request.task_id).count();
            calls.push(request.task_id.clone());
            previous
        };
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let script = self
            .scripts
            .get(&request.task_id)
            .unwrap_or(&self.default)
            .clone();
        match script {
            Script::Succeed(text) if text.is_empty() => {
                Ok(BackendOutput::text(format!("{} done by {}", request.task_id, self.name)))
            }
            Script::Succeed(text) => Ok(BackendOutput::text(text)),
            Script::Fail(message) => Err(BackendError::Failed(message)),
            Script::FailTimes(n) if previous < n => {
                Err(BackendError::Failed(format!("transient failure {}", previous + 1)))
            }
            Script::FailTimes(_) => Ok(BackendOutput::text("recovered")),
            Script::Hang => {
                request.cancel.cancelled().await;
                Err(BackendError::Cancelled)
            }
        }
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<RunEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn types(&self) -> Vec<&'static str> {
        self.events().iter().map(RunEvent::event_type).collect()
    }

    /// Position of the first event matching `pred`.
    pub fn position(&self, pred: impl Fn(&RunEvent) -> bool) -> Option<usize> {
        self.events().iter().position(pred)
    }

    pub fn task_events(&self, task_id: &str) -> Vec<RunEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.task_id.as_deref() == Some(task_id))
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn on_event(&self, event: &RunEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

pub fn is_task_start(event: &RunEvent, task_id: &str) -> bool {
    event.task_id.as_deref() == Some(task_id) && matches!(event.kind, EventKind::TaskStart { .. })
}

pub fn is_final_task_end(event: &RunEvent, task_id: &str) -> bool {
    event.task_id.as_deref() == Some(task_id)
        && matches!(event.kind, EventKind::TaskEnd { is_final: true, .. })
}

pub struct Harness {
    pub engine: ExecutionEngine,
    pub sink: Arc<RecordingSink>,
    pub store: RunStoreHandle,
}

/// Engine over `backends` with no retry delay and an optional default fallback.
pub fn harness(
    backends: Vec<Arc<ScriptedBackend>>,
    fallback: Option<&str>,
    store: Option<RunStoreHandle>,
) -> Harness {
    let store = store.unwrap_or_else(|| Arc::new(InMemoryRunStore::new()));
    let mut registry = BackendRegistry::new();
    for backend in backends {
        registry.register(backend);
    }
    let config = ExecutionConfig {
        fallback: FallbackConfig {
            default_backend: fallback.map(String::from),
            ..FallbackConfig::default()
        },
        ..ExecutionConfig::default()
    };
    let sink = Arc::new(RecordingSink::default());
    let engine = ExecutionEngine::builder(registry, store.clone())
        .config(config)
        .sink(sink.clone())
        .build();
    Harness {
        engine,
        sink,
        store,
    }
}
