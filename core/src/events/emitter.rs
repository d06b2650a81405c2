use std::sync::Arc;
use tokio::sync::Mutex;

use super::{EventKind, RunEvent};
use crate::events_out::EventsOutTx;
use crate::executor::traits::OutputRendererPlugin;

/// Receives every event of a run, after the renderer.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &RunEvent);
}

/// Fans each event out to the renderer, optional sinks and the `events_out` tee.
///
/// Emission is serialized: an event is fully written everywhere before the
/// next one is created, so consumers see one consistent order.
#[derive(Clone)]
pub struct EventEmitter {
    inner: Arc<EmitterInner>,
}

struct EmitterInner {
    run_id: String,
    renderer: Option<Arc<dyn OutputRendererPlugin>>,
    sinks: Vec<Arc<dyn EventSink>>,
    events_out: Option<EventsOutTx>,
    order: Mutex<()>,
}

impl EventEmitter {
    pub fn new(
        run_id: impl Into<String>,
        renderer: Option<Arc<dyn OutputRendererPlugin>>,
        sinks: Vec<Arc<dyn EventSink>>,
        events_out: Option<EventsOutTx>,
    ) -> Self {
        Self {
            inner: Arc::new(EmitterInner {
                run_id: run_id.into(),
                renderer,
                sinks,
                events_out,
                order: Mutex::new(()),
            }),
        }
    }

    /// Emitter that drops everything.
    pub fn silent(run_id: impl Into<String>) -> Self {
        Self::new(run_id, None, Vec::new(), None)
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub async fn emit(&self, task_id: Option<&str>, kind: EventKind) {
        let _order = self.inner.order.lock().await;
        let event = RunEvent::new(
            self.inner.run_id.clone(),
            task_id.map(str::to_string),
            kind,
        );

        if let Some(renderer) = &self.inner.renderer {
            renderer.render(&event);
        }
        for sink in &self.inner.sinks {
            sink.on_event(&event);
        }
        if let Some(out) = &self.inner.events_out {
            out.send_line(event.to_jsonl().to_line()).await;
        }
    }

    pub async fn run_event(&self, kind: EventKind) {
        self.emit(None, kind).await
    }

    pub async fn task_event(&self, task_id: &str, kind: EventKind) {
        self.emit(Some(task_id), kind).await
    }

    pub fn flush(&self) {
        if let Some(renderer) = &self.inner.renderer {
            renderer.flush();
        }
    }
}
