mod jsonl;
mod text;

pub use jsonl::JsonlRendererPlugin;
pub use text::{TextMarkers, TextRendererPlugin};

use std::io::Write;
use std::sync::Mutex;

/// Line sink shared by the renderers; stdout unless a writer is injected.
pub(crate) struct LineWriter {
    inner: Mutex<Box<dyn Write + Send>>,
}

impl LineWriter {
    pub(crate) fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    pub(crate) fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            inner: Mutex::new(writer),
        }
    }

    pub(crate) fn write_line(&self, line: &str) {
        let mut out = match self.inner.lock() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        };
        // A closed stdout (e.g. `| head`) must not abort the run.
        let _ = writeln!(out, "{line}");
    }

    pub(crate) fn flush(&self) {
        let mut out = match self.inner.lock() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        };
        let _ = out.flush();
    }
}
