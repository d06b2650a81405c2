use std::io::Write;
use taskmux_core::events::RunEvent;
use taskmux_core::executor::traits::OutputRendererPlugin;

use super::LineWriter;

/// One JSON object per event, written as soon as the event is emitted.
pub struct JsonlRendererPlugin {
    out: LineWriter,
}

impl JsonlRendererPlugin {
    pub fn new() -> Self {
        Self {
            out: LineWriter::stdout(),
        }
    }

    pub fn with_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            out: LineWriter::new(writer),
        }
    }
}

impl Default for JsonlRendererPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputRendererPlugin for JsonlRendererPlugin {
    fn name(&self) -> &str {
        "jsonl-renderer"
    }

    fn format(&self) -> &str {
        "jsonl"
    }

    fn render(&self, event: &RunEvent) {
        self.out.write_line(&event.to_jsonl().to_line());
        // Consumers read the stream live.
        self.out.flush();
    }

    fn flush(&self) {
        self.out.flush();
    }
}
