use crate::events::RunEvent;

/// Turns run events into an output format (text, JSONL, ...).
///
/// `render` is called once per event, in emission order, while the emitter
/// holds its ordering lock; implementations should write whole lines.
pub trait OutputRendererPlugin: Send + Sync {
    fn name(&self) -> &str;
    fn format(&self) -> &str;
    fn supports_streaming(&self) -> bool {
        true
    }
    fn render(&self, event: &RunEvent);
    fn flush(&self) {}
}
