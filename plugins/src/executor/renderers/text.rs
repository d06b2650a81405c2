use serde_json::Value;
use std::io::Write;
use taskmux_core::events::{EventKind, RunEvent};
use taskmux_core::executor::traits::OutputRendererPlugin;
use taskmux_core::state::{RunStatus, TaskStatus};

use super::LineWriter;

#[derive(Debug, Clone)]
pub struct TextMarkers {
    pub start: &'static str,
    pub ok: &'static str,
    pub fail: &'static str,
    pub retry: &'static str,
    pub wait: &'static str,
    pub action: &'static str,
    pub warn: &'static str,
    pub info: &'static str,
}

impl TextMarkers {
    pub fn unicode() -> Self {
        Self {
            start: "▶",
            ok: "✓",
            fail: "✗",
            retry: "⟳",
            wait: "⏸",
            action: "»",
            warn: "⚠",
            info: "·",
        }
    }

    pub fn ascii() -> Self {
        Self {
            start: ">",
            ok: "[OK]",
            fail: "[FAIL]",
            retry: "[RETRY]",
            wait: "[WAIT]",
            action: ">>",
            warn: "[WARN]",
            info: "-",
        }
    }
}

/// Human-readable rendering with status glyphs.
pub struct TextRendererPlugin {
    markers: TextMarkers,
    show_output: bool,
    out: LineWriter,
}

impl TextRendererPlugin {
    pub fn new(ascii_only: bool, show_output: bool) -> Self {
        Self::with_writer(ascii_only, show_output, Box::new(std::io::stdout()))
    }

    pub fn with_writer(ascii_only: bool, show_output: bool, writer: Box<dyn Write + Send>) -> Self {
        Self {
            markers: if ascii_only {
                TextMarkers::ascii()
            } else {
                TextMarkers::unicode()
            },
            show_output,
            out: LineWriter::new(writer),
        }
    }

    fn format_event(&self, event: &RunEvent) -> Option<String> {
        let m = &self.markers;
        let task = event.task_id.as_deref().unwrap_or("-");
        let line = match &event.kind {
            EventKind::RunStart {
                total_tasks,
                total_waves,
                resumed_from,
            } => {
                let mut line = format!(
                    "{} run {} ({} tasks, {} waves)",
                    m.start, event.run_id, total_tasks, total_waves
                );
                if let Some(parent) = resumed_from {
                    line.push_str(&format!(" resumed from {parent}"));
                }
                line
            }
            EventKind::RunEnd {
                status,
                total_tasks,
                completed,
                failed,
                duration_ms,
            } => {
                let marker = if *status == RunStatus::Completed {
                    m.ok
                } else {
                    m.fail
                };
                format!(
                    "{marker} run {} {status}: {completed}/{total_tasks} succeeded, {failed} failed ({duration_ms}ms)",
                    event.run_id
                )
            }
            EventKind::TaskStart {
                backend,
                attempt,
                fallback,
            } => {
                let role = if *fallback { " fallback" } else { "" };
                format!("{} {task} [{backend}{role}] attempt {attempt}", m.start)
            }
            EventKind::TaskEnd {
                status,
                duration_ms,
                attempt,
                is_final,
                error,
                ..
            } => {
                let detail = error
                    .as_deref()
                    .map(|e| format!(": {e}"))
                    .unwrap_or_default();
                match status {
                    TaskStatus::Succeeded => format!("{} {task} succeeded ({duration_ms}ms)", m.ok),
                    TaskStatus::Blocked => format!("{} {task} blocked{detail}", m.wait),
                    _ if !is_final => {
                        format!("{} {task} attempt {attempt} {status}{detail}", m.retry)
                    }
                    _ => format!("{} {task} {status} ({duration_ms}ms){detail}", m.fail),
                }
            }
            EventKind::AssistantOutput { output } => {
                if !self.show_output {
                    return None;
                }
                output
                    .lines()
                    .map(|l| format!("  {l}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            EventKind::AssistantAction { action, args } => {
                format!("{} {task} {action}{}", m.action, compact(args))
            }
            EventKind::ToolCall { tool, args } => {
                format!("{} {task} {tool}{}", m.action, compact(args))
            }
            EventKind::ToolResult { tool, result } => {
                if !self.show_output {
                    return None;
                }
                format!("{} {task} {tool} ->{}", m.action, compact(result))
            }
            EventKind::Warning { message, .. } => format!("{} {message}", m.warn),
            EventKind::Error { message, code } => {
                format!("{} error {}: {message}", m.fail, code.as_u16())
            }
            EventKind::Info { message, metadata } => {
                let mut line = format!("{} {message}", m.info);
                if let Some(waves) = metadata
                    .as_ref()
                    .and_then(|meta| meta.get("waves"))
                    .and_then(Value::as_array)
                {
                    for (idx, wave) in waves.iter().enumerate() {
                        let ids: Vec<&str> = wave
                            .as_array()
                            .map(|ids| ids.iter().filter_map(Value::as_str).collect())
                            .unwrap_or_default();
                        line.push_str(&format!("\n  wave {}: {}", idx + 1, ids.join(", ")));
                    }
                }
                line
            }
        };
        Some(line)
    }
}

fn compact(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Object(map) if map.is_empty() => String::new(),
        other => format!(" {other}"),
    }
}

impl OutputRendererPlugin for TextRendererPlugin {
    fn name(&self) -> &str {
        "text-renderer"
    }

    fn format(&self) -> &str {
        "text"
    }

    fn render(&self, event: &RunEvent) {
        if let Some(line) = self.format_event(event) {
            self.out.write_line(&line);
        }
    }

    fn flush(&self) {
        self.out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::SharedBuf;
    use super::*;
    use serde_json::json;
    use taskmux_core::error::ErrorCode;

    fn event(task: Option<&str>, kind: EventKind) -> RunEvent {
        RunEvent::new("run-1", task.map(str::to_string), kind)
    }

    fn task_end(status: TaskStatus, is_final: bool, error: Option<&str>) -> EventKind {
        EventKind::TaskEnd {
            status,
            duration_ms: 5,
            retries: 0,
            attempt: 1,
            is_final,
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn ascii_markers_for_task_outcomes() {
        let r = TextRendererPlugin::with_writer(true, true, Box::new(SharedBuf::default()));
        assert_eq!(
            r.format_event(&event(Some("a"), task_end(TaskStatus::Succeeded, true, None))).unwrap(),
            "[OK] a succeeded (5ms)"
        );
        assert_eq!(
            r.format_event(&event(Some("a"), task_end(TaskStatus::Failed, false, Some("boom"))))
                .unwrap(),
            "[RETRY] a attempt 1 failed: boom"
        );
        assert_eq!(
            r.format_event(&event(Some("a"), task_end(TaskStatus::TimedOut, true, None))).unwrap(),
            "[FAIL] a timed_out (5ms)"
        );
        assert_eq!(
            r.format_event(&event(
                Some("b"),
                task_end(TaskStatus::Blocked, true, Some("dependency 'a' did not succeed"))
            ))
            .unwrap(),
            "[WAIT] b blocked: dependency 'a' did not succeed"
        );
    }

    #[test]
    fn plan_lists_waves() {
        let r = TextRendererPlugin::with_writer(false, true, Box::new(SharedBuf::default()));
        let line = r
            .format_event(&event(
                None,
                EventKind::Info {
                    message: "execution plan".into(),
                    metadata: Some(json!({"waves": [["a", "b"], ["c"]]})),
                },
            ))
            .unwrap();
        assert_eq!(line, "· execution plan\n  wave 1: a, b\n  wave 2: c");
    }

    #[test]
    fn quiet_mode_hides_output_only() {
        let buf = SharedBuf::default();
        let r = TextRendererPlugin::with_writer(true, false, Box::new(buf.clone()));
        r.render(&event(Some("a"), EventKind::AssistantOutput { output: "hello".into() }));
        r.render(&event(
            None,
            EventKind::Error {
                message: "bad".into(),
                code: ErrorCode::CircularDependency,
            },
        ));
        assert_eq!(buf.lines(), vec!["[FAIL] error 12: bad"]);
    }
}
