use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{EventKind, RunEvent};

pub const PROTOCOL_VERSION: i32 = 1;

/// Wire form of a `RunEvent`: one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonlEvent {
    pub v: i32,
    #[serde(rename = "type")]
    pub event_type: String,
    pub ts: String,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl JsonlEvent {
    fn base(event: &RunEvent) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            event_type: event.event_type().to_string(),
            ts: event.ts.clone(),
            run_id: event.run_id.clone(),
            task_id: event.task_id.clone(),
            action: None,
            args: None,
            output: None,
            tool: None,
            result: None,
            message: None,
            error_code: None,
            metadata: None,
        }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"v":{},"type":"error","ts":"{}","run_id":"{}","message":"event serialization failed: {}"}}"#,
                PROTOCOL_VERSION, self.ts, self.run_id, e
            )
        })
    }
}

impl From<&RunEvent> for JsonlEvent {
    fn from(event: &RunEvent) -> Self {
        let mut out = Self::base(event);
        match &event.kind {
            EventKind::RunStart {
                total_tasks,
                total_waves,
                resumed_from,
            } => {
                let mut meta = json!({
                    "total_tasks": total_tasks,
                    "total_waves": total_waves,
                });
                if let Some(parent) = resumed_from {
                    meta["resumed_from"] = json!(parent);
                }
                out.metadata = Some(meta);
            }
            EventKind::RunEnd {
                status,
                total_tasks,
                completed,
                failed,
                duration_ms,
            } => {
                out.metadata = Some(json!({
                    "status": status.as_str(),
                    "total_tasks": total_tasks,
                    "completed": completed,
                    "failed": failed,
                    "duration_ms": duration_ms,
                }));
            }
            EventKind::TaskStart {
                backend,
                attempt,
                fallback,
            } => {
                out.metadata = Some(json!({
                    "backend": backend,
                    "attempt": attempt,
                    "fallback": fallback,
                }));
            }
            EventKind::TaskEnd {
                status,
                duration_ms,
                retries,
                attempt,
                is_final,
                error,
            } => {
                out.metadata = Some(json!({
                    "status": status.as_str(),
                    "duration_ms": duration_ms,
                    "retries": retries,
                    "attempt": attempt,
                    "final": is_final,
                }));
                out.message = error.clone();
            }
            EventKind::AssistantOutput { output } => out.output = Some(output.clone()),
            EventKind::AssistantAction { action, args } => {
                out.action = Some(action.clone());
                out.args = Some(args.clone());
            }
            EventKind::ToolCall { tool, args } => {
                out.tool = Some(tool.clone());
                out.args = Some(args.clone());
            }
            EventKind::ToolResult { tool, result } => {
                out.tool = Some(tool.clone());
                out.result = Some(result.clone());
            }
            EventKind::Warning { message, code } => {
                out.message = Some(message.clone());
                out.error_code = code.map(|c| c.as_u16());
            }
            EventKind::Error { message, code } => {
                out.message = Some(message.clone());
                out.error_code = Some(code.as_u16());
            }
            EventKind::Info { message, metadata } => {
                out.message = Some(message.clone());
                out.metadata = metadata.clone();
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::state::TaskStatus;
    use pretty_assertions::assert_eq;

    #[test]
    fn task_end_carries_final_flag() {
        let event = RunEvent::new(
            "r1",
            Some("a".into()),
            EventKind::TaskEnd {
                status: TaskStatus::Failed,
                duration_ms: 12,
                retries: 1,
                attempt: 2,
                is_final: true,
                error: Some("boom".into()),
            },
        );
        let value: Value = serde_json::from_str(&event.to_jsonl().to_line()).unwrap();
        assert_eq!(value["v"], 1);
        assert_eq!(value["type"], "task.end");
        assert_eq!(value["task_id"], "a");
        assert_eq!(value["metadata"]["status"], "failed");
        assert_eq!(value["metadata"]["final"], true);
        assert_eq!(value["message"], "boom");
        assert!(value.get("output").is_none());
    }

    #[test]
    fn run_level_events_have_no_task_id() {
        let event = RunEvent::new(
            "r1",
            None,
            EventKind::RunStart {
                total_tasks: 3,
                total_waves: 2,
                resumed_from: None,
            },
        );
        let value: Value = serde_json::from_str(&event.to_jsonl().to_line()).unwrap();
        assert!(value.get("task_id").is_none());
        assert_eq!(value["metadata"]["total_waves"], 2);
        assert!(value["metadata"].get("resumed_from").is_none());
    }

    #[test]
    fn error_and_warning_codes() {
        let err = RunEvent::new(
            "r1",
            None,
            EventKind::Error {
                message: "cycle".into(),
                code: ErrorCode::CircularDependency,
            },
        )
        .to_jsonl();
        assert_eq!(err.error_code, Some(12));

        let warn = RunEvent::new(
            "r1",
            Some("a".into()),
            EventKind::Warning {
                message: "nothing matched".into(),
                code: Some(ErrorCode::GlobNoMatch),
            },
        )
        .to_jsonl();
        assert_eq!(warn.error_code, Some(66));
        assert_eq!(warn.event_type, "warning");
    }

    #[test]
    fn lines_parse_back() {
        let event = RunEvent::new(
            "r1",
            Some("a".into()),
            EventKind::ToolCall {
                tool: "shell".into(),
                args: json!({"cmd": "ls"}),
            },
        );
        let line = event.to_jsonl().to_line();
        let parsed: JsonlEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, event.to_jsonl());
    }
}
