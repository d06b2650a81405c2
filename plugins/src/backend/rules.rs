use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};

use taskmux_core::api::{
    Backend, BackendAction, BackendError, BackendOutput, BackendRequest, RulesConfig,
};

pub const RULES_BACKEND_NAME: &str = "rules";

struct Rule {
    pattern: Regex,
    output: String,
    action: Option<String>,
    fail: bool,
}

/// Deterministic in-process backend, the default fallback.
///
/// Configured rules are regexes over the task content; the first match
/// produces the output. Without a match the backend acknowledges the task
/// so a fallback attempt always has something to return.
pub struct RulesBackend {
    rules: Vec<Rule>,
}

impl RulesBackend {
    pub fn new(cfg: &RulesConfig) -> anyhow::Result<Self> {
        let rules = cfg
            .rules
            .iter()
            .map(|r| {
                let pattern = Regex::new(&r.pattern)
                    .with_context(|| format!("invalid rule pattern '{}'", r.pattern))?;
                Ok(Rule {
                    pattern,
                    output: r.output.clone(),
                    action: r.action.clone(),
                    fail: r.fail,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    fn apply(&self, request: &BackendRequest) -> Result<BackendOutput, BackendError> {
        for rule in &self.rules {
            let Some(caps) = rule.pattern.captures(&request.content) else {
                continue;
            };
            let mut text = String::new();
            caps.expand(&rule.output, &mut text);
            if rule.fail {
                return Err(BackendError::Failed(text));
            }

            let mut out = BackendOutput::text(text);
            if let Some(action) = &rule.action {
                let mut args = Map::new();
                for name in rule.pattern.capture_names().flatten() {
                    if let Some(m) = caps.name(name) {
                        args.insert(name.to_string(), Value::String(m.as_str().to_string()));
                    }
                }
                out = out.with_action(BackendAction::new(action.clone(), Value::Object(args)));
            }
            return Ok(out);
        }
        Ok(BackendOutput::text(acknowledge(request)))
    }
}

fn acknowledge(request: &BackendRequest) -> String {
    format!(
        "task '{}' acknowledged by rules backend: {} chars of content, {} file(s), {} dependency output(s)",
        request.task_id,
        request.content.chars().count(),
        request.files.len(),
        request.dependency_outputs.len()
    )
}

#[async_trait]
impl Backend for RulesBackend {
    fn name(&self) -> &str {
        RULES_BACKEND_NAME
    }

    async fn execute(&self, request: &BackendRequest) -> Result<BackendOutput, BackendError> {
        if request.cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        self.apply(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use taskmux_core::api::{DependencyOutput, RuleConfig, TaskEventTap};
    use tokio_util::sync::CancellationToken;

    fn request(content: &str) -> BackendRequest {
        BackendRequest {
            run_id: "r".into(),
            task_id: "t1".into(),
            content: content.into(),
            files: vec![],
            dependency_outputs: vec![],
            model: None,
            model_provider: None,
            workdir: std::env::temp_dir(),
            attempt: 1,
            cancel: CancellationToken::new(),
            events: TaskEventTap::detached("t1"),
        }
    }

    fn rule(pattern: &str, output: &str, action: Option<&str>, fail: bool) -> RuleConfig {
        RuleConfig {
            pattern: pattern.into(),
            output: output.into(),
            action: action.map(String::from),
            fail,
        }
    }

    #[tokio::test]
    async fn unmatched_content_is_acknowledged() {
        let backend = RulesBackend::empty();
        let mut req = request("hello");
        req.dependency_outputs.push(DependencyOutput {
            task_id: "a".into(),
            output: "x".into(),
            continuation: None,
            from_prior_run: false,
        });
        let out = backend.execute(&req).await.unwrap();
        assert_eq!(
            out.output,
            "task 't1' acknowledged by rules backend: 5 chars of content, 0 file(s), 1 dependency output(s)"
        );
    }

    #[tokio::test]
    async fn first_matching_rule_wins_and_expands_captures() {
        let backend = RulesBackend::new(&RulesConfig {
            rules: vec![
                rule(r"^write (?P<path>\S+)", "writing ${path}", Some("write_file"), false),
                rule(r"write", "never", None, false),
            ],
        })
        .unwrap();
        let out = backend.execute(&request("write src/lib.rs")).await.unwrap();
        assert_eq!(out.output, "writing src/lib.rs");
        assert_eq!(
            out.actions,
            vec![BackendAction::new("write_file", json!({"path": "src/lib.rs"}))]
        );
    }

    #[tokio::test]
    async fn failing_rule_returns_error() {
        let backend = RulesBackend::new(&RulesConfig {
            rules: vec![rule("forbidden", "refused", None, true)],
        })
        .unwrap();
        let err = backend.execute(&request("a forbidden task")).await.unwrap_err();
        assert_eq!(err, BackendError::Failed("refused".into()));
    }

    #[test]
    fn bad_pattern_is_rejected() {
        let err = RulesBackend::new(&RulesConfig {
            rules: vec![rule("(", "", None, false)],
        })
        .err()
        .unwrap();
        assert!(err.to_string().contains("invalid rule pattern"));
    }
}
