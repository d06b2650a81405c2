use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use taskmux_core::api::{
    AiServiceConfig, Backend, BackendAction, BackendError, BackendOutput, BackendRequest,
};

/// HTTP backend: the task backend name is the endpoint URL.
pub struct AiServiceBackend {
    url: String,
    client: reqwest::Client,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ActionPayload {
    action: String,
    #[serde(default)]
    args: Value,
}

impl AiServiceBackend {
    pub fn new(url: impl Into<String>, cfg: &AiServiceConfig) -> Result<Self, BackendError> {
        let api_key = cfg
            .api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|v| !v.trim().is_empty());
        Self::with_api_key(url, cfg.timeout_ms, api_key)
    }

    pub fn with_api_key(
        url: impl Into<String>,
        timeout_ms: u64,
        api_key: Option<String>,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms.max(1)))
            .build()
            .map_err(|e| BackendError::Unavailable(format!("http client: {e}")))?;
        Ok(Self {
            url: url.into(),
            client,
            api_key,
        })
    }

    fn body(request: &BackendRequest) -> Value {
        json!({
            "run_id": request.run_id,
            "task_id": request.task_id,
            "prompt": request.prompt(),
            "model": request.model,
            "model_provider": request.model_provider,
            "attempt": request.attempt,
        })
    }

    async fn call(&self, request: &BackendRequest) -> Result<BackendOutput, BackendError> {
        let mut req = self.client.post(&self.url).json(&Self::body(request));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(BackendError::Failed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                text.trim()
            )));
        }
        parse_response(&text)
    }
}

#[async_trait]
impl Backend for AiServiceBackend {
    fn name(&self) -> &str {
        &self.url
    }

    async fn execute(&self, request: &BackendRequest) -> Result<BackendOutput, BackendError> {
        tracing::debug!(url = %self.url, task_id = %request.task_id, "posting to ai service");
        tokio::select! {
            out = self.call(request) => out,
            _ = request.cancel.cancelled() => Err(BackendError::Cancelled),
        }
    }
}

/// JSON bodies yield text plus optional `actions` and `continuation`;
/// anything else is taken as plain text.
pub fn parse_response(body: &str) -> Result<BackendOutput, BackendError> {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return Ok(BackendOutput::text(body.trim()));
    };
    if !value.is_object() {
        return Ok(BackendOutput::text(body.trim()));
    }

    let mut out = BackendOutput::text(extract_text(&value).unwrap_or_default());
    if let Some(actions) = value.get("actions") {
        let parsed: Vec<ActionPayload> = serde_json::from_value(actions.clone())
            .map_err(|e| BackendError::InvalidResponse(format!("actions: {e}")))?;
        for a in parsed {
            out = out.with_action(BackendAction::new(a.action, a.args));
        }
    }
    if let Some(cont) = value.get("continuation").filter(|v| !v.is_null()) {
        out = out.with_continuation(cont.clone());
    }
    Ok(out)
}

fn extract_text(v: &Value) -> Option<String> {
    for key in ["output", "stdout", "text"] {
        if let Some(s) = v.get(key).and_then(|x| x.as_str()) {
            return Some(s.to_string());
        }
    }
    v.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|x| x.as_str())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use taskmux_core::api::TaskEventTap;
    use tokio_util::sync::CancellationToken;

    fn request() -> BackendRequest {
        BackendRequest {
            run_id: "run-1".into(),
            task_id: "t".into(),
            content: "hello".into(),
            files: vec![],
            dependency_outputs: vec![],
            model: Some("m1".into()),
            model_provider: None,
            workdir: std::env::temp_dir(),
            attempt: 1,
            cancel: CancellationToken::new(),
            events: TaskEventTap::detached("t"),
        }
    }

    #[test]
    fn plain_text_body() {
        let out = parse_response("  done\n").unwrap();
        assert_eq!(out.output, "done");
        assert!(out.actions.is_empty());
    }

    #[test]
    fn json_body_with_actions_and_continuation() {
        let out = parse_response(
            r#"{"output":"ok","actions":[{"action":"write","args":{"path":"a"}}],"continuation":{"step":2}}"#,
        )
        .unwrap();
        assert_eq!(out.output, "ok");
        assert_eq!(out.actions, vec![BackendAction::new("write", json!({"path": "a"}))]);
        assert_eq!(out.continuation, Some(json!({"step": 2})));
    }

    #[test]
    fn chat_completion_shape() {
        let out = parse_response(r#"{"choices":[{"message":{"content":"hi"}}]}"#).unwrap();
        assert_eq!(out.output, "hi");
    }

    #[test]
    fn malformed_actions_are_invalid() {
        let err = parse_response(r#"{"output":"x","actions":"nope"}"#).unwrap_err();
        assert!(matches!(err, BackendError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn posts_prompt_with_bearer_auth() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/run")
            .match_header("authorization", "Bearer secret")
            .match_body(mockito::Matcher::PartialJson(
                json!({"task_id": "t", "prompt": "hello", "model": "m1"}),
            ))
            .with_status(200)
            .with_body(r#"{"output":"answer"}"#)
            .create_async()
            .await;

        let backend = AiServiceBackend::with_api_key(
            format!("{}/run", server.url()),
            5_000,
            Some("secret".into()),
        )
        .unwrap();
        let out = backend.execute(&request()).await.unwrap();
        assert_eq!(out.output, "answer");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn error_status_is_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/run")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let backend =
            AiServiceBackend::with_api_key(format!("{}/run", server.url()), 5_000, None).unwrap();
        let err = backend.execute(&request()).await.unwrap_err();
        assert_eq!(err, BackendError::Failed("HTTP 503: overloaded".into()));
    }

    #[tokio::test]
    async fn unreachable_host_is_network_error() {
        let backend =
            AiServiceBackend::with_api_key("http://127.0.0.1:9/run", 2_000, None).unwrap();
        let err = backend.execute(&request()).await.unwrap_err();
        assert!(matches!(err, BackendError::Network(_)));
    }
}
