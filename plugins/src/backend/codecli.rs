use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use taskmux_core::api::{Backend, BackendError, BackendOutput, BackendRequest, CodeCliConfig};

/// Bytes of stderr kept for the failure message.
const STDERR_TAIL_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliKind {
    Codex,
    Claude,
    Gemini,
    Generic,
}

impl CliKind {
    pub fn detect(program: &str) -> Self {
        let stem = Path::new(program)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(program)
            .to_lowercase();
        if stem.contains("codex") {
            Self::Codex
        } else if stem.contains("claude") {
            Self::Claude
        } else if stem.contains("gemini") {
            Self::Gemini
        } else {
            Self::Generic
        }
    }
}

/// Runs a local code CLI per attempt. The composed prompt goes to stdin;
/// every stdout line is streamed as `assistant.output`.
pub struct CodeCliBackend {
    name: String,
    program: PathBuf,
    kind: CliKind,
    extra_args: Vec<String>,
}

impl CodeCliBackend {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>, extra_args: Vec<String>) -> Self {
        let name = name.into();
        let program = program.into();
        let kind = CliKind::detect(&program.to_string_lossy());
        Self {
            name,
            program,
            kind,
            extra_args,
        }
    }

    /// Backend for task backend `name`, or `None` when no executable can be found.
    pub fn for_name(name: &str, cfg: &CodeCliConfig) -> Option<Self> {
        let configured = cfg.binaries.get(name).map(String::as_str).unwrap_or(name);
        let program = resolve_executable(configured)?;
        let extra_args = cfg.extra_args.get(name).cloned().unwrap_or_default();
        tracing::debug!(backend = name, program = %program.display(), "resolved code cli");
        Some(Self::new(name, program, extra_args))
    }

    pub fn kind(&self) -> CliKind {
        self.kind
    }

    pub fn build_args(&self, request: &BackendRequest) -> Vec<String> {
        let model = request
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty());
        let mut args: Vec<String> = Vec::new();

        match self.kind {
            CliKind::Codex => {
                args.extend(["exec", "--skip-git-repo-check"].map(String::from));
                if let Some(m) = model {
                    args.extend(["--model".to_string(), m.to_string()]);
                }
                if let Some(provider) = request.model_provider.as_deref() {
                    args.extend(["--oss", "--local-provider", provider].map(String::from));
                }
                args.extend(self.extra_args.iter().cloned());
                // `-` reads the prompt from stdin.
                args.push("-".to_string());
            }
            CliKind::Claude => {
                args.extend(["-p", "--input-format", "text", "--output-format", "text"].map(String::from));
                if let Some(m) = model {
                    args.extend(["--model".to_string(), m.to_string()]);
                }
                args.extend(self.extra_args.iter().cloned());
            }
            CliKind::Gemini => {
                args.push("-y".to_string());
                if let Some(m) = model {
                    args.extend(["-m".to_string(), m.to_string()]);
                }
                args.extend(self.extra_args.iter().cloned());
            }
            CliKind::Generic => {
                if let Some(m) = model {
                    args.extend(["--model".to_string(), m.to_string()]);
                }
                args.extend(self.extra_args.iter().cloned());
            }
        }
        args
    }
}

#[async_trait]
impl Backend for CodeCliBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, request: &BackendRequest) -> Result<BackendOutput, BackendError> {
        let args = self.build_args(request);
        tracing::debug!(
            backend = %self.name,
            task_id = %request.task_id,
            args = ?args,
            "spawning code cli"
        );

        let mut child = Command::new(&self.program)
            .args(&args)
            .current_dir(&request.workdir)
            .env("TASKMUX_RUN_ID", &request.run_id)
            .env("TASKMUX_TASK_ID", &request.task_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackendError::Spawn(format!("{}: {e}", self.program.display())))?;

        let prompt = request.prompt();
        let mut stdin = child.stdin.take();
        let writer = tokio::spawn(async move {
            if let Some(stdin) = stdin.as_mut() {
                // A CLI that exits without reading stdin is not an error here.
                let _ = stdin.write_all(prompt.as_bytes()).await;
                let _ = stdin.shutdown().await;
            }
        });

        let stderr_reader = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(read_tail(stderr, STDERR_TAIL_BYTES)));

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::Spawn("stdout not captured".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();
        let mut collected: Vec<String> = Vec::new();

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        request.events.output(line.clone()).await;
                        collected.push(line);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(backend = %self.name, error = %e, "stdout read failed");
                        break;
                    }
                },
                _ = request.cancel.cancelled() => {
                    let _ = child.kill().await;
                    writer.abort();
                    return Err(BackendError::Cancelled);
                }
            }
        }

        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| BackendError::Failed(e.to_string()))?,
            _ = request.cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(BackendError::Cancelled);
            }
        };
        let _ = writer.await;
        let stderr_tail = match stderr_reader {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            let mut message = format!("{} exited with {code}", self.name);
            if !stderr_tail.is_empty() {
                message.push_str(": ");
                message.push_str(&stderr_tail);
            }
            return Err(BackendError::Failed(message));
        }

        Ok(BackendOutput::text(collected.join("\n")))
    }
}

/// Absolute or relative paths must exist; bare names are looked up on PATH.
pub fn resolve_executable(program: &str) -> Option<PathBuf> {
    let expanded = shellexpand::tilde(program).to_string();
    let path = Path::new(&expanded);
    if path.components().count() > 1 || path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }
    find_in_path(&expanded)
}

fn find_in_path(cmd: &str) -> Option<PathBuf> {
    let path_env = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_env) {
        #[cfg(target_os = "windows")]
        {
            for ext in ["exe", "cmd"] {
                let candidate = dir.join(format!("{cmd}.{ext}"));
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }

        #[cfg(not(target_os = "windows"))]
        {
            let candidate = dir.join(cmd);
            if candidate.is_file() && is_executable(&candidate) {
                return Some(candidate);
            }
        }
    }
    None
}

#[cfg(not(target_os = "windows"))]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Drains `reader`, keeping only its last `limit` bytes.
async fn read_tail<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> String {
    let mut tail = Vec::with_capacity(limit);
    let mut chunk = [0u8; 1024];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                if tail.len() > limit {
                    tail.drain(..tail.len() - limit);
                }
            }
        }
    }
    String::from_utf8_lossy(&tail).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskmux_core::api::TaskEventTap;
    use tokio_util::sync::CancellationToken;

    fn request(content: &str, model: Option<&str>) -> BackendRequest {
        BackendRequest {
            run_id: "run-1".into(),
            task_id: "t".into(),
            content: content.into(),
            files: vec![],
            dependency_outputs: vec![],
            model: model.map(String::from),
            model_provider: None,
            workdir: std::env::temp_dir(),
            attempt: 1,
            cancel: CancellationToken::new(),
            events: TaskEventTap::detached("t"),
        }
    }

    #[test]
    fn detects_cli_kind_from_program() {
        assert_eq!(CliKind::detect("/usr/local/bin/codex"), CliKind::Codex);
        assert_eq!(CliKind::detect("claude"), CliKind::Claude);
        assert_eq!(CliKind::detect("gemini.cmd"), CliKind::Gemini);
        assert_eq!(CliKind::detect("my-agent"), CliKind::Generic);
    }

    #[test]
    fn codex_args_read_prompt_from_stdin() {
        let backend = CodeCliBackend::new("codex", "codex", vec!["--full-auto".into()]);
        let args = backend.build_args(&request("hi", Some("gpt-x")));
        assert_eq!(
            args,
            vec!["exec", "--skip-git-repo-check", "--model", "gpt-x", "--full-auto", "-"]
        );
    }

    #[test]
    fn blank_model_is_ignored() {
        let backend = CodeCliBackend::new("claude", "claude", vec![]);
        let args = backend.build_args(&request("hi", Some("  ")));
        assert!(!args.contains(&"--model".to_string()));
    }

    #[tokio::test]
    async fn stderr_tail_keeps_last_bytes() {
        let mut noise = vec![b'a'; 10_000];
        noise.extend_from_slice(b"fatal: bad token\n");
        let tail = read_tail(noise.as_slice(), 32).await;
        assert_eq!(tail.len(), 31);
        assert!(tail.ends_with("fatal: bad token"));
        assert!(tail.starts_with('a'));

        assert_eq!(read_tail(&b"  short  "[..], 32).await, "short");
    }

    #[test]
    fn missing_program_does_not_resolve() {
        assert!(resolve_executable("/no/such/binary-taskmux").is_none());
        assert!(resolve_executable("no-such-binary-taskmux").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cat_echoes_prompt() {
        let Some(program) = resolve_executable("cat") else {
            return;
        };
        let backend = CodeCliBackend::new("cat", program, vec![]);
        let out = backend.execute(&request("line one\nline two", None)).await.unwrap();
        assert_eq!(out.output, "line one\nline two");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_failure() {
        let Some(program) = resolve_executable("false") else {
            return;
        };
        let backend = CodeCliBackend::new("false", program, vec![]);
        let err = backend.execute(&request("x", None)).await.unwrap_err();
        assert!(matches!(err, BackendError::Failed(msg) if msg.starts_with("false exited with 1")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_kills_child() {
        let Some(program) = resolve_executable("sleep") else {
            return;
        };
        let backend = CodeCliBackend::new("sleep", program, vec!["5".into()]);
        let req = request("", None);
        let cancel = req.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            cancel.cancel();
        });
        let started = std::time::Instant::now();
        let err = backend.execute(&req).await.unwrap_err();
        assert_eq!(err, BackendError::Cancelled);
        assert!(started.elapsed() < std::time::Duration::from_secs(4));
    }
}
