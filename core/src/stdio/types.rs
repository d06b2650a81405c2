use serde::{Deserialize, Serialize};

use super::retry::{effective_timeout_secs, max_rounds};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilesMode {
    Embed,
    Ref,
    #[default]
    Auto,
}

impl FilesMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Embed => "embed",
            Self::Ref => "ref",
            Self::Auto => "auto",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilesEncoding {
    #[serde(alias = "utf-8")]
    Utf8,
    Base64,
    #[default]
    Auto,
}

impl FilesEncoding {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Base64 => "base64",
            Self::Auto => "auto",
        }
    }
}

/// One declared unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StdioTask {
    pub id: String,
    pub backend: String,
    pub workdir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_provider: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Seconds; `None` means the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<u32>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub files_mode: FilesMode,
    #[serde(default)]
    pub files_encoding: FilesEncoding,
    pub content: String,
}

impl StdioTask {
    /// Minimal task, mostly useful in tests and programmatic callers.
    pub fn new(
        id: impl Into<String>,
        backend: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            backend: backend.into(),
            workdir: ".".to_string(),
            model: None,
            model_provider: None,
            dependencies: Vec::new(),
            timeout: None,
            retry: None,
            files: Vec::new(),
            files_mode: FilesMode::Auto,
            files_encoding: FilesEncoding::Auto,
            content: content.into(),
        }
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Some(secs);
        self
    }

    pub fn with_workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = workdir.into();
        self
    }

    /// Effective task timeout budget, clamped to the supported range.
    pub fn timeout_secs(&self, default_secs: u64) -> u64 {
        effective_timeout_secs(self.timeout.or(Some(default_secs)))
    }

    pub fn retry_count(&self) -> u32 {
        self.retry.unwrap_or(0)
    }

    /// Primary + retries.
    pub fn rounds(&self) -> u32 {
        max_rounds(self.retry)
    }
}

impl crate::executor::types::TaskLike for StdioTask {
    fn id(&self) -> &str {
        &self.id
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}
