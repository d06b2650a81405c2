use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::executor::types::ExecutionConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub executor: ExecutionConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub events_out: EventsOutConfig,

    #[serde(default)]
    pub backends: BackendsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a daily file under `directory`.
    #[serde(default)]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "taskmux_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    /// Log file directory; `<data_dir>/logs` when unset.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: false,
            level: default_logging_level(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    File,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,

    /// Run snapshot directory; `<data_dir>/runs` when unset.
    #[serde(default)]
    pub directory: Option<String>,

    /// 0 keeps runs forever.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
}

fn default_retention_hours() -> u64 {
    168
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            directory: None,
            retention_hours: default_retention_hours(),
        }
    }
}

/// JSONL tee of the event stream. `path = "stdout:"` writes to stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsOutConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_events_out_path")]
    pub path: String,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_drop_when_full")]
    pub drop_when_full: bool,
}

fn default_events_out_path() -> String {
    "./run.events.jsonl".to_string()
}

fn default_channel_capacity() -> usize {
    2048
}

fn default_drop_when_full() -> bool {
    true
}

impl Default for EventsOutConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_events_out_path(),
            channel_capacity: default_channel_capacity(),
            drop_when_full: default_drop_when_full(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendsConfig {
    #[serde(default)]
    pub codecli: CodeCliConfig,

    #[serde(default)]
    pub aiservice: AiServiceConfig,

    #[serde(default)]
    pub rules: RulesConfig,
}

/// Local CLI backends. Task backend names `codex`, `claude` and `gemini` map
/// to their binaries; `extra_args` is keyed by backend name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeCliConfig {
    #[serde(default)]
    pub extra_args: HashMap<String, Vec<String>>,

    /// Backend name -> binary path, for names that are not on PATH as-is.
    #[serde(default)]
    pub binaries: HashMap<String, String>,
}

/// HTTP backend used when a task's backend is an http(s) URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiServiceConfig {
    #[serde(default = "default_aiservice_timeout_ms")]
    pub timeout_ms: u64,

    /// Environment variable holding a bearer token, if any.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

fn default_aiservice_timeout_ms() -> u64 {
    120_000
}

impl Default for AiServiceConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_aiservice_timeout_ms(),
            api_key_env: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Tried in order; the first match wins.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Regex matched against the task content.
    pub pattern: String,

    /// Output template; `$1`, `${name}` expand capture groups.
    #[serde(default)]
    pub output: String,

    #[serde(default)]
    pub action: Option<String>,

    /// Matching content fails the attempt with `output` as the message.
    #[serde(default)]
    pub fail: bool,
}
