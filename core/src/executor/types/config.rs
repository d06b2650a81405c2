use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::stdio::DEFAULT_TIMEOUT_SECS;

/// Per-invocation options for `ExecutionEngine::execute`.
#[derive(Debug, Clone)]
pub struct ExecutionOpts {
    /// Caller-supplied run id; a uuid v4 is generated otherwise.
    pub run_id: Option<String>,

    /// Maximum parallel tasks per wave (overrides config and strategy if Some)
    pub max_parallel: Option<usize>,

    /// Whether fallback backends may be used for this run.
    pub fallback_enabled: bool,
}

impl Default for ExecutionOpts {
    fn default() -> Self {
        Self {
            run_id: None,
            max_parallel: None,
            fallback_enabled: true,
        }
    }
}

/// `[executor]` section of the configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub max_parallel: Option<usize>,

    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Time a cancelled attempt gets to wind down before it is dropped.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub concurrency: ConcurrencyConfig,

    #[serde(default)]
    pub fallback: FallbackConfig,

    #[serde(default)]
    pub files: FilesConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_parallel: None,
            default_timeout_secs: default_timeout_secs(),
            cancel_grace_ms: default_cancel_grace_ms(),
            retry: RetryConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            fallback: FallbackConfig::default(),
            files: FilesConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_cancel_grace_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_format")]
    pub format: String,
    #[serde(default)]
    pub ascii_only: bool,
    /// Print backend output in the text renderer.
    #[serde(default = "default_true")]
    pub show_output: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_output_format(),
            ascii_only: false,
            show_output: true,
        }
    }
}

fn default_output_format() -> String {
    "text".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_strategy")]
    pub strategy: String,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: default_retry_strategy(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_retry_strategy() -> String {
    "exponential-backoff".to_string()
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_concurrency_strategy")]
    pub strategy: String,
    #[serde(default)]
    pub min_concurrency: usize,
    #[serde(default)]
    pub max_concurrency: usize,
    #[serde(default)]
    pub base_concurrency: usize,
    #[serde(default)]
    pub cpu_threshold_low: f32,
    #[serde(default)]
    pub cpu_threshold_high: f32,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            strategy: default_concurrency_strategy(),
            min_concurrency: 2,
            max_concurrency: 32,
            base_concurrency: 8,
            cpu_threshold_low: 50.0,
            cpu_threshold_high: 80.0,
        }
    }
}

fn default_concurrency_strategy() -> String {
    "adaptive".to_string()
}

/// Which backend steps in when a primary attempt fails or times out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Fallback used for every backend without a specific entry.
    #[serde(default = "default_fallback_backend")]
    pub default_backend: Option<String>,
    /// Backend name -> fallback backend name.
    #[serde(default)]
    pub per_backend: HashMap<String, String>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_backend: default_fallback_backend(),
            per_backend: HashMap::new(),
        }
    }
}

fn default_fallback_backend() -> Option<String> {
    Some("rules".to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    /// `auto` mode embeds single files strictly below this size.
    #[serde(default = "default_embed_threshold_kb")]
    pub embed_threshold_kb: u64,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default = "default_max_total_size_mb")]
    pub max_total_size_mb: u64,
    #[serde(default)]
    pub allow_outside_workdir: bool,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    #[serde(default = "default_cache_entries")]
    pub cache_entries: usize,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            embed_threshold_kb: default_embed_threshold_kb(),
            max_files: default_max_files(),
            max_file_size_mb: default_max_file_size_mb(),
            max_total_size_mb: default_max_total_size_mb(),
            allow_outside_workdir: false,
            cache_enabled: true,
            cache_entries: default_cache_entries(),
        }
    }
}

fn default_embed_threshold_kb() -> u64 {
    64
}

fn default_max_files() -> usize {
    100
}

fn default_max_file_size_mb() -> u64 {
    50
}

fn default_max_total_size_mb() -> u64 {
    200
}

fn default_cache_entries() -> usize {
    100
}
