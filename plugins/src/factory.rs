use anyhow::{bail, Result};
use std::sync::Arc;

use taskmux_core::api::{
    AppConfig, AppContext, BackendRegistry, ConcurrencyConfig, ConcurrencyStrategyPlugin,
    ExecutionEngine, FileRunStore, InMemoryRunStore, OutputRendererPlugin, RetryConfig,
    RetryStrategyPlugin, RunStoreHandle, StoreConfig, StoreKind,
};
use taskmux_core::config::{data_dir, expand_path};
use taskmux_core::state::retention_from_hours;

use crate::backend::{DefaultBackendResolver, RulesBackend};
use crate::executor::{
    AdaptiveConcurrencyPlugin, ExponentialBackoffPlugin, FixedConcurrencyPlugin,
    JsonlRendererPlugin, LinearRetryPlugin, TextRendererPlugin,
};

/// Front-end choices that shape one engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub stream_format: String,
    pub ascii_only: bool,
    pub show_output: bool,
}

impl EngineOptions {
    pub fn from_config(cfg: &AppConfig) -> Self {
        let output = &cfg.executor.output;
        Self {
            stream_format: output.format.clone(),
            ascii_only: output.ascii_only,
            show_output: output.show_output,
        }
    }
}

pub fn build_renderer(
    stream_format: &str,
    ascii_only: bool,
    show_output: bool,
) -> Result<Arc<dyn OutputRendererPlugin>> {
    match stream_format {
        "text" => Ok(Arc::new(TextRendererPlugin::new(ascii_only, show_output))),
        "jsonl" => Ok(Arc::new(JsonlRendererPlugin::new())),
        other => bail!("unknown stream format '{other}' (expected text or jsonl)"),
    }
}

pub fn build_retry_strategy(cfg: &RetryConfig) -> Option<Arc<dyn RetryStrategyPlugin>> {
    match cfg.strategy.as_str() {
        "exponential" | "exponential-backoff" => {
            Some(Arc::new(ExponentialBackoffPlugin::new(cfg.clone())))
        }
        "linear" => Some(Arc::new(LinearRetryPlugin::new(cfg.clone()))),
        "none" => None,
        other => {
            tracing::warn!(strategy = other, "unknown retry strategy, using exponential-backoff");
            Some(Arc::new(ExponentialBackoffPlugin::new(cfg.clone())))
        }
    }
}

pub fn build_concurrency_strategy(
    cfg: &ConcurrencyConfig,
) -> Option<Arc<dyn ConcurrencyStrategyPlugin>> {
    match cfg.strategy.as_str() {
        "adaptive" => Some(Arc::new(AdaptiveConcurrencyPlugin::new(cfg.clone()))),
        "fixed" => Some(Arc::new(FixedConcurrencyPlugin::new(cfg.base_concurrency))),
        "none" => None,
        other => {
            tracing::warn!(strategy = other, "unknown concurrency strategy, using adaptive");
            Some(Arc::new(AdaptiveConcurrencyPlugin::new(cfg.clone())))
        }
    }
}

/// The built-in rules backend plus lazy resolution of CLI and HTTP backends.
pub fn build_backend_registry(cfg: &AppConfig) -> Result<BackendRegistry> {
    let rules = RulesBackend::new(&cfg.backends.rules)?;
    let resolver = DefaultBackendResolver::new(
        cfg.backends.codecli.clone(),
        cfg.backends.aiservice.clone(),
    );
    Ok(BackendRegistry::new()
        .with_backend(Arc::new(rules))
        .with_resolver(Arc::new(resolver)))
}

pub fn build_store(cfg: &StoreConfig) -> Result<RunStoreHandle> {
    let retention = retention_from_hours(cfg.retention_hours);
    Ok(match cfg.kind {
        StoreKind::File => {
            let dir = match cfg.directory.as_deref() {
                Some(d) => expand_path(d),
                None => data_dir()?.join("runs"),
            };
            Arc::new(FileRunStore::new(dir).with_retention(retention))
        }
        StoreKind::Memory => Arc::new(InMemoryRunStore::new().with_retention(retention)),
    })
}

pub fn build_engine(ctx: &AppContext, opts: &EngineOptions) -> Result<ExecutionEngine> {
    let cfg = ctx.cfg();
    let renderer = build_renderer(&opts.stream_format, opts.ascii_only, opts.show_output)?;
    let registry = build_backend_registry(cfg)?;
    let store = build_store(&cfg.store)?;

    let mut builder = ExecutionEngine::builder(registry, store)
        .config(cfg.executor.clone())
        .renderer(renderer)
        .events_out(ctx.events_out());
    if let Some(retry) = build_retry_strategy(&cfg.executor.retry) {
        builder = builder.retry_strategy(retry);
    }
    if let Some(concurrency) = build_concurrency_strategy(&cfg.executor.concurrency) {
        builder = builder.concurrency_strategy(concurrency);
    }
    Ok(builder.build())
}
