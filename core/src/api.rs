//! Stable re-exports for consumers (`cli`, `plugins`, and external crates).
//!
//! Prefer importing from `taskmux_core::api` instead of reaching into internal modules.

pub use crate::backend::{
    compose_prompt, Backend, BackendAction, BackendHandle, BackendOutput, BackendRegistry,
    BackendRequest, BackendResolver, BackendRole, ChainLink, DependencyOutput, FallbackChain,
};
pub use crate::config::{
    load_default, AiServiceConfig, AppConfig, BackendsConfig, CodeCliConfig, EventsOutConfig,
    LoggingConfig, RuleConfig, RulesConfig, StoreConfig, StoreKind,
};
pub use crate::context::AppContext;
pub use crate::error::{
    BackendError, CliError, ErrorCode, ExecutorError, StdioError, StoreError,
};
pub use crate::events::{
    EventEmitter, EventKind, EventSink, JsonlEvent, RunEvent, TaskEventTap, PROTOCOL_VERSION,
};
pub use crate::events_out::EventsOutTx;
pub use crate::executor::traits::{
    ConcurrencyContext, ConcurrencyStrategyPlugin, OutputRendererPlugin, RetryStrategyPlugin,
};
pub use crate::executor::types::{
    ConcurrencyConfig, ExecutionConfig, ExecutionOpts, ExecutionResult, FallbackConfig,
    FilesConfig, OutputConfig, RetryConfig, TaskResult,
};
pub use crate::executor::{ExecutionEngine, ExecutionEngineBuilder, TaskGraph};
pub use crate::state::{
    retention_from_hours, ExecutionAttempt, FileRunStore, InMemoryRunStore, RunRecord, RunStatus,
    RunStore, RunStoreHandle, RunSummary, TaskRecord, TaskStatus,
};
pub use crate::stdio::{
    parse_stdio_tasks, parse_stdio_tasks_with, FileLoader, FormatValidation, ParseContext,
    StandardStdioParser, StdioProtocolParser, StdioTask,
};
