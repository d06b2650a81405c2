use std::time::Duration;

use crate::error::ErrorCode;

/// Decides the pause between retry rounds.
pub trait RetryStrategyPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Delay before retry round `round` (1 = first retry).
    fn next_delay(&self, round: u32, error: &str) -> Duration;

    /// Whether retry round `round` should run after a failure with `code`.
    fn should_retry(&self, _round: u32, code: ErrorCode) -> bool {
        !self.is_fatal_error(code)
    }

    fn is_fatal_error(&self, _code: ErrorCode) -> bool {
        false
    }
}

/// Picks the per-wave concurrency limit.
pub trait ConcurrencyStrategyPlugin: Send + Sync {
    fn name(&self) -> &str;
    fn calculate_concurrency(&self, context: &ConcurrencyContext) -> usize;
}

#[derive(Debug, Clone)]
pub struct ConcurrencyContext {
    pub cpu_usage: f32,
    pub available_cpus: usize,
    pub memory_usage: f32,
    pub active_tasks: usize,
    pub base_concurrency: usize,
}
