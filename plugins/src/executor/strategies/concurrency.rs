use taskmux_core::executor::traits::{ConcurrencyContext, ConcurrencyStrategyPlugin};
use taskmux_core::executor::types::ConcurrencyConfig;

/// Memory pressure (percent) above which the limit is halved regardless of CPU.
const MEMORY_PRESSURE: f32 = 90.0;

/// Scales the base limit with CPU load: halved when busy, doubled when idle.
pub struct AdaptiveConcurrencyPlugin {
    config: ConcurrencyConfig,
}

pub struct FixedConcurrencyPlugin {
    fixed: usize,
}

impl AdaptiveConcurrencyPlugin {
    pub fn new(config: ConcurrencyConfig) -> Self {
        Self { config }
    }
}

impl FixedConcurrencyPlugin {
    pub fn new(fixed: usize) -> Self {
        Self { fixed }
    }
}

impl ConcurrencyStrategyPlugin for AdaptiveConcurrencyPlugin {
    fn name(&self) -> &str {
        "adaptive"
    }

    fn calculate_concurrency(&self, context: &ConcurrencyContext) -> usize {
        let min = self.config.min_concurrency.max(1);
        let max = self.config.max_concurrency.max(min);
        let mut desired = context.base_concurrency.max(1);

        if context.cpu_usage >= self.config.cpu_threshold_high
            || context.memory_usage >= MEMORY_PRESSURE
        {
            desired /= 2;
        } else if context.cpu_usage <= self.config.cpu_threshold_low {
            desired = desired.saturating_mul(2);
        }

        // Never more workers than there are tasks to run.
        desired
            .clamp(min, max)
            .min(context.active_tasks.max(1))
    }
}

impl ConcurrencyStrategyPlugin for FixedConcurrencyPlugin {
    fn name(&self) -> &str {
        "fixed"
    }

    fn calculate_concurrency(&self, _context: &ConcurrencyContext) -> usize {
        self.fixed.max(1)
    }
}
