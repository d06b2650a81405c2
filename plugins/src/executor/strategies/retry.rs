use std::time::Duration;
use taskmux_core::error::ErrorCode;
use taskmux_core::executor::traits::RetryStrategyPlugin;
use taskmux_core::executor::types::RetryConfig;

/// A backend that could not be resolved stays unresolved on retry.
fn is_fatal(code: ErrorCode) -> bool {
    code == ErrorCode::BackendUnavailable
}

/// `base_delay_ms * 2^round`, capped at `max_delay_ms`.
pub struct ExponentialBackoffPlugin {
    config: RetryConfig,
}

/// `base_delay_ms * round`, capped at `max_delay_ms`.
pub struct LinearRetryPlugin {
    config: RetryConfig,
}

impl ExponentialBackoffPlugin {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

impl LinearRetryPlugin {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

impl RetryStrategyPlugin for ExponentialBackoffPlugin {
    fn name(&self) -> &str {
        "exponential-backoff"
    }

    fn next_delay(&self, round: u32, _error: &str) -> Duration {
        let exp = 1u64 << round.min(30);
        let delay = self.config.base_delay_ms.saturating_mul(exp);
        Duration::from_millis(delay.min(self.config.max_delay_ms))
    }

    fn is_fatal_error(&self, code: ErrorCode) -> bool {
        is_fatal(code)
    }
}

impl RetryStrategyPlugin for LinearRetryPlugin {
    fn name(&self) -> &str {
        "linear"
    }

    fn next_delay(&self, round: u32, _error: &str) -> Duration {
        let delay = self.config.base_delay_ms.saturating_mul(round.max(1) as u64);
        Duration::from_millis(delay.min(self.config.max_delay_ms))
    }

    fn is_fatal_error(&self, code: ErrorCode) -> bool {
        is_fatal(code)
    }
}
