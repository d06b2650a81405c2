pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
pub const MAX_TIMEOUT_SECS: u64 = 60 * 60;
/// Upper bound on a task's `retry` field.
pub const MAX_RETRY: u32 = 100;

pub fn effective_timeout_secs(timeout: Option<u64>) -> u64 {
    let v = timeout.unwrap_or(DEFAULT_TIMEOUT_SECS);
    v.clamp(1, MAX_TIMEOUT_SECS)
}

/// Rounds a task may run: the initial one plus `retry` retries.
pub fn max_rounds(retry: Option<u32>) -> u32 {
    retry.unwrap_or(0).saturating_add(1).max(1)
}
