use rand::Rng;
use std::time::Duration;

/// Jittered exponential backoff; `attempt` is 1-based.
pub(crate) fn backoff_delay(attempt: u32, base_ms: u64) -> Duration {
    let exp = base_ms.saturating_mul(1 << attempt.saturating_sub(1).min(6));
    let jitter = rand::thread_rng().gen_range(0..=base_ms.max(1));
    Duration::from_millis(exp + jitter)
}
