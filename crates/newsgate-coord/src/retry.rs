//! Retry with exponential back-off and jitter.
//!
//! [`retry_with_backoff`] wraps any fallible async operation and retries the
//! errors `is_retriable` accepts. Everything else is returned at once.

use std::future::Future;
use std::time::Duration;

const MAX_DELAY_MS: u64 = 60_000;

/// Runs `operation` with up to `max_retries` additional attempts.
///
/// Back-off schedule with `backoff_base_ms = 500`:
///
/// | Retry | Sleep before it                |
/// |-------|--------------------------------|
/// | 1     | 500 ms × 2⁰ ± 25 % jitter      |
/// | 2     | 500 ms × 2¹ ± 25 % jitter      |
/// | 3     | 500 ms × 2² ± 25 % jitter      |
///
/// Delay is capped at 60 s.
///
/// # Errors
///
/// Returns the last error once retries are exhausted, or the first error
/// `is_retriable` rejects.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    label: &str,
    max_retries: u32,
    backoff_base_ms: u64,
    is_retriable: R,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retriable(&err) || attempt >= max_retries {
                    return Err(err);
                }
                attempt += 1;
                let delay_ms = jittered_delay_ms(backoff_base_ms, attempt);
                tracing::warn!(
                    op = label,
                    attempt,
                    max_retries,
                    delay_ms,
                    error = %err,
                    "transient error, retrying after back-off"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn jittered_delay_ms(backoff_base_ms: u64, attempt: u32) -> u64 {
    let computed = backoff_base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(10));
    let capped = computed.min(MAX_DELAY_MS);
    (capped as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64
}
