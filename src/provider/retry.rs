use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::error::LLMError;

/// Retry schedule for transient provider failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt; 2 means up to three requests total.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryConfig {
    /// Computes the delay before retry `attempt` (0-based).
    ///
    /// The schedule is `min(initial * 2^attempt, max) * (1 - jitter01 * 0.25)`
    /// where `jitter01` is a uniform sample in `[0, 1)`. The sample is passed
    /// in rather than drawn here so tests stay deterministic.
    pub fn delay(&self, attempt: u32, jitter01: f64) -> Duration {
        let exp = self
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt));
        let capped = exp.min(self.max_backoff);
        capped.mul_f64(1.0 - jitter01.clamp(0.0, 1.0) * 0.25)
    }
}

/// Extracts the `Retry-After` header (in seconds) if present.
///
/// Providers occasionally instruct clients to wait before re-sending
/// requests. When the header is numeric this helper parses it into a
/// [`Duration`]. HTTP-date values are ignored because vendors primarily use
/// the numeric form.
pub(crate) fn retry_after_from_headers(headers: &HashMap<String, String>) -> Option<Duration> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
        .and_then(|(_, value)| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Retries an async operation on retryable errors with exponential backoff.
///
/// A provider-supplied `retry_after` hint overrides the computed delay.
/// Non-retryable errors (including [`LLMError::Cancelled`]) are returned
/// immediately.
///
/// # Errors
///
/// Returns the last error once the retry budget is exhausted.
pub async fn retry_with_backoff<F, Fut, T>(config: &RetryConfig, mut operation: F) -> Result<T, LLMError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LLMError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) if err.is_retryable() && attempt < config.max_retries => {
                let delay = match &err {
                    LLMError::RateLimit {
                        retry_after: Some(hint),
                        ..
                    } => *hint,
                    _ => config.delay(attempt, rand::random::<f64>()),
                };
                debug!(attempt, ?delay, error = %err, "retrying after transient failure");
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
