use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{NetworkCode, ProviderError};

/// HTTP statuses treated as transient.
pub const RETRYABLE_STATUSES: [u16; 7] = [408, 429, 499, 500, 502, 503, 504];

#[derive(Debug, Clone, PartialEq)]
pub struct RetryOptions {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: f64,
    /// Fraction of the computed wait applied as signed random jitter.
    pub jitter: f64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            factor: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryOptions {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }
}

pub fn is_retryable_error(err: &ProviderError) -> bool {
    match err {
        ProviderError::Network { code, .. } => matches!(
            code,
            NetworkCode::ConnAborted
                | NetworkCode::NotFound
                | NetworkCode::ConnRefused
                | NetworkCode::ConnReset
                | NetworkCode::TimedOut
        ),
        ProviderError::Http { status, .. } => RETRYABLE_STATUSES.contains(status),
        _ => false,
    }
}

/// Wait before the retry that follows `attempt` (1-based).
pub fn backoff_delay(attempt: u32, opts: &RetryOptions) -> Duration {
    let exp = attempt.saturating_sub(1).min(30) as i32;
    let base_wait = opts.base_delay.as_secs_f64() * opts.factor.powi(exp);
    let spread = base_wait * opts.jitter.abs();
    let offset = if spread > 0.0 {
        rand::thread_rng().gen_range(-spread..=spread)
    } else {
        0.0
    };
    let wait = (base_wait + offset).max(0.0);
    if wait.is_finite() {
        Duration::try_from_secs_f64(wait).unwrap_or(Duration::MAX)
    } else {
        opts.base_delay
    }
}

/// Run `f(attempt)` until it succeeds, fails permanently, or the attempt
/// budget is spent. The last error is returned unchanged.
pub async fn with_retry<T, F, Fut>(mut f: F, opts: &RetryOptions) -> Result<T, ProviderError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = opts.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match f(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if !is_retryable_error(&e) => return Err(e),
            Err(e) if attempt >= max_attempts => {
                tracing::debug!(attempt, "retry budget exhausted: {e}");
                return Err(e);
            }
            Err(e) => {
                let delay = backoff_delay(attempt, opts);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after transient error: {e}"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
