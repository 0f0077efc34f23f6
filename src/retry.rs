// Exponential backoff with jitter and upstream Retry-After honoring.
//
// Built on the same "tracing + tokio::time" shape used elsewhere in
// this codebase, turned into a real retry loop that runs against the
// injectable `Clock` so the backoff schedule is testable without
// waiting on a real clock.

use crate::clock::Clock;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Errors that participate in the retry loop implement this so
/// `execute` doesn't need to know about `CompletionError`/`McpError`
/// specifically.
pub trait RetryableError {
    fn is_retriable(&self) -> bool;
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt. A call is
    /// attempted at most `max_retries + 1` times.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Uniform jitter is drawn from `[-base*jitter_factor, +base*jitter_factor]`.
    /// `0.0` disables jitter; must be within `[0, 1]`.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
        }
    }
}

/// `Retry-After` is only honoured verbatim up to this ceiling; a longer
/// value falls back to the computed exponential-backoff delay instead
/// of stalling a caller for an arbitrarily long upstream-requested wait.
const MAX_HONOURED_RETRY_AFTER: Duration = Duration::from_secs(60);

impl RetryConfig {
    /// Backoff delay before the given retry attempt (0-indexed: the
    /// delay before the first retry is `delay_for_attempt(0)`).
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_millis() as u64 * 2u64.saturating_pow(attempt);
        let base = exp.min(self.max_delay.as_millis() as u64);
        if self.jitter_factor <= 0.0 || base == 0 {
            return Duration::from_millis(base);
        }
        let spread = (base as f64 * self.jitter_factor) as i64;
        let offset = rand::rng().random_range(-spread..=spread);
        let jittered = (base as i64 + offset).max(0) as u64;
        Duration::from_millis(jittered)
    }
}

/// Outcome of a retry-mid-sleep cancellation: the loop stops without
/// retrying further and surfaces the error that triggered the sleep.
pub async fn execute<F, Fut, T, E>(
    clock: &dyn Clock,
    config: &RetryConfig,
    cancel: Option<&Notify>,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError,
{
    let mut attempt = 0u32;
    loop {
        let result = operation().await;
        match result {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retriable() || attempt >= config.max_retries {
                    return Err(err);
                }

                let delay = match err.retry_after() {
                    Some(d) if d <= MAX_HONOURED_RETRY_AFTER => d,
                    _ => config.delay_for_attempt(attempt),
                };
                debug!(attempt, ?delay, "retrying after backoff");

                match cancel {
                    Some(notify) => {
                        tokio::select! {
                            _ = clock.sleep(delay) => {}
                            _ = notify.notified() => {
                                warn!("retry cancelled mid-sleep, not retrying");
                                return Err(err);
                            }
                        }
                    }
                    None => clock.sleep(delay).await,
                }

                attempt += 1;
            }
        }
    }
}

/// Parse a `Retry-After` header value per RFC 9110: either an integer
/// number of seconds, or an HTTP-date.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let trimmed = value.trim();
    if let Ok(secs) = trimmed.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    if let Ok(secs) = trimmed.parse::<f64>() {
        if secs.is_finite() && secs >= 0.0 {
            return Some(Duration::from_secs_f64(secs));
        }
    }
    if let Ok(when) = chrono::DateTime::parse_from_rfc2822(trimmed) {
        let now = chrono::Utc::now();
        let delta = when.with_timezone(&chrono::Utc) - now;
        return delta.to_std().ok();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct FlakyError {
        retriable: bool,
        retry_after: Option<Duration>,
    }

    impl RetryableError for FlakyError {
        fn is_retriable(&self) -> bool {
            self.retriable
        }

        fn retry_after(&self) -> Option<Duration> {
            self.retry_after
        }
    }

    #[tokio::test]
    async fn retries_up_to_max_retries_plus_one_calls() {
        let clock = TestClock::new();
        let config = RetryConfig {
            max_retries: 2,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            jitter_factor: 0.0,
        };
        let calls = Arc::new(AtomicU32::new(0));

        let clock_for_driver = clock.clone();
        let driver = tokio::spawn(async move {
            for _ in 0..10 {
                tokio::task::yield_now().await;
                clock_for_driver.advance(Duration::from_millis(50)).await;
            }
        });

        let calls_clone = calls.clone();
        let result: Result<(), FlakyError> = execute(
            clock.as_ref(),
            &config,
            None,
            move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(FlakyError { retriable: true, retry_after: None })
                }
            },
        )
        .await;

        driver.await.unwrap();
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retriable_error_returns_immediately() {
        let clock = TestClock::new();
        let config = RetryConfig::default();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Result<(), FlakyError> = execute(clock.as_ref(), &config, None, move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FlakyError { retriable: false, retry_after: None })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn honours_retry_after_verbatim_when_within_ceiling() {
        let clock = TestClock::new();
        let config = RetryConfig {
            max_retries: 1,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(5),
            jitter_factor: 0.0,
        };
        let calls = Arc::new(AtomicU32::new(0));

        let clock_for_driver = clock.clone();
        let driver = tokio::spawn(async move {
            for _ in 0..10 {
                tokio::task::yield_now().await;
                clock_for_driver.advance(Duration::from_millis(200)).await;
            }
        });

        let calls_clone = calls.clone();
        let result: Result<(), FlakyError> = execute(clock.as_ref(), &config, None, move || {
            let calls = calls_clone.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(FlakyError {
                        retriable: true,
                        retry_after: Some(Duration::from_secs(1)),
                    })
                } else {
                    Ok(())
                }
            }
        })
        .await;

        driver.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn parses_integer_retry_after() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
    }

    #[test]
    fn rejects_garbage_retry_after() {
        assert_eq!(parse_retry_after("not-a-date"), None);
    }
}
