/// One generic retry combinator, applied at the two known call sites
/// (archive GET, REST GET) rather than an implicit decorator sprinkled
/// across arbitrary functions.
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
}

impl RetryPolicy {
    pub fn geometric(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts,
            base_delay,
            multiplier: 2,
        }
    }

    pub fn incremental(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts,
            base_delay,
            multiplier: 1,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        if self.multiplier <= 1 {
            self.base_delay * (attempt + 1)
        } else {
            self.base_delay * self.multiplier.pow(attempt)
        }
    }
}

/// Retries `op` up to `policy.attempts` times. `classify` decides, given an
/// error, whether it is retryable and (for rate limits) how long to wait
/// before the next attempt instead of the policy's own backoff.
pub async fn retry_with<T, E, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    mut op: F,
    classify: impl Fn(&E) -> RetryDecision,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                let decision = classify(&err);
                if attempt >= policy.attempts || decision == RetryDecision::Fatal {
                    return Err(err);
                }
                let wait = match decision {
                    RetryDecision::RetryAfter(d) => d,
                    _ => policy.delay_for(attempt - 1),
                };
                warn!(label, attempt, ?wait, "retrying after failure");
                tokio::time::sleep(wait).await;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    RetryAfter(Duration),
    Fatal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success_within_budget() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::geometric(3, Duration::from_millis(1));
        let result: Result<&'static str, &'static str> = retry_with(
            policy,
            "test",
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 { Err("transient") } else { Ok("ok") }
            },
            |_| RetryDecision::Retry,
        )
        .await;
        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_stop_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::geometric(5, Duration::from_millis(1));
        let result: Result<(), &'static str> = retry_with(
            policy,
            "test",
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("404")
            },
            |_| RetryDecision::Fatal,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
