//! Retry utilities with exponential backoff
//!
//! Used by the HTTP test client (retry on a set of status codes), by the
//! resource model (conflict retries), and by observability pollers.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry configuration with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries (for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles each time)
    pub backoff_multiplier: f64,
    /// Description for logging purposes
    pub description: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 1.5,
            description: "operation".to_string(),
        }
    }
}

impl RetryConfig {
    /// Fast retry config for quick operations
    pub fn fast() -> Self {
        Self {
            max_attempts: 100,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 1.2,
            description: "fast operation".to_string(),
        }
    }

    /// Constant interval between a fixed number of attempts
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: interval,
            max_delay: interval,
            backoff_multiplier: 1.0,
            description: "poll".to_string(),
        }
    }

    /// Policy for waiting on policy/gateway reconciliation
    pub fn reconciliation() -> Self {
        Self {
            max_attempts: 30,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 1.5,
            description: "reconciliation".to_string(),
        }
    }

    /// Set the description used in log lines
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Override the number of attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Delay following `delay`, capped at `max_delay`
    pub fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_millis(((delay.as_millis() as f64) * self.backoff_multiplier) as u64)
            .min(self.max_delay)
    }
}

/// Outcome of [`retry_until`]: the last produced value and whether it
/// satisfied the predicate
#[derive(Debug, Clone)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
    pub satisfied: bool,
}

/// Retry a future until it succeeds or max attempts is reached
///
/// Returns the first `Ok`, or the last error once attempts are exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = config.initial_delay;
    let mut attempt = 1;

    loop {
        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, description = %config.description, "Retry succeeded");
                }
                return Ok(value);
            }
            Err(e) if attempt < config.max_attempts => {
                debug!(
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    error = %e,
                    description = %config.description,
                    "Retry attempt failed, will retry"
                );
                sleep(delay).await;
                delay = config.next_delay(delay);
                attempt += 1;
            }
            Err(e) => {
                warn!(
                    attempt,
                    max_attempts = config.max_attempts,
                    error = %e,
                    description = %config.description,
                    "Retry exhausted all attempts"
                );
                return Err(e);
            }
        }
    }
}

/// Retry a future until the predicate accepts its output
///
/// Never fails: after `max_attempts` the last value is returned with
/// `satisfied == false`.
pub async fn retry_until<F, Fut, T, P>(config: &RetryConfig, mut f: F, mut predicate: P) -> Attempted<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = T>,
    P: FnMut(&T) -> bool,
{
    let mut delay = config.initial_delay;
    let mut attempt = 1;

    loop {
        let value = f().await;
        if predicate(&value) {
            if attempt > 1 {
                debug!(attempt, description = %config.description, "Retry until predicate succeeded");
            }
            return Attempted { value, attempts: attempt, satisfied: true };
        }
        if attempt >= config.max_attempts {
            debug!(
                attempt,
                description = %config.description,
                "Predicate still unsatisfied after all attempts"
            );
            return Attempted { value, attempts: attempt, satisfied: false };
        }

        debug!(
            attempt,
            max_attempts = config.max_attempts,
            delay_ms = delay.as_millis(),
            description = %config.description,
            "Predicate not satisfied, will retry"
        );
        sleep(delay).await;
        delay = config.next_delay(delay);
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_retry_success_first_attempt() {
        let config = RetryConfig::default();
        let result = retry_with_backoff(&config, || async { Ok::<_, String>(42) }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn test_retry_success_after_retries() {
        let config = RetryConfig::fast();
        let attempt = Arc::new(AtomicU32::new(0));
        let attempt_clone = attempt.clone();
        let result = retry_with_backoff(&config, move || {
            let attempt = attempt_clone.clone();
            async move {
                let current = attempt.fetch_add(1, Ordering::SeqCst) + 1;
                if current < 3 {
                    Err("not yet".to_string())
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(attempt.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_returns_last_error() {
        let config = RetryConfig::fixed(3, Duration::from_millis(1));
        let attempt = Arc::new(AtomicU32::new(0));
        let attempt_clone = attempt.clone();
        let result: Result<(), String> = retry_with_backoff(&config, move || {
            let attempt = attempt_clone.clone();
            async move {
                let n = attempt.fetch_add(1, Ordering::SeqCst) + 1;
                Err(format!("failure {}", n))
            }
        })
        .await;
        assert_eq!(result, Err("failure 3".to_string()));
    }

    #[tokio::test]
    async fn test_retry_until_predicate() {
        let config = RetryConfig::fast();
        let value = Arc::new(AtomicU32::new(0));
        let value_clone = value.clone();
        let result = retry_until(
            &config,
            || {
                let v = value_clone.clone();
                async move { v.fetch_add(1, Ordering::SeqCst) + 1 }
            },
            |v| *v >= 5,
        )
        .await;
        assert!(result.satisfied);
        assert_eq!(result.value, 5);
        assert_eq!(result.attempts, 5);
    }

    #[tokio::test]
    async fn test_retry_until_gives_up_with_last_value() {
        let config = RetryConfig::fixed(4, Duration::from_millis(1));
        let value = Arc::new(AtomicU32::new(0));
        let value_clone = value.clone();
        let result = retry_until(
            &config,
            || {
                let v = value_clone.clone();
                async move { v.fetch_add(1, Ordering::SeqCst) + 1 }
            },
            |_| false,
        )
        .await;
        assert!(!result.satisfied);
        assert_eq!(result.value, 4);
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            ..RetryConfig::default()
        };
        assert_eq!(config.next_delay(Duration::from_secs(4)), Duration::from_secs(5));
    }
}
