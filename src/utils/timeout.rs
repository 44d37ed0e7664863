//! Deadlines and bounded polling
//!
//! Every wait in the harness has a deadline. Polling helpers return `false`
//! on expiry; hard deadlines on single operations surface `Error::Timeout`.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::errors::{Error, Result};

/// Default deadline for a single control-plane operation (30 seconds)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for deleting a LoadBalancer Service (10 minutes)
pub const LOAD_BALANCER_TIMEOUT: Duration = Duration::from_secs(600);

/// Deadline for fetching one container's logs during failure collection
pub const LOG_COLLECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline and polling interval of a wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wait {
    pub timelimit: Duration,
    pub interval: Duration,
}

impl Default for Wait {
    fn default() -> Self {
        Self {
            timelimit: Duration::from_secs(60),
            interval: Duration::from_secs(1),
        }
    }
}

impl Wait {
    pub fn new(timelimit: Duration, interval: Duration) -> Self {
        Self { timelimit, interval }
    }

    /// Wait of `secs` seconds with the default interval
    pub fn secs(secs: u64) -> Self {
        Self {
            timelimit: Duration::from_secs(secs),
            ..Self::default()
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Wrap an async operation with a hard deadline
pub async fn with_timeout<F, T>(duration: Duration, label: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_elapsed) => Err(Error::timeout(label, duration.as_millis() as u64)),
    }
}

/// Poll `condition` until it returns true or the wait expires
///
/// The condition is evaluated at least once, even with a zero timelimit.
pub async fn wait_for_condition<F, Fut>(wait: Wait, label: &str, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        if condition().await {
            return true;
        }

        let elapsed = start.elapsed();
        if elapsed >= wait.timelimit {
            tracing::debug!(
                label,
                attempts = attempt,
                timelimit_ms = wait.timelimit.as_millis() as u64,
                "Condition not met before deadline"
            );
            return false;
        }

        let remaining = wait.timelimit.saturating_sub(elapsed);
        let sleep_time = wait.interval.min(remaining);
        if sleep_time > Duration::ZERO {
            tokio::time::sleep(sleep_time).await;
        }
    }
}
