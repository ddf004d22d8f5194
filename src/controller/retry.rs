//! Bounded exponential backoff for API server writes

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// How often and how patiently to retry an operation
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub base_delay: Duration,
    /// Growth factor applied to the delay after each failure
    pub factor: f64,
}

impl Default for RetryPolicy {
    /// 1s initial delay, factor 1.2, 5 attempts
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            factor: 1.2,
        }
    }
}

impl RetryPolicy {
    /// Same attempt budget as the default, without sleeping between attempts
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Delay to wait after failed attempt `attempt` (0-indexed)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.min(32) as i32;
        let nanos = self.base_delay.as_nanos() as f64 * self.factor.max(1.0).powi(exp);
        Duration::from_nanos(nanos.round() as u64)
    }

    /// Run `op` until it succeeds, fails with a non-retriable error, or the
    /// attempt budget is spent
    ///
    /// `is_retriable` decides which errors are worth another attempt. After
    /// the last attempt the final error is wrapped in
    /// [`Error::RetriesExhausted`].
    pub async fn run<T, F, Fut>(
        &self,
        mut op: F,
        is_retriable: impl Fn(&Error) -> bool,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !is_retriable(&e) => return Err(e),
                Err(e) if attempt + 1 >= attempts => {
                    warn!("Giving up after {} attempt(s): {}", attempts, e);
                    return Err(Error::RetriesExhausted {
                        attempts,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    debug!(
                        "Attempt {}/{} failed ({}), retrying in {:?}",
                        attempt + 1,
                        attempts,
                        e,
                        delay
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}
