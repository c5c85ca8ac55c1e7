//! Fixed-interval retry with a deadline

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::ProvisionError;

/// Interval and ceiling for [`RetryPolicy::wait_for_success`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause between attempts
    pub interval: Duration,
    /// Give up once this much time has passed
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(5 * 60),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds or the timeout passes.
    ///
    /// On timeout the last error is returned as `"<message>: <error>"`.
    pub async fn wait_for_success<F, Fut, T, E>(&self, message: &str, mut op: F) -> Result<T, ProvisionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let start = Instant::now();
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    debug!("{}. Re-trying.", e);
                    tokio::time::sleep(self.interval).await;
                    if start.elapsed() > self.timeout {
                        return Err(ProvisionError::Timeout(format!("{message}: {e}")));
                    }
                }
            }
        }
    }
}
