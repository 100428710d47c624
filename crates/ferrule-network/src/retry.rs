//! Retry strategies

use ferrule_core::{RetryStrategyKind, RpcError, RpcResult};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// Attempts made by the fixed-interval strategy
pub const FIXED_INTERVAL_ATTEMPTS: u32 = 3;

/// Delay between fixed-interval attempts
pub const FIXED_INTERVAL_DELAY: Duration = Duration::from_secs(3);

/// Bounded re-attempt policy around a fallible operation
///
/// Any error the operation returns is retried; callers decide what is
/// retryable by what they let through as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Invoke once
    NoRetry,
    /// Up to `attempts` invocations, `interval` apart
    FixedInterval { attempts: u32, interval: Duration },
}

impl RetryStrategy {
    /// Strategy for a configuration key
    pub fn from_kind(kind: RetryStrategyKind) -> Self {
        match kind {
            RetryStrategyKind::No => RetryStrategy::NoRetry,
            RetryStrategyKind::FixedInterval => RetryStrategy::FixedInterval {
                attempts: FIXED_INTERVAL_ATTEMPTS,
                interval: FIXED_INTERVAL_DELAY,
            },
        }
    }

    /// Run the operation, logging each failed attempt
    pub async fn execute<T, F, Fut>(&self, operation: F) -> RpcResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RpcResult<T>>,
    {
        self.execute_observed(operation, |attempt, error| {
            info!(attempt = attempt, error = %error, "Call attempt failed");
        })
        .await
    }

    /// Run the operation, reporting each failed attempt number to `observer`
    ///
    /// When every attempt fails the error of the last one is returned.
    pub async fn execute_observed<T, F, Fut, O>(
        &self,
        mut operation: F,
        mut observer: O,
    ) -> RpcResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RpcResult<T>>,
        O: FnMut(u32, &RpcError),
    {
        let (attempts, interval) = match *self {
            RetryStrategy::NoRetry => return operation().await,
            RetryStrategy::FixedInterval { attempts, interval } => (attempts.max(1), interval),
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    observer(attempt, &e);
                    if attempt >= attempts {
                        debug!(attempts = attempts, "Retries exhausted");
                        return Err(e);
                    }
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::from_kind(RetryStrategyKind::FixedInterval)
    }
}
