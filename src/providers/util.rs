use crate::core::config::HttpConfig;
use crate::core::error::ServiceError;
use anyhow::{Context, Error};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("foliosync/", env!("CARGO_PKG_VERSION"));

/// Shared client with the configured per-request timeout.
pub fn http_client(config: &HttpConfig) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(config.timeout_secs.max(1)))
        .build()
        .context("Failed to build HTTP client")
}

/// Retry budget for one upstream call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: usize,
    pub delay_ms: u64,
}

impl From<&HttpConfig> for RetryPolicy {
    fn from(config: &HttpConfig) -> Self {
        Self {
            retries: config.retries,
            delay_ms: config.retry_delay_ms,
        }
    }
}

fn is_transient(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// Retries an async operation on timeouts and connection failures
///
/// # Parameters
/// - `operation`: Closure returning a future
/// - `policy`: Number of retry attempts (total runs = 1 initial + retries)
///   and milliseconds between them
///
/// # Returns
/// Either the successful result or the last error. A final timeout is
/// reported as [`ServiceError::Timeout`] so callers can tell it apart.
pub async fn with_retry<F, Fut, T>(mut operation: F, policy: RetryPolicy) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, reqwest::Error>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(err) if is_transient(&err) && attempt <= policy.retries => {
                debug!(
                    "Attempt {}/{} failed: {}. Retrying...",
                    attempt, policy.retries, err
                );
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(policy.delay_ms)).await;
            }
            Err(err) if err.is_timeout() => {
                return Err(ServiceError::Timeout(err.to_string()).into());
            }
            Err(err) => return Err(err.into()),
        }
    }
}
