//! Cursor pagination and bounded retry around upstream list calls.

use std::future::Future;
use std::time::Duration;

use metrics::counter;
use thiserror::Error;
use tracing::warn;

use crate::domain::ListResponse;

use super::remote::RemoteError;

const METRIC_REMOTE_RETRY_TOTAL: &str = "blockmirror_remote_retry_total";
const DEFAULT_RETRIES: u32 = 2;
const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// A remote call that ran out of options.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("remote call failed after {attempts} attempt(s): {source}")]
pub struct FetchError {
    /// Calls consumed, including the failing one.
    pub attempts: u32,
    #[source]
    pub source: RemoteError,
}

impl FetchError {
    pub fn is_client_error(&self) -> bool {
        self.source.is_client_error()
    }
}

/// How many times a transient failure is retried and how long to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    /// Delay before the first retry; doubled for every following one.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Same budget, no waiting. Used by tests and dry runs.
    pub fn immediate(retries: u32) -> Self {
        Self {
            retries,
            backoff: Duration::ZERO,
        }
    }

    fn delay_for(&self, retry: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
    }
}

/// Drives list calls to exhaustion with per-call retry.
#[derive(Debug, Clone, Copy, Default)]
pub struct PagedFetcher {
    policy: RetryPolicy,
}

impl PagedFetcher {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Run `call` once, retrying transient failures within the budget.
    ///
    /// Client errors surface after the first attempt.
    pub async fn fetch_one<T, F, Fut>(&self, mut call: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(source) if source.is_client_error() => {
                    return Err(FetchError { attempts, source });
                }
                Err(source) if attempts > self.policy.retries => {
                    return Err(FetchError { attempts, source });
                }
                Err(source) => {
                    let delay = self.policy.delay_for(attempts);
                    warn!(
                        op = "paging::fetch_one",
                        result = "retry",
                        attempt = attempts,
                        retries = self.policy.retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %source,
                        "Transient upstream failure; retrying"
                    );
                    counter!(METRIC_REMOTE_RETRY_TOTAL).increment(1);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Follow cursors until `has_more` is false or no cursor is returned,
    /// concatenating every page's results in order.
    ///
    /// Any page that fails fails the whole listing; partial results are
    /// dropped.
    pub async fn fetch_all<T, F, Fut>(&self, mut call: F) -> Result<Vec<T>, FetchError>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = Result<ListResponse<T>, RemoteError>>,
    {
        let mut results = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = self.fetch_one(|| call(cursor.clone())).await?;
            let next = page.continuation().map(str::to_string);
            results.extend(page.results);

            match next {
                Some(next) => cursor = Some(next),
                None => return Ok(results),
            }
        }
    }
}
