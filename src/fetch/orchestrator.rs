//! Batch fan-out: one fetch worker per keyed locator, first-finished
//! aggregation, one shared client and limiter per batch.
//!
//! The output map always carries exactly the input key set: successes
//! store the new locator, soft failures retain the original. Only two
//! things are fatal for a batch — the elapsed timeout and a failure to
//! construct the shared client. Everything else degrades per item.

use crate::fetch::FetchResult;
use crate::limiter::AdaptiveLimiter;
use crate::progress::Progress;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Batch-fatal conditions. Per-item failures never surface here.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("batch timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Build the shared HTTP client for one batch.
///
/// One connection pool per batch; request timeouts are generous because
/// the batch itself runs under a single elapsed deadline.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, BatchError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()?;
    Ok(client)
}

/// Run one worker per `(key, locator)` pair concurrently and aggregate
/// the results keyed by hash.
///
/// `worker` receives an owned key, locator, and a handle to the shared
/// limiter; it must resolve to a [`FetchResult`] on every path. The whole
/// batch is bounded by `batch_timeout`; hitting it aborts the remaining
/// in-flight work and is fatal for the run.
pub async fn run_batch<F, Fut>(
    label: &str,
    refs: &HashMap<String, String>,
    limiter: Arc<AdaptiveLimiter>,
    batch_timeout: Duration,
    progress: &Progress,
    worker: F,
) -> Result<HashMap<String, String>, BatchError>
where
    F: Fn(String, String, Arc<AdaptiveLimiter>) -> Fut,
    Fut: Future<Output = FetchResult>,
{
    let mut in_flight: FuturesUnordered<Fut> = refs
        .iter()
        .map(|(key, locator)| worker(key.clone(), locator.clone(), Arc::clone(&limiter)))
        .collect();

    let bar = progress.batch_bar(label, refs.len() as u64);

    let aggregate = async {
        let mut results = HashMap::with_capacity(refs.len());
        while let Some(result) = in_flight.next().await {
            if result.is_success() {
                bar.inc(1);
            }
            let (key, locator) = result.into_entry();
            results.insert(key, locator);
        }
        results
    };

    let results = tokio::time::timeout(batch_timeout, aggregate)
        .await
        .map_err(|_| BatchError::Timeout(batch_timeout))?;

    bar.finish_and_clear();
    let successes = bar.position();
    info!(
        "{label}: {successes}/{} succeeded, {} left unchanged",
        refs.len(),
        refs.len() as u64 - successes
    );
    Ok(results)
}
