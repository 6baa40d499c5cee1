//! Rate-limit-aware fetch engine.
//!
//! Every network pass (link refresh, image download) is a batch of
//! independent keyed operations run through one shared retry loop:
//! acquire a permit from the batch's [`AdaptiveLimiter`], run the
//! operation, classify the response. Only HTTP 429 is transient; it
//! shrinks the shared limiter (admission control for the whole batch)
//! and backs off before the next attempt. Everything else degrades to a
//! per-item soft failure that keeps the original locator.
//!
//! No error escapes a worker — every path yields a typed [`FetchResult`].

pub mod download;
pub mod orchestrator;
pub mod refresh;

use crate::limiter::AdaptiveLimiter;
use reqwest::header::HeaderMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum attempts per keyed operation.
pub const MAX_RETRIES: u32 = 5;
/// Base backoff after the first 429, scaled by attempt number.
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
/// Computed backoff never exceeds this.
pub const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Server-declared rate-limit feedback carried on a 429 response.
#[derive(Debug, Clone, Default)]
pub struct RateLimitSignal {
    /// Seconds to wait before the next attempt.
    pub reset_after: Option<f64>,
    /// New concurrency limit declared by the server.
    pub limit: Option<usize>,
}

impl RateLimitSignal {
    /// Read `X-RateLimit-Reset-After` / `X-RateLimit-Limit` if present.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let reset_after = headers
            .get("X-RateLimit-Reset-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<f64>().ok());
        let limit = headers
            .get("X-RateLimit-Limit")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<usize>().ok());
        Self { reset_after, limit }
    }
}

/// Classified result of one network attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// 200 — the operation produced a new locator.
    Done(String),
    /// 429 — transient; retry after shrinking the shared limiter.
    RateLimited(RateLimitSignal),
    /// Any other status or transport error — permanent for this item.
    Failed(String),
}

/// Final outcome of a keyed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The locator was replaced.
    Success(String),
    /// The original locator is retained unchanged.
    SoftFailure(String),
}

/// Keyed result delivered by every worker, on every path.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub key: String,
    pub outcome: FetchOutcome,
}

impl FetchResult {
    /// The locator to store for this key, successful or not.
    pub fn into_entry(self) -> (String, String) {
        let locator = match self.outcome {
            FetchOutcome::Success(new) => new,
            FetchOutcome::SoftFailure(original) => original,
        };
        (self.key, locator)
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, FetchOutcome::Success(_))
    }
}

/// Run one keyed operation under the shared limiter with bounded
/// retry/backoff.
///
/// The permit is held for the whole attempt, including the 429 backoff
/// sleep, and released unconditionally when the attempt ends. The shrink
/// target is computed from a reference capacity captured when the worker
/// starts and then fed back through `max(1, reference / n)` across
/// attempts; server-declared values take precedence when present.
pub async fn run_with_retry<F, Fut>(
    key: &str,
    locator: &str,
    limiter: &AdaptiveLimiter,
    operation: F,
) -> FetchResult
where
    F: Fn() -> Fut,
    Fut: Future<Output = AttemptOutcome>,
{
    let mut reference_capacity = limiter.capacity();

    for attempt in 1..=MAX_RETRIES {
        let permit = limiter.acquire().await;

        match operation().await {
            AttemptOutcome::Done(new_locator) => {
                return FetchResult {
                    key: key.to_string(),
                    outcome: FetchOutcome::Success(new_locator),
                };
            }
            AttemptOutcome::RateLimited(signal) => {
                reference_capacity = (reference_capacity / attempt as usize).max(1);
                let computed_backoff = BACKOFF_CAP.min(INITIAL_BACKOFF * attempt);
                let backoff = signal
                    .reset_after
                    .map(Duration::from_secs_f64)
                    .unwrap_or(computed_backoff);
                let new_limit = signal.limit.unwrap_or(reference_capacity);

                limiter.set_capacity(new_limit).await;
                debug!(
                    "rate limited for {key} (attempt {attempt}), limit {new_limit}, \
                     sleeping {:.1}s",
                    backoff.as_secs_f64()
                );
                tokio::time::sleep(backoff).await;
            }
            AttemptOutcome::Failed(reason) => {
                debug!("fetch failed for {key}: {reason}, locator: {locator}");
                return FetchResult {
                    key: key.to_string(),
                    outcome: FetchOutcome::SoftFailure(locator.to_string()),
                };
            }
        }

        drop(permit);
    }

    warn!("max retries exceeded for {key}, locator: {locator}");
    FetchResult {
        key: key.to_string(),
        outcome: FetchOutcome::SoftFailure(locator.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let limiter = AdaptiveLimiter::new(5);
        let result = run_with_retry("k", "http://a/x.png", &limiter, || async {
            AttemptOutcome::Done("http://a/y.png".to_string())
        })
        .await;
        assert_eq!(
            result.outcome,
            FetchOutcome::Success("http://a/y.png".to_string())
        );
        assert_eq!(limiter.available(), 5);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_is_immediate() {
        let limiter = AdaptiveLimiter::new(5);
        let attempts = AtomicU32::new(0);
        let result = run_with_retry("k", "http://a/x.png", &limiter, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { AttemptOutcome::Failed("status 404".to_string()) }
        })
        .await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(
            result.outcome,
            FetchOutcome::SoftFailure("http://a/x.png".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_leave_capacity_floor() {
        // Five consecutive 429s with no server headers: the computed
        // capacity bottoms out at 1 and the worker soft-fails.
        let limiter = AdaptiveLimiter::new(5);
        let result = run_with_retry("k", "http://a/x.png", &limiter, || async {
            AttemptOutcome::RateLimited(RateLimitSignal::default())
        })
        .await;
        assert_eq!(
            result.outcome,
            FetchOutcome::SoftFailure("http://a/x.png".to_string())
        );
        assert_eq!(limiter.capacity(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_declared_values_take_precedence() {
        let limiter = Arc::new(AdaptiveLimiter::new(4));
        let attempts = AtomicU32::new(0);
        let result = run_with_retry("k", "http://a/x.png", &limiter, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    AttemptOutcome::RateLimited(RateLimitSignal {
                        reset_after: Some(0.25),
                        limit: Some(9),
                    })
                } else {
                    AttemptOutcome::Done("new".to_string())
                }
            }
        })
        .await;
        assert!(result.is_success());
        // The declared limit overrides the computed shrink.
        assert_eq!(limiter.capacity(), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_never_exceeds_cap() {
        let limiter = AdaptiveLimiter::new(2);
        let start = Instant::now();
        let _ = run_with_retry("k", "u", &limiter, || async {
            AttemptOutcome::RateLimited(RateLimitSignal::default())
        })
        .await;
        // Computed backoffs 1+2+3+4+5 = 15s of virtual time, each one
        // individually under the 60s cap.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(15));
        assert!(elapsed < Duration::from_secs(16));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permit_held_through_backoff() {
        // With capacity 1, a rate-limited worker holds its permit through
        // the sleep, so a second acquirer stays blocked meanwhile.
        let limiter = Arc::new(AdaptiveLimiter::new(1));
        let attempts = Arc::new(AtomicU32::new(0));

        let worker = {
            let limiter = Arc::clone(&limiter);
            let attempts = Arc::clone(&attempts);
            tokio::spawn(async move {
                run_with_retry("k", "u", &limiter, || {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            AttemptOutcome::RateLimited(RateLimitSignal {
                                reset_after: Some(5.0),
                                limit: Some(1),
                            })
                        } else {
                            AttemptOutcome::Done("new".to_string())
                        }
                    }
                })
                .await
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(limiter.available(), 0, "permit released during backoff");
        let result = worker.await.unwrap();
        assert!(result.is_success());
        assert_eq!(limiter.available(), 1);
    }

    #[test]
    fn test_rate_limit_signal_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("X-RateLimit-Reset-After", "2.5".parse().unwrap());
        headers.insert("X-RateLimit-Limit", "7".parse().unwrap());
        let signal = RateLimitSignal::from_headers(&headers);
        assert_eq!(signal.reset_after, Some(2.5));
        assert_eq!(signal.limit, Some(7));

        let empty = RateLimitSignal::from_headers(&HeaderMap::new());
        assert!(empty.reset_after.is_none());
        assert!(empty.limit.is_none());
    }
}
