// Copyright 2026 relink Contributors
// SPDX-License-Identifier: Apache-2.0

//! Adaptive concurrency limiter shared by all fetch workers in a batch.
//!
//! A counting semaphore whose capacity can be resized while permits are
//! outstanding. Growth takes effect immediately; shrinking drains the
//! excess by performing ordinary blocking acquires, so in-flight work is
//! never cancelled — only future admissions are throttled. A rate-limit
//! response from any one worker therefore slows the whole batch down.

use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};

/// A runtime-resizable concurrency bound.
///
/// Outstanding permits never exceed the current capacity at any
/// observable instant, even while a shrink is in progress concurrently
/// with acquire/release traffic.
pub struct AdaptiveLimiter {
    semaphore: Semaphore,
    capacity: AtomicUsize,
    /// Serializes `set_capacity` calls: one mutator at a time.
    resize: Mutex<()>,
}

/// RAII guard for one acquired permit; released exactly once on drop.
pub struct LimiterPermit<'a> {
    _permit: SemaphorePermit<'a>,
}

impl AdaptiveLimiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Semaphore::new(capacity),
            capacity: AtomicUsize::new(capacity),
            resize: Mutex::new(()),
        }
    }

    /// Current capacity. During a shrink this still reads the old value
    /// until the drain completes, which keeps the safety invariant honest.
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// Number of permits currently available (not held and not drained).
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Suspend until a permit is free, then take it.
    pub async fn acquire(&self) -> LimiterPermit<'_> {
        // The semaphore is never closed, so acquire cannot fail.
        let permit = self
            .semaphore
            .acquire()
            .await
            .expect("limiter semaphore closed");
        LimiterPermit { _permit: permit }
    }

    /// Resize the limiter to `new_capacity`.
    ///
    /// Growing releases the extra permits immediately. Shrinking performs
    /// ordinary blocking acquires for the excess and forgets them, so the
    /// call suspends until enough in-flight holders finish to pay the
    /// reduction back. The stored capacity is updated only after the
    /// adjustment completes. There is no upper ceiling: server-declared
    /// limits may push capacity past its starting value indefinitely.
    pub async fn set_capacity(&self, new_capacity: usize) {
        let _guard = self.resize.lock().await;
        let current = self.capacity.load(Ordering::Acquire);
        if new_capacity > current {
            self.semaphore.add_permits(new_capacity - current);
        } else {
            for _ in 0..(current - new_capacity) {
                let permit = self
                    .semaphore
                    .acquire()
                    .await
                    .expect("limiter semaphore closed");
                permit.forget();
            }
        }
        self.capacity.store(new_capacity, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_acquire_release_roundtrip() {
        let limiter = AdaptiveLimiter::new(2);
        let p1 = limiter.acquire().await;
        let p2 = limiter.acquire().await;
        assert_eq!(limiter.available(), 0);
        drop(p1);
        assert_eq!(limiter.available(), 1);
        drop(p2);
        assert_eq!(limiter.available(), 2);
    }

    #[tokio::test]
    async fn test_acquire_blocks_at_capacity() {
        let limiter = AdaptiveLimiter::new(1);
        let _held = limiter.acquire().await;
        let blocked = timeout(Duration::from_millis(50), limiter.acquire()).await;
        assert!(blocked.is_err(), "acquire should block at capacity");
    }

    #[tokio::test]
    async fn test_grow_unblocks_waiter_without_release() {
        let limiter = Arc::new(AdaptiveLimiter::new(1));
        let _held = limiter.acquire().await;

        let waiter = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move {
                let _p = limiter.acquire().await;
            })
        };

        // The waiter must wake from the capacity increase alone.
        limiter.set_capacity(2).await;
        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("grow did not unblock the waiter")
            .unwrap();
        assert_eq!(limiter.capacity(), 2);
    }

    #[tokio::test]
    async fn test_shrink_waits_for_payback() {
        let limiter = Arc::new(AdaptiveLimiter::new(2));
        let p1 = limiter.acquire().await;
        let _p2 = limiter.acquire().await;

        let shrink = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move {
                limiter.set_capacity(1).await;
            })
        };

        // Both permits are held: the shrink cannot complete yet.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!shrink.is_finished());
        assert_eq!(limiter.capacity(), 2);

        drop(p1);
        timeout(Duration::from_secs(1), shrink)
            .await
            .expect("shrink did not complete after payback")
            .unwrap();
        assert_eq!(limiter.capacity(), 1);
        // One permit still held against the new capacity of 1.
        assert_eq!(limiter.available(), 0);
    }

    #[tokio::test]
    async fn test_shrink_does_not_cancel_holders() {
        let limiter = Arc::new(AdaptiveLimiter::new(3));
        let held = limiter.acquire().await;
        limiter.set_capacity(1).await;
        // The in-flight holder keeps its permit; only future admissions shrink.
        assert_eq!(limiter.capacity(), 1);
        drop(held);
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test]
    async fn test_capacity_can_exceed_initial() {
        let limiter = AdaptiveLimiter::new(2);
        limiter.set_capacity(50).await;
        assert_eq!(limiter.capacity(), 50);
        assert_eq!(limiter.available(), 50);
    }

    #[tokio::test]
    async fn test_outstanding_never_exceeds_capacity_during_shrink() {
        let limiter = Arc::new(AdaptiveLimiter::new(8));
        let outstanding = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::new();
        for _ in 0..32 {
            let limiter = Arc::clone(&limiter);
            let outstanding = Arc::clone(&outstanding);
            workers.push(tokio::spawn(async move {
                for _ in 0..10 {
                    let permit = limiter.acquire().await;
                    let now = outstanding.fetch_add(1, Ordering::SeqCst) + 1;
                    // capacity() only moves to the shrunk value after the
                    // drain completes, so this holds at every instant.
                    assert!(now <= limiter.capacity(), "{now} permits outstanding");
                    tokio::task::yield_now().await;
                    outstanding.fetch_sub(1, Ordering::SeqCst);
                    drop(permit);
                }
            }));
        }

        let resizer = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move {
                limiter.set_capacity(2).await;
                tokio::task::yield_now().await;
                limiter.set_capacity(6).await;
                limiter.set_capacity(1).await;
            })
        };

        for worker in workers {
            worker.await.unwrap();
        }
        resizer.await.unwrap();
        assert_eq!(limiter.capacity(), 1);
    }
}
