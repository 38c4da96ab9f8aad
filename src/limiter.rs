//! Bounded concurrency for outbound API requests.
//!
//! A [`ConcurrencyLimiter`] wraps a tokio [`Semaphore`] and counts tasks in
//! flight. Each acquired [`LimiterPermit`] frees its slot when dropped, so a
//! slot is returned whether the guarded request succeeds, fails, or is
//! cancelled mid-await.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Default)]
struct Counters {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
}

/// Cloneable handle; clones share the same slots.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    counters: Arc<Counters>,
    limit: usize,
}

/// One occupied slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct LimiterPermit {
    _permit: OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl Drop for LimiterPermit {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.counters.completed.fetch_add(1, Ordering::SeqCst);
    }
}

impl ConcurrencyLimiter {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            counters: Arc::new(Counters::default()),
            limit,
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<LimiterPermit> {
        let permit = Arc::clone(&self.semaphore).acquire_owned().await?;
        let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(now, Ordering::SeqCst);
        Ok(LimiterPermit {
            _permit: permit,
            counters: Arc::clone(&self.counters),
        })
    }

    /// Run `fut` while holding a slot.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        let _permit = self.acquire().await?;
        Ok(fut.await)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously held slots observed.
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    /// Number of permits released so far.
    pub fn completed(&self) -> usize {
        self.counters.completed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::time::Duration;

    #[tokio::test]
    async fn never_exceeds_limit_and_all_tasks_finish() {
        let limiter = ConcurrencyLimiter::new(10);
        let tasks = (0..25).map(|i| {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                limiter
                    .run(async {
                        assert!(limiter.in_flight() <= 10);
                        tokio::time::sleep(Duration::from_millis(10 + (i % 5) as u64)).await;
                        i
                    })
                    .await
                    .unwrap()
            })
        });
        let results: Vec<usize> = join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(results.len(), 25);
        assert!(limiter.peak() <= 10, "peak was {}", limiter.peak());
        assert_eq!(limiter.peak(), 10);
        assert_eq!(limiter.completed(), 25);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn slot_is_released_when_task_fails() {
        let limiter = ConcurrencyLimiter::new(1);
        let failed: Result<Result<(), &str>> = limiter.run(async { Err("boom") }).await;
        assert!(failed.unwrap().is_err());
        assert_eq!(limiter.in_flight(), 0);
        // the single slot is free again
        let ok = tokio::time::timeout(Duration::from_millis(200), limiter.acquire()).await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn slot_is_released_when_task_is_cancelled() {
        let limiter = ConcurrencyLimiter::new(1);
        let pending = limiter.run(tokio::time::sleep(Duration::from_secs(60)));
        let _ = tokio::time::timeout(Duration::from_millis(20), pending).await;
        assert_eq!(limiter.in_flight(), 0);
        assert!(limiter.acquire().await.is_ok());
    }
}
