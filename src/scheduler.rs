//! Scheduler: moves admitted work from the priority queue to a bounded
//! worker pool, retries transient failures with backoff, and records wait
//! and processing time per task. Bounded concurrency via a semaphore,
//! generalized to autoscaling between `minConcurrency` and
//! `maxConcurrency`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;

/// Per-task timing recorded by the scheduler (: `waitTime =
/// dequeueTs - enqueueTs`, `processingTime = completeTs - dequeueTs`).
#[derive(Debug, Clone, Copy)]
pub struct TaskMetrics {
    pub wait_time: Duration,
    pub processing_time: Duration,
}

/// Classifies a failure as retryable so the scheduler knows whether to
/// re-schedule it.
pub trait RetryClassifier: Send + Sync {
    fn is_retryable(&self, error: &str) -> bool;
}

pub struct DefaultRetryClassifier;
impl RetryClassifier for DefaultRetryClassifier {
    fn is_retryable(&self, error: &str) -> bool {
        !error.contains("PolicyBlocked") && !error.contains("QuotaExceeded")
    }
}

/// Bounded worker pool with autoscaling concurrency. A
/// `tokio::sync::Semaphore` enforces the live concurrency cap; `permits`
/// tracks how many permits are currently issued, resized up/down between
/// `min_concurrency` and `max_concurrency` as utilization crosses 0.7/0.2.
pub struct Scheduler {
    semaphore: Arc<Semaphore>,
    min_concurrency: usize,
    max_concurrency: usize,
    current_concurrency: AtomicUsize,
    max_retries: u32,
    retry_delay: Duration,
    backoff: f64,
    max_delay: Duration,
}

impl Scheduler {
    pub fn new(min_concurrency: usize, max_concurrency: usize, max_retries: u32, retry_delay: Duration, backoff: f64, max_delay: Duration) -> Self {
        let start = min_concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(start)),
            min_concurrency: start,
            max_concurrency: max_concurrency.max(start),
            current_concurrency: AtomicUsize::new(start),
            max_retries,
            retry_delay,
            backoff,
            max_delay,
        }
    }

    pub fn current_concurrency(&self) -> usize {
        self.current_concurrency.load(Ordering::Relaxed)
    }

    /// Scales up when queue utilization sustains above 0.7 with a low
    /// error rate, down when it sustains below 0.2.
    pub fn autoscale(&self, queue_utilization: f64, error_rate: f64) {
        let current = self.current_concurrency.load(Ordering::Relaxed);
        if queue_utilization > 0.7 && error_rate < 0.5 && current < self.max_concurrency {
            self.semaphore.add_permits(1);
            self.current_concurrency.fetch_add(1, Ordering::Relaxed);
        } else if queue_utilization < 0.2 && current > self.min_concurrency {
            if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
                permit.forget();
                self.current_concurrency.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }

    /// Runs `work` under a concurrency permit, retrying on a retryable
    /// failure up to `max_retries` times with `retryDelay * backoff^attempt`
    /// (capped at `max_delay`). Returns the task's timing alongside the
    /// final result.
    pub async fn run<F, Fut, T>(
        &self,
        enqueued_at: Instant,
        dequeued_at: Instant,
        classifier: &dyn RetryClassifier,
        mut work: F,
    ) -> (Result<T, String>, TaskMetrics)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, String>>,
    {
        let _permit = self.semaphore.acquire().await.expect("semaphore never closed");
        let wait_time = dequeued_at.duration_since(enqueued_at);
        let processing_started = Instant::now();

        let mut attempt = 0u32;
        let result = loop {
            let outcome = work().await;
            match outcome {
                Ok(value) => break Ok(value),
                Err(err) => {
                    if attempt >= self.max_retries || !classifier.is_retryable(&err) {
                        break Err(err);
                    }
                    let delay = self.retry_delay.mul_f64(self.backoff.powi(attempt as i32)).min(self.max_delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        };

        let processing_time = processing_started.elapsed();
        (result, TaskMetrics { wait_time, processing_time })
    }
}
