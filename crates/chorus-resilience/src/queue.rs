//! Bounded-concurrency, rate-limited request queue.
//!
//! Tasks are started in FIFO submission order, in batches of at most
//! `concurrency` jobs. Every job waits for a token from the queue's own
//! [`TokenBucket`] before it runs, and each settles its own result: one
//! failing task never cancels its siblings.
//!
//! The queue has no maximum depth. Backpressure is the caller's job.
//!
//! ```rust,ignore
//! let queue = RequestQueue::new(2, 5.0);
//! let id = queue.add(|| async { api.send("hello").await }).await?;
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, join_all};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::ResilienceError;
use crate::token_bucket::TokenBucket;

/// A type-erased queued job. Its result travels through a oneshot channel.
type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Interval used by [`RequestQueue::drain`] to poll for idleness.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Queue configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueConfig {
    /// Maximum number of jobs running at once.
    pub concurrency: usize,
    /// Jobs started per second. Also the bucket's burst capacity, which is
    /// never below one.
    pub rate: f64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            rate: 30.0,
        }
    }
}

struct QueueState {
    pending: VecDeque<Job>,
    running: usize,
}

struct QueueInner {
    concurrency: usize,
    bucket: TokenBucket,
    state: Mutex<QueueState>,
}

/// Concurrency-capped, rate-limited task executor.
///
/// `running <= concurrency` at all times. Cloning yields another handle to the
/// same queue.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<QueueInner>,
}

impl RequestQueue {
    /// Creates a queue. `concurrency` is raised to at least one.
    pub fn new(concurrency: usize, rate: f64) -> Self {
        Self::from_config(QueueConfig { concurrency, rate })
    }

    /// Creates a queue from a [`QueueConfig`].
    pub fn from_config(config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                concurrency: config.concurrency.max(1),
                bucket: TokenBucket::new(config.rate, config.rate),
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    running: 0,
                }),
            }),
        }
    }

    /// Returns the concurrency limit.
    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    /// Returns the number of jobs waiting to start.
    pub fn len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Returns true if no job is waiting to start.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of jobs currently running.
    pub fn running(&self) -> usize {
        self.inner.state.lock().running
    }

    /// Enqueues a task and waits for its outcome.
    ///
    /// The task's own `Ok`/`Err` is returned untouched. If the job is lost
    /// before it reports back (its task panicked), the error is a
    /// [`ResilienceError::TaskDropped`] converted into `E`.
    pub async fn add<F, Fut, T, E>(&self, task: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<ResilienceError> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            Box::pin(async move {
                let _ = tx.send(task().await);
            })
        });

        {
            let mut state = self.inner.state.lock();
            state.pending.push_back(job);
            trace!(pending = state.pending.len(), "Task enqueued");
        }
        self.process();

        rx.await
            .map_err(|_| ResilienceError::task_dropped("queued task ended without a result"))?
    }

    /// Waits until nothing is pending and nothing is running.
    pub async fn drain(&self) {
        loop {
            {
                let state = self.inner.state.lock();
                if state.pending.is_empty() && state.running == 0 {
                    return;
                }
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    /// Starts the next batch if there is room for one.
    fn process(&self) {
        let batch: Vec<Job> = {
            let mut state = self.inner.state.lock();
            let room = self.inner.concurrency.saturating_sub(state.running);
            let size = room.min(state.pending.len());
            if size == 0 {
                return;
            }
            state.running += size;
            state.pending.drain(..size).collect()
        };

        let size = batch.len();
        debug!(batch = size, "Starting queued batch");

        let queue = self.clone();
        tokio::spawn(async move {
            let jobs = batch.into_iter().map(|job| {
                let queue = queue.clone();
                async move {
                    queue.inner.bucket.wait_for_token().await;
                    // A panicking job only loses its own result.
                    let _ = tokio::spawn(job()).await;
                }
            });
            join_all(jobs).await;

            queue.inner.state.lock().running -= size;
            queue.process();
        });
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RequestQueue")
            .field("concurrency", &self.inner.concurrency)
            .field("pending", &state.pending.len())
            .field("running", &state.running)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Failed(&'static str),
        Resilience(ResilienceError),
    }

    impl From<ResilienceError> for TestError {
        fn from(err: ResilienceError) -> Self {
            Self::Resilience(err)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_never_exceeded() {
        let queue = RequestQueue::new(2, 1000.0);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..5)
            .map(|i| {
                let queue = queue.clone();
                let active = active.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    queue
                        .add(move || async move {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                            Ok::<_, TestError>(i)
                        })
                        .await
                })
            })
            .collect();

        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap().unwrap());
        }
        results.sort_unstable();

        assert_eq!(results, vec![0, 1, 2, 3, 4]);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(queue.running(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_does_not_cancel_siblings() {
        let queue = RequestQueue::new(3, 1000.0);

        let ok = queue.add(|| async { Ok::<_, TestError>("ok") });
        let failed = queue.add(|| async { Err::<&str, _>(TestError::Failed("boom")) });
        let (ok, failed) = tokio::join!(ok, failed);

        assert_eq!(ok, Ok("ok"));
        assert_eq!(failed, Err(TestError::Failed("boom")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_jobs_are_rate_limited() {
        let queue = RequestQueue::new(10, 2.0);
        let start = Instant::now();

        let jobs: Vec<_> = (0..3)
            .map(|_| queue.add(|| async { Ok::<_, TestError>(()) }))
            .collect();
        for result in futures::future::join_all(jobs).await {
            result.unwrap();
        }

        // Two tokens of burst, the third job waits half a second.
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sub_one_rate_still_runs_jobs() {
        let queue = RequestQueue::new(1, 0.5);
        let start = Instant::now();

        let first = queue.add(|| async { Ok::<_, TestError>(1) }).await;
        let second = queue.add(|| async { Ok::<_, TestError>(2) }).await;

        assert_eq!(first, Ok(1));
        assert_eq!(second, Ok(2));
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_idle() {
        let queue = RequestQueue::new(1, 1000.0);
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let queue = queue.clone();
            let done = done.clone();
            tokio::spawn(async move {
                queue
                    .add(move || async move {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        done.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, TestError>(())
                    })
                    .await
            });
        }
        // Let the spawned submitters enqueue.
        tokio::time::sleep(Duration::from_millis(1)).await;

        queue.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_task_reports_dropped() {
        let queue = RequestQueue::new(1, 1000.0);
        let result: Result<(), TestError> = queue
            .add(|| async {
                if true {
                    panic!("task exploded");
                }
                Ok(())
            })
            .await;

        assert!(matches!(
            result,
            Err(TestError::Resilience(ResilienceError::TaskDropped { .. }))
        ));
        queue.drain().await;
    }
}
