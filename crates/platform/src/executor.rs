//! Bounded worker pool for fire-and-forget dispatch.
//!
//! Tasks queue on a bounded channel drained by a fixed number of workers.
//! When the queue is full, submission backs off and retries; once the retry
//! budget is spent the task is rejected. Shutdown runs every task already
//! queued, bounded by [`DRAIN_TIMEOUT`].

use crate::backoff::{self, BackoffPolicy};
use futures::future::{join_all, BoxFuture};
use notifier_core::config::ExecutorConfig;
use notifier_core::{NotifyError, NotifyResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub type Task = BoxFuture<'static, ()>;

/// Longest `shutdown` waits for queued tasks before abandoning them.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct WorkerPool {
    tx: mpsc::Sender<Task>,
    policy: BackoffPolicy,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `workers` tasks on the current runtime.
    pub fn start(workers: usize, queue_capacity: usize, policy: BackoffPolicy) -> Self {
        let capacity = queue_capacity.max(1);
        let (tx, rx) = mpsc::channel::<Task>(capacity);
        let rx = Arc::new(Mutex::new(rx));
        let cancel = CancellationToken::new();

        let workers: Vec<_> = (0..workers.max(1))
            .map(|id| tokio::spawn(run_worker(id, rx.clone())))
            .collect();

        info!(
            workers = workers.len(),
            queue_capacity = capacity,
            max_retries = policy.max_retries,
            "Worker pool started"
        );

        Self {
            tx,
            policy,
            cancel,
            workers,
        }
    }

    pub fn from_config(config: &ExecutorConfig) -> Self {
        let policy = BackoffPolicy::exponential(
            config.max_retries,
            Duration::from_millis(config.initial_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.backoff_factor,
        );
        Self::start(config.workers, config.queue_capacity, policy)
    }

    /// Enqueues `task`, backing off while the queue is full.
    pub async fn submit<F>(&self, task: F) -> NotifyResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut task: Task = Box::pin(task);

        for retry in 0..=self.policy.max_retries {
            if retry > 0 {
                let delay = self.policy.delay_for(retry - 1);
                debug!(retry, delay_ms = delay.as_millis() as u64, "Queue full, backing off");
                if backoff::wait(delay, &self.cancel).await.is_err() {
                    metrics::counter!("executor.rejected", "reason" => "cancelled").increment(1);
                    return Err(NotifyError::SubmissionRejected(
                        "Task execution interrupted".to_string(),
                    ));
                }
            }

            match self.tx.try_send(task) {
                Ok(()) => {
                    metrics::counter!("executor.submitted").increment(1);
                    return Ok(());
                }
                Err(mpsc::error::TrySendError::Full(returned)) => task = returned,
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    metrics::counter!("executor.rejected", "reason" => "closed").increment(1);
                    return Err(NotifyError::SubmissionRejected(
                        "worker pool is shut down".to_string(),
                    ));
                }
            }
        }

        warn!(
            max_retries = self.policy.max_retries,
            "Task rejected after max retries"
        );
        metrics::counter!("executor.rejected", "reason" => "exhausted").increment(1);
        Err(NotifyError::SubmissionRejected(
            "Task rejected after max retries".to_string(),
        ))
    }

    /// Tasks waiting in the queue.
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Aborts pending backoff waits, closes the queue and waits for the
    /// workers to run what was already accepted.
    pub async fn shutdown(self) {
        self.shutdown_within(DRAIN_TIMEOUT).await
    }

    pub async fn shutdown_within(self, grace: Duration) {
        self.cancel.cancel();
        let pending = self.queued();
        drop(self.tx);
        info!(pending, "Worker pool draining");

        let aborts: Vec<_> = self.workers.iter().map(JoinHandle::abort_handle).collect();
        match tokio::time::timeout(grace, join_all(self.workers)).await {
            Ok(_) => info!("Worker pool stopped"),
            Err(_) => {
                warn!(grace_ms = grace.as_millis() as u64, "Worker pool drain timed out, abandoning queued tasks");
                metrics::counter!("executor.abandoned").increment(1);
                for handle in aborts {
                    handle.abort();
                }
            }
        }
    }
}

/// Runs tasks until the queue is closed and empty.
async fn run_worker(id: usize, rx: Arc<Mutex<mpsc::Receiver<Task>>>) {
    loop {
        let next = rx.lock().await.recv().await;
        match next {
            Some(task) => task.await,
            None => break,
        }
    }
    debug!(worker = id, "Worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn policy(retries: u32) -> BackoffPolicy {
        BackoffPolicy::exponential(
            retries,
            Duration::from_millis(1000),
            Duration::from_millis(10_000),
            2.0,
        )
    }

    #[tokio::test]
    async fn test_submitted_tasks_run() {
        let pool = WorkerPool::start(2, 8, policy(0));
        let counter = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(Notify::new());

        for _ in 0..4 {
            let counter = counter.clone();
            let done = done.clone();
            pool.submit(async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 3 {
                    done.notify_one();
                }
            })
            .await
            .unwrap();
        }

        done.notified().await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        pool.shutdown().await;
    }

    /// One worker parked on `gate`, one task queued behind it: the queue is full.
    async fn saturated_pool(retries: u32, gate: Arc<Notify>) -> WorkerPool {
        let pool = WorkerPool::start(1, 1, policy(retries));
        let started = Arc::new(Notify::new());
        {
            let started = started.clone();
            let gate = gate.clone();
            pool.submit(async move {
                started.notify_one();
                gate.notified().await;
            })
            .await
            .unwrap();
        }
        started.notified().await;
        pool.submit(async {}).await.unwrap();
        assert_eq!(pool.queued(), 1);
        pool
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_after_exhausting_retries() {
        let gate = Arc::new(Notify::new());
        let pool = saturated_pool(5, gate.clone()).await;

        let start = tokio::time::Instant::now();
        let result = pool.submit(async {}).await;
        assert!(matches!(result, Err(NotifyError::SubmissionRejected(_))));
        // 1 + 2 + 4 + 8 + 10 seconds of backoff.
        assert!(start.elapsed() >= Duration::from_secs(25));

        gate.notify_one();
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepted_once_queue_drains() {
        let gate = Arc::new(Notify::new());
        let pool = saturated_pool(5, gate.clone()).await;

        let releaser = gate.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            releaser.notify_one();
        });

        pool.submit(async {}).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_runs_every_accepted_task() {
        let pool = WorkerPool::start(1, 16, policy(0));
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let counter = counter.clone();
            pool.submit(async move {
                tokio::task::yield_now().await;
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        }

        pool.shutdown().await;
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_gives_up_after_grace_period() {
        let gate = Arc::new(Notify::new());
        let pool = saturated_pool(0, gate).await;

        let start = tokio::time::Instant::now();
        pool.shutdown_within(Duration::from_secs(5)).await;
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_rejects_pending_submission() {
        let gate = Arc::new(Notify::new());
        let pool = saturated_pool(5, gate.clone()).await;

        let token = pool.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });

        let start = tokio::time::Instant::now();
        let result = pool.submit(async {}).await;
        assert!(matches!(result, Err(NotifyError::SubmissionRejected(_))));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
