//! Worker pool for processing claim-verification jobs.
//!
//! A pool hosts N concurrent slots, each an independent async task that
//! claims jobs from the queue and runs them through a [`JobProcessor`].
//! At most one pool is active per process: `start` on a running pool is a
//! logged no-op, never an error, and `stop` is idempotent the same way.
//!
//! Progress flows through a [`ProgressSink`] that enforces monotonically
//! non-decreasing values before persisting them on the job record.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::PipelineStepError;
use crate::metrics::MetricsCollector;

use super::job::JobRecord;
use super::queue::{JobQueue, QueueError, RetryDisposition};
use super::store::JobStore;

/// Hard upper bound on pool concurrency.
pub const MAX_CONCURRENCY: usize = 10;

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A queue operation failed.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Workers did not stop within the shutdown timeout.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Receives progress checkpoints from a running pipeline.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Reports a progress value in 0-100. Implementations must never let a
    /// lower value overwrite a higher one.
    async fn report(&self, progress: u8);
}

/// Progress sink that drops all reports. For inline runs and tests.
pub struct NoopProgress;

#[async_trait]
impl ProgressSink for NoopProgress {
    async fn report(&self, _progress: u8) {}
}

/// Persists progress on the job record, enforcing monotonicity.
pub struct QueueProgress {
    store: Arc<dyn JobStore>,
    job_id: Uuid,
    last: AtomicU8,
}

impl QueueProgress {
    /// Creates a sink for the given job.
    pub fn new(store: Arc<dyn JobStore>, job_id: Uuid) -> Self {
        Self {
            store,
            job_id,
            last: AtomicU8::new(0),
        }
    }
}

#[async_trait]
impl ProgressSink for QueueProgress {
    async fn report(&self, progress: u8) {
        let previous = self.last.fetch_max(progress, Ordering::SeqCst);
        if progress < previous {
            // Out-of-order report: suppressed rather than emitted
            return;
        }
        if let Err(e) = self.store.set_progress(self.job_id, progress).await {
            // Progress is advisory; a failed write never aborts the job
            debug!(job_id = %self.job_id, error = %e, "Progress update failed");
        }
    }
}

/// Executes one claimed job. The verification pipeline implements this;
/// tests substitute stubs.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// Runs the pipeline for a job, reporting progress along the way.
    /// Returns the opaque success value stored on the job record.
    async fn process(
        &self,
        job: &JobRecord,
        progress: &dyn ProgressSink,
    ) -> Result<serde_json::Value, PipelineStepError>;
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of concurrent execution slots.
    pub num_workers: usize,
    /// How long an idle slot sleeps before polling the queue again.
    pub poll_interval: Duration,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 2,
            poll_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Sets the idle poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Pool of workers processing jobs from a shared queue.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<JobQueue>,
    processor: Arc<dyn JobProcessor>,
    desired_workers: AtomicUsize,
    shutdown_tx: Mutex<Option<broadcast::Sender<()>>>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    is_running: AtomicBool,
}

impl WorkerPool {
    /// Creates a new (stopped) worker pool.
    pub fn new(
        config: WorkerPoolConfig,
        queue: Arc<JobQueue>,
        processor: Arc<dyn JobProcessor>,
    ) -> Self {
        let desired = config.num_workers.clamp(1, MAX_CONCURRENCY);
        Self {
            config,
            queue,
            processor,
            desired_workers: AtomicUsize::new(desired),
            shutdown_tx: Mutex::new(None),
            worker_handles: Mutex::new(Vec::new()),
            is_running: AtomicBool::new(false),
        }
    }

    /// Starts the pool.
    ///
    /// Idempotent: calling while already running logs and returns success
    /// without creating a second set of slots. Before spawning, jobs stuck
    /// past the store deadline are recovered through the retry policy.
    pub async fn start(&self) -> Result<(), PoolError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            info!("Worker pool is already running");
            return Ok(());
        }

        match self.queue.recover_stale().await {
            Ok(recovered) if recovered > 0 => {
                info!(recovered, "Recovered stale jobs before starting workers");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Failed to recover stale jobs");
            }
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        let num_workers = self.desired_workers.load(Ordering::SeqCst);

        let mut handles = self.worker_handles.lock().expect("pool lock poisoned");
        for i in 0..num_workers {
            let worker = Worker {
                id: format!("worker-{i}"),
                queue: Arc::clone(&self.queue),
                processor: Arc::clone(&self.processor),
                shutdown_rx: shutdown_tx.subscribe(),
                poll_interval: self.config.poll_interval,
                collector: MetricsCollector::new(),
            };
            handles.push(tokio::spawn(worker.run()));
        }
        drop(handles);

        *self.shutdown_tx.lock().expect("pool lock poisoned") = Some(shutdown_tx);
        info!(num_workers, "Worker pool started");
        Ok(())
    }

    /// Stops the pool: slots finish their current job and pick up no new
    /// ones. Idempotent when not running.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::ShutdownTimeout`] when workers do not stop
    /// within the configured timeout; the pool is still marked stopped.
    pub async fn stop(&self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            debug!("Worker pool is not running");
            return Ok(());
        }

        info!("Stopping worker pool");
        if let Some(tx) = self.shutdown_tx.lock().expect("pool lock poisoned").take() {
            // Send error means all receivers are gone, which is fine
            let _ = tx.send(());
        }

        let handles: Vec<JoinHandle<()>> = self
            .worker_handles
            .lock()
            .expect("pool lock poisoned")
            .drain(..)
            .collect();

        let join_all = futures::future::join_all(handles);
        match tokio::time::timeout(self.config.shutdown_timeout, join_all).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!(error = %e, "Worker task panicked during shutdown");
                    }
                }
                self.is_running.store(false, Ordering::SeqCst);
                info!("Worker pool stopped");
                Ok(())
            }
            Err(_) => {
                self.is_running.store(false, Ordering::SeqCst);
                Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout))
            }
        }
    }

    /// Records a new desired concurrency, clamped to [1, 10].
    ///
    /// A running pool is never resized in place; the value is honored the
    /// next time the pool starts.
    pub fn scale(&self, num_workers: usize) {
        let target = num_workers.clamp(1, MAX_CONCURRENCY);
        let previous = self.desired_workers.swap(target, Ordering::SeqCst);
        if previous != target {
            if self.is_running.load(Ordering::SeqCst) {
                info!(
                    current = previous,
                    target, "Concurrency change recorded; applies on next pool start"
                );
            } else {
                info!(current = previous, target, "Concurrency updated");
            }
        }
    }

    /// Returns whether the pool is running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Returns the desired concurrency.
    pub fn desired_workers(&self) -> usize {
        self.desired_workers.load(Ordering::SeqCst)
    }

    /// Returns the queue this pool draws from.
    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }
}

/// A single execution slot.
struct Worker {
    id: String,
    queue: Arc<JobQueue>,
    processor: Arc<dyn JobProcessor>,
    shutdown_rx: broadcast::Receiver<()>,
    poll_interval: Duration,
    collector: MetricsCollector,
}

impl Worker {
    /// Main loop: claim, process, repeat until shutdown.
    async fn run(mut self) {
        info!(worker_id = %self.id, "Worker started");

        loop {
            // A signal between jobs stops the slot before the next claim
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => break,
                Err(broadcast::error::TryRecvError::Lagged(_)) => break,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            match self.queue.claim().await {
                Ok(Some(job)) => {
                    self.process_job(job).await;
                }
                Ok(None) => {
                    // Queue empty or paused: idle until the next poll or
                    // shutdown, whichever comes first
                    tokio::select! {
                        _ = self.shutdown_rx.recv() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Failed to claim job");
                    tokio::select! {
                        _ = self.shutdown_rx.recv() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Runs one claimed job end-to-end and settles it with the queue.
    async fn process_job(&self, job: JobRecord) {
        let job_id = job.id;
        let started = Instant::now();

        info!(
            worker_id = %self.id,
            job_id = %job_id,
            attempt = job.attempts,
            max_attempts = job.max_attempts,
            "Processing job"
        );
        self.collector.inc_active_jobs();

        let progress = QueueProgress::new(Arc::clone(self.queue.store()), job_id);
        let outcome = self.processor.process(&job, &progress).await;
        let duration = started.elapsed();

        self.collector.dec_active_jobs();

        match outcome {
            Ok(result) => {
                if let Err(e) = self.queue.complete_job(&job, result).await {
                    error!(
                        worker_id = %self.id,
                        job_id = %job_id,
                        error = %e,
                        "Failed to mark job complete"
                    );
                    return;
                }
                self.collector.record_job("completed", duration);
                info!(
                    worker_id = %self.id,
                    job_id = %job_id,
                    duration_ms = duration.as_millis() as u64,
                    "Job completed"
                );
            }
            Err(step_error) => {
                warn!(
                    worker_id = %self.id,
                    job_id = %job_id,
                    error = %step_error,
                    "Pipeline attempt failed"
                );

                match self.queue.handle_failure(job, &step_error.to_string()).await {
                    Ok(RetryDisposition::Retried { delay }) => {
                        self.collector.record_job("retried", duration);
                        warn!(
                            worker_id = %self.id,
                            job_id = %job_id,
                            delay_ms = delay.as_millis() as u64,
                            "Job requeued for retry"
                        );
                    }
                    Ok(RetryDisposition::Exhausted) => {
                        self.collector.record_job("failed", duration);
                        error!(
                            worker_id = %self.id,
                            job_id = %job_id,
                            "Job failed permanently"
                        );
                    }
                    Err(e) => {
                        error!(
                            worker_id = %self.id,
                            job_id = %job_id,
                            error = %e,
                            "Failed to apply retry policy"
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineStep;
    use crate::scheduler::health::HealthMonitor;
    use crate::scheduler::job::{BackoffPolicy, ClaimPayload, EnqueueOptions, JobState};
    use crate::scheduler::memory::MemoryJobStore;
    use crate::scheduler::metrics::QueueMetrics;
    use crate::scheduler::queue::QueueConfig;
    use std::collections::HashMap;

    fn test_queue() -> Arc<JobQueue> {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let health = Arc::new(HealthMonitor::new(Arc::clone(&store)));
        Arc::new(JobQueue::new(
            store,
            health,
            Arc::new(QueueMetrics::new()),
            QueueConfig::default().with_default_backoff(BackoffPolicy::fixed(0)),
        ))
    }

    fn fast_config(num_workers: usize) -> WorkerPoolConfig {
        WorkerPoolConfig::new(num_workers)
            .with_poll_interval(Duration::from_millis(10))
            .with_shutdown_timeout(Duration::from_secs(5))
    }

    /// Processor that records how many times each job id was processed.
    struct CountingProcessor {
        seen: Mutex<HashMap<Uuid, usize>>,
        checkpoints: Vec<u8>,
    }

    impl CountingProcessor {
        fn new() -> Self {
            Self {
                seen: Mutex::new(HashMap::new()),
                checkpoints: vec![10, 30, 50, 70, 85, 95, 100],
            }
        }

        fn count(&self, id: Uuid) -> usize {
            self.seen
                .lock()
                .expect("lock poisoned")
                .get(&id)
                .copied()
                .unwrap_or(0)
        }
    }

    #[async_trait]
    impl JobProcessor for CountingProcessor {
        async fn process(
            &self,
            job: &JobRecord,
            progress: &dyn ProgressSink,
        ) -> Result<serde_json::Value, PipelineStepError> {
            *self
                .seen
                .lock()
                .expect("lock poisoned")
                .entry(job.id)
                .or_insert(0) += 1;
            for checkpoint in &self.checkpoints {
                progress.report(*checkpoint).await;
            }
            Ok(serde_json::json!({"verdict": "True"}))
        }
    }

    /// Processor that always fails at the search step.
    struct FailingProcessor;

    #[async_trait]
    impl JobProcessor for FailingProcessor {
        async fn process(
            &self,
            _job: &JobRecord,
            _progress: &dyn ProgressSink,
        ) -> Result<serde_json::Value, PipelineStepError> {
            Err(PipelineStepError::new(
                PipelineStep::Search,
                "connection refused",
            ))
        }
    }

    async fn wait_for<F>(mut predicate: F, timeout: Duration)
    where
        F: FnMut() -> std::pin::Pin<Box<dyn std::future::Future<Output = bool> + 'static>>,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if predicate().await {
                return;
            }
            assert!(Instant::now() < deadline, "condition not met in time");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_pool_processes_jobs_to_completion() {
        let queue = test_queue();
        let processor = Arc::new(CountingProcessor::new());
        let pool = WorkerPool::new(fast_config(2), Arc::clone(&queue), processor.clone());

        let job = queue
            .enqueue(ClaimPayload::text("claim"), EnqueueOptions::default())
            .await
            .expect("enqueue");

        pool.start().await.expect("start");

        let q = Arc::clone(&queue);
        let job_id = job.id;
        wait_for(
            move || {
                let q = Arc::clone(&q);
                Box::pin(async move {
                    q.get_status(job_id)
                        .await
                        .map(|s| s.state == JobState::Completed)
                        .unwrap_or(false)
                })
            },
            Duration::from_secs(5),
        )
        .await;

        let status = queue.get_status(job.id).await.expect("status");
        assert_eq!(status.progress, Some(100));
        assert_eq!(status.result.expect("result")["verdict"], "True");
        assert_eq!(processor.count(job.id), 1);

        pool.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_start_is_idempotent_single_claim_per_job() {
        let queue = test_queue();
        let processor = Arc::new(CountingProcessor::new());
        let pool = WorkerPool::new(fast_config(3), Arc::clone(&queue), processor.clone());

        pool.start().await.expect("first start");
        pool.start().await.expect("second start is a no-op");
        pool.start().await.expect("third start is a no-op");
        assert!(pool.is_running());

        let mut ids = Vec::new();
        for _ in 0..10 {
            let job = queue
                .enqueue(ClaimPayload::text("claim"), EnqueueOptions::default())
                .await
                .expect("enqueue");
            ids.push(job.id);
        }

        let q = Arc::clone(&queue);
        wait_for(
            move || {
                let q = Arc::clone(&q);
                Box::pin(async move {
                    q.stats()
                        .await
                        .map(|s| s.total_jobs_processed == 10)
                        .unwrap_or(false)
                })
            },
            Duration::from_secs(5),
        )
        .await;

        // Repeated starts must not create extra slots: every job was
        // processed exactly once
        for id in ids {
            assert_eq!(processor.count(id), 1);
        }

        pool.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let queue = test_queue();
        let pool = WorkerPool::new(
            fast_config(1),
            Arc::clone(&queue),
            Arc::new(CountingProcessor::new()),
        );

        pool.stop().await.expect("stop before start is a no-op");
        pool.start().await.expect("start");
        pool.stop().await.expect("stop");
        pool.stop().await.expect("second stop is a no-op");
        assert!(!pool.is_running());
    }

    #[tokio::test]
    async fn test_failed_jobs_follow_retry_policy() {
        let queue = test_queue();
        let pool = WorkerPool::new(fast_config(1), Arc::clone(&queue), Arc::new(FailingProcessor));

        let job = queue
            .enqueue(
                ClaimPayload::text("claim"),
                EnqueueOptions::default()
                    .with_attempts(3)
                    .with_backoff(BackoffPolicy::fixed(0)),
            )
            .await
            .expect("enqueue");

        pool.start().await.expect("start");

        let q = Arc::clone(&queue);
        let job_id = job.id;
        wait_for(
            move || {
                let q = Arc::clone(&q);
                Box::pin(async move {
                    q.get_status(job_id)
                        .await
                        .map(|s| s.state == JobState::Failed)
                        .unwrap_or(false)
                })
            },
            Duration::from_secs(5),
        )
        .await;

        let status = queue.get_status(job.id).await.expect("status");
        assert_eq!(
            status.failure_reason.as_deref(),
            Some("search step failed: connection refused")
        );
        // Exactly three attempts were charged
        assert_eq!(queue.metrics().snapshot().errors, 3);

        pool.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_scale_applies_on_next_start() {
        let queue = test_queue();
        let pool = WorkerPool::new(
            fast_config(2),
            Arc::clone(&queue),
            Arc::new(CountingProcessor::new()),
        );

        pool.start().await.expect("start");
        pool.scale(6);
        assert_eq!(pool.desired_workers(), 6);
        // Still running with the original slots; the new value is recorded
        assert!(pool.is_running());

        pool.stop().await.expect("stop");
        pool.start().await.expect("restart");
        assert_eq!(pool.desired_workers(), 6);
        pool.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_scale_clamps_to_bounds() {
        let queue = test_queue();
        let pool = WorkerPool::new(
            fast_config(2),
            Arc::clone(&queue),
            Arc::new(CountingProcessor::new()),
        );

        pool.scale(0);
        assert_eq!(pool.desired_workers(), 1);
        pool.scale(50);
        assert_eq!(pool.desired_workers(), MAX_CONCURRENCY);
    }

    #[tokio::test]
    async fn test_queue_progress_monotonic() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let record = JobRecord::new(
            ClaimPayload::text("x"),
            1,
            3,
            BackoffPolicy::default(),
        );
        store.insert(&record, Duration::ZERO).await.expect("insert");
        store.claim().await.expect("claim");

        let sink = QueueProgress::new(Arc::clone(&store), record.id);
        sink.report(30).await;
        sink.report(10).await;
        sink.report(70).await;

        let stored = store.get(record.id).await.expect("get").expect("record");
        assert_eq!(stored.progress, Some(70));
    }
}
