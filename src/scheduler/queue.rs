//! Priority job queue with admission control and retry policy.
//!
//! `JobQueue` layers the queue contract over a [`JobStore`] backend:
//!
//! - admission control: enqueue fails fast when the store is unhealthy
//!   (circuit breaker) or the outstanding-job bound is reached
//! - priority resolution and clamping
//! - retry policy: failed attempts are rescheduled with backoff until the
//!   attempt budget is exhausted, then the job fails permanently with its
//!   last failure reason retained
//! - status and stats reporting envelopes

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::health::HealthMonitor;
use super::job::{
    resolve_priority, BackoffPolicy, ClaimPayload, EnqueueOptions, JobRecord, JobState,
    DEFAULT_MAX_ATTEMPTS,
};
use super::metrics::QueueMetrics;
use super::store::{JobStore, StoreError};

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The backing store is unreachable or the circuit breaker is open.
    /// Not retried by the queue; the caller may retry later.
    #[error("Backing store unavailable: {0}")]
    Unavailable(String),

    /// The outstanding-job bound was reached. The caller must back off.
    #[error("Queue capacity exceeded: {current}/{max} jobs outstanding")]
    CapacityExceeded { current: usize, max: usize },

    /// The job id is unknown to the store.
    #[error("Job {0} not found")]
    NotFound(Uuid),

    /// A store operation failed.
    #[error("Store operation failed: {0}")]
    Store(#[from] StoreError),
}

/// Configuration for the job queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum outstanding jobs (waiting + active), checked at admission.
    pub max_queue_size: usize,
    /// Default attempt budget when the submission does not override it.
    pub default_max_attempts: u32,
    /// Default retry backoff when the submission does not override it.
    pub default_backoff: BackoffPolicy,
    /// Retained completed jobs; older ones are dropped by the sweep.
    pub completed_retention: usize,
    /// Retained failed jobs; older ones are dropped by the sweep.
    pub failed_retention: usize,
    /// Store-level deadline: jobs active longer than this are fed back
    /// through the retry policy by the stale-recovery pass.
    pub job_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            default_backoff: BackoffPolicy::default(),
            completed_retention: 100,
            failed_retention: 50,
            job_timeout: Duration::from_secs(300),
        }
    }
}

impl QueueConfig {
    /// Sets the outstanding-job bound.
    pub fn with_max_queue_size(mut self, max: usize) -> Self {
        self.max_queue_size = max;
        self
    }

    /// Sets the default attempt budget.
    pub fn with_default_max_attempts(mut self, attempts: u32) -> Self {
        self.default_max_attempts = attempts;
        self
    }

    /// Sets the default backoff policy.
    pub fn with_default_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.default_backoff = backoff;
        self
    }

    /// Sets the job deadline.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }
}

/// What the retry policy decided for a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    /// The job was rescheduled with the given delay.
    Retried { delay: Duration },
    /// Attempts are exhausted; the job is permanently failed.
    Exhausted,
}

/// Status envelope returned to callers polling a job.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// The job id.
    pub job_id: Uuid,
    /// Lifecycle state (`unknown` for repaired records, reported as
    /// best-effort pending).
    pub state: JobState,
    /// Last reported progress, unset until the job is first claimed.
    pub progress: Option<u8>,
    /// Opaque success value, set when completed.
    pub result: Option<serde_json::Value>,
    /// Terminal failure reason, set when failed.
    pub failure_reason: Option<String>,
    /// When the job was enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// When the current (or last) attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Wall-clock milliseconds from enqueue to terminal state.
    pub time_to_complete_ms: Option<i64>,
}

/// Stats envelope combining store counts and process metrics.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatsReport {
    /// Jobs waiting to be claimed.
    pub waiting: usize,
    /// Jobs currently being processed.
    pub active: usize,
    /// Retained completed jobs.
    pub completed: usize,
    /// Retained failed jobs.
    pub failed: usize,
    /// All tracked jobs.
    pub total: usize,
    /// Jobs completed successfully since process start.
    pub total_jobs_processed: u64,
    /// Jobs failed permanently since process start.
    pub total_jobs_failed: u64,
    /// total_jobs_failed / terminal jobs, as a percentage.
    pub failure_rate: f64,
    /// Rolling average processing time in milliseconds.
    pub average_processing_ms: u64,
    /// (waiting + active) / max_queue_size, as a percentage.
    pub utilization: f64,
    /// The configured outstanding-job bound.
    pub max_queue_size: usize,
    /// Most recent queue-size samples (up to 20), oldest first.
    pub queue_size_history: Vec<usize>,
    /// Failed attempts, including retried ones.
    pub error_count: u64,
    /// When a job last reached a terminal state.
    pub last_processed_at: Option<DateTime<Utc>>,
}

/// Durable, priority-ordered job queue.
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    health: Arc<HealthMonitor>,
    metrics: Arc<QueueMetrics>,
    config: QueueConfig,
    accepting: AtomicBool,
}

impl JobQueue {
    /// Creates a queue over the given store.
    pub fn new(
        store: Arc<dyn JobStore>,
        health: Arc<HealthMonitor>,
        metrics: Arc<QueueMetrics>,
        config: QueueConfig,
    ) -> Self {
        Self {
            store,
            health,
            metrics,
            config,
            accepting: AtomicBool::new(true),
        }
    }

    /// Returns the backing store.
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Returns the injected metrics.
    pub fn metrics(&self) -> &Arc<QueueMetrics> {
        &self.metrics
    }

    /// Returns the health monitor.
    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    /// Returns the queue configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Enqueues a new job.
    ///
    /// # Errors
    ///
    /// - [`QueueError::Unavailable`] when admissions are closed or the store
    ///   is unhealthy per the circuit breaker
    /// - [`QueueError::CapacityExceeded`] when `waiting + active` has
    ///   reached the configured bound
    pub async fn enqueue(
        &self,
        payload: ClaimPayload,
        options: EnqueueOptions,
    ) -> Result<JobRecord, QueueError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable(
                "queue is shutting down".to_string(),
            ));
        }

        if !self.health.check().await {
            return Err(QueueError::Unavailable(
                "store health check failed, please try again later".to_string(),
            ));
        }

        let counts = self.store.counts().await?;
        let outstanding = counts.outstanding();
        if outstanding >= self.config.max_queue_size {
            return Err(QueueError::CapacityExceeded {
                current: outstanding,
                max: self.config.max_queue_size,
            });
        }

        let priority = resolve_priority(&payload, options.priority);
        let record = JobRecord::new(
            payload,
            priority,
            options.attempts.unwrap_or(self.config.default_max_attempts),
            options.backoff.unwrap_or(self.config.default_backoff),
        );

        self.store
            .insert(&record, options.delay.unwrap_or(Duration::ZERO))
            .await?;
        self.metrics.record_queue_size(outstanding + 1);

        info!(job_id = %record.id, priority = record.priority, "Job enqueued");
        Ok(record)
    }

    /// Claims the next eligible job for a worker slot.
    pub async fn claim(&self) -> Result<Option<JobRecord>, StoreError> {
        self.store.claim().await
    }

    /// Marks a claimed job completed with its result.
    pub async fn complete_job(
        &self,
        record: &JobRecord,
        result: serde_json::Value,
    ) -> Result<(), QueueError> {
        self.store.complete(record.id, result).await?;

        let duration = record
            .started_at
            .map(|started| (Utc::now() - started).to_std().unwrap_or_default())
            .unwrap_or_default();
        self.metrics.record_completion(duration);
        Ok(())
    }

    /// Applies the retry policy to a failed attempt.
    ///
    /// Within the attempt budget the job is rescheduled with its backoff
    /// delay; otherwise it fails permanently with `reason` retained.
    pub async fn handle_failure(
        &self,
        record: JobRecord,
        reason: &str,
    ) -> Result<RetryDisposition, QueueError> {
        self.metrics.record_error();

        if record.has_attempts_left() {
            let delay = record.backoff.delay_for(record.attempts);
            self.store.retry(&record, delay).await?;
            debug!(
                job_id = %record.id,
                attempt = record.attempts,
                delay_ms = delay.as_millis() as u64,
                "Job rescheduled for retry"
            );
            return Ok(RetryDisposition::Retried { delay });
        }

        self.store.fail(record.id, reason).await?;
        let duration = record
            .started_at
            .map(|started| (Utc::now() - started).to_std().unwrap_or_default())
            .unwrap_or_default();
        self.metrics.record_failure(duration);
        warn!(job_id = %record.id, reason, "Job failed permanently");
        Ok(RetryDisposition::Exhausted)
    }

    /// Returns the status envelope for a job.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] when the id is unknown to the store.
    pub async fn get_status(&self, id: Uuid) -> Result<StatusReport, QueueError> {
        let record = self.store.get(id).await?.ok_or(QueueError::NotFound(id))?;

        Ok(StatusReport {
            job_id: record.id,
            state: record.state,
            progress: record.progress,
            result: record.result,
            failure_reason: record.failure_reason,
            enqueued_at: record.enqueued_at,
            started_at: record.started_at,
            finished_at: record.finished_at,
            time_to_complete_ms: record
                .finished_at
                .map(|finished| (finished - record.enqueued_at).num_milliseconds()),
        })
    }

    /// Returns the combined stats envelope.
    pub async fn stats(&self) -> Result<QueueStatsReport, QueueError> {
        let counts = self.store.counts().await?;
        let snapshot = self.metrics.snapshot();

        let utilization = if self.config.max_queue_size > 0 {
            (counts.outstanding() as f64 / self.config.max_queue_size as f64 * 100.0).round()
        } else {
            0.0
        };

        let history_tail = snapshot.size_history.len().saturating_sub(20);

        Ok(QueueStatsReport {
            waiting: counts.waiting,
            active: counts.active,
            completed: counts.completed,
            failed: counts.failed,
            total: counts.total(),
            total_jobs_processed: snapshot.processed,
            total_jobs_failed: snapshot.failed,
            failure_rate: snapshot.failure_rate,
            average_processing_ms: snapshot.average_processing_ms,
            utilization,
            max_queue_size: self.config.max_queue_size,
            queue_size_history: snapshot.size_history[history_tail..].to_vec(),
            error_count: snapshot.errors,
            last_processed_at: snapshot.last_processed_at,
        })
    }

    /// Pauses claiming.
    pub async fn pause(&self) -> Result<(), QueueError> {
        self.store.pause().await.map_err(QueueError::from)
    }

    /// Resumes claiming.
    pub async fn resume(&self) -> Result<(), QueueError> {
        self.store.resume().await.map_err(QueueError::from)
    }

    /// Returns whether claiming is paused.
    pub async fn is_paused(&self) -> Result<bool, QueueError> {
        self.store.is_paused().await.map_err(QueueError::from)
    }

    /// Feeds jobs stuck past the job deadline back through the retry
    /// policy. Returns how many were recovered.
    pub async fn recover_stale(&self) -> Result<usize, QueueError> {
        let stale = self.store.recover_stale(self.config.job_timeout).await?;
        let count = stale.len();
        for record in stale {
            let id = record.id;
            let reason = format!(
                "job exceeded the {}s processing deadline",
                self.config.job_timeout.as_secs()
            );
            if let Err(e) = self.handle_failure(record, &reason).await {
                warn!(job_id = %id, error = %e, "Failed to recover stale job");
            }
        }
        Ok(count)
    }

    /// Advisory cleanup: drops terminal jobs beyond the retention bounds.
    pub async fn sweep(&self) -> Result<(), QueueError> {
        self.store
            .sweep(
                self.config.completed_retention,
                self.config.failed_retention,
            )
            .await
            .map_err(QueueError::from)
    }

    /// Stops accepting new jobs. Part of the graceful shutdown sequence.
    pub fn close_admissions(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    /// Releases the store connection.
    pub async fn close(&self) -> Result<(), QueueError> {
        self.store.close().await.map_err(QueueError::from)
    }
}
