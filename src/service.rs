//! Service entry point: submission, status, stats, health and lifecycle.
//!
//! `ClaimService` is what callers (HTTP routes, the CLI) talk to. On
//! submission it normalizes the claim, content-addresses it, consults the
//! hot cache, and only enqueues a job on a miss. It also owns the graceful
//! shutdown sequence.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agents::{ClaimNormalizer, LlmNormalizer};
use crate::cache::{ClaimCache, ContentHash, RedisClaimCache};
use crate::llm::LlmClient;
use crate::metrics::MetricsCollector;
use crate::pipeline::{PipelineConfig, VerificationPipeline};
use crate::scheduler::{
    ClaimPayload, EnqueueOptions, HealthMonitor, InputType, JobQueue, JobStore, QueueConfig,
    QueueError, QueueMetrics, QueueStatsReport, RedisJobStore, StatusReport, Supervisor,
    SupervisorConfig, WorkerPool, WorkerPoolConfig,
};
use crate::search::ExaSearchClient;
use crate::storage::{Database, HttpVectorIndex, ResultStore, VectorIndex};

/// Namespace for the queue's Redis keys.
const QUEUE_NAMESPACE: &str = "claimforge";

/// Outcome of a claim submission.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Submission {
    /// The claim was verified before and its report is still cached; no job
    /// was enqueued.
    Cached {
        result: serde_json::Value,
        claim_hash: String,
        normalized_claim: String,
    },
    /// A verification job was enqueued.
    Queued {
        job_id: Uuid,
        result_store_id: Uuid,
        claim_hash: String,
        normalized_claim: String,
    },
}

/// Health bands for the composite health report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Normal,
    Overloaded,
}

/// Error-rate band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorBand {
    Normal,
    High,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

/// Composite health report.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Healthy iff the store is reachable and the failure rate is under 20%.
    pub status: HealthState,
    /// Whether the backing store answered the last probe.
    pub store_connected: bool,
    /// Queue utilization band (overloaded at 80%+).
    pub queue: Band,
    /// Worker band (overloaded when active jobs exceed concurrency).
    pub workers: Band,
    /// Error band (high at 10%+ failure rate).
    pub errors: ErrorBand,
    /// Report time.
    pub timestamp: DateTime<Utc>,
}

/// The assembled verification service.
pub struct ClaimService {
    normalizer: Arc<dyn ClaimNormalizer>,
    cache: Arc<dyn ClaimCache>,
    results: Arc<dyn ResultStore>,
    queue: Arc<JobQueue>,
    pool: Arc<WorkerPool>,
    supervisor: Supervisor,
    collector: MetricsCollector,
    cache_ttl: Duration,
}

impl ClaimService {
    /// Assembles a service from pre-built parts. Production wiring lives in
    /// [`ClaimService::connect`]; tests inject doubles here.
    pub fn with_parts(
        normalizer: Arc<dyn ClaimNormalizer>,
        cache: Arc<dyn ClaimCache>,
        results: Arc<dyn ResultStore>,
        queue: Arc<JobQueue>,
        pool: Arc<WorkerPool>,
        supervisor: Supervisor,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            normalizer,
            cache,
            results,
            queue,
            pool,
            supervisor,
            collector: MetricsCollector::new(),
            cache_ttl,
        }
    }

    /// Connects every production collaborator and assembles the service.
    ///
    /// A failed Redis connection prevents the worker pool from ever
    /// starting but is surfaced as an error here rather than a panic.
    pub async fn connect(config: PipelineConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let client = redis::Client::open(config.redis_url.as_str())?;
        let manager = redis::aio::ConnectionManager::new(client).await?;

        let store: Arc<dyn JobStore> = Arc::new(RedisJobStore::from_connection(
            manager.clone(),
            QUEUE_NAMESPACE,
        ));
        let cache: Arc<dyn ClaimCache> = Arc::new(RedisClaimCache::new(manager));

        let database = Database::connect(&config.database_url).await?;
        database.ensure_schema().await?;
        let results: Arc<dyn ResultStore> = Arc::new(database);

        let llm = Arc::new(LlmClient::new(&config.llm_api_base, &config.llm_api_key));
        let search = Arc::new(ExaSearchClient::new(
            &config.search_api_base,
            &config.search_api_key,
        ));
        let vectors: Option<Arc<dyn VectorIndex>> = match (&config.vector_api_base, &config.vector_api_key)
        {
            (Some(base), Some(key)) => Some(Arc::new(HttpVectorIndex::new(base, key))),
            _ => None,
        };

        let normalizer: Arc<dyn ClaimNormalizer> =
            Arc::new(LlmNormalizer::new(llm.clone(), &config.llm_model));

        let pipeline = Arc::new(VerificationPipeline::new(
            search,
            llm,
            &config.llm_model,
            Arc::clone(&cache),
            Arc::clone(&results),
            vectors,
            config.search_results,
            config.cache_ttl,
        ));

        let health = Arc::new(HealthMonitor::new(Arc::clone(&store)));
        let metrics = Arc::new(QueueMetrics::new());
        let queue = Arc::new(JobQueue::new(
            store,
            Arc::clone(&health),
            metrics,
            QueueConfig::default()
                .with_max_queue_size(config.max_queue_size)
                .with_default_max_attempts(config.default_max_attempts)
                .with_default_backoff(config.default_backoff)
                .with_job_timeout(config.job_timeout),
        ));

        let pool = Arc::new(WorkerPool::new(
            WorkerPoolConfig::new(config.worker_concurrency),
            Arc::clone(&queue),
            pipeline,
        ));

        let supervisor = Supervisor::new(
            Arc::clone(&queue),
            Arc::clone(&pool),
            health,
            SupervisorConfig::default(),
        );

        Ok(Self::with_parts(
            normalizer,
            cache,
            results,
            queue,
            pool,
            supervisor,
            config.cache_ttl,
        ))
    }

    /// Starts the worker pool and the control loops.
    pub async fn start(&self) -> anyhow::Result<()> {
        self.pool.start().await?;
        self.supervisor.start();
        Ok(())
    }

    /// Submits a claim for verification.
    ///
    /// Normalization failure degrades to the raw text; a cache hit
    /// short-circuits the pipeline with zero jobs enqueued.
    pub async fn submit_claim(
        &self,
        raw: &str,
        user_id: Option<String>,
        input_type: InputType,
        options: EnqueueOptions,
    ) -> Result<Submission, QueueError> {
        let normalized = match self.normalizer.normalize(raw).await {
            Ok(normalized) => Some(normalized),
            Err(e) => {
                warn!(error = %e, "Claim normalization failed, falling back to raw input");
                None
            }
        };

        let normalized_claim = normalized
            .as_ref()
            .map(|n| n.normalized_claim.clone())
            .unwrap_or_else(|| raw.to_string());
        let hash = ContentHash::from_content(&normalized_claim);

        match self.cache.get(&hash).await {
            Ok(Some(result)) => {
                self.collector.record_cache_lookup(true);
                info!(claim_hash = %hash, "Cache hit, returning stored verdict");
                return Ok(Submission::Cached {
                    result,
                    claim_hash: hash.to_string(),
                    normalized_claim,
                });
            }
            Ok(None) => {
                self.collector.record_cache_lookup(false);
            }
            Err(e) => {
                // A broken cache must not block submissions
                warn!(error = %e, "Cache lookup failed, treating as miss");
            }
        }

        let result_store_id = Uuid::new_v4();
        if let Err(e) = self
            .results
            .create(result_store_id, raw, user_id.as_deref())
            .await
        {
            warn!(error = %e, "Failed to create durable job row");
        }

        let mut payload = ClaimPayload {
            user_id,
            input: raw.to_string(),
            input_type,
            claim: Some(raw.to_string()),
            ..Default::default()
        }
        .with_claim_hash(hash.to_string())
        .with_result_store_id(result_store_id);

        if let Some(n) = normalized {
            payload = payload.with_normalization(
                n.normalized_claim,
                n.category,
                n.keywords,
                n.question,
            );
        }

        let job = self.queue.enqueue(payload, options).await?;
        Ok(Submission::Queued {
            job_id: job.id,
            result_store_id,
            claim_hash: hash.to_string(),
            normalized_claim,
        })
    }

    /// Returns the status envelope for a job.
    pub async fn get_job_status(&self, id: Uuid) -> Result<StatusReport, QueueError> {
        self.queue.get_status(id).await
    }

    /// Returns the queue stats envelope.
    pub async fn get_queue_stats(&self) -> Result<QueueStatsReport, QueueError> {
        self.queue.stats().await
    }

    /// Returns the composite health report.
    ///
    /// Runs a live store probe through the circuit breaker (O(1) while the
    /// breaker is open) rather than reading a stale flag.
    pub async fn get_health_status(&self) -> Result<HealthReport, QueueError> {
        let connected = self.queue.health().check().await;
        let stats = self.queue.stats().await?;

        let status = if connected && stats.failure_rate < 20.0 {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        };

        Ok(HealthReport {
            status,
            store_connected: connected,
            queue: if stats.utilization < 80.0 {
                Band::Normal
            } else {
                Band::Overloaded
            },
            workers: if stats.active <= self.pool.desired_workers() {
                Band::Normal
            } else {
                Band::Overloaded
            },
            errors: if stats.failure_rate < 10.0 {
                ErrorBand::Normal
            } else {
                ErrorBand::High
            },
            timestamp: Utc::now(),
        })
    }

    /// Returns the queue handle.
    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Returns the worker pool handle.
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Returns the configured hot-cache TTL.
    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    /// Runs the graceful shutdown sequence:
    ///
    /// 1. stop the control loops, then close admissions and pause claims
    /// 2. stop the worker pool (slots finish their current job)
    /// 3. poll for in-flight jobs up to the grace period
    /// 4. release the store connection regardless of the outcome
    pub async fn shutdown(&self, grace: Duration) {
        info!("Shutting down");
        self.supervisor.shutdown().await;

        self.queue.close_admissions();
        if let Err(e) = self.queue.pause().await {
            warn!(error = %e, "Failed to pause queue during shutdown");
        }

        if let Err(e) = self.pool.stop().await {
            warn!(error = %e, "Worker pool stop did not finish cleanly");
        }

        let deadline = Instant::now() + grace;
        loop {
            match self.queue.stats().await {
                Ok(stats) if stats.active == 0 => break,
                Ok(stats) => {
                    if Instant::now() >= deadline {
                        warn!(active = stats.active, "Grace period elapsed with active jobs");
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Stats check during shutdown failed");
                    break;
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        if let Err(e) = self.queue.close().await {
            warn!(error = %e, "Failed to close store connection");
        }
        info!("Shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::NormalizedClaim;
    use crate::cache::MemoryClaimCache;
    use crate::error::TransformError;
    use crate::scheduler::{
        JobState, MemoryJobStore, QueueMetrics, SupervisorConfig, WorkerPoolConfig,
    };
    use crate::storage::{AnalysisJobRow, DatabaseError, JobStatus};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StubNormalizer {
        fail: bool,
    }

    #[async_trait]
    impl ClaimNormalizer for StubNormalizer {
        async fn normalize(&self, raw: &str) -> Result<NormalizedClaim, TransformError> {
            if self.fail {
                return Err(TransformError::EmptyResponse);
            }
            Ok(NormalizedClaim {
                normalized_claim: format!("Normalized: {raw}"),
                category: "Other".to_string(),
                keywords: vec!["test".to_string()],
                question: format!("Is it true that {raw}?"),
            })
        }
    }

    #[derive(Default)]
    struct NullResultStore {
        created: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl ResultStore for NullResultStore {
        async fn create(
            &self,
            id: Uuid,
            _input: &str,
            _user_id: Option<&str>,
        ) -> Result<(), DatabaseError> {
            self.created.lock().expect("lock").push(id);
            Ok(())
        }
        async fn update_status(
            &self,
            _id: Uuid,
            _status: JobStatus,
            _result: Option<&serde_json::Value>,
            _error_message: Option<&str>,
        ) -> Result<(), DatabaseError> {
            Ok(())
        }
        async fn find(&self, _id: Uuid) -> Result<Option<AnalysisJobRow>, DatabaseError> {
            Ok(None)
        }
    }

    struct NullProcessor;

    #[async_trait]
    impl crate::scheduler::JobProcessor for NullProcessor {
        async fn process(
            &self,
            _job: &crate::scheduler::JobRecord,
            _progress: &dyn crate::scheduler::ProgressSink,
        ) -> Result<serde_json::Value, crate::error::PipelineStepError> {
            Ok(serde_json::Value::Null)
        }
    }

    fn service(normalizer_fails: bool) -> (ClaimService, Arc<MemoryClaimCache>) {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let health = Arc::new(HealthMonitor::new(Arc::clone(&store)));
        let queue = Arc::new(JobQueue::new(
            store,
            Arc::clone(&health),
            Arc::new(QueueMetrics::new()),
            QueueConfig::default(),
        ));
        let pool = Arc::new(WorkerPool::new(
            WorkerPoolConfig::new(1).with_poll_interval(Duration::from_millis(10)),
            Arc::clone(&queue),
            Arc::new(NullProcessor),
        ));
        let supervisor = Supervisor::new(
            Arc::clone(&queue),
            Arc::clone(&pool),
            health,
            SupervisorConfig::default(),
        );
        let cache = Arc::new(MemoryClaimCache::new());

        let service = ClaimService::with_parts(
            Arc::new(StubNormalizer {
                fail: normalizer_fails,
            }),
            Arc::clone(&cache) as Arc<dyn ClaimCache>,
            Arc::new(NullResultStore::default()),
            queue,
            pool,
            supervisor,
            Duration::from_secs(60),
        );
        (service, cache)
    }

    #[tokio::test]
    async fn test_submit_enqueues_with_low_priority_for_text() {
        let (service, _cache) = service(false);

        let submission = service
            .submit_claim(
                "Paris is the capital of France.",
                None,
                InputType::Text,
                EnqueueOptions::default(),
            )
            .await
            .expect("submit");

        let Submission::Queued {
            job_id,
            normalized_claim,
            ..
        } = submission
        else {
            panic!("expected a queued submission");
        };
        assert!(normalized_claim.starts_with("Normalized:"));

        let status = service.get_job_status(job_id).await.expect("status");
        assert_eq!(status.state, JobState::Waiting);
        assert!(status.progress.is_none());

        let record = service
            .queue()
            .store()
            .get(job_id)
            .await
            .expect("get")
            .expect("record");
        assert_eq!(record.priority, 1);
        assert!(record.payload.claim_hash.is_some());
    }

    #[tokio::test]
    async fn test_cache_hit_short_circuits_with_zero_enqueues() {
        let (service, cache) = service(false);

        let report = serde_json::json!({"verdict": {"verdict": "True"}});
        let hash = ContentHash::from_content("Normalized: known claim");
        cache
            .put(&hash, &report, Duration::from_secs(60))
            .await
            .expect("put");

        let submission = service
            .submit_claim("known claim", None, InputType::Text, EnqueueOptions::default())
            .await
            .expect("submit");

        let Submission::Cached { result, claim_hash, .. } = submission else {
            panic!("expected a cached submission");
        };
        assert_eq!(result, report);
        assert_eq!(claim_hash, hash.to_string());

        let stats = service.get_queue_stats().await.expect("stats");
        assert_eq!(stats.waiting, 0);
        assert_eq!(stats.total, 0);
    }

    #[tokio::test]
    async fn test_normalizer_failure_still_enqueues_raw_text() {
        let (service, _cache) = service(true);

        let submission = service
            .submit_claim("raw claim text", None, InputType::Text, EnqueueOptions::default())
            .await
            .expect("submit must survive normalization failure");

        let Submission::Queued {
            job_id,
            normalized_claim,
            ..
        } = submission
        else {
            panic!("expected a queued submission");
        };
        assert_eq!(normalized_claim, "raw claim text");

        let record = service
            .queue()
            .store()
            .get(job_id)
            .await
            .expect("get")
            .expect("record");
        assert!(record.payload.normalized_claim.is_none());
        assert_eq!(record.payload.input, "raw claim text");
    }

    #[tokio::test]
    async fn test_health_report_bands() {
        let (service, _cache) = service(false);

        // Force a probe so the monitor knows the store is reachable
        assert!(service.queue().health().check().await);

        let report = service.get_health_status().await.expect("health");
        assert_eq!(report.status, HealthState::Healthy);
        assert!(report.store_connected);
        assert_eq!(report.queue, Band::Normal);
        assert_eq!(report.workers, Band::Normal);
        assert_eq!(report.errors, ErrorBand::Normal);
    }

    #[tokio::test]
    async fn test_shutdown_closes_admissions() {
        let (service, _cache) = service(false);
        service.start().await.expect("start");

        service.shutdown(Duration::from_secs(2)).await;

        let err = service
            .submit_claim("late claim", None, InputType::Text, EnqueueOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Unavailable(_)));
    }
}
