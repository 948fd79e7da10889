//! The verification pipeline orchestrator.
//!
//! Wires the search client, the LLM agents and the persistence targets into
//! the fixed stage sequence, and adapts the whole thing to the worker
//! pool's [`JobProcessor`] contract.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::agents::{
    BlogWriter, CredibilityAnalysis, CredibilityAnalyst, Evidence, EvidenceExtractor, Verdict,
    VerdictAgent,
};
use crate::cache::{ClaimCache, ContentHash};
use crate::error::{PipelineStep, PipelineStepError};
use crate::llm::LlmProvider;
use crate::scheduler::job::{ClaimPayload, JobRecord};
use crate::scheduler::worker_pool::{JobProcessor, ProgressSink};
use crate::search::SearchProvider;
use crate::storage::{JobStatus, ResultStore, VectorEntry, VectorIndex};

use async_trait::async_trait;

/// The full output of one verified claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    /// The synthesized verdict.
    pub verdict: Verdict,
    /// Credibility and contradiction analysis.
    pub analysis: CredibilityAnalysis,
    /// Extracted evidence.
    pub evidence: Vec<Evidence>,
    /// Derived markdown article draft.
    pub blog_draft: String,
    /// When verification finished.
    pub completed_at: DateTime<Utc>,
}

/// Runs the fixed verification stage sequence for one claim.
pub struct VerificationPipeline {
    search: Arc<dyn SearchProvider>,
    extractor: EvidenceExtractor,
    analyst: CredibilityAnalyst,
    verdict_agent: VerdictAgent,
    blog_writer: BlogWriter,
    cache: Arc<dyn ClaimCache>,
    results: Arc<dyn ResultStore>,
    vectors: Option<Arc<dyn VectorIndex>>,
    search_results: usize,
    cache_ttl: Duration,
}

impl VerificationPipeline {
    /// Creates a pipeline from its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        search: Arc<dyn SearchProvider>,
        llm: Arc<dyn LlmProvider>,
        model: impl Into<String>,
        cache: Arc<dyn ClaimCache>,
        results: Arc<dyn ResultStore>,
        vectors: Option<Arc<dyn VectorIndex>>,
        search_results: usize,
        cache_ttl: Duration,
    ) -> Self {
        let model = model.into();
        Self {
            search,
            extractor: EvidenceExtractor::new(Arc::clone(&llm), &model),
            analyst: CredibilityAnalyst::new(Arc::clone(&llm), &model),
            verdict_agent: VerdictAgent::new(Arc::clone(&llm), &model),
            blog_writer: BlogWriter::new(llm, &model),
            cache,
            results,
            vectors,
            search_results,
            cache_ttl,
        }
    }

    /// Runs the stage sequence for a claim, reporting progress at the fixed
    /// checkpoints. Stops at the first failing stage.
    pub async fn verify(
        &self,
        payload: &ClaimPayload,
        progress: &dyn ProgressSink,
    ) -> Result<VerificationReport, PipelineStepError> {
        let claim = payload.processing_input();
        progress.report(10).await;

        let sources = self
            .search
            .search(claim, self.search_results)
            .await
            .map_err(|e| PipelineStepError::new(PipelineStep::Search, e))?;
        progress.report(30).await;

        let evidence = self
            .extractor
            .extract(claim, &sources)
            .await
            .map_err(|e| PipelineStepError::new(PipelineStep::EvidenceExtraction, e))?;
        progress.report(50).await;

        let analysis = self
            .analyst
            .analyze(claim, &evidence)
            .await
            .map_err(|e| PipelineStepError::new(PipelineStep::CredibilityAnalysis, e))?;
        progress.report(70).await;

        let verdict = self
            .verdict_agent
            .generate(claim, &evidence, &analysis)
            .await
            .map_err(|e| PipelineStepError::new(PipelineStep::Verdict, e))?;
        progress.report(85).await;

        let blog_draft = self
            .blog_writer
            .draft(claim, &verdict, &evidence)
            .await
            .map_err(|e| PipelineStepError::new(PipelineStep::BlogDraft, e))?;
        progress.report(95).await;

        info!(verdict = %verdict.verdict, claim, "Verification finished");

        Ok(VerificationReport {
            verdict,
            analysis,
            evidence,
            blog_draft,
            completed_at: Utc::now(),
        })
    }

    /// Persists a successful report into the cache, the vector index and
    /// the durable store. Every write is best-effort: failures are logged
    /// and swallowed because the verdict itself already exists.
    async fn persist(&self, payload: &ClaimPayload, report: &VerificationReport, value: &serde_json::Value) {
        if let Some(hash) = &payload.claim_hash {
            let key = ContentHash::from_hex(hash.clone());
            if let Err(e) = self.cache.put(&key, value, self.cache_ttl).await {
                warn!(claim_hash = %hash, error = %e, "Cache write failed");
            }
        }

        if let Some(vectors) = &self.vectors {
            let entry = VectorEntry {
                id: Uuid::new_v4(),
                text: payload.processing_input().to_string(),
                category: payload.category.clone().unwrap_or_else(|| "General".to_string()),
                verdict: report.verdict.verdict.to_string(),
                summary: report.verdict.explanation.clone(),
            };
            if let Err(e) = vectors.upsert(&entry).await {
                warn!(error = %e, "Vector index upsert failed");
            }
        }

        if let Some(id) = payload.result_store_id {
            if let Err(e) = self
                .results
                .update_status(id, JobStatus::Completed, Some(value), None)
                .await
            {
                warn!(result_store_id = %id, error = %e, "Durable status update failed");
            }
        }
    }
}

#[async_trait]
impl JobProcessor for VerificationPipeline {
    async fn process(
        &self,
        job: &JobRecord,
        progress: &dyn ProgressSink,
    ) -> Result<serde_json::Value, PipelineStepError> {
        match self.verify(&job.payload, progress).await {
            Ok(report) => {
                let value = serde_json::to_value(&report)
                    .map_err(|e| PipelineStepError::new(PipelineStep::Verdict, e))?;
                self.persist(&job.payload, &report, &value).await;
                progress.report(100).await;
                Ok(value)
            }
            Err(step_error) => {
                // Best-effort durable FAILED update per attempt; its own
                // failure is logged and swallowed
                if let Some(id) = job.payload.result_store_id {
                    if let Err(e) = self
                        .results
                        .update_status(id, JobStatus::Failed, None, Some(&step_error.to_string()))
                        .await
                    {
                        warn!(result_store_id = %id, error = %e, "Durable failure update failed");
                    }
                }
                Err(step_error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::VerdictLabel;
    use crate::cache::MemoryClaimCache;
    use crate::error::{LlmError, SearchError};
    use crate::llm::{Choice, GenerationRequest, GenerationResponse, Message, Usage};
    use crate::scheduler::job::{BackoffPolicy, PRIORITY_LOW};
    use crate::scheduler::worker_pool::NoopProgress;
    use crate::search::SearchResult;
    use crate::storage::{AnalysisJobRow, DatabaseError};
    use std::sync::Mutex;

    /// Search stub returning one canned source.
    struct StubSearch;

    #[async_trait]
    impl SearchProvider for StubSearch {
        async fn search(
            &self,
            _query: &str,
            _limit: usize,
        ) -> Result<Vec<SearchResult>, SearchError> {
            Ok(vec![SearchResult {
                url: "https://example.org/paris".to_string(),
                title: Some("Paris".to_string()),
                text: "Paris is the capital of France.".to_string(),
                highlights: vec![],
                score: Some(0.99),
            }])
        }
    }

    /// Search stub that always fails.
    struct DownSearch;

    #[async_trait]
    impl SearchProvider for DownSearch {
        async fn search(
            &self,
            _query: &str,
            _limit: usize,
        ) -> Result<Vec<SearchResult>, SearchError> {
            Err(SearchError::RequestFailed("connection refused".to_string()))
        }
    }

    /// LLM stub answering each agent prompt in order: evidence, analysis,
    /// verdict, blog.
    struct ScriptedLlm {
        replies: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn verification_script() -> Self {
            Self {
                replies: Mutex::new(vec![
                    r#"{"evidence": [{"source": "https://example.org/paris", "quote": "Paris is the capital of France.", "relevance": 1.0, "supports": true, "explanation": "direct"}]}"#.to_string(),
                    r#"{"credibility_score": 95, "credibility_reasoning": "authoritative", "contradictions": [], "is_contradictory": false}"#.to_string(),
                    r#"{"verdict": "True", "confidence": 98, "explanation": "Documented by every atlas.", "key_evidence": ["Paris is the capital of France."]}"#.to_string(),
                    "# Fact check: Paris\n\nTrue.".to_string(),
                ]),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        async fn generate(
            &self,
            _request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            let mut replies = self.replies.lock().expect("lock poisoned");
            if replies.is_empty() {
                return Err(LlmError::RequestFailed("script exhausted".to_string()));
            }
            let content = replies.remove(0);
            Ok(GenerationResponse {
                id: "r".to_string(),
                model: "m".to_string(),
                choices: vec![Choice {
                    message: Message::assistant(content),
                    finish_reason: None,
                }],
                usage: Usage::default(),
            })
        }
    }

    /// Result-store double recording every status update.
    #[derive(Default)]
    struct RecordingResultStore {
        updates: Mutex<Vec<(Uuid, JobStatus, Option<String>)>>,
    }

    impl RecordingResultStore {
        fn updates(&self) -> Vec<(Uuid, JobStatus, Option<String>)> {
            self.updates.lock().expect("lock poisoned").clone()
        }
    }

    #[async_trait]
    impl ResultStore for RecordingResultStore {
        async fn create(
            &self,
            _id: Uuid,
            _input: &str,
            _user_id: Option<&str>,
        ) -> Result<(), DatabaseError> {
            Ok(())
        }

        async fn update_status(
            &self,
            id: Uuid,
            status: JobStatus,
            _result: Option<&serde_json::Value>,
            error_message: Option<&str>,
        ) -> Result<(), DatabaseError> {
            self.updates
                .lock()
                .expect("lock poisoned")
                .push((id, status, error_message.map(String::from)));
            Ok(())
        }

        async fn find(&self, _id: Uuid) -> Result<Option<AnalysisJobRow>, DatabaseError> {
            Ok(None)
        }
    }

    fn pipeline_with(
        search: Arc<dyn SearchProvider>,
        cache: Arc<MemoryClaimCache>,
        results: Arc<RecordingResultStore>,
    ) -> VerificationPipeline {
        VerificationPipeline::new(
            search,
            Arc::new(ScriptedLlm::verification_script()),
            "test-model",
            cache,
            results,
            None,
            5,
            Duration::from_secs(60),
        )
    }

    fn job(payload: ClaimPayload) -> JobRecord {
        JobRecord::new(payload, PRIORITY_LOW, 3, BackoffPolicy::default())
    }

    #[tokio::test]
    async fn test_successful_run_produces_report_and_populates_cache() {
        let cache = Arc::new(MemoryClaimCache::new());
        let results = Arc::new(RecordingResultStore::default());
        let pipeline = pipeline_with(Arc::new(StubSearch), Arc::clone(&cache), Arc::clone(&results));

        let store_id = Uuid::new_v4();
        let payload = ClaimPayload::text("Paris is the capital of France.")
            .with_claim_hash("deadbeef")
            .with_result_store_id(store_id);

        let value = pipeline
            .process(&job(payload), &NoopProgress)
            .await
            .expect("pipeline should succeed");

        let report: VerificationReport =
            serde_json::from_value(value).expect("report round-trips");
        assert_eq!(report.verdict.verdict, VerdictLabel::True);
        assert!(!report.blog_draft.is_empty());

        // Cache populated under the claim hash
        let cached = cache
            .get(&ContentHash::from_hex("deadbeef"))
            .await
            .expect("cache get");
        assert!(cached.is_some());

        // Durable store marked COMPLETED
        let updates = results.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].1, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_step_failure_attempts_durable_failed_update() {
        let cache = Arc::new(MemoryClaimCache::new());
        let results = Arc::new(RecordingResultStore::default());
        let pipeline = pipeline_with(Arc::new(DownSearch), Arc::clone(&cache), Arc::clone(&results));

        let store_id = Uuid::new_v4();
        let payload = ClaimPayload::text("claim").with_result_store_id(store_id);

        let err = pipeline
            .process(&job(payload), &NoopProgress)
            .await
            .unwrap_err();
        assert_eq!(err.step, PipelineStep::Search);

        let updates = results.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, store_id);
        assert_eq!(updates[0].1, JobStatus::Failed);
        assert!(updates[0].2.as_deref().unwrap().contains("search step failed"));

        // Cache untouched on failure
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_failure_without_store_id_still_propagates() {
        let cache = Arc::new(MemoryClaimCache::new());
        let results = Arc::new(RecordingResultStore::default());
        let pipeline = pipeline_with(Arc::new(DownSearch), cache, Arc::clone(&results));

        let err = pipeline
            .process(&job(ClaimPayload::text("claim")), &NoopProgress)
            .await
            .unwrap_err();
        assert_eq!(err.step, PipelineStep::Search);
        assert!(results.updates().is_empty());
    }
}
