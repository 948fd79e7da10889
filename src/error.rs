//! Error types shared across claimforge subsystems.
//!
//! Defines the cross-cutting error taxonomy:
//! - Claim normalization failures
//! - LLM API interactions
//! - Web search interactions
//! - Pipeline step failures (the unit of job-level retry)
//!
//! Subsystem-local errors (queue, store, pool, database, cache) live next to
//! the types they describe.

use thiserror::Error;

/// Errors that can occur while normalizing a raw claim.
///
/// Normalization failures are degraded, not fatal: submission falls back to
/// the raw input text and still enqueues a job.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("LLM error during normalization: {0}")]
    Llm(#[from] LlmError),

    #[error("Normalizer returned unparseable output: {0}")]
    UnparseableOutput(String),

    #[error("Normalizer returned an empty response")]
    EmptyResponse,
}

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: LLM_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("Missing API base URL: LLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Empty response from model {model}")]
    EmptyResponse { model: String },
}

/// Errors that can occur during web search operations.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Missing API key: SEARCH_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Search API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Failed to parse search response: {0}")]
    ParseError(String),

    #[error("No results for query: {0}")]
    NoResults(String),
}

/// The fixed stages of the claim verification pipeline.
///
/// Each stage is an opaque external call; the stage name is the failure
/// isolation boundary reported back through job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    /// Web search for candidate sources.
    Search,
    /// Structured evidence extraction from search results.
    EvidenceExtraction,
    /// Credibility scoring and contradiction detection.
    CredibilityAnalysis,
    /// Final verdict synthesis.
    Verdict,
    /// Derived blog-draft artifact generation.
    BlogDraft,
}

impl std::fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStep::Search => write!(f, "search"),
            PipelineStep::EvidenceExtraction => write!(f, "evidence-extraction"),
            PipelineStep::CredibilityAnalysis => write!(f, "credibility-analysis"),
            PipelineStep::Verdict => write!(f, "verdict"),
            PipelineStep::BlogDraft => write!(f, "blog-draft"),
        }
    }
}

/// A pipeline stage failure.
///
/// Aborts the current attempt of a job and hands it to the queue's retry
/// policy; after attempts are exhausted the message becomes the job's
/// terminal failure reason.
#[derive(Debug, Error)]
#[error("{step} step failed: {message}")]
pub struct PipelineStepError {
    /// The stage that failed.
    pub step: PipelineStep,
    /// Human-readable failure description.
    pub message: String,
}

impl PipelineStepError {
    /// Creates a step error from any displayable cause.
    pub fn new(step: PipelineStep, cause: impl std::fmt::Display) -> Self {
        Self {
            step,
            message: cause.to_string(),
        }
    }
}
