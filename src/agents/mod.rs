//! LLM-backed agents for the verification pipeline.
//!
//! Each agent wraps one opaque pipeline stage: prompt construction, a call
//! through [`LlmProvider`](crate::llm::LlmProvider), and parsing of the
//! structured JSON reply. Agents are stateless; transport and model choice
//! are injected at construction.

pub mod blog;
pub mod credibility;
pub mod evidence;
pub mod normalizer;
pub mod verdict;

use thiserror::Error;

pub use blog::BlogWriter;
pub use credibility::{CredibilityAnalysis, CredibilityAnalyst};
pub use evidence::{Evidence, EvidenceExtractor};
pub use normalizer::{ClaimNormalizer, LlmNormalizer, NormalizedClaim};
pub use verdict::{Verdict, VerdictAgent, VerdictLabel};

use crate::error::LlmError;

/// Errors that can occur during agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The underlying LLM call failed.
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// The model replied but its output could not be parsed.
    #[error("Failed to parse agent output: {0}")]
    Parse(String),
}

/// Result alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;
