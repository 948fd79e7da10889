//! Claim normalization agent.
//!
//! Rewrites raw user input (a headline, social-media post, or free-text
//! claim) into a neutral, fact-checkable statement, assigns a category,
//! and extracts keywords plus a search-ready question.
//!
//! Normalization is best-effort: callers fall back to the raw text when it
//! fails and still enqueue the job.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransformError;
use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::utils::extract_json_from_response;

use super::AgentError;

const SYSTEM_PROMPT: &str = "You are a claim normalizer in a fact-checking service. \
Given user input, extract the core factual claim and restate it as one clear, neutral sentence. \
Classify it into a single category (for example Politics, Health, Science, Technology, Economics, \
Sports, Environment, Statistics, or Other), list the key entities and terms as keywords, and \
rephrase the claim as a direct question suitable for a search engine. \
Reply with only a JSON object with the fields: normalized_claim, category, keywords, question.";

/// Structured result of normalizing a raw claim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedClaim {
    /// The claim restated as one neutral sentence.
    pub normalized_claim: String,
    /// Single best-fit topical category.
    pub category: String,
    /// Key entities and terms for search.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// The claim rephrased as a fact-checkable question.
    #[serde(default)]
    pub question: String,
}

/// Normalizes raw claim text into structured form.
#[async_trait]
pub trait ClaimNormalizer: Send + Sync {
    /// Normalizes the raw input.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError`] when the claim cannot be normalized; the
    /// caller degrades to the raw text rather than aborting submission.
    async fn normalize(&self, raw: &str) -> Result<NormalizedClaim, TransformError>;
}

/// LLM-backed normalizer.
pub struct LlmNormalizer {
    llm: Arc<dyn LlmProvider>,
    model: String,
}

impl LlmNormalizer {
    /// Creates a normalizer using the given provider and model.
    pub fn new(llm: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    async fn run(&self, raw: &str) -> Result<NormalizedClaim, AgentError> {
        let request = GenerationRequest::new(
            &self.model,
            vec![Message::system(SYSTEM_PROMPT), Message::user(raw)],
        )
        .with_temperature(0.0);

        let response = self.llm.generate(request).await?;
        let content = response
            .first_content()
            .ok_or_else(|| AgentError::Parse("empty completion".to_string()))?;

        let json = extract_json_from_response(content)
            .map_err(|e| AgentError::Parse(e.to_string()))?;
        serde_json::from_str(&json).map_err(|e| AgentError::Parse(e.to_string()))
    }
}

#[async_trait]
impl ClaimNormalizer for LlmNormalizer {
    async fn normalize(&self, raw: &str) -> Result<NormalizedClaim, TransformError> {
        match self.run(raw).await {
            Ok(normalized) if normalized.normalized_claim.trim().is_empty() => {
                Err(TransformError::EmptyResponse)
            }
            Ok(normalized) => Ok(normalized),
            Err(AgentError::Llm(e)) => Err(TransformError::Llm(e)),
            Err(AgentError::Parse(msg)) => Err(TransformError::UnparseableOutput(msg)),
        }
    }
}
