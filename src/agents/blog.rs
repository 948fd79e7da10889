//! Blog draft agent.
//!
//! Produces the derived artifact of a completed verification: a markdown
//! fact-check article ready for editorial review. Unlike the structured
//! agents this one consumes the raw completion text.

use std::sync::Arc;

use crate::llm::{GenerationRequest, LlmProvider, Message};

use super::{AgentError, AgentResult, Evidence, Verdict};

const SYSTEM_PROMPT: &str = "You write fact-check articles. Given a claim, its verdict and the \
supporting evidence, write an engaging markdown article with a summary, the claim analysis, an \
evidence breakdown and a conclusion.";

/// Drafts a markdown article from a completed verification.
pub struct BlogWriter {
    llm: Arc<dyn LlmProvider>,
    model: String,
}

impl BlogWriter {
    /// Creates a writer using the given provider and model.
    pub fn new(llm: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    /// Drafts the article.
    pub async fn draft(
        &self,
        claim: &str,
        verdict: &Verdict,
        evidence: &[Evidence],
    ) -> AgentResult<String> {
        let evidence_text = evidence
            .iter()
            .map(|e| format!("- {} (Source: {})", e.quote, e.source))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Claim: \"{}\"\nVerdict: {}\nConfidence: {}%\nExplanation: {}\n\nEvidence:\n{}",
            claim, verdict.verdict, verdict.confidence, verdict.explanation, evidence_text
        );

        let request = GenerationRequest::new(
            &self.model,
            vec![Message::system(SYSTEM_PROMPT), Message::user(prompt)],
        )
        .with_temperature(0.7);

        let response = self.llm.generate(request).await?;
        let content = response
            .first_content()
            .ok_or_else(|| AgentError::Parse("empty completion".to_string()))?;

        Ok(content.to_string())
    }
}
