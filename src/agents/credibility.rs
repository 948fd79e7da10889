//! Credibility and contradiction analysis agent.
//!
//! Scores the quality of the gathered evidence and flags contradictions
//! between the claim and the evidence, or among the evidence itself.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::utils::extract_json_from_response;

use super::{AgentError, AgentResult, Evidence};

const SYSTEM_PROMPT: &str = "You assess evidence quality for fact-checking. Given a claim and \
extracted evidence, assign a credibility score from 0 to 100 based on source quality, explain \
the score, and list any contradictions between the claim and the evidence or among the evidence \
itself. Reply with only a JSON object with the fields: credibility_score, \
credibility_reasoning, contradictions (array of strings), is_contradictory (boolean).";

/// Result of the credibility analysis stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredibilityAnalysis {
    /// Source-quality score, 0 to 100.
    pub credibility_score: f64,
    /// Reasoning behind the score.
    pub credibility_reasoning: String,
    /// Detected contradictions.
    #[serde(default)]
    pub contradictions: Vec<String>,
    /// Whether the evidence set is internally contradictory.
    #[serde(default)]
    pub is_contradictory: bool,
}

/// Scores evidence credibility and detects contradictions.
pub struct CredibilityAnalyst {
    llm: Arc<dyn LlmProvider>,
    model: String,
}

impl CredibilityAnalyst {
    /// Creates an analyst using the given provider and model.
    pub fn new(llm: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    /// Analyzes the evidence gathered for `claim`.
    pub async fn analyze(
        &self,
        claim: &str,
        evidence: &[Evidence],
    ) -> AgentResult<CredibilityAnalysis> {
        let evidence_text = evidence
            .iter()
            .map(|e| {
                format!(
                    "Quote: \"{}\"\nSource: {}\nSupports claim: {}",
                    e.quote, e.source, e.supports
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let prompt = format!("Claim: \"{}\"\n\nEvidence:\n{}", claim, evidence_text);

        let request = GenerationRequest::new(
            &self.model,
            vec![Message::system(SYSTEM_PROMPT), Message::user(prompt)],
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{Choice, GenerationResponse, Usage};
    use async_trait::async_trait;

    struct CannedProvider {
        content: String,
    }

    #[async_trait]
    impl LlmProvider for CannedProvider {
        async fn generate(
            &self,
            _request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            Ok(GenerationResponse {
                id: "r".to_string(),
                model: "m".to_string(),
                choices: vec![Choice {
                    message: Message::assistant(self.content.clone()),
                    finish_reason: None,
                }],
                usage: Usage::default(),
            })
        }
    }

    #[tokio::test]
    async fn test_analyze_parses_reply() {
        let provider = Arc::new(CannedProvider {
            content: r#"{"credibility_score": 85, "credibility_reasoning": "established outlets",
                "contradictions": [], "is_contradictory": false}"#
                .to_string(),
        });
        let analyst = CredibilityAnalyst::new(provider, "m");

        let analysis = analyst
            .analyze("claim", &[])
            .await
            .expect("analysis should succeed");

        assert_eq!(analysis.credibility_score, 85.0);
        assert!(!analysis.is_contradictory);
        assert!(analysis.contradictions.is_empty());
    }

    #[tokio::test]
    async fn test_analyze_defaults_optional_fields() {
        let provider = Arc::new(CannedProvider {
            content: r#"{"credibility_score": 40, "credibility_reasoning": "mixed sources"}"#
                .to_string(),
        });
        let analyst = CredibilityAnalyst::new(provider, "m");

        let analysis = analyst
            .analyze("claim", &[])
            .await
            .expect("analysis should succeed");
        assert_eq!(analysis.credibility_score, 40.0);
        assert!(!analysis.is_contradictory);
    }
}
