//! Final verdict synthesis agent.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::utils::extract_json_from_response;

use super::{AgentError, AgentResult, CredibilityAnalysis, Evidence};

const SYSTEM_PROMPT: &str = "You deliver the final verdict in a fact-checking pipeline. Given a \
claim, its evidence and a credibility analysis, decide whether the claim is True, False, \
Misleading or Unverified, with a confidence score from 0 to 100 and a detailed explanation. \
Reply with only a JSON object with the fields: verdict, confidence, explanation, key_evidence \
(array of strings).";

/// The four possible fact-check outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerdictLabel {
    True,
    False,
    Misleading,
    Unverified,
}

impl std::fmt::Display for VerdictLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerdictLabel::True => write!(f, "True"),
            VerdictLabel::False => write!(f, "False"),
            VerdictLabel::Misleading => write!(f, "Misleading"),
            VerdictLabel::Unverified => write!(f, "Unverified"),
        }
    }
}

/// The synthesized verdict for a claim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verdict {
    /// The outcome.
    pub verdict: VerdictLabel,
    /// Confidence in the outcome, 0 to 100.
    pub confidence: f64,
    /// Detailed reasoning.
    pub explanation: String,
    /// The evidence quotes that most influenced the outcome.
    #[serde(default)]
    pub key_evidence: Vec<String>,
}

/// Synthesizes the final verdict from evidence and analysis.
pub struct VerdictAgent {
    llm: Arc<dyn LlmProvider>,
    model: String,
}

impl VerdictAgent {
    /// Creates a verdict agent using the given provider and model.
    pub fn new(llm: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    /// Generates the final verdict for `claim`.
    pub async fn generate(
        &self,
        claim: &str,
        evidence: &[Evidence],
        analysis: &CredibilityAnalysis,
    ) -> AgentResult<Verdict> {
        let evidence_text = evidence
            .iter()
            .map(|e| format!("- {} (Source: {})", e.quote, e.source))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Claim: \"{}\"\n\nCredibility score: {}\nContradictions: {}\n\nEvidence:\n{}",
            claim,
            analysis.credibility_score,
            analysis.contradictions.join(", "),
            evidence_text
        );

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

    fn analysis() -> CredibilityAnalysis {
        CredibilityAnalysis {
            credibility_score: 90.0,
            credibility_reasoning: "reliable".to_string(),
            contradictions: vec![],
            is_contradictory: false,
        }
    }

    #[tokio::test]
    async fn test_generate_parses_verdict() {
        let provider = Arc::new(CannedProvider {
            content: r#"{"verdict": "True", "confidence": 97, "explanation": "well documented",
                "key_evidence": ["Paris is the capital of France"]}"#
                .to_string(),
        });
        let agent = VerdictAgent::new(provider, "m");

        let verdict = agent
            .generate("Paris is the capital of France.", &[], &analysis())
            .await
            .expect("verdict should succeed");

        assert_eq!(verdict.verdict, VerdictLabel::True);
        assert_eq!(verdict.confidence, 97.0);
        assert_eq!(verdict.key_evidence.len(), 1);
    }

    #[test]
    fn test_verdict_label_serde_roundtrip() {
        for label in [
            VerdictLabel::True,
            VerdictLabel::False,
            VerdictLabel::Misleading,
            VerdictLabel::Unverified,
        ] {
            let json = serde_json::to_string(&label).expect("serialize");
            let back: VerdictLabel = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(back, label);
        }
    }

    #[test]
    fn test_verdict_label_display_matches_wire_form() {
        assert_eq!(
            serde_json::to_string(&VerdictLabel::Misleading).expect("serialize"),
            format!("\"{}\"", VerdictLabel::Misleading)
        );
    }
}
