//! Evidence extraction agent.
//!
//! Mines search results for quotes and facts bearing on the claim, marking
//! each as supporting or refuting.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::search::SearchResult;
use crate::utils::extract_json_from_response;

use super::{AgentError, AgentResult};

/// Per-source text budget when building the extraction context.
const SOURCE_TEXT_LIMIT: usize = 1000;

const SYSTEM_PROMPT: &str = "You extract evidence for fact-checking. Given a claim and a set of \
web sources, pull out the quotes and facts that bear on the claim and judge whether each one \
supports or refutes it. Reply with only a JSON object of the form \
{\"evidence\": [{\"source\": url, \"quote\": string, \"relevance\": number between 0 and 1, \
\"supports\": boolean, \"explanation\": string}]}.";

/// One piece of extracted evidence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evidence {
    /// Source URL the quote came from.
    pub source: String,
    /// The quoted text.
    pub quote: String,
    /// Relevance to the claim, 0.0 to 1.0.
    pub relevance: f64,
    /// Whether the quote supports the claim.
    pub supports: bool,
    /// Why this quote matters.
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Deserialize)]
struct EvidenceReply {
    evidence: Vec<Evidence>,
}

/// Extracts structured evidence from search results.
pub struct EvidenceExtractor {
    llm: Arc<dyn LlmProvider>,
    model: String,
}

impl EvidenceExtractor {
    /// Creates an extractor using the given provider and model.
    pub fn new(llm: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    /// Extracts evidence for `claim` from the given sources.
    pub async fn extract(
        &self,
        claim: &str,
        results: &[SearchResult],
    ) -> AgentResult<Vec<Evidence>> {
        let context = results
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let text: String = r.text.chars().take(SOURCE_TEXT_LIMIT).collect();
                format!("Source {} ({}):\n{}", i + 1, r.url, text)
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let prompt = format!("Claim: \"{}\"\n\nSearch results:\n{}", claim, context);

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
        let reply: EvidenceReply =
            serde_json::from_str(&json).map_err(|e| AgentError::Parse(e.to_string()))?;

        Ok(reply.evidence)
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

    fn source(url: &str, text: &str) -> SearchResult {
        SearchResult {
            url: url.to_string(),
            title: None,
            text: text.to_string(),
            highlights: vec![],
            score: None,
        }
    }

    #[tokio::test]
    async fn test_extract_parses_evidence_list() {
        let provider = Arc::new(CannedProvider {
            content: r#"{"evidence": [{"source": "https://a.org", "quote": "Paris is the capital",
                "relevance": 0.9, "supports": true, "explanation": "direct statement"}]}"#
                .to_string(),
        });
        let extractor = EvidenceExtractor::new(provider, "m");

        let evidence = extractor
            .extract(
                "Paris is the capital of France.",
                &[source("https://a.org", "Paris is the capital of France.")],
            )
            .await
            .expect("extraction should succeed");

        assert_eq!(evidence.len(), 1);
        assert!(evidence[0].supports);
        assert_eq!(evidence[0].source, "https://a.org");
    }

    #[tokio::test]
    async fn test_extract_truncates_long_sources() {
        // A source longer than the per-source budget must not panic and the
        // prompt must still carry the leading text.
        let provider = Arc::new(CannedProvider {
            content: r#"{"evidence": []}"#.to_string(),
        });
        let extractor = EvidenceExtractor::new(provider, "m");
        let long_text = "x".repeat(SOURCE_TEXT_LIMIT * 3);

        let evidence = extractor
            .extract("claim", &[source("https://b.org", &long_text)])
            .await
            .expect("extraction should succeed");
        assert!(evidence.is_empty());
    }
}
