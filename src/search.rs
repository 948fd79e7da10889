//! Neural web search client for evidence gathering.
//!
//! Wraps an Exa-style search API: a single `search` call returns candidate
//! sources with page text and highlight snippets, which downstream agents
//! mine for evidence. The [`SearchProvider`] trait is the seam the pipeline
//! depends on.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::SearchError;

/// Default request timeout for search calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A single search hit with retrieved page content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Source URL.
    pub url: String,
    /// Page title, when the API provides one.
    #[serde(default)]
    pub title: Option<String>,
    /// Retrieved page text.
    #[serde(default)]
    pub text: String,
    /// Highlighted snippets most relevant to the query.
    #[serde(default)]
    pub highlights: Vec<String>,
    /// Relevance score, when the API provides one.
    #[serde(default)]
    pub score: Option<f64>,
}

/// Abstraction over web search backends.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Searches for sources relevant to the query.
    async fn search(&self, query: &str, limit: usize)
        -> Result<Vec<SearchResult>, SearchError>;
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    #[serde(rename = "type")]
    search_type: &'a str,
    #[serde(rename = "useAutoprompt")]
    use_autoprompt: bool,
    #[serde(rename = "numResults")]
    num_results: usize,
    contents: ContentsRequest,
}

#[derive(Debug, Serialize)]
struct ContentsRequest {
    text: bool,
    highlights: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

/// HTTP client for an Exa-compatible neural search API.
pub struct ExaSearchClient {
    client: Client,
    api_base: String,
    api_key: String,
}

impl ExaSearchClient {
    /// Default API base when `SEARCH_API_BASE` is unset.
    pub const DEFAULT_API_BASE: &'static str = "https://api.exa.ai";

    /// Creates a new search client.
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_base: api_base.into(),
            api_key: api_key.into(),
        }
    }

    /// Creates a client from `SEARCH_API_BASE` (optional) and
    /// `SEARCH_API_KEY` (required).
    pub fn from_env() -> Result<Self, SearchError> {
        let api_base =
            env::var("SEARCH_API_BASE").unwrap_or_else(|_| Self::DEFAULT_API_BASE.to_string());
        let api_key = env::var("SEARCH_API_KEY").map_err(|_| SearchError::MissingApiKey)?;
        Ok(Self::new(api_base, api_key))
    }
}

#[async_trait]
impl SearchProvider for ExaSearchClient {
    async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let url = format!("{}/search", self.api_base.trim_end_matches('/'));
        let request = SearchRequest {
            query,
            search_type: "neural",
            use_autoprompt: true,
            num_results: limit,
            contents: ContentsRequest {
                text: true,
                highlights: true,
            },
        };

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| SearchError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::ApiError {
                code: status.as_u16(),
                message: body,
            });
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| SearchError::ParseError(e.to_string()))?;

        if parsed.results.is_empty() {
            return Err(SearchError::NoResults(query.to_string()));
        }

        Ok(parsed.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_request_wire_format() {
        let request = SearchRequest {
            query: "capital of France",
            search_type: "neural",
            use_autoprompt: true,
            num_results: 5,
            contents: ContentsRequest {
                text: true,
                highlights: true,
            },
        };

        let json = serde_json::to_value(&request).expect("serialization should work");
        assert_eq!(json["type"], "neural");
        assert_eq!(json["useAutoprompt"], true);
        assert_eq!(json["numResults"], 5);
        assert_eq!(json["contents"]["highlights"], true);
    }

    #[test]
    fn test_search_response_parses_sparse_results() {
        let payload = r#"{"results": [{"url": "https://example.org"}]}"#;
        let parsed: SearchResponse = serde_json::from_str(payload).expect("should parse");

        assert_eq!(parsed.results.len(), 1);
        assert_eq!(parsed.results[0].url, "https://example.org");
        assert!(parsed.results[0].text.is_empty());
        assert!(parsed.results[0].highlights.is_empty());
    }
}
