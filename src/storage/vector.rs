//! Semantic vector index client.
//!
//! Completed verdicts are upserted into an external vector index so future
//! related claims can be retrieved semantically. Embedding happens on the
//! index side; this client only ships documents. Strictly best-effort.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during vector index operations.
#[derive(Debug, Error)]
pub enum VectorIndexError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Index API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

/// A verdict document for the index.
#[derive(Debug, Clone, Serialize)]
pub struct VectorEntry {
    /// Document id.
    pub id: Uuid,
    /// The verified claim text.
    pub text: String,
    /// Topical category.
    pub category: String,
    /// Verdict label.
    pub verdict: String,
    /// Verdict explanation summary.
    pub summary: String,
}

/// Upserts verdict documents into a semantic index.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Upserts one entry.
    async fn upsert(&self, entry: &VectorEntry) -> Result<(), VectorIndexError>;
}

/// HTTP client for a document-upsert vector index API.
pub struct HttpVectorIndex {
    client: Client,
    api_base: String,
    api_key: String,
}

impl HttpVectorIndex {
    /// Creates a new index client.
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_base: api_base.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl VectorIndex for HttpVectorIndex {
    async fn upsert(&self, entry: &VectorEntry) -> Result<(), VectorIndexError> {
        let url = format!("{}/vectors/upsert", self.api_base.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(entry)
            .send()
            .await
            .map_err(|e| VectorIndexError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VectorIndexError::ApiError {
                code: status.as_u16(),
                message: body,
            });
        }
        Ok(())
    }
}
