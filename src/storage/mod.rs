//! Durable storage collaborators.
//!
//! - [`Database`]: PostgreSQL row per analysis job, updated best-effort as
//!   the pipeline progresses
//! - [`VectorIndex`]: optional semantic index of completed verdicts
//!
//! Both are side-effect targets: their failures are logged and swallowed,
//! never allowed to fail a job that produced a verdict.

pub mod database;
pub mod vector;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use database::{AnalysisJobRow, Database, DatabaseError};
pub use vector::{HttpVectorIndex, VectorEntry, VectorIndex, VectorIndexError};

/// Status values persisted to the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "PENDING"),
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::Completed => write!(f, "COMPLETED"),
            JobStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Durable record of analysis jobs, keyed independently of the queue.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Creates the tracking row for a new submission.
    async fn create(
        &self,
        id: Uuid,
        input: &str,
        user_id: Option<&str>,
    ) -> Result<(), DatabaseError>;

    /// Updates the row status, optionally attaching the result payload or
    /// an error message.
    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        result: Option<&serde_json::Value>,
        error_message: Option<&str>,
    ) -> Result<(), DatabaseError>;

    /// Fetches a row by id.
    async fn find(&self, id: Uuid) -> Result<Option<AnalysisJobRow>, DatabaseError>;
}
