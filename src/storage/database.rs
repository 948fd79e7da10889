//! PostgreSQL result store.
//!
//! One row per analysis job in `analysis_jobs`, keyed by the submission's
//! durable id (independent of queue job ids, which are recycled by retries
//! and retention sweeps).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use super::{JobStatus, ResultStore};

/// Errors that can occur during database operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Connection to the database failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A row of the `analysis_jobs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AnalysisJobRow {
    /// Durable job id.
    pub id: Uuid,
    /// The raw submitted input.
    pub input: String,
    /// Submitting user, if known.
    pub user_id: Option<String>,
    /// Current status string (PENDING/RUNNING/COMPLETED/FAILED).
    pub status: String,
    /// Result payload once completed.
    pub result: Option<serde_json::Value>,
    /// Error message once failed.
    pub error_message: Option<String>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// PostgreSQL database client.
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connects to the database.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::ConnectionFailed` if the pool cannot be
    /// established.
    pub async fn connect(database_url: &str) -> Result<Self, DatabaseError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Creates a client from an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the `analysis_jobs` table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analysis_jobs (
                id UUID PRIMARY KEY,
                input TEXT NOT NULL,
                user_id TEXT,
                status TEXT NOT NULL DEFAULT 'PENDING',
                result JSONB,
                error_message TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ResultStore for Database {
    async fn create(
        &self,
        id: Uuid,
        input: &str,
        user_id: Option<&str>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO analysis_jobs (id, input, user_id, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(input)
        .bind(user_id)
        .bind(JobStatus::Pending.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        result: Option<&serde_json::Value>,
        error_message: Option<&str>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            UPDATE analysis_jobs
            SET status = $2,
                result = COALESCE($3, result),
                error_message = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(result)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<AnalysisJobRow>, DatabaseError> {
        let row = sqlx::query_as::<_, AnalysisJobRow>(
            r#"SELECT id, input, user_id, status, result, error_message, created_at, updated_at
               FROM analysis_jobs WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_wire_format() {
        assert_eq!(JobStatus::Pending.to_string(), "PENDING");
        assert_eq!(JobStatus::Failed.to_string(), "FAILED");

        let json = serde_json::to_string(&JobStatus::Completed).expect("serialize");
        assert_eq!(json, "\"COMPLETED\"");
    }

    #[test]
    fn test_database_error_display() {
        let err = DatabaseError::ConnectionFailed("refused".to_string());
        assert!(err.to_string().contains("refused"));
    }
}
