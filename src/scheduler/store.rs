//! Minimal backing-store interface for the job queue.
//!
//! The queue depends on this trait rather than a concrete broker: any
//! durable, priority-capable store with an at-most-one-claimant claim
//! operation can implement it. Two backends ship with the crate: Redis
//! ([`RedisJobStore`](super::redis_store::RedisJobStore)) and an in-process
//! map ([`MemoryJobStore`](super::memory::MemoryJobStore)).

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use super::job::JobRecord;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to connect to the backing store.
    #[error("Store connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// Failed to serialize or deserialize a job record.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store connection has been released.
    #[error("Store is closed")]
    Closed,
}

/// Per-state job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    /// Jobs waiting (ready or scheduled) to be claimed.
    pub waiting: usize,
    /// Jobs currently claimed by a worker slot.
    pub active: usize,
    /// Retained completed jobs.
    pub completed: usize,
    /// Retained failed jobs.
    pub failed: usize,
}

impl StateCounts {
    /// Jobs counting against queue capacity.
    pub fn outstanding(&self) -> usize {
        self.waiting + self.active
    }

    /// All tracked jobs.
    pub fn total(&self) -> usize {
        self.waiting + self.active + self.completed + self.failed
    }
}

/// Durable job store with atomic claims.
///
/// Ordering contract: `claim` returns the highest-priority ready job,
/// FIFO within a priority level. A job is returned by exactly one claim
/// across all concurrent callers.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Liveness probe.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Inserts a new waiting job, scheduled `delay` from now (zero for
    /// immediately eligible).
    async fn insert(&self, record: &JobRecord, delay: Duration) -> Result<(), StoreError>;

    /// Atomically claims the next eligible job, marking it active and
    /// incrementing its attempt counter. Returns `None` when the queue is
    /// paused or no job is ready.
    async fn claim(&self) -> Result<Option<JobRecord>, StoreError>;

    /// Marks an active job completed with its result.
    async fn complete(&self, id: Uuid, result: serde_json::Value) -> Result<(), StoreError>;

    /// Returns an active job to the waiting set, scheduled `delay` from now.
    async fn retry(&self, record: &JobRecord, delay: Duration) -> Result<(), StoreError>;

    /// Marks an active job permanently failed with the given reason.
    async fn fail(&self, id: Uuid, reason: &str) -> Result<(), StoreError>;

    /// Persists a progress value for an active job. Values lower than the
    /// stored progress are ignored.
    async fn set_progress(&self, id: Uuid, progress: u8) -> Result<(), StoreError>;

    /// Fetches a job record by id. Records that cannot be read back intact
    /// are repaired to the `Unknown` sentinel rather than failing.
    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError>;

    /// Current per-state counts.
    async fn counts(&self) -> Result<StateCounts, StoreError>;

    /// Pauses claiming. Waiting jobs stay queued.
    async fn pause(&self) -> Result<(), StoreError>;

    /// Resumes claiming.
    async fn resume(&self) -> Result<(), StoreError>;

    /// Returns whether claiming is paused.
    async fn is_paused(&self) -> Result<bool, StoreError>;

    /// Removes jobs that have been active longer than `older_than` from the
    /// active set and returns them, so the caller can route them through the
    /// retry policy. This is the store-level job deadline.
    async fn recover_stale(&self, older_than: Duration) -> Result<Vec<JobRecord>, StoreError>;

    /// Advisory cleanup: drops terminal jobs beyond the retention bounds.
    async fn sweep(&self, keep_completed: usize, keep_failed: usize) -> Result<(), StoreError>;

    /// Releases the store connection. Further operations may fail.
    async fn close(&self) -> Result<(), StoreError>;
}
