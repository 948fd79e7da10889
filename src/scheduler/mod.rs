//! Asynchronous job queue and worker orchestration.
//!
//! This module is the engineering core of claimforge: a durable,
//! priority-ordered job queue with retry/backoff semantics, a worker pool,
//! a circuit-breaking health monitor and self-healing control loops.
//!
//! # Architecture
//!
//! ```text
//!                   ┌──────────────┐
//!                   │  Submitter   │
//!                   │ (API / CLI)  │
//!                   └──────┬───────┘
//!                          │ enqueue
//!                   ┌──────▼───────┐      ┌────────────────┐
//!                   │   JobQueue   │◄─────┤ HealthMonitor  │
//!                   │  (JobStore)  │      │ (circuit brkr) │
//!                   └──────┬───────┘      └────────────────┘
//!                          │ claim (atomic, priority + FIFO)
//!        ┌─────────────────┼─────────────────┐
//!        ▼                 ▼                 ▼
//!   ┌─────────┐       ┌─────────┐       ┌─────────┐
//!   │ Slot 1  │       │ Slot 2  │  ...  │ Slot N  │
//!   └─────────┘       └─────────┘       └─────────┘
//!        ▲        auto-resume / auto-scale / monitoring
//!        └──────────────── Supervisor ────────────────
//! ```
//!
//! # Ordering and claims
//!
//! Jobs drain strictly by priority (higher first), FIFO within a priority.
//! The store's claim operation is atomic per job, so no cross-slot locking
//! is needed; a claimed job runs to completion or failure without
//! preemption.
//!
//! # Reliability
//!
//! - Failed attempts reschedule with exponential or fixed backoff until the
//!   attempt budget is exhausted, then fail permanently with the last
//!   reason retained
//! - Jobs stuck past the store-level deadline are recovered through the
//!   same retry policy at pool start and from the monitoring loop
//! - The health monitor's circuit breaker stops probe traffic to a down
//!   store and fails enqueues fast
//! - Graceful shutdown closes admissions, stops the pool, waits a bounded
//!   grace period for in-flight jobs and then releases the store

pub mod health;
pub mod job;
pub mod memory;
pub mod metrics;
pub mod queue;
pub mod redis_store;
pub mod store;
pub mod supervisor;
pub mod worker_pool;

// Re-export main types for convenience
pub use health::{CircuitBreaker, HealthMonitor, StoreHealth};
pub use job::{
    resolve_priority, BackoffKind, BackoffPolicy, ClaimPayload, EnqueueOptions, InputType,
    JobRecord, JobState,
};
pub use memory::MemoryJobStore;
pub use metrics::{MetricsSnapshot, QueueMetrics};
pub use queue::{JobQueue, QueueConfig, QueueError, QueueStatsReport, RetryDisposition, StatusReport};
pub use redis_store::RedisJobStore;
pub use store::{JobStore, StateCounts, StoreError};
pub use supervisor::{optimal_concurrency, Supervisor, SupervisorConfig};
pub use worker_pool::{
    JobProcessor, NoopProgress, PoolError, ProgressSink, QueueProgress, WorkerPool,
    WorkerPoolConfig, MAX_CONCURRENCY,
};
