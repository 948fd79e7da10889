//! claimforge: claim fact-checking pipeline.
//!
//! This library provides the core of an automated fact-checking service:
//! claims are normalized and content-addressed, deduplicated through a hot
//! cache, and verified by a background worker pool that runs a fixed
//! evidence-gathering pipeline against web search and LLM collaborators.
//!
//! The engineering core is the [`scheduler`] module: a durable,
//! priority-ordered job queue with retry/backoff semantics, a worker pool,
//! a circuit-breaking health monitor and self-healing control loops.

// Core modules
pub mod agents;
pub mod cache;
pub mod cli;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod scheduler;
pub mod search;
pub mod service;
pub mod storage;
pub mod utils;

// Re-export commonly used error types
pub use error::{LlmError, PipelineStep, PipelineStepError, SearchError, TransformError};
