//! The claim verification pipeline.
//!
//! A fixed sequence of opaque external stages run per job:
//!
//! 1. **Search**: neural web search for candidate sources
//! 2. **Evidence extraction**: structured quotes for/against the claim
//! 3. **Credibility analysis**: source scoring and contradiction detection
//! 4. **Verdict**: final True/False/Misleading/Unverified synthesis
//! 5. **Blog draft**: derived markdown artifact
//! 6. **Persistence**: hot cache, durable store and vector index writes
//!    (best-effort; failures never un-complete a job)
//!
//! Progress is reported at fixed checkpoints (10/30/50/70/85/95/100) through
//! the worker's progress sink. Any stage failure aborts the attempt and
//! hands the job to the queue's retry policy.

pub mod config;
pub mod orchestrator;

pub use config::{ConfigError, PipelineConfig};
pub use orchestrator::{VerificationPipeline, VerificationReport};
