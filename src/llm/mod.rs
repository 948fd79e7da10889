//! LLM integration for claimforge.
//!
//! Provides an OpenAI-compatible chat-completions client used by the claim
//! normalizer and the verification agents (evidence extraction, credibility
//! analysis, verdict synthesis, blog drafting).
//!
//! The [`LlmProvider`] trait is the seam between agents and the transport so
//! tests can substitute deterministic providers.

pub mod client;

pub use client::{Choice, GenerationRequest, GenerationResponse, LlmClient, LlmProvider, Message, Usage};
