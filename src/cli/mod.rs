//! Command-line interface for claimforge.
//!
//! Provides commands for running the verification service, submitting
//! claims, and inspecting job status, queue stats and system health.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
