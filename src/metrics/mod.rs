//! Prometheus metrics for claimforge.
//!
//! Exposes process-level operational metrics (job outcomes, durations,
//! queue depth, in-flight jobs, cache hit rate) through a registry that the
//! `serve` command initializes at startup. The [`MetricsCollector`] facade
//! keeps call sites free of registry plumbing; recording before
//! `init_metrics` has run is a silent no-op.
//!
//! These exported metrics complement the injectable
//! [`QueueMetrics`](crate::scheduler::QueueMetrics), which backs the stats
//! API envelope.

mod collectors;
mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{gather_metrics, init_metrics};
