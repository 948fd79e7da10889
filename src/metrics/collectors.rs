//! Collector facade over the raw Prometheus metrics.

use std::time::Duration;

use super::prometheus::{ACTIVE_JOBS, CACHE_LOOKUPS, JOBS_TOTAL, JOB_DURATION, QUEUE_DEPTH};

/// Records operational metrics without exposing registry plumbing.
///
/// All methods are no-ops until [`init_metrics`](super::init_metrics) has
/// run, so library consumers that skip metrics pay nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    /// Creates a collector.
    pub fn new() -> Self {
        Self
    }

    /// Records a settled job attempt.
    pub fn record_job(&self, outcome: &str, duration: Duration) {
        if let Some(jobs) = JOBS_TOTAL.get() {
            jobs.with_label_values(&[outcome]).inc();
        }
        if let Some(histogram) = JOB_DURATION.get() {
            histogram.observe(duration.as_secs_f64());
        }
    }

    /// Marks a job as in flight.
    pub fn inc_active_jobs(&self) {
        if let Some(gauge) = ACTIVE_JOBS.get() {
            gauge.inc();
        }
    }

    /// Marks a job as settled.
    pub fn dec_active_jobs(&self) {
        if let Some(gauge) = ACTIVE_JOBS.get() {
            gauge.dec();
        }
    }

    /// Publishes the outstanding queue depth.
    pub fn set_queue_depth(&self, depth: usize) {
        if let Some(gauge) = QUEUE_DEPTH.get() {
            gauge.set(depth as f64);
        }
    }

    /// Records a claim cache lookup.
    pub fn record_cache_lookup(&self, hit: bool) {
        if let Some(lookups) = CACHE_LOOKUPS.get() {
            let result = if hit { "hit" } else { "miss" };
            lookups.with_label_values(&[result]).inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_is_safe_without_init() {
        let collector = MetricsCollector::new();
        collector.record_job("completed", Duration::from_secs(1));
        collector.inc_active_jobs();
        collector.dec_active_jobs();
        collector.set_queue_depth(5);
        collector.record_cache_lookup(true);
    }
}
