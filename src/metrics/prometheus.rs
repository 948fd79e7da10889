//! Prometheus metric registration and export.

use prometheus::{
    CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all claimforge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total number of job attempts settled, labeled by outcome
/// (completed/retried/failed).
pub static JOBS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Job processing duration in seconds.
pub static JOB_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Number of jobs currently being processed.
pub static ACTIVE_JOBS: OnceLock<Gauge> = OnceLock::new();

/// Outstanding (waiting + active) jobs in the queue.
pub static QUEUE_DEPTH: OnceLock<Gauge> = OnceLock::new();

/// Claim cache lookups, labeled by result (hit/miss).
pub static CACHE_LOOKUPS: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at application startup; recording methods are no-ops until
/// this has run.
///
/// # Errors
///
/// Returns a `prometheus::Error` if registration fails, typically due to
/// duplicate metric names.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let jobs_total = CounterVec::new(
        Opts::new("claimforge_jobs_total", "Job attempts settled by outcome"),
        &["outcome"],
    )?;

    let job_duration = Histogram::with_opts(
        HistogramOpts::new(
            "claimforge_job_duration_seconds",
            "Job processing duration in seconds",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]),
    )?;

    let active_jobs = Gauge::new(
        "claimforge_active_jobs",
        "Number of jobs currently being processed",
    )?;

    let queue_depth = Gauge::new(
        "claimforge_queue_depth",
        "Outstanding jobs (waiting + active)",
    )?;

    let cache_lookups = CounterVec::new(
        Opts::new("claimforge_cache_lookups_total", "Claim cache lookups"),
        &["result"],
    )?;

    registry.register(Box::new(jobs_total.clone()))?;
    registry.register(Box::new(job_duration.clone()))?;
    registry.register(Box::new(active_jobs.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(cache_lookups.clone()))?;

    let _ = REGISTRY.set(registry);
    let _ = JOBS_TOTAL.set(jobs_total);
    let _ = JOB_DURATION.set(job_duration);
    let _ = ACTIVE_JOBS.set(active_jobs);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = CACHE_LOOKUPS.set(cache_lookups);

    Ok(())
}

/// Encodes the current metrics in the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return String::new();
    };

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&registry.gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
