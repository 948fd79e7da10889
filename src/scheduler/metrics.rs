//! Process-wide queue metrics.
//!
//! Counters and a bounded history of queue-size samples, updated atomically
//! by concurrent worker slots and control loops. The struct is explicitly
//! owned and constructor-injected into the queue so tests can build isolated
//! instances; it resets only when the process restarts.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Default capacity of the queue-size history ring.
const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Running queue metrics.
#[derive(Debug)]
pub struct QueueMetrics {
    processed: AtomicU64,
    failed: AtomicU64,
    errors: AtomicU64,
    total_processing_ms: AtomicU64,
    last_processed_at: Mutex<Option<DateTime<Utc>>>,
    last_error_at: Mutex<Option<DateTime<Utc>>>,
    size_history: Mutex<VecDeque<usize>>,
    history_capacity: usize,
}

impl QueueMetrics {
    /// Creates metrics with the default history capacity.
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Creates metrics with a custom history capacity.
    pub fn with_history_capacity(capacity: usize) -> Self {
        Self {
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            total_processing_ms: AtomicU64::new(0),
            last_processed_at: Mutex::new(None),
            last_error_at: Mutex::new(None),
            size_history: Mutex::new(VecDeque::with_capacity(capacity)),
            history_capacity: capacity,
        }
    }

    /// Records a successfully processed job and its processing time.
    pub fn record_completion(&self, duration: Duration) {
        self.processed.fetch_add(1, Ordering::SeqCst);
        self.total_processing_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
        *self.last_processed_at.lock().expect("metrics lock poisoned") = Some(Utc::now());
    }

    /// Records a permanently failed job and its processing time.
    pub fn record_failure(&self, duration: Duration) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.total_processing_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
        *self.last_processed_at.lock().expect("metrics lock poisoned") = Some(Utc::now());
    }

    /// Records a failed attempt (retried or terminal).
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        *self.last_error_at.lock().expect("metrics lock poisoned") = Some(Utc::now());
    }

    /// Samples the current outstanding queue size. The oldest sample is
    /// evicted once the ring is full.
    pub fn record_queue_size(&self, size: usize) {
        let mut history = self.size_history.lock().expect("metrics lock poisoned");
        if history.len() == self.history_capacity {
            history.pop_front();
        }
        history.push_back(size);
    }

    /// Takes a consistent snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let processed = self.processed.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        let total_ms = self.total_processing_ms.load(Ordering::SeqCst);
        let terminal = processed + failed;

        MetricsSnapshot {
            processed,
            failed,
            errors: self.errors.load(Ordering::SeqCst),
            average_processing_ms: if terminal > 0 { total_ms / terminal } else { 0 },
            failure_rate: if terminal > 0 {
                (failed as f64 / terminal as f64 * 100.0 * 100.0).round() / 100.0
            } else {
                0.0
            },
            last_processed_at: *self.last_processed_at.lock().expect("metrics lock poisoned"),
            last_error_at: *self.last_error_at.lock().expect("metrics lock poisoned"),
            size_history: self
                .size_history
                .lock()
                .expect("metrics lock poisoned")
                .iter()
                .copied()
                .collect(),
        }
    }
}

impl Default for QueueMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of the queue metrics.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Jobs that completed successfully.
    pub processed: u64,
    /// Jobs that failed permanently.
    pub failed: u64,
    /// Failed attempts, including retried ones.
    pub errors: u64,
    /// Rolling average processing time in milliseconds.
    pub average_processing_ms: u64,
    /// failed / (processed + failed), as a percentage rounded to 2 decimals.
    pub failure_rate: f64,
    /// When a job last reached a terminal state.
    pub last_processed_at: Option<DateTime<Utc>>,
    /// When an attempt last failed.
    pub last_error_at: Option<DateTime<Utc>>,
    /// Recent queue-size samples, oldest first.
    pub size_history: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = QueueMetrics::new();

        metrics.record_completion(Duration::from_millis(100));
        metrics.record_completion(Duration::from_millis(300));
        metrics.record_failure(Duration::from_millis(200));
        metrics.record_error();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.processed, 2);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.average_processing_ms, 200);
        assert!(snapshot.last_processed_at.is_some());
        assert!(snapshot.last_error_at.is_some());
    }

    #[test]
    fn test_failure_rate_percentage() {
        let metrics = QueueMetrics::new();
        for _ in 0..3 {
            metrics.record_completion(Duration::ZERO);
        }
        metrics.record_failure(Duration::ZERO);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.failure_rate, 25.0);
    }

    #[test]
    fn test_failure_rate_empty_is_zero() {
        let snapshot = QueueMetrics::new().snapshot();
        assert_eq!(snapshot.failure_rate, 0.0);
        assert_eq!(snapshot.average_processing_ms, 0);
    }

    #[test]
    fn test_size_history_ring_evicts_oldest() {
        let metrics = QueueMetrics::with_history_capacity(3);
        for size in 1..=5 {
            metrics.record_queue_size(size);
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.size_history, vec![3, 4, 5]);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        use std::sync::Arc;

        let metrics = Arc::new(QueueMetrics::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let metrics = Arc::clone(&metrics);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    metrics.record_completion(Duration::from_millis(1));
                }
            }));
        }
        for handle in handles {
            handle.join().expect("thread should not panic");
        }

        assert_eq!(metrics.snapshot().processed, 800);
    }
}
