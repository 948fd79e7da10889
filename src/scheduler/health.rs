//! Backing-store health monitoring with a circuit breaker.
//!
//! # Breaker state machine
//!
//! ```text
//! CLOSED --(consecutive failures >= threshold)--> OPEN
//! OPEN   --(open duration elapsed, next probe)--> probe runs
//!            probe success -> CLOSED
//!            probe failure -> OPEN, timer reset
//! ```
//!
//! There is no separate half-open state held between probes: the first probe
//! after the open duration decides the transition lazily. While OPEN, probes
//! are skipped entirely and health reports unhealthy in O(1) without
//! contacting the store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::store::JobStore;

/// Default consecutive-failure threshold before the breaker opens.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default time the breaker stays open before the next real probe.
pub const DEFAULT_OPEN_DURATION: Duration = Duration::from_secs(60);

/// Default interval for the background probe task.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct BreakerInner {
    open: bool,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

/// Failure-isolation state machine for a flaky dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    open_duration: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Creates a breaker with the given threshold and open duration.
    pub fn new(threshold: u32, open_duration: Duration) -> Self {
        Self {
            threshold,
            open_duration,
            inner: Mutex::new(BreakerInner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().expect("breaker lock poisoned")
    }

    /// Whether a real probe may run now. While open, only true once the
    /// open duration has elapsed since the last failure.
    pub fn allow_probe(&self) -> bool {
        let inner = self.lock();
        if !inner.open {
            return true;
        }
        inner
            .last_failure
            .is_some_and(|at| at.elapsed() >= self.open_duration)
    }

    /// Records a probe success: forces CLOSED and clears the failure count.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.open {
            info!("Circuit breaker closed after successful probe");
        }
        inner.open = false;
        inner.consecutive_failures = 0;
        inner.last_failure = None;
    }

    /// Records a probe failure: increments the failure count, resets the
    /// failure timer, and opens the breaker at the threshold.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures += 1;
        inner.last_failure = Some(Instant::now());
        if inner.consecutive_failures >= self.threshold && !inner.open {
            inner.open = true;
            error!(
                failures = inner.consecutive_failures,
                "Circuit breaker opened"
            );
        }
    }

    /// Returns whether the breaker is open.
    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Current consecutive failure count.
    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_OPEN_DURATION)
    }
}

/// Point-in-time health of the backing store.
#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    /// Whether the last probe reached the store.
    pub connected: bool,
    /// When the store last answered a probe.
    pub last_ping: Option<DateTime<Utc>>,
    /// Whether the breaker is currently open.
    pub breaker_open: bool,
    /// Consecutive probe failures.
    pub consecutive_failures: u32,
}

/// Periodic liveness probe of the backing store, gated by a circuit breaker.
pub struct HealthMonitor {
    store: Arc<dyn JobStore>,
    breaker: CircuitBreaker,
    connected: AtomicBool,
    last_ping: Mutex<Option<DateTime<Utc>>>,
}

impl HealthMonitor {
    /// Creates a monitor with the default breaker.
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self::with_breaker(store, CircuitBreaker::default())
    }

    /// Creates a monitor with a custom breaker.
    pub fn with_breaker(store: Arc<dyn JobStore>, breaker: CircuitBreaker) -> Self {
        Self {
            store,
            breaker,
            connected: AtomicBool::new(false),
            last_ping: Mutex::new(None),
        }
    }

    /// Runs one health check through the breaker.
    ///
    /// While the breaker is open and the open duration has not elapsed, the
    /// store is not contacted and the check reports unhealthy immediately.
    pub async fn check(&self) -> bool {
        if !self.breaker.allow_probe() {
            debug!("Health probe skipped: circuit breaker open");
            self.connected.store(false, Ordering::SeqCst);
            return false;
        }

        match self.store.ping().await {
            Ok(()) => {
                self.breaker.record_success();
                self.connected.store(true, Ordering::SeqCst);
                *self.last_ping.lock().expect("health lock poisoned") = Some(Utc::now());
                true
            }
            Err(e) => {
                warn!(error = %e, "Store health check failed");
                self.breaker.record_failure();
                self.connected.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    /// Whether the last probe reached the store.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Snapshot of the monitor state.
    pub fn status(&self) -> StoreHealth {
        StoreHealth {
            connected: self.is_connected(),
            last_ping: *self.last_ping.lock().expect("health lock poisoned"),
            breaker_open: self.breaker.is_open(),
            consecutive_failures: self.breaker.consecutive_failures(),
        }
    }

    /// Spawns the background probe task, checking on a fixed interval until
    /// the shutdown signal fires. Health state is never staler than one
    /// interval under normal operation.
    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let monitor = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // Consume the immediate first tick so the first probe waits a
            // full interval after startup
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor.check().await;
                    }
                    _ = shutdown.recv() => {
                        debug!("Health monitor stopping");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::store::{StateCounts, StoreError};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use uuid::Uuid;

    /// Store double whose pings fail on demand and count every real probe.
    struct FlakyStore {
        failing: AtomicBool,
        pings: AtomicUsize,
    }

    impl FlakyStore {
        fn new(failing: bool) -> Self {
            Self {
                failing: AtomicBool::new(failing),
                pings: AtomicUsize::new(0),
            }
        }

        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        fn ping_count(&self) -> usize {
            self.pings.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl crate::scheduler::store::JobStore for FlakyStore {
        async fn ping(&self) -> Result<(), StoreError> {
            self.pings.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                Err(StoreError::ConnectionFailed("down".to_string()))
            } else {
                Ok(())
            }
        }

        async fn insert(
            &self,
            _record: &crate::scheduler::job::JobRecord,
            _delay: Duration,
        ) -> Result<(), StoreError> {
            Ok(())
        }
        async fn claim(&self) -> Result<Option<crate::scheduler::job::JobRecord>, StoreError> {
            Ok(None)
        }
        async fn complete(&self, _id: Uuid, _result: serde_json::Value) -> Result<(), StoreError> {
            Ok(())
        }
        async fn retry(
            &self,
            _record: &crate::scheduler::job::JobRecord,
            _delay: Duration,
        ) -> Result<(), StoreError> {
            Ok(())
        }
        async fn fail(&self, _id: Uuid, _reason: &str) -> Result<(), StoreError> {
            Ok(())
        }
        async fn set_progress(&self, _id: Uuid, _progress: u8) -> Result<(), StoreError> {
            Ok(())
        }
        async fn get(
            &self,
            _id: Uuid,
        ) -> Result<Option<crate::scheduler::job::JobRecord>, StoreError> {
            Ok(None)
        }
        async fn counts(&self) -> Result<StateCounts, StoreError> {
            Ok(StateCounts::default())
        }
        async fn pause(&self) -> Result<(), StoreError> {
            Ok(())
        }
        async fn resume(&self) -> Result<(), StoreError> {
            Ok(())
        }
        async fn is_paused(&self) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn recover_stale(
            &self,
            _older_than: Duration,
        ) -> Result<Vec<crate::scheduler::job::JobRecord>, StoreError> {
            Ok(Vec::new())
        }
        async fn sweep(&self, _keep_completed: usize, _keep_failed: usize) -> Result<(), StoreError> {
            Ok(())
        }
        async fn close(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_breaker_opens_at_threshold() {
        let store = Arc::new(FlakyStore::new(true));
        let monitor = HealthMonitor::with_breaker(
            Arc::clone(&store) as Arc<dyn JobStore>,
            CircuitBreaker::new(5, Duration::from_secs(60)),
        );

        for _ in 0..4 {
            assert!(!monitor.check().await);
            assert!(!monitor.status().breaker_open);
        }
        assert!(!monitor.check().await);
        assert!(monitor.status().breaker_open);
        assert_eq!(store.ping_count(), 5);
    }

    #[tokio::test]
    async fn test_open_breaker_skips_probes() {
        let store = Arc::new(FlakyStore::new(true));
        let monitor = HealthMonitor::with_breaker(
            Arc::clone(&store) as Arc<dyn JobStore>,
            CircuitBreaker::new(2, Duration::from_secs(60)),
        );

        monitor.check().await;
        monitor.check().await;
        assert!(monitor.status().breaker_open);
        let probes_when_opened = store.ping_count();

        // Further checks before the open duration elapses must not contact
        // the store at all
        for _ in 0..3 {
            assert!(!monitor.check().await);
        }
        assert_eq!(store.ping_count(), probes_when_opened);
    }

    #[tokio::test]
    async fn test_breaker_closes_after_open_duration_on_success() {
        let store = Arc::new(FlakyStore::new(true));
        let monitor = HealthMonitor::with_breaker(
            Arc::clone(&store) as Arc<dyn JobStore>,
            CircuitBreaker::new(2, Duration::from_millis(40)),
        );

        monitor.check().await;
        monitor.check().await;
        assert!(monitor.status().breaker_open);

        store.set_failing(false);
        tokio::time::sleep(Duration::from_millis(60)).await;

        // The first probe after the open duration runs for real and closes
        // the breaker
        assert!(monitor.check().await);
        let status = monitor.status();
        assert!(!status.breaker_open);
        assert!(status.connected);
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.last_ping.is_some());
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_timer() {
        let store = Arc::new(FlakyStore::new(true));
        let monitor = HealthMonitor::with_breaker(
            Arc::clone(&store) as Arc<dyn JobStore>,
            CircuitBreaker::new(2, Duration::from_millis(40)),
        );

        monitor.check().await;
        monitor.check().await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        // Half-open probe fails: breaker stays open with a fresh timer, so
        // the immediately following check is skipped again
        let probes_before = store.ping_count();
        assert!(!monitor.check().await);
        assert_eq!(store.ping_count(), probes_before + 1);
        assert!(!monitor.check().await);
        assert_eq!(store.ping_count(), probes_before + 1);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let store = Arc::new(FlakyStore::new(true));
        let monitor = HealthMonitor::with_breaker(
            Arc::clone(&store) as Arc<dyn JobStore>,
            CircuitBreaker::new(5, Duration::from_secs(60)),
        );

        monitor.check().await;
        monitor.check().await;
        assert_eq!(monitor.status().consecutive_failures, 2);

        store.set_failing(false);
        assert!(monitor.check().await);
        assert_eq!(monitor.status().consecutive_failures, 0);
    }
}
