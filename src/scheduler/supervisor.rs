//! Self-healing control loops.
//!
//! Three periodic loops run next to the worker pool:
//!
//! - **auto-resume** (30s): un-pauses a queue left paused by a crash or an
//!   operator, so processing recovers without intervention
//! - **auto-scale** (120s): recomputes the desired concurrency from queue
//!   utilization; the value takes effect on the next pool start
//! - **monitoring** (30s): recomputes health and stats, restarts a stopped
//!   worker pool, recovers stale claims, sweeps terminal retention, and
//!   logs warnings when utilization or failure rate cross thresholds
//!
//! The health monitor's background probe task is owned here as well, so one
//! `shutdown` stops every loop.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::metrics::MetricsCollector;

use super::health::HealthMonitor;
use super::queue::JobQueue;
use super::worker_pool::{WorkerPool, MAX_CONCURRENCY};

/// Configuration for the control loops.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Interval of the auto-resume loop.
    pub auto_resume_interval: Duration,
    /// Interval of the auto-scale loop.
    pub auto_scale_interval: Duration,
    /// Interval of the monitoring loop.
    pub monitoring_interval: Duration,
    /// Interval of the health probe.
    pub health_probe_interval: Duration,
    /// Utilization percentage above which concurrency is increased.
    pub scale_up_threshold: f64,
    /// Utilization percentage below which concurrency is decreased.
    pub scale_down_threshold: f64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            auto_resume_interval: Duration::from_secs(30),
            auto_scale_interval: Duration::from_secs(120),
            monitoring_interval: Duration::from_secs(30),
            health_probe_interval: Duration::from_secs(30),
            scale_up_threshold: 80.0,
            scale_down_threshold: 20.0,
        }
    }
}

/// Computes the optimal concurrency for the observed utilization.
///
/// Above the scale-up threshold: +2, capped at the hard maximum. Below the
/// scale-down threshold: -1, floored at 1. Otherwise unchanged.
pub fn optimal_concurrency(
    utilization: f64,
    current: usize,
    config: &SupervisorConfig,
) -> usize {
    if utilization > config.scale_up_threshold {
        (current + 2).min(MAX_CONCURRENCY)
    } else if utilization < config.scale_down_threshold {
        current.saturating_sub(1).max(1)
    } else {
        current
    }
}

/// Owns and runs the control loops.
pub struct Supervisor {
    queue: Arc<JobQueue>,
    pool: Arc<WorkerPool>,
    health: Arc<HealthMonitor>,
    config: SupervisorConfig,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
    /// Creates a supervisor over the given components.
    pub fn new(
        queue: Arc<JobQueue>,
        pool: Arc<WorkerPool>,
        health: Arc<HealthMonitor>,
        config: SupervisorConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            queue,
            pool,
            health,
            config,
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawns all control loops. Idempotent per instance: calling twice
    /// simply adds no new loops if they are already running.
    pub fn start(&self) {
        let mut handles = self.handles.lock().expect("supervisor lock poisoned");
        if !handles.is_empty() {
            debug!("Supervisor loops already running");
            return;
        }

        handles.push(Arc::clone(&self.health).spawn(
            self.config.health_probe_interval,
            self.shutdown_tx.subscribe(),
        ));
        handles.push(self.spawn_auto_resume());
        handles.push(self.spawn_auto_scale());
        handles.push(self.spawn_monitoring());
        info!("Supervisor started");
    }

    /// Stops all control loops.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let handles: Vec<JoinHandle<()>> = self
            .handles
            .lock()
            .expect("supervisor lock poisoned")
            .drain(..)
            .collect();
        futures::future::join_all(handles).await;
        info!("Supervisor stopped");
    }

    fn spawn_auto_resume(&self) -> JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let interval = self.config.auto_resume_interval;
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match queue.is_paused().await {
                            Ok(true) => {
                                info!("Queue is paused, attempting to resume");
                                if let Err(e) = queue.resume().await {
                                    error!(error = %e, "Auto-resume failed");
                                }
                            }
                            Ok(false) => {}
                            Err(e) => debug!(error = %e, "Auto-resume pause check failed"),
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }

    fn spawn_auto_scale(&self) -> JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let pool = Arc::clone(&self.pool);
        let config = self.config.clone();
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.auto_scale_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let stats = match queue.stats().await {
                            Ok(stats) => stats,
                            Err(e) => {
                                debug!(error = %e, "Auto-scale stats failed");
                                continue;
                            }
                        };

                        let current = pool.desired_workers();
                        let optimal = optimal_concurrency(stats.utilization, current, &config);
                        if optimal != current {
                            info!(
                                utilization = stats.utilization,
                                current,
                                optimal,
                                "Auto-scaling worker concurrency"
                            );
                            pool.scale(optimal);
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }

    fn spawn_monitoring(&self) -> JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let pool = Arc::clone(&self.pool);
        let health = Arc::clone(&self.health);
        let interval = self.config.monitoring_interval;
        let mut shutdown = self.shutdown_tx.subscribe();
        let collector = MetricsCollector::new();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let store_health = health.status();
                        let stats = match queue.stats().await {
                            Ok(stats) => stats,
                            Err(e) => {
                                debug!(error = %e, "Monitoring stats failed");
                                continue;
                            }
                        };
                        collector.set_queue_depth(stats.waiting + stats.active);

                        if !store_health.connected || stats.failure_rate >= 20.0 {
                            warn!(
                                connected = store_health.connected,
                                breaker_open = store_health.breaker_open,
                                failure_rate = stats.failure_rate,
                                "System unhealthy"
                            );
                        }

                        if stats.utilization > 90.0 {
                            warn!(utilization = stats.utilization, "High queue utilization");
                        }

                        // Self-heal: a stopped pool is restarted with the
                        // current desired concurrency
                        if !pool.is_running() {
                            warn!("Worker pool is not running, restarting");
                            if let Err(e) = pool.start().await {
                                error!(error = %e, "Failed to restart worker pool");
                            }
                        }

                        if let Err(e) = queue.recover_stale().await {
                            debug!(error = %e, "Stale recovery failed");
                        }
                        if let Err(e) = queue.sweep().await {
                            debug!(error = %e, "Retention sweep failed");
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineStepError;
    use crate::scheduler::job::JobRecord;
    use crate::scheduler::memory::MemoryJobStore;
    use crate::scheduler::metrics::QueueMetrics;
    use crate::scheduler::queue::QueueConfig;
    use crate::scheduler::store::JobStore;
    use crate::scheduler::worker_pool::{JobProcessor, ProgressSink, WorkerPoolConfig};
    use async_trait::async_trait;

    struct NullProcessor;

    #[async_trait]
    impl JobProcessor for NullProcessor {
        async fn process(
            &self,
            _job: &JobRecord,
            _progress: &dyn ProgressSink,
        ) -> Result<serde_json::Value, PipelineStepError> {
            Ok(serde_json::Value::Null)
        }
    }

    fn components() -> (Arc<JobQueue>, Arc<WorkerPool>, Arc<HealthMonitor>) {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let health = Arc::new(HealthMonitor::new(Arc::clone(&store)));
        let queue = Arc::new(JobQueue::new(
            store,
            Arc::clone(&health),
            Arc::new(QueueMetrics::new()),
            QueueConfig::default(),
        ));
        let pool = Arc::new(WorkerPool::new(
            WorkerPoolConfig::new(2).with_poll_interval(Duration::from_millis(10)),
            Arc::clone(&queue),
            Arc::new(NullProcessor),
        ));
        (queue, pool, health)
    }

    #[test]
    fn test_optimal_concurrency_scales_up_capped() {
        let config = SupervisorConfig::default();
        assert_eq!(optimal_concurrency(85.0, 2, &config), 4);
        assert_eq!(optimal_concurrency(95.0, 9, &config), 10);
        assert_eq!(optimal_concurrency(95.0, 10, &config), 10);
    }

    #[test]
    fn test_optimal_concurrency_scales_down_floored() {
        let config = SupervisorConfig::default();
        assert_eq!(optimal_concurrency(10.0, 3, &config), 2);
        assert_eq!(optimal_concurrency(0.0, 1, &config), 1);
    }

    #[test]
    fn test_optimal_concurrency_stable_in_band() {
        let config = SupervisorConfig::default();
        assert_eq!(optimal_concurrency(50.0, 4, &config), 4);
        assert_eq!(optimal_concurrency(80.0, 4, &config), 4);
        assert_eq!(optimal_concurrency(20.0, 4, &config), 4);
    }

    #[tokio::test]
    async fn test_auto_resume_unpauses_queue() {
        let (queue, pool, health) = components();
        queue.pause().await.expect("pause");

        let config = SupervisorConfig {
            auto_resume_interval: Duration::from_millis(20),
            // Long intervals keep the other loops quiet during the test
            auto_scale_interval: Duration::from_secs(600),
            monitoring_interval: Duration::from_secs(600),
            health_probe_interval: Duration::from_secs(600),
            ..Default::default()
        };
        let supervisor = Supervisor::new(Arc::clone(&queue), pool, health, config);
        supervisor.start();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!queue.is_paused().await.expect("is_paused"));

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_monitoring_restarts_stopped_pool() {
        let (queue, pool, health) = components();

        let config = SupervisorConfig {
            monitoring_interval: Duration::from_millis(20),
            auto_resume_interval: Duration::from_secs(600),
            auto_scale_interval: Duration::from_secs(600),
            health_probe_interval: Duration::from_secs(600),
            ..Default::default()
        };
        let supervisor =
            Supervisor::new(Arc::clone(&queue), Arc::clone(&pool), health, config);

        assert!(!pool.is_running());
        supervisor.start();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(pool.is_running());

        supervisor.shutdown().await;
        pool.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_supervisor_start_is_idempotent() {
        let (queue, pool, health) = components();
        let supervisor = Supervisor::new(queue, pool, health, SupervisorConfig::default());

        supervisor.start();
        let first_count = supervisor.handles.lock().expect("lock").len();
        supervisor.start();
        let second_count = supervisor.handles.lock().expect("lock").len();
        assert_eq!(first_count, second_count);

        supervisor.shutdown().await;
    }
}
