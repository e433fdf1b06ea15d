//! Bounded worker pool.
//!
//! Routers hand every message to a pool so no routing logic runs on a socket
//! task. `submit` never waits: a full queue rejects the task. Each task runs
//! inside a boundary that logs its error (or panic), so one bad message cannot
//! take a worker down.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use relay_telemetry::MetricsRecorder;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::errors::RelayError;

pub type Task = Pin<Box<dyn Future<Output = Result<(), RelayError>> + Send>>;

/// Sizing for one pool.
#[derive(Clone, Copy, Debug)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            queue_capacity: 1024,
        }
    }
}

#[derive(Default)]
struct PoolCounters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
}

/// Point-in-time view of a pool's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub submitted: u64,
    pub rejected: u64,
    pub completed: u64,
    pub failed: u64,
    pub panicked: u64,
}

impl PoolStats {
    /// Tasks accepted but not yet finished.
    pub fn in_flight(&self) -> u64 {
        self.submitted
            .saturating_sub(self.completed + self.failed + self.panicked)
    }
}

struct Shared {
    name: String,
    counters: PoolCounters,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl Shared {
    fn record(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.counter_inc("pool.tasks", &[("pool", self.name.as_str()), ("outcome", outcome)], 1);
        }
    }

    fn observe_duration(&self, started: Instant) {
        if let Some(metrics) = &self.metrics {
            let ms = started.elapsed().as_secs_f64() * 1000.0;
            metrics.histogram_observe("pool.task_ms", &[("pool", self.name.as_str())], ms);
        }
    }
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    tx: mpsc::Sender<Task>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn the pool's workers. Must be called inside a Tokio runtime.
    pub fn new(name: impl Into<String>, config: PoolConfig) -> Self {
        Self::build(name.into(), config, None)
    }

    pub fn with_metrics(
        name: impl Into<String>,
        config: PoolConfig,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self::build(name.into(), config, Some(metrics))
    }

    fn build(name: String, config: PoolConfig, metrics: Option<Arc<MetricsRecorder>>) -> Self {
        let (tx, rx) = mpsc::channel::<Task>(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let shared = Arc::new(Shared {
            name,
            counters: PoolCounters::default(),
            metrics,
        });

        let workers = (0..config.workers.max(1))
            .map(|_| {
                let rx = Arc::clone(&rx);
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some(task) = next else { break };
                        run_task(&shared, task).await;
                    }
                })
            })
            .collect();

        tracing::debug!(pool = %shared.name, workers = config.workers, "worker pool started");
        Self { shared, tx, workers }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Queue a task without waiting. Returns `false` if the queue is full or closed.
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: Future<Output = Result<(), RelayError>> + Send + 'static,
    {
        match self.tx.try_send(Box::pin(task)) {
            Ok(()) => {
                self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
                self.shared.record("rejected");
                tracing::warn!(pool = %self.shared.name, "worker pool queue full, rejecting task");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(pool = %self.shared.name, "worker pool closed, rejecting task");
                false
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        let c = &self.shared.counters;
        PoolStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            panicked: c.panicked.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting tasks, drain what is queued, and wait for the workers.
    pub async fn shutdown(self) {
        let Self { shared, tx, workers } = self;
        drop(tx);
        for worker in workers {
            let _ = worker.await;
        }
        tracing::debug!(pool = %shared.name, "worker pool stopped");
    }
}

async fn run_task(shared: &Shared, task: Task) {
    let started = Instant::now();
    let result = AssertUnwindSafe(task).catch_unwind().await;
    shared.observe_duration(started);
    match result {
        Ok(Ok(())) => {
            shared.counters.completed.fetch_add(1, Ordering::Relaxed);
            shared.record("completed");
        }
        Ok(Err(e)) => {
            shared.counters.failed.fetch_add(1, Ordering::Relaxed);
            shared.record("failed");
            tracing::warn!(
                pool = %shared.name,
                error_kind = e.error_kind(),
                error = %e,
                "task failed"
            );
        }
        Err(_) => {
            shared.counters.panicked.fetch_add(1, Ordering::Relaxed);
            shared.record("panicked");
            tracing::error!(pool = %shared.name, "task panicked");
        }
    }
}
