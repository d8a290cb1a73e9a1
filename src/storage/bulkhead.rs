//! Bulkhead for blocking storage drivers.
//!
//! Some drivers only expose synchronous calls. Running them on the async
//! executor would stall every other task on that thread, so they are sent to
//! a small fixed set of OS threads instead:
//!
//! ```text
//! async caller ──job──▶ bounded queue ──▶ worker 0..N ──▶ blocking call
//!      ▲                                                      │
//!      └────────────────── oneshot reply ◀────────────────────┘
//! ```
//!
//! - The queue is bounded and submission waits at most `submit_timeout_ms`.
//!   When a backend hangs and every worker is stuck, new work fails with
//!   [`Error::BulkheadFull`] instead of piling up.
//! - Jobs carry no ordering guarantee relative to each other. A caller that
//!   needs "A before B" awaits A's reply before submitting B.
//! - A panic inside a job is caught on the worker and surfaced to the caller
//!   as [`Error::WorkerLost`]; the worker keeps serving.
//!
//! # Usage
//!
//! ```rust,ignore
//! use algoledger::storage::{BlockingPool, BulkheadConfig};
//!
//! let pool = BlockingPool::new("cassandra", BulkheadConfig::default())?;
//! let rows = pool.run("cassandra_total", move || session.count()).await?;
//! ```

use crate::{Error, Result};
use serde::Deserialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, oneshot};

/// Configuration for the blocking pool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BulkheadConfig {
    /// Number of worker threads.
    ///
    /// Default: 4.
    pub workers: usize,

    /// Jobs that may wait for a free worker.
    ///
    /// Default: 64.
    pub queue_capacity: usize,

    /// How long a submission may wait for queue space, in milliseconds.
    ///
    /// Default: 5000ms.
    pub submit_timeout_ms: u64,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl BulkheadConfig {
    /// Creates the default configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
            submit_timeout_ms: 5000,
        }
    }

    /// Applies overrides read through `lookup`; unparseable values are ignored.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `ALGOLEDGER_BULKHEAD_WORKERS` | Worker threads | 4 |
    /// | `ALGOLEDGER_BULKHEAD_QUEUE` | Queue capacity | 64 |
    /// | `ALGOLEDGER_BULKHEAD_SUBMIT_TIMEOUT_MS` | Submit timeout | 5000 |
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("ALGOLEDGER_BULKHEAD_WORKERS")
            && let Ok(parsed) = v.trim().parse::<usize>()
        {
            self.workers = parsed.max(1);
        }
        if let Some(v) = lookup("ALGOLEDGER_BULKHEAD_QUEUE")
            && let Ok(parsed) = v.trim().parse::<usize>()
        {
            self.queue_capacity = parsed.max(1);
        }
        if let Some(v) = lookup("ALGOLEDGER_BULKHEAD_SUBMIT_TIMEOUT_MS")
            && let Ok(parsed) = v.trim().parse::<u64>()
        {
            self.submit_timeout_ms = parsed;
        }
        self
    }

    /// Sets the number of workers.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the queue capacity.
    #[must_use]
    pub const fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the submit timeout in milliseconds.
    #[must_use]
    pub const fn with_submit_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.submit_timeout_ms = timeout_ms;
        self
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;
type JobQueue = Arc<Mutex<mpsc::Receiver<Job>>>;

/// Fixed-size worker pool that turns blocking calls into futures.
///
/// Dropping the pool closes the queue; idle workers exit, busy workers exit
/// after their current job. Workers are never joined, so a hung driver call
/// cannot block the drop.
pub struct BlockingPool {
    name: &'static str,
    sender: mpsc::Sender<Job>,
    config: BulkheadConfig,
}

impl BlockingPool {
    /// Spawns the worker threads.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to spawn a worker thread.
    pub fn new(name: &'static str, config: BulkheadConfig) -> Result<Self> {
        let workers = config.workers.max(1);
        let (sender, receiver) = mpsc::channel::<Job>(config.queue_capacity.max(1));
        let queue: JobQueue = Arc::new(Mutex::new(receiver));

        for id in 0..workers {
            let queue = Arc::clone(&queue);
            thread::Builder::new()
                .name(format!("{name}-blocking-{id}"))
                .spawn(move || worker_loop(&queue))
                .map_err(|e| Error::operation("blocking_pool_spawn", e))?;
        }

        tracing::debug!(
            pool = name,
            workers,
            queue_capacity = config.queue_capacity,
            "Started blocking pool"
        );

        Ok(Self {
            name,
            sender,
            config,
        })
    }

    /// Returns the number of jobs waiting for a worker.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Runs one blocking call on the pool and awaits its result.
    ///
    /// Errors returned by `call` reach the caller unchanged.
    ///
    /// # Errors
    ///
    /// - [`Error::BulkheadFull`] if the queue stayed full for the submit timeout
    /// - [`Error::WorkerLost`] if the call panicked or every worker is gone
    /// - whatever `call` itself returns
    pub async fn run<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply, outcome) = oneshot::channel();
        let job: Job = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(call));
            // The caller may have been cancelled; nobody is left to tell.
            let _ = reply.send(result);
        });

        self.submit(operation, job).await?;

        metrics::gauge!("blocking_pool_queue_depth", "pool" => self.name)
            .set(self.queued() as f64);

        match outcome.await {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(
                    pool = self.name,
                    operation,
                    panic = %message,
                    "Blocking job panicked"
                );
                Err(Error::WorkerLost(format!("{operation}: {message}")))
            },
            Err(_) => Err(Error::WorkerLost(format!(
                "{operation}: worker dropped the reply"
            ))),
        }
    }

    /// Places a job on the queue, waiting at most the submit timeout.
    async fn submit(&self, operation: &'static str, job: Job) -> Result<()> {
        let timeout_ms = self.config.submit_timeout_ms;
        match self
            .sender
            .send_timeout(job, Duration::from_millis(timeout_ms))
            .await
        {
            Ok(()) => {
                metrics::counter!("blocking_pool_jobs_total", "pool" => self.name).increment(1);
                Ok(())
            },
            Err(SendTimeoutError::Timeout(_)) => {
                metrics::counter!(
                    "blocking_pool_rejections_total",
                    "pool" => self.name,
                    "reason" => "timeout"
                )
                .increment(1);
                tracing::warn!(pool = self.name, operation, timeout_ms, "Blocking pool full");
                Err(Error::BulkheadFull {
                    pool: self.name,
                    timeout_ms,
                })
            },
            Err(SendTimeoutError::Closed(_)) => Err(Error::WorkerLost(format!(
                "{operation}: pool '{}' has no workers",
                self.name
            ))),
        }
    }
}

impl std::fmt::Debug for BlockingPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingPool")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("queued", &self.queued())
            .finish()
    }
}

/// Pulls jobs until the queue closes.
///
/// Only one idle worker waits on the receiver at a time; the lock is released
/// before the job runs.
fn worker_loop(queue: &JobQueue) {
    loop {
        let job = {
            let Ok(mut receiver) = queue.lock() else {
                return;
            };
            receiver.blocking_recv()
        };
        match job {
            Some(job) => job(),
            None => return,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_config_defaults() {
        let config = BulkheadConfig::default();
        assert_eq!(config.workers, 4);
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.submit_timeout_ms, 5000);
    }

    #[test]
    fn test_config_overrides() {
        let config = BulkheadConfig::default().with_overrides_from(|name| match name {
            "ALGOLEDGER_BULKHEAD_WORKERS" => Some("0".to_string()),
            "ALGOLEDGER_BULKHEAD_QUEUE" => Some("not a number".to_string()),
            "ALGOLEDGER_BULKHEAD_SUBMIT_TIMEOUT_MS" => Some(" 250 ".to_string()),
            _ => None,
        });
        assert_eq!(config.workers, 1);
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.submit_timeout_ms, 250);
    }

    #[test]
    fn test_config_builders() {
        let config = BulkheadConfig::new()
            .with_workers(2)
            .with_queue_capacity(8)
            .with_submit_timeout_ms(100);
        assert_eq!(config.workers, 2);
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.submit_timeout_ms, 100);
    }

    #[tokio::test]
    async fn test_run_returns_value() {
        let pool = BlockingPool::new("test", BulkheadConfig::default()).unwrap();
        let value = pool.run("answer", || Ok(6 * 7)).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_run_propagates_job_error() {
        let pool = BlockingPool::new("test", BulkheadConfig::default()).unwrap();
        let result: Result<()> = pool
            .run("failing", || Err(Error::operation("cassandra_insert", "timeout")))
            .await;
        assert!(matches!(
            result,
            Err(Error::OperationFailed { ref operation, .. }) if operation == "cassandra_insert"
        ));
    }

    #[tokio::test]
    async fn test_panic_is_reported_and_worker_survives() {
        let pool = BlockingPool::new("test", BulkheadConfig::new().with_workers(1)).unwrap();

        let result: Result<()> = pool.run("boom", || panic!("driver exploded")).await;
        match result {
            Err(Error::WorkerLost(message)) => assert!(message.contains("driver exploded")),
            other => panic!("expected WorkerLost, got {other:?}"),
        }

        assert_eq!(pool.run("after", || Ok("still alive")).await.unwrap(), "still alive");
    }

    #[tokio::test]
    async fn test_runs_on_worker_threads() {
        let pool = BlockingPool::new("named", BulkheadConfig::default()).unwrap();
        let thread_name = pool
            .run("whoami", || Ok(thread::current().name().map(str::to_string)))
            .await
            .unwrap()
            .unwrap_or_default();
        assert!(thread_name.starts_with("named-blocking-"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrency_is_bounded_by_workers() {
        let config = BulkheadConfig::new().with_workers(2);
        let pool = Arc::new(BlockingPool::new("bounded", config).unwrap());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    pool.run("sleepy", move || {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(20));
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_submit_times_out_when_workers_hang() {
        let config = BulkheadConfig::new()
            .with_workers(1)
            .with_queue_capacity(1)
            .with_submit_timeout_ms(50);
        let pool = Arc::new(BlockingPool::new("stuck", config).unwrap());
        let (release, gate) = std::sync::mpsc::channel::<()>();
        let gate = Arc::new(Mutex::new(gate));

        // Occupy the only worker.
        let hung = {
            let pool = Arc::clone(&pool);
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                pool.run("hung", move || {
                    let _ = gate.lock().unwrap().recv();
                    Ok(())
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Fill the queue.
        let queued = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.run("queued", || Ok(())).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let rejected: Result<()> = pool.run("rejected", || Ok(())).await;
        assert!(matches!(
            rejected,
            Err(Error::BulkheadFull { pool: "stuck", timeout_ms: 50 })
        ));

        release.send(()).unwrap();
        hung.await.unwrap().unwrap();
        queued.await.unwrap().unwrap();
    }
}
