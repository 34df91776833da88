//! Bounded worker pool for subscriber deliveries.
//!
//! Admission follows the usual executor rules: start a worker while fewer than
//! `min_workers` run, otherwise queue into the backlog, otherwise start an
//! extra worker while fewer than `max_workers` run, otherwise reject. A job
//! queued while no worker runs (`min_workers == 0`) starts one. Extra
//! workers exit after `idle_expiry` without work. A panicking job is logged
//! and its worker carries on.

use crate::config::PoolConfig;
use crate::metrics::DELIVERIES_REJECTED_TOTAL;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error};

pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submit {
    /// Handed straight to a newly started worker.
    Started,
    Queued,
    Rejected,
}

impl Submit {
    pub fn accepted(self) -> bool {
        !matches!(self, Submit::Rejected)
    }
}

struct Shared {
    config: PoolConfig,
    rx: Mutex<mpsc::Receiver<Job>>,
    workers: AtomicUsize,
    active: AtomicUsize,
}

#[derive(Clone)]
pub struct WorkerPool {
    tx: mpsc::Sender<Job>,
    shared: Arc<Shared>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.backlog.max(1));
        Self {
            tx,
            shared: Arc::new(Shared {
                config,
                rx: Mutex::new(rx),
                workers: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
            }),
        }
    }

    pub fn workers(&self) -> usize {
        self.shared.workers.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    pub fn backlog_len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Rejections are counted here and logged by the caller.
    pub fn submit(&self, job: Job) -> Submit {
        if self.try_start_worker(self.shared.config.min_workers) {
            self.spawn_worker(Some(job));
            return Submit::Started;
        }

        let job = match self.tx.try_send(job) {
            Ok(()) => {
                if self.try_start_first_worker() {
                    self.spawn_worker(None);
                }
                return Submit::Queued;
            }
            Err(mpsc::error::TrySendError::Full(job)) => job,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                DELIVERIES_REJECTED_TOTAL.inc();
                return Submit::Rejected;
            }
        };

        if self.try_start_worker(self.shared.config.max_workers) {
            self.spawn_worker(Some(job));
            return Submit::Started;
        }

        DELIVERIES_REJECTED_TOTAL.inc();
        Submit::Rejected
    }

    /// Reserves a worker slot if fewer than `limit` workers are running.
    fn try_start_worker(&self, limit: usize) -> bool {
        self.shared
            .workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < limit).then_some(n + 1)
            })
            .is_ok()
    }

    /// Reserves a slot only when no worker runs at all.
    fn try_start_first_worker(&self) -> bool {
        self.shared
            .workers
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn spawn_worker(&self, first: Option<Job>) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            if let Some(job) = first {
                run_job(&shared, job).await;
            }

            loop {
                let next = tokio::time::timeout(shared.config.idle_expiry, async {
                    shared.rx.lock().await.recv().await
                })
                .await;

                match next {
                    Ok(Some(job)) => run_job(&shared, job).await,
                    // all senders dropped
                    Ok(None) => {
                        shared.workers.fetch_sub(1, Ordering::SeqCst);
                        return;
                    }
                    Err(_) => {
                        if retire(&shared) {
                            debug!("Idle worker retired");
                            return;
                        }
                    }
                }
            }
        });
    }
}

async fn run_job(shared: &Shared, job: Job) {
    shared.active.fetch_add(1, Ordering::SeqCst);
    if AssertUnwindSafe(job).catch_unwind().await.is_err() {
        error!("Worker job panicked");
    }
    shared.active.fetch_sub(1, Ordering::SeqCst);
}

/// Releases this worker's slot only while more than `min_workers` are running.
fn retire(shared: &Shared) -> bool {
    let min = shared.config.min_workers;
    shared
        .workers
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            (n > min).then(|| n - 1)
        })
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::{oneshot, Notify};

    fn config(min: usize, max: usize, backlog: usize, idle_ms: u64) -> PoolConfig {
        PoolConfig {
            min_workers: min,
            max_workers: max,
            backlog,
            idle_expiry: Duration::from_millis(idle_ms),
        }
    }

    fn blocked_job(gate: Arc<Notify>) -> Job {
        Box::pin(async move { gate.notified().await })
    }

    #[tokio::test]
    async fn test_runs_submitted_jobs() {
        let pool = WorkerPool::new(config(2, 4, 8, 1000));
        let (tx, rx) = oneshot::channel();

        assert_eq!(
            pool.submit(Box::pin(async move {
                let _ = tx.send(42);
            })),
            Submit::Started
        );
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_admission_order_and_rejection() {
        let pool = WorkerPool::new(config(1, 2, 1, 60_000));
        let gate = Arc::new(Notify::new());

        // core worker, backlog slot, extra worker, then nothing left
        assert_eq!(pool.submit(blocked_job(gate.clone())), Submit::Started);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.submit(blocked_job(gate.clone())), Submit::Queued);
        assert_eq!(pool.submit(blocked_job(gate.clone())), Submit::Started);
        assert_eq!(pool.submit(blocked_job(gate.clone())), Submit::Rejected);
        assert_eq!(pool.workers(), 2);

        gate.notify_waiters();
    }

    #[tokio::test]
    async fn test_extra_workers_expire_when_idle() {
        let pool = WorkerPool::new(config(1, 3, 1, 50));
        let gate = Arc::new(Notify::new());

        pool.submit(blocked_job(gate.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.submit(blocked_job(gate.clone()));
        pool.submit(blocked_job(gate.clone()));
        pool.submit(blocked_job(gate.clone()));
        assert_eq!(pool.workers(), 3);

        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.notify_waiters();
        // the queued job still waits on the gate
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.notify_waiters();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(pool.workers(), 1);
        assert_eq!(pool.active(), 0);
    }

    #[tokio::test]
    async fn test_worker_survives_panicking_job() {
        let pool = WorkerPool::new(config(1, 1, 4, 60_000));

        let faulty: Job = Box::pin(async { panic!("subscriber bug") });
        pool.submit(faulty);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.workers(), 1);
        assert_eq!(pool.active(), 0);

        let (tx, rx) = oneshot::channel();
        assert_eq!(
            pool.submit(Box::pin(async move {
                let _ = tx.send(());
            })),
            Submit::Queued
        );
        tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .expect("queued job never ran")
            .unwrap();
    }

    #[tokio::test]
    async fn test_zero_min_workers_still_runs_queued_jobs() {
        let pool = WorkerPool::new(config(0, 4, 8, 50));
        let (tx, rx) = oneshot::channel();

        assert_eq!(
            pool.submit(Box::pin(async move {
                let _ = tx.send(7);
            })),
            Submit::Queued
        );
        let value = tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .expect("queued job never ran")
            .unwrap();
        assert_eq!(value, 7);

        // the worker is above min and retires
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(pool.workers(), 0);
    }
}
