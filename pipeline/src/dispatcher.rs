//! In-process publish/subscribe.
//!
//! Every published event is handed to each registered subscriber as a
//! separate job on the shared [`WorkerPool`]. Delivery is best effort and at
//! most once: a job rejected by a saturated pool is dropped. Nothing orders
//! callbacks across subscribers or across events published close together.

use crate::model::IngestionEvent;
use crate::pool::WorkerPool;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// A consumer of ingestion events.
#[async_trait]
pub trait Subscriber: Send + Sync + 'static {
    /// Handles one event. Failures are logged by the subscriber itself.
    async fn on_event(&self, event: &IngestionEvent);

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str;
}

pub struct Dispatcher {
    subscribers: Vec<Arc<dyn Subscriber>>,
    pool: WorkerPool,
    event_timeout: Duration,
}

impl Dispatcher {
    pub fn new(pool: WorkerPool, event_timeout: Duration) -> Self {
        Self {
            subscribers: Vec::new(),
            pool,
            event_timeout,
        }
    }

    pub fn subscribe(&mut self, subscriber: Arc<dyn Subscriber>) {
        debug!("Registered subscriber {}", subscriber.name());
        self.subscribers.push(subscriber);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Schedules one delivery per subscriber and returns how many the pool
    /// accepted.
    pub fn publish(&self, event: IngestionEvent) -> usize {
        let event = Arc::new(event);
        let mut accepted = 0;

        for subscriber in &self.subscribers {
            let name = subscriber.name();
            let subscriber = subscriber.clone();
            let delivered = event.clone();
            let timeout = self.event_timeout;

            let outcome = self.pool.submit(Box::pin(async move {
                if tokio::time::timeout(timeout, subscriber.on_event(&delivered))
                    .await
                    .is_err()
                {
                    error!(
                        "Subscriber {} timed out after {}ms: {}",
                        subscriber.name(),
                        timeout.as_millis(),
                        delivered
                    );
                }
            }));

            if outcome.accepted() {
                accepted += 1;
            } else {
                warn!(
                    "Delivery of {} to {} dropped: worker pool saturated (workers: {}, active: {}, backlog: {})",
                    event,
                    name,
                    self.pool.workers(),
                    self.pool.active(),
                    self.pool.backlog_len()
                );
            }
        }

        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::model::SourceReading;
    use crate::testing::CapturedLogs;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        seen: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl Subscriber for Counting {
        async fn on_event(&self, _event: &IngestionEvent) {
            tokio::time::sleep(self.delay).await;
            self.seen.fetch_add(1, Ordering::SeqCst);
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    fn event() -> IngestionEvent {
        IngestionEvent::new(
            SourceReading {
                temperature: 600.0,
                rpm: 9000.0,
                pressure: 45.0,
                fuel_flow: 0.4,
            }
            .stamp(Utc::now()),
        )
    }

    fn counting(delay_ms: u64) -> Arc<Counting> {
        Arc::new(Counting {
            seen: AtomicUsize::new(0),
            delay: Duration::from_millis(delay_ms),
        })
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let mut dispatcher = Dispatcher::new(
            WorkerPool::new(PoolConfig::default()),
            Duration::from_secs(10),
        );
        let a = counting(0);
        let b = counting(0);
        dispatcher.subscribe(a.clone());
        dispatcher.subscribe(b.clone());

        assert_eq!(dispatcher.publish(event()), 2);
        assert_eq!(dispatcher.publish(event()), 2);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(a.seen.load(Ordering::SeqCst), 2);
        assert_eq!(b.seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let dispatcher = Dispatcher::new(
            WorkerPool::new(PoolConfig::default()),
            Duration::from_secs(10),
        );
        assert_eq!(dispatcher.publish(event()), 0);
    }

    #[tokio::test]
    async fn test_saturated_pool_drops_deliveries() {
        let pool = WorkerPool::new(PoolConfig {
            min_workers: 1,
            max_workers: 1,
            backlog: 1,
            idle_expiry: Duration::from_secs(60),
        });
        let mut dispatcher = Dispatcher::new(pool, Duration::from_secs(10));
        let slow = counting(200);
        dispatcher.subscribe(slow.clone());

        let logs = CapturedLogs::default();
        let _guard = logs.install();

        let accepted: usize = (0..4).map(|_| dispatcher.publish(event())).sum();
        assert_eq!(accepted, 2);
        // one warning per dropped delivery
        assert_eq!(logs.count("WARN", "dropped"), 2);
        assert_eq!(logs.count("WARN", "to counting dropped"), 2);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(slow.seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_cut_off() {
        let mut dispatcher = Dispatcher::new(
            WorkerPool::new(PoolConfig::default()),
            Duration::from_millis(30),
        );
        let slow = counting(500);
        dispatcher.subscribe(slow.clone());

        dispatcher.publish(event());
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(slow.seen.load(Ordering::SeqCst), 0);
    }
}
