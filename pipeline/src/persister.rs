use crate::dispatcher::Subscriber;
use crate::errors::{Error, Result};
use crate::metrics::{ENQUEUED_TOTAL, ENQUEUE_FAILURES_TOTAL, QUEUE_LENGTH};
use crate::model::{IngestionEvent, Reading};
use crate::queue::DurableQueue;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Appends every reading to the durable queue for the batch flusher.
pub struct BufferedPersister {
    queue: Arc<dyn DurableQueue>,
    soft_limit: u64,
}

impl BufferedPersister {
    pub fn new(queue: Arc<dyn DurableQueue>, soft_limit: u64) -> Self {
        Self { queue, soft_limit }
    }

    /// Returns the queue length after the append, or 0 when the append failed.
    /// A failed append drops the reading.
    pub async fn enqueue(&self, reading: &Reading) -> u64 {
        match self.push(reading).await {
            Ok(len) => {
                ENQUEUED_TOTAL.inc();
                QUEUE_LENGTH.set(len as f64);
                if len > self.soft_limit {
                    warn!(
                        "Durable queue length {} exceeds soft limit {}",
                        len, self.soft_limit
                    );
                }
                debug!("Queued reading {:?}, queue length {}", reading, len);
                len
            }
            Err(e) => {
                ENQUEUE_FAILURES_TOTAL.inc();
                error!("Failed to queue reading {:?}: {}", reading, e);
                0
            }
        }
    }

    async fn push(&self, reading: &Reading) -> Result<u64> {
        let item = serde_json::to_string(reading).map_err(|e| Error::BufferWrite(e.to_string()))?;
        self.queue.push_tail(item).await
    }
}

#[async_trait]
impl Subscriber for BufferedPersister {
    async fn on_event(&self, event: &IngestionEvent) {
        self.enqueue(&event.reading).await;
    }

    fn name(&self) -> &'static str {
        "buffered-persister"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use crate::testing::CapturedLogs;
    use chrono::Utc;

    struct BrokenQueue;

    #[async_trait]
    impl DurableQueue for BrokenQueue {
        async fn push_tail(&self, _item: String) -> Result<u64> {
            Err(Error::BufferWrite("connection refused".to_string()))
        }

        async fn range_head(&self, _count: usize) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn trim_head(&self, _count: usize) -> Result<()> {
            Ok(())
        }

        async fn len(&self) -> Result<u64> {
            Ok(0)
        }
    }

    fn reading(rpm: f64) -> Reading {
        Reading {
            temperature: 600.0,
            rpm,
            pressure: 45.0,
            fuel_flow: 0.4,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_enqueue_returns_queue_length() {
        tokio_test::block_on(async {
            let queue = Arc::new(MemoryQueue::new());
            let persister = BufferedPersister::new(queue.clone(), 100_000);

            assert_eq!(persister.enqueue(&reading(1.0)).await, 1);
            assert_eq!(persister.enqueue(&reading(2.0)).await, 2);

            let stored = queue.range_head(10).await.unwrap();
            let decoded: Reading = serde_json::from_str(&stored[1]).unwrap();
            assert_eq!(decoded.rpm, 2.0);
        });
    }

    #[test]
    fn test_soft_limit_is_advisory() {
        let logs = CapturedLogs::default();
        let _guard = logs.install();

        tokio_test::block_on(async {
            let queue = Arc::new(MemoryQueue::new());
            let persister = BufferedPersister::new(queue.clone(), 3);

            for rpm in 0..3 {
                persister.enqueue(&reading(rpm as f64)).await;
            }
            assert_eq!(logs.count("WARN", "exceeds soft limit"), 0);

            // threshold + 1 warns and still succeeds
            assert_eq!(persister.enqueue(&reading(3.0)).await, 4);
            assert_eq!(queue.len().await.unwrap(), 4);
            assert_eq!(logs.count("WARN", "length 4 exceeds soft limit 3"), 1);
        });
    }

    #[test]
    fn test_failed_append_counts_as_zero() {
        tokio_test::block_on(async {
            let persister = BufferedPersister::new(Arc::new(BrokenQueue), 100_000);
            assert_eq!(persister.enqueue(&reading(1.0)).await, 0);
        });
    }
}
