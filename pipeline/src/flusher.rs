//! Periodic drain of the durable queue into the permanent store.
//!
//! A flush reads a bounded prefix of the queue, trims exactly that many
//! elements from the head, and commits the batch in one write. The read and
//! the trim are separate queue commands, so `flush` holds a flusher-scoped
//! lock across the whole sequence; a second `flush` arriving meanwhile skips
//! instead of reading an overlapping prefix. Elements appended during a flush
//! land at the tail and are left for the next one.
//!
//! Once trimmed, a batch is owned by the flush. A failed or timed-out commit
//! loses it: nothing is re-queued or retried.

use crate::errors::{timed_out, Error, Result};
use crate::metrics::{
    BATCH_SIZE, COMMITTED_TOTAL, COMMIT_FAILURES_TOTAL, EXTRACTION_FAILURES_TOTAL,
    FLUSH_LATENCY_SECONDS,
};
use crate::model::Reading;
use crate::queue::DurableQueue;
use crate::store::RecordStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub struct BatchFlusher {
    queue: Arc<dyn DurableQueue>,
    store: Arc<dyn RecordStore>,
    batch_size: usize,
    commit_timeout: Duration,
    in_flight: Mutex<()>,
}

impl BatchFlusher {
    pub fn new(
        queue: Arc<dyn DurableQueue>,
        store: Arc<dyn RecordStore>,
        batch_size: usize,
        commit_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            store,
            batch_size,
            commit_timeout,
            in_flight: Mutex::new(()),
        }
    }

    /// Runs one flush and returns the number of committed records. Every
    /// failure is logged and reported as 0.
    pub async fn flush(&self) -> u64 {
        let Ok(_guard) = self.in_flight.try_lock() else {
            warn!("Flush skipped: previous flush still running");
            return 0;
        };

        let start = Instant::now();

        let raw = match self.extract().await {
            Ok(raw) => raw,
            Err(e) => {
                EXTRACTION_FAILURES_TOTAL.inc();
                error!("Failed to extract batch: {}", e);
                return 0;
            }
        };

        if raw.is_empty() {
            debug!("Flush found an empty queue");
            return 0;
        }

        let batch = decode_batch(&raw);
        if batch.is_empty() {
            warn!("None of the {} extracted entries decoded, nothing to commit", raw.len());
            FLUSH_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
            return 0;
        }

        BATCH_SIZE.set(batch.len() as f64);

        let committed = match self.commit(&batch).await {
            Ok(count) => {
                COMMITTED_TOTAL.inc_by(count as f64);
                count
            }
            Err(e) => {
                COMMIT_FAILURES_TOTAL.inc();
                error!("Failed to commit batch of {} readings: {}", batch.len(), e);
                error!(
                    "CRITICAL: {} readings lost, first timestamp {}, last timestamp {}",
                    batch.len(),
                    batch[0].timestamp,
                    batch[batch.len() - 1].timestamp
                );
                0
            }
        };

        FLUSH_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
        committed
    }

    /// Reads up to `batch_size` elements from the head and trims them.
    async fn extract(&self) -> Result<Vec<String>> {
        let raw = self.queue.range_head(self.batch_size).await?;
        if raw.is_empty() {
            return Ok(raw);
        }

        self.queue.trim_head(raw.len()).await?;
        debug!("Extracted {} queued readings", raw.len());

        Ok(raw)
    }

    async fn commit(&self, batch: &[Reading]) -> Result<u64> {
        tokio::time::timeout(self.commit_timeout, self.store.insert_batch(batch))
            .await
            .map_err(|_| Error::Commit(timed_out("batch commit", self.commit_timeout)))?
    }

    /// Fixed-delay schedule: flush, then wait `delay` before the next flush.
    pub async fn run(self: Arc<Self>, delay: Duration) {
        info!(
            "Starting batch flusher with batch_size={}, delay={}ms",
            self.batch_size,
            delay.as_millis()
        );

        loop {
            let count = self.flush().await;
            if count > 0 {
                info!("Flush committed {} readings", count);
            } else {
                info!("Flush committed no readings");
            }
            tokio::time::sleep(delay).await;
        }
    }
}

/// Entries that do not decode are logged and skipped; they have already been
/// trimmed.
fn decode_batch(raw: &[String]) -> Vec<Reading> {
    raw.iter()
        .enumerate()
        .filter_map(|(i, item)| match serde_json::from_str::<Reading>(item) {
            Ok(reading) => Some(reading),
            Err(e) => {
                EXTRACTION_FAILURES_TOTAL.inc();
                error!(
                    "{}",
                    Error::Extraction(format!("entry {} of batch undecodable ({}): {}", i, e, item))
                );
                None
            }
        })
        .collect()
}
