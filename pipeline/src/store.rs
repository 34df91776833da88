use crate::errors::Result;
use crate::model::{PersistedRecord, Reading};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

/// Permanent store for flushed readings.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Writes the whole batch as one operation and returns the number of rows
    /// created. Rows are created with the store's column precision.
    async fn insert_batch(&self, batch: &[Reading]) -> Result<u64>;
}

/// In-process store assigning sequential ids.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<PersistedRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<PersistedRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert_batch(&self, batch: &[Reading]) -> Result<u64> {
        let now = Utc::now();
        let mut records = self.records.lock().await;
        let first_id = records.len() as i64 + 1;

        records.extend(batch.iter().enumerate().map(|(i, reading)| {
            let r = reading.to_store_precision();
            PersistedRecord {
                id: first_id + i as i64,
                temperature: r.temperature,
                rpm: r.rpm,
                pressure: r.pressure,
                fuel_flow: r.fuel_flow,
                timestamp: r.timestamp,
                created_at: now,
                updated_at: Some(now),
            }
        }));

        Ok(batch.len() as u64)
    }
}
