//! Durable FIFO queue between the buffered persister and the batch flusher.
//!
//! Each operation is atomic on its own. A `range_head` followed by a
//! `trim_head` is two operations, so callers that need the pair to be
//! consistent must serialize themselves (see [`crate::flusher::BatchFlusher`]).

use crate::errors::{timed_out, Error, Result};
use async_trait::async_trait;
use deadpool_redis::{Config as RedisPoolConfig, Pool, Runtime};
use redis::AsyncCommands;
use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

#[async_trait]
pub trait DurableQueue: Send + Sync {
    /// Appends one element at the tail and returns the resulting length.
    async fn push_tail(&self, item: String) -> Result<u64>;

    /// Reads up to `count` elements from the head without removing them.
    async fn range_head(&self, count: usize) -> Result<Vec<String>>;

    /// Removes exactly `count` elements from the head.
    async fn trim_head(&self, count: usize) -> Result<()>;

    async fn len(&self) -> Result<u64>;
}

/// Redis list backend: RPUSH / LRANGE / LTRIM / LLEN on a single key.
pub struct RedisQueue {
    pool: Pool,
    key: String,
    command_timeout: Duration,
}

impl RedisQueue {
    pub async fn connect(url: &str, key: &str, command_timeout: Duration) -> Result<Self> {
        let mut cfg = RedisPoolConfig::from_url(url);

        if cfg.pool.is_none() {
            cfg.pool = Some(deadpool_redis::PoolConfig::default());
        }
        if let Some(ref mut pool_config) = cfg.pool {
            pool_config.max_size = 16;
            pool_config.timeouts.wait = Some(command_timeout);
        }

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::Redis(format!("Failed to create Redis pool: {}", e)))?;

        let mut conn = pool
            .get()
            .await
            .map_err(|e| Error::Redis(format!("Failed to connect to Redis: {}", e)))?;

        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| Error::Redis(format!("Redis ping failed: {}", e)))?;

        info!("Durable queue connected: key {}", key);

        Ok(Self {
            pool,
            key: key.to_string(),
            command_timeout,
        })
    }

    async fn connection(&self) -> std::result::Result<deadpool_redis::Connection, String> {
        self.pool.get().await.map_err(|e| e.to_string())
    }

    /// Runs one command under the queue command timeout.
    async fn bounded<T, F>(&self, operation: &str, fut: F) -> std::result::Result<T, String>
    where
        F: Future<Output = std::result::Result<T, String>>,
    {
        match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(timed_out(operation, self.command_timeout)),
        }
    }
}

#[async_trait]
impl DurableQueue for RedisQueue {
    async fn push_tail(&self, item: String) -> Result<u64> {
        self.bounded("RPUSH", async {
            let mut conn = self.connection().await?;
            conn.rpush::<_, _, u64>(&self.key, item)
                .await
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(Error::BufferWrite)
    }

    async fn range_head(&self, count: usize) -> Result<Vec<String>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let stop = count as isize - 1;
        self.bounded("LRANGE", async {
            let mut conn = self.connection().await?;
            conn.lrange::<_, Vec<String>>(&self.key, 0, stop)
                .await
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(Error::Extraction)
    }

    async fn trim_head(&self, count: usize) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        self.bounded("LTRIM", async {
            let mut conn = self.connection().await?;
            conn.ltrim::<_, ()>(&self.key, count as isize, -1)
                .await
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(Error::Extraction)
    }

    async fn len(&self) -> Result<u64> {
        self.bounded("LLEN", async {
            let mut conn = self.connection().await?;
            conn.llen::<_, u64>(&self.key)
                .await
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(Error::Redis)
    }
}

/// In-process queue with the same semantics as [`RedisQueue`].
#[derive(Default)]
pub struct MemoryQueue {
    items: Mutex<VecDeque<String>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableQueue for MemoryQueue {
    async fn push_tail(&self, item: String) -> Result<u64> {
        let mut items = self.items.lock().await;
        items.push_back(item);
        Ok(items.len() as u64)
    }

    async fn range_head(&self, count: usize) -> Result<Vec<String>> {
        let items = self.items.lock().await;
        Ok(items.iter().take(count).cloned().collect())
    }

    async fn trim_head(&self, count: usize) -> Result<()> {
        let mut items = self.items.lock().await;
        let count = count.min(items.len());
        items.drain(..count);
        Ok(())
    }

    async fn len(&self) -> Result<u64> {
        Ok(self.items.lock().await.len() as u64)
    }
}
