use crate::errors::Result;
use async_trait::async_trait;

/// Delivery metadata returned once the bus has acknowledged a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub topic: String,
    pub partition: i32,
    pub offset: u64,
}

/// External message bus: topic + key + payload in, delivery metadata out.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn send(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<DeliveryReceipt>;
}
