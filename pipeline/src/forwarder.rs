use crate::bus::{DeliveryReceipt, MessageBus};
use crate::dispatcher::Subscriber;
use crate::errors::{timed_out, Error, Result};
use crate::metrics::{FORWARDED_TOTAL, FORWARD_FAILURES_TOTAL};
use crate::model::{IngestionEvent, Reading};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};
use uuid::Uuid;

/// Forwards every reading to a fixed message-bus topic. Fire and forget: the
/// outcome is only logged, nothing is retried.
pub struct BusForwarder {
    bus: Arc<dyn MessageBus>,
    topic: String,
    send_timeout: Duration,
}

impl BusForwarder {
    pub fn new(bus: Arc<dyn MessageBus>, topic: &str, send_timeout: Duration) -> Self {
        Self {
            bus,
            topic: topic.to_string(),
            send_timeout,
        }
    }

    /// Returns whether the bus acknowledged the reading.
    pub async fn forward(&self, reading: &Reading) -> bool {
        let key = Uuid::new_v4().to_string();

        match self.send(&key, reading).await {
            Ok(receipt) => {
                FORWARDED_TOTAL.inc();
                debug!(
                    "Forwarded reading: key = {}, topic = {}, partition = {}, offset = {}",
                    key, receipt.topic, receipt.partition, receipt.offset
                );
                true
            }
            Err(e) => {
                FORWARD_FAILURES_TOTAL.inc();
                error!(
                    "Failed to forward reading: key = {}, reading = {:?}, error = {}",
                    key, reading, e
                );
                false
            }
        }
    }

    async fn send(&self, key: &str, reading: &Reading) -> Result<DeliveryReceipt> {
        let payload = serde_json::to_vec(reading)?;

        tokio::time::timeout(self.send_timeout, self.bus.send(&self.topic, key, payload))
            .await
            .map_err(|_| Error::Forwarding(timed_out("message bus send", self.send_timeout)))?
    }
}

#[async_trait]
impl Subscriber for BusForwarder {
    async fn on_event(&self, event: &IngestionEvent) {
        self.forward(&event.reading).await;
    }

    fn name(&self) -> &'static str {
        "bus-forwarder"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBus {
        sent: Mutex<Vec<(String, String, Vec<u8>)>>,
    }

    #[async_trait]
    impl MessageBus for RecordingBus {
        async fn send(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<DeliveryReceipt> {
            let mut sent = self.sent.lock().unwrap();
            sent.push((topic.to_string(), key.to_string(), payload));
            Ok(DeliveryReceipt {
                topic: topic.to_string(),
                partition: 0,
                offset: sent.len() as u64,
            })
        }
    }

    struct HangingBus;

    #[async_trait]
    impl MessageBus for HangingBus {
        async fn send(&self, _: &str, _: &str, _: Vec<u8>) -> Result<DeliveryReceipt> {
            std::future::pending().await
        }
    }

    fn reading() -> Reading {
        Reading {
            temperature: 600.0,
            rpm: 9000.0,
            pressure: 45.0,
            fuel_flow: 0.4,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_forward_sends_reading_with_random_key() {
        let bus = Arc::new(RecordingBus::default());
        let forwarder = BusForwarder::new(bus.clone(), "engine", Duration::from_secs(3));

        assert!(forwarder.forward(&reading()).await);
        assert!(forwarder.forward(&reading()).await);

        let sent = bus.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, "engine");
        assert_ne!(sent[0].1, sent[1].1);
        assert!(Uuid::parse_str(&sent[0].1).is_ok());

        let decoded: Reading = serde_json::from_slice(&sent[0].2).unwrap();
        assert_eq!(decoded.rpm, 9000.0);
    }

    #[tokio::test]
    async fn test_send_timeout_is_reported_as_failure() {
        let forwarder = BusForwarder::new(Arc::new(HangingBus), "engine", Duration::from_millis(20));
        assert!(!forwarder.forward(&reading()).await);
    }
}
