use crate::dispatcher::Dispatcher;
use crate::errors::{timed_out, Error, Result};
use crate::metrics::{FETCH_FAILURES_TOTAL, READINGS_FETCHED_TOTAL};
use crate::model::{IngestionEvent, SourceReading};
use crate::source::ReadingSource;
use crate::validate::validate;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

/// Fetches one reading per tick and publishes it.
pub struct Poller {
    source: Arc<dyn ReadingSource>,
    dispatcher: Arc<Dispatcher>,
    fetch_timeout: Duration,
}

impl Poller {
    pub fn new(
        source: Arc<dyn ReadingSource>,
        dispatcher: Arc<Dispatcher>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            source,
            dispatcher,
            fetch_timeout,
        }
    }

    /// One poll. Returns whether an event was published; a failed fetch is
    /// logged and not retried within the tick.
    pub async fn tick(&self) -> bool {
        let source_reading = match self.fetch().await {
            Ok(reading) => reading,
            Err(e) => {
                FETCH_FAILURES_TOTAL.inc();
                error!("Failed to fetch engine reading: {}", e);
                return false;
            }
        };

        READINGS_FETCHED_TOTAL.inc();
        let event = IngestionEvent::new(source_reading.stamp(Utc::now()));
        debug!("Publishing {}", event);
        self.dispatcher.publish(event);
        true
    }

    async fn fetch(&self) -> Result<SourceReading> {
        let reading = tokio::time::timeout(self.fetch_timeout, self.source.fetch())
            .await
            .map_err(|_| Error::Source(timed_out("upstream fetch", self.fetch_timeout)))??;

        validate(&reading)?;
        Ok(reading)
    }

    /// Fixed-rate schedule. Each tick runs as its own task, so a slow fetch
    /// does not delay the next one and ticks may overlap.
    pub async fn run(self: Arc<Self>, period: Duration) {
        info!("Starting poller with interval={}ms", period.as_millis());

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

        loop {
            ticker.tick().await;
            let poller = self.clone();
            tokio::spawn(async move {
                poller.tick().await;
            });
        }
    }
}
