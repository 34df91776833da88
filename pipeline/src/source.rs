use crate::errors::{Error, Result};
use crate::model::SourceReading;
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

/// Upstream that returns one reading per request.
#[async_trait]
pub trait ReadingSource: Send + Sync {
    async fn fetch(&self) -> Result<SourceReading>;
}

/// Polls a JSON endpoint with a single GET per reading.
pub struct HttpSource {
    http: reqwest::Client,
    url: String,
}

impl HttpSource {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {}", e)))?;

        info!("Upstream source: {} (timeout {:?})", url, timeout);

        Ok(Self {
            http,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl ReadingSource for HttpSource {
    async fn fetch(&self) -> Result<SourceReading> {
        let resp = self
            .http
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| Error::Source(format!("request to {}: {}", self.url, e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Source(format!("{} returned {}", self.url, status)));
        }

        resp.json::<SourceReading>()
            .await
            .map_err(|e| Error::Source(format!("decoding body from {}: {}", self.url, e)))
    }
}
