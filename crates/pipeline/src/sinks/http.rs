//! Remote audit collector over HTTP

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::model::AuditEvent;
use crate::sink::{AuditSink, SinkError};

/// POSTs each event as JSON to a collector URL
///
/// Any status outside 2xx is reported as [`SinkError::Status`].
pub struct HttpAuditSink {
    client: reqwest::Client,
    url: String,
}

impl HttpAuditSink {
    /// Request timeout used for every POST
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(url: impl Into<String>) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .pool_max_idle_per_host(100)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AuditSink for HttpAuditSink {
    async fn send(&self, event: &AuditEvent) -> Result<(), SinkError> {
        let response = self.client.post(&self.url).json(event).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status(status.as_u16()));
        }

        debug!(url = %self.url, action = %event.action, "Audit event delivered");
        Ok(())
    }
}
