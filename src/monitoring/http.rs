//! HTTP adapters
//!
//! Upstream latency probe and webhook alert delivery, both over `reqwest`.

use crate::domain::{Alert, AlertSink, UpstreamProbe};
use crate::error::{Error, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use std::time::Duration;
use tracing::{debug, warn};

// =============================================================================
// Upstream Probe
// =============================================================================

/// Probes the upstream API with a plain `GET`
pub struct HttpUpstreamProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpUpstreamProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl UpstreamProbe for HttpUpstreamProbe {
    async fn probe(&self) -> Result<()> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Upstream(format!("{} returned {}", self.url, status)));
        }
        debug!(url = %self.url, %status, "Upstream probe ok");
        Ok(())
    }

    fn target(&self) -> &str {
        &self.url
    }
}

// =============================================================================
// Webhook Alert Sink
// =============================================================================

/// Webhook delivery settings
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub request_timeout: Duration,
    /// Upper bound on time spent retrying one alert
    pub max_elapsed: Duration,
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_timeout: Duration::from_secs(5),
            max_elapsed: Duration::from_secs(30),
        }
    }
}

/// POSTs alerts as JSON, retrying transient failures with exponential backoff
pub struct WebhookAlertSink {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookAlertSink {
    pub fn new(config: WebhookConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(200))
            .with_max_elapsed_time(Some(self.config.max_elapsed))
            .build();

        backoff::future::retry(policy, || async {
            let response = self
                .client
                .post(&self.config.url)
                .json(alert)
                .send()
                .await
                .map_err(backoff::Error::transient)?;

            match response.error_for_status() {
                Ok(_) => Ok(()),
                // 4xx will not improve on retry
                Err(e) if e.status().map(|s| s.is_client_error()).unwrap_or(false) => {
                    Err(backoff::Error::permanent(e))
                }
                Err(e) => {
                    warn!(url = %self.config.url, error = %e, "Alert webhook failed, retrying");
                    Err(backoff::Error::transient(e))
                }
            }
        })
        .await?;

        debug!(alert_id = alert.id, url = %self.config.url, "Alert delivered");
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "webhook"
    }
}
