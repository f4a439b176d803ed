//! HTTP pull feed.
//!
//! Fetches the latest event for a key with `GET {base_url}/latest?key=<key>`.
//! The response body is a single `UpdateEvent` document.

use crate::error::{PullError, PullResult};
use crate::feed::PullFeed;
use mdrelay_core::{BoxFuture, FeedError, FeedResult, SubscriptionKey, UpdateEvent};
use mdrelay_telemetry::Metrics;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Pull feed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullConfig {
    /// Base URL of the pull endpoint.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout (ms). Default: 5000.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_timeout_ms() -> u64 {
    5_000
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Pull feed over HTTP.
#[derive(Clone)]
pub struct HttpPullFeed {
    client: Client,
    latest_url: String,
    timeout: Duration,
}

impl HttpPullFeed {
    pub fn new(config: &PullConfig) -> PullResult<Self> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PullError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            latest_url: format!("{}/latest", config.base_url.trim_end_matches('/')),
            timeout,
        })
    }

    /// Fetch the latest event for `key`.
    pub async fn fetch_latest(&self, key: &SubscriptionKey) -> PullResult<UpdateEvent> {
        debug!(key = %key, "Pull fetch");

        let response = self
            .client
            .get(&self.latest_url)
            .query(&[("key", key.as_str())])
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PullError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await.map_err(|e| self.request_error(e))?;
        let event: UpdateEvent = serde_json::from_slice(&bytes)
            .map_err(|e| PullError::Decode(format!("Failed to parse response: {e}")))?;

        if &event.key != key {
            return Err(PullError::Decode(format!(
                "response for {} does not match requested key {}",
                event.key, key
            )));
        }

        Ok(event)
    }

    fn request_error(&self, e: reqwest::Error) -> PullError {
        if e.is_timeout() {
            PullError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            PullError::HttpClient(format!("HTTP request failed: {e}"))
        }
    }
}

impl PullFeed for HttpPullFeed {
    fn fetch(&self, key: &SubscriptionKey) -> BoxFuture<'static, FeedResult<UpdateEvent>> {
        let feed = self.clone();
        let key = key.clone();
        Box::pin(async move {
            let started = Instant::now();
            let result = feed.fetch_latest(&key).await;
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

            match &result {
                Ok(event) => {
                    Metrics::pull_latency("ok", latency_ms);
                    debug!(key = %key, seq = event.sequence, latency_ms, "Pull fetch complete");
                }
                Err(e) => {
                    Metrics::pull_latency("error", latency_ms);
                    warn!(key = %key, error = %e, latency_ms, "Pull fetch failed");
                }
            }
            result.map_err(FeedError::from)
        })
    }
}
