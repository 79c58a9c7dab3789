//! Webhook delivery - HTTP POST of canonical events.
//!
//! The [`WebhookClient`] posts each event as JSON to one fixed URL, given at
//! construction time. Transient failures are retried according to its
//! [`RetryPolicy`]; permanent rejections are logged and dropped.
//!
//! # Example
//!
//! ```rust,ignore
//! use beacon::delivery::{RetryPolicy, WebhookClient};
//! use std::time::Duration;
//!
//! let client = WebhookClient::new("https://hooks.example.com/analytics")
//!     .with_timeout(Duration::from_secs(5))
//!     .with_retry_policy(RetryPolicy::default());
//! ```

use super::{Deliver, DeliveryError, DeliveryOutcome, RetryPolicy};
use crate::event::CanonicalEvent;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default timeout for webhook requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivers events to an HTTP webhook.
///
/// Cloning is cheap; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct WebhookClient {
    /// Target URL for every event
    url: String,

    /// HTTP client (reused for connection pooling)
    client: Client,

    /// Per-attempt request timeout
    timeout: Duration,

    retry: RetryPolicy,
}

impl WebhookClient {
    /// Create a client targeting the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: Client::new(),
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    /// Set the per-attempt request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry policy for transient failures
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Make one POST and classify the response.
    async fn send_once(&self, body: &Bytes) -> Result<StatusCode, DeliveryError> {
        let result = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .header(CONTENT_TYPE, "application/json")
            .body(body.clone())
            .send()
            .await;

        match result {
            Ok(response) => classify(response),
            Err(e) if e.is_timeout() => {
                let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
                Err(DeliveryError::Timeout(timeout_ms))
            }
            Err(e) => Err(DeliveryError::Network(e.to_string())),
        }
    }
}

/// Map an HTTP response onto success or a delivery error.
fn classify(response: Response) -> Result<StatusCode, DeliveryError> {
    let status = response.status();

    if status.is_success() {
        return Ok(status);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        return Err(DeliveryError::RateLimited { retry_after_secs });
    }

    if status.is_server_error() {
        return Err(DeliveryError::ServerError(status.as_u16()));
    }

    Err(DeliveryError::Rejected(status.as_u16()))
}

#[async_trait]
impl Deliver for WebhookClient {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, event: &CanonicalEvent) -> DeliveryOutcome {
        let body = match serde_json::to_vec(event) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                error!(error = %e, event = %event.label(), "Failed to serialize event");
                return DeliveryOutcome::Failed {
                    attempts: 0,
                    error: DeliveryError::Serialization(e.to_string()),
                };
            }
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(
                url = %self.url,
                event = %event.label(),
                attempt = attempt,
                "Sending webhook"
            );

            match self.send_once(&body).await {
                Ok(status) => {
                    info!(
                        url = %self.url,
                        status = %status,
                        event = %event.label(),
                        attempts = attempt,
                        "Webhook delivered"
                    );
                    return DeliveryOutcome::Delivered {
                        status: status.as_u16(),
                        attempts: attempt,
                    };
                }
                Err(DeliveryError::Rejected(status)) => {
                    warn!(
                        url = %self.url,
                        status = status,
                        event = %event.label(),
                        attempts = attempt,
                        "Webhook rejected event, not retrying"
                    );
                    return DeliveryOutcome::Rejected {
                        status,
                        attempts: attempt,
                    };
                }
                Err(error) if self.retry.should_retry(attempt, &error) => {
                    let delay = self.retry.backoff(attempt, &error);
                    warn!(
                        url = %self.url,
                        error = %error,
                        attempt = attempt,
                        max_attempts = self.retry.max_attempts,
                        backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Webhook attempt failed, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    error!(
                        url = %self.url,
                        error = %error,
                        event = %event.label(),
                        attempts = attempt,
                        "Webhook delivery failed, dropping event"
                    );
                    return DeliveryOutcome::Failed {
                        attempts: attempt,
                        error,
                    };
                }
            }
        }
    }
}
