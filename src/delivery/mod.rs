//! Delivery of canonical events to the downstream sink.
//!
//! The [`Deliver`] trait is the seam between the worker pool and whatever
//! sits downstream. [`WebhookClient`] is the production implementation: an
//! HTTP POST with a per-request timeout and a [`RetryPolicy`] for transient
//! failures.
//!
//! ## Outcome classification
//!
//! ```text
//! Response                  | Attempt result        | Retried?
//! --------------------------|-----------------------|---------
//! 2xx                       | Delivered             | -
//! 429, 5xx                  | transient error       | yes
//! timeout, connect failure  | transient error       | yes
//! other 4xx, other status   | Rejected              | no
//! ```
//!
//! Transient errors that outlive the retry budget end as
//! [`DeliveryOutcome::Failed`].

pub mod retry;
pub mod webhook;

use crate::event::CanonicalEvent;
use async_trait::async_trait;
use thiserror::Error;

pub use retry::RetryPolicy;
pub use webhook::WebhookClient;

/// Errors from a single delivery attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// No response within the request timeout
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    /// Connection or transport failure
    #[error("network error: {0}")]
    Network(String),

    /// Downstream answered 5xx
    #[error("server error: HTTP {0}")]
    ServerError(u16),

    /// Downstream answered 429
    #[error("rate limited: HTTP 429")]
    RateLimited {
        /// Seconds from a `Retry-After` header, if one was sent
        retry_after_secs: Option<u64>,
    },

    /// Downstream answered with a status that retrying won't fix
    #[error("rejected: HTTP {0}")]
    Rejected(u16),

    /// The event could not be encoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl DeliveryError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DeliveryError::Timeout(_)
                | DeliveryError::Network(_)
                | DeliveryError::ServerError(_)
                | DeliveryError::RateLimited { .. }
        )
    }

    /// Delay requested by the downstream, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            DeliveryError::RateLimited { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }
}

/// Final result of delivering one event, retries included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The sink accepted the event
    Delivered { status: u16, attempts: u32 },

    /// The sink refused the event; not retried
    Rejected { status: u16, attempts: u32 },

    /// Every attempt failed transiently, or the event could not be sent at all
    Failed { attempts: u32, error: DeliveryError },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }

    /// Number of attempts made, zero if nothing was sent.
    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryOutcome::Delivered { attempts, .. } => *attempts,
            DeliveryOutcome::Rejected { attempts, .. } => *attempts,
            DeliveryOutcome::Failed { attempts, .. } => *attempts,
        }
    }
}

/// Something that can deliver canonical events.
///
/// Implementations are shared by every worker, so they must be
/// `Send + Sync` and must not rely on per-call mutable state.
#[async_trait]
pub trait Deliver: Send + Sync {
    /// Short name used in log fields (e.g. "webhook")
    fn name(&self) -> &str;

    /// Deliver one event, retrying internally as the implementation sees fit.
    ///
    /// Never returns an error: every failure mode is an outcome.
    async fn deliver(&self, event: &CanonicalEvent) -> DeliveryOutcome;
}
