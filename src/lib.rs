//! # Beacon
//!
//! An ingestion endpoint for analytics events. Events arrive with
//! abbreviated keys, are normalized into a canonical schema, and are
//! forwarded to a webhook in the background.
//!
//! ## Architecture
//!
//! ```text
//! Client -> POST /submit -> normalize -> DispatchQueue (bounded) -> WorkerPool -> WebhookClient -> webhook
//! ```
//!
//! The HTTP response only reflects whether the event was admitted to the
//! queue; delivery outcomes are logged and counted.
//!
//! ## Modules
//!
//! - [`event`]: Raw and canonical event types, and the normalizer
//! - [`queue`]: Bounded dispatch queue and admission policy
//! - [`worker`]: Worker pool draining the queue
//! - [`delivery`]: Delivery trait, webhook client and retry policy
//! - [`server`]: Axum routes
//! - [`config`]: TOML configuration
//! - [`metrics`]: In-process counters
//! - [`shutdown`]: Signal handling

pub mod config;
pub mod delivery;
pub mod event;
pub mod metrics;
pub mod queue;
pub mod server;
pub mod shutdown;
pub mod worker;

// Re-export commonly used types at crate root
pub use delivery::{Deliver, DeliveryError, DeliveryOutcome, RetryPolicy, WebhookClient};
pub use event::{normalize, CanonicalEvent, RawEvent};
pub use queue::{AdmissionPolicy, DispatchQueue, QueueError};
pub use worker::{ShutdownReport, WorkerPool};
