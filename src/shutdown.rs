//! Graceful shutdown coordination for Beacon.
//!
//! [`ShutdownSignal`] turns SIGTERM/SIGINT into a cancellation that the HTTP
//! server and the worker pool can both observe, and carries the grace period
//! the pool is allowed for draining its queue.
//!
//! # Example
//!
//! ```rust,ignore
//! use beacon::shutdown::ShutdownSignal;
//!
//! let shutdown = ShutdownSignal::new();
//! tokio::spawn({
//!     let shutdown = shutdown.clone();
//!     async move { shutdown.wait().await }
//! });
//!
//! axum::serve(listener, app)
//!     .with_graceful_shutdown(shutdown.clone().cancelled_owned())
//!     .await?;
//! pool.shutdown(shutdown.timeout()).await;
//! ```

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Default grace period in seconds.
const DEFAULT_SHUTDOWN_TIMEOUT: u64 = 10;

/// A signal for coordinating graceful shutdown across components.
///
/// Clones share the same underlying token: triggering one triggers all.
#[derive(Clone)]
pub struct ShutdownSignal {
    token: CancellationToken,
    timeout: Duration,
}

impl ShutdownSignal {
    /// Create a new shutdown signal with the default grace period.
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT))
    }

    /// Create a new shutdown signal with a custom grace period.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            timeout,
        }
    }

    /// Grace period for draining in-flight work.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for SIGTERM or Ctrl+C, then trigger shutdown.
    ///
    /// Also returns if shutdown is triggered some other way first.
    pub async fn wait(&self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
            _ = self.token.cancelled() => {
                return;
            }
        }

        self.token.cancel();
    }

    /// Resolves once shutdown has been triggered. Owned so it can be handed
    /// to APIs that need a `'static` future, such as axum's graceful shutdown.
    pub async fn cancelled_owned(self) {
        self.token.cancelled_owned().await
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
