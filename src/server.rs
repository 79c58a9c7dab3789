//! HTTP surface of Beacon.
//!
//! ```text
//! POST /submit   -> normalize, enqueue, echo the canonical event
//! GET  /health   -> liveness plus queue depth
//! GET  /metrics  -> counters as JSON
//! ```
//!
//! `/submit` answers as soon as the event is admitted to the queue (or
//! refused); delivery to the webhook happens later on a worker.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::event::{normalize, RawEvent};
use crate::metrics::{format_uptime, Metrics};
use crate::queue::{DispatchQueue, QueueError};

/// Errors from starting or running the HTTP listener.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<DispatchQueue>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(queue: Arc<DispatchQueue>, metrics: Arc<Metrics>) -> Self {
        Self { queue, metrics }
    }
}

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/submit", post(submit_event))
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Bind the listening socket.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

/// Serve `app` until `shutdown` resolves, then stop accepting connections.
pub async fn run<F>(listener: TcpListener, app: Router, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Accept one raw analytics event.
///
/// - 200 `{"converted_request": ...}` once queued
/// - 400 `{"error": "Invalid request format"}` if the body isn't a JSON object
/// - 503 busy response if the queue is full or closed
async fn submit_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.metrics.record_received();

    let correlation_id = headers
        .get("X-Correlation-ID")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let raw: RawEvent = match serde_json::from_slice(&body) {
        Ok(raw) => raw,
        Err(e) => {
            state.metrics.record_malformed();
            debug!(
                correlation_id = %correlation_id,
                error = %e,
                "Rejecting malformed request body"
            );
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid request format" })),
            )
                .into_response();
        }
    };

    let event = normalize(&raw);
    let response_body = json!({ "converted_request": &event });
    let label = event.label().to_string();

    match state.queue.enqueue(event).await {
        Ok(()) => {
            state.metrics.record_accepted();
            info!(
                correlation_id = %correlation_id,
                event = %label,
                queued = state.queue.len(),
                "Event accepted"
            );
            (StatusCode::OK, Json(response_body)).into_response()
        }
        Err(e) => {
            state.metrics.record_busy();
            warn!(
                correlation_id = %correlation_id,
                event = %label,
                error = %e,
                "Event refused, dispatch queue unavailable"
            );
            busy_response(e)
        }
    }
}

fn busy_response(error: QueueError) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "error": "Service busy",
            "reason": error.reason(),
            "retry": true,
        })),
    )
        .into_response()
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    let status = if state.queue.is_closed().await {
        "shutting_down"
    } else {
        "ok"
    };

    Json(json!({
        "status": status,
        "queue": {
            "depth": state.queue.len(),
            "capacity": state.queue.capacity(),
        }
    }))
}

/// Get metrics endpoint - returns counters and uptime as JSON
async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<Value> {
    let uptime = state.metrics.uptime_seconds();

    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": uptime,
        "uptime": format_uptime(uptime),
        "events": state.metrics.snapshot(),
        "queue": {
            "depth": state.queue.len(),
            "capacity": state.queue.capacity(),
        },
        "status": "running"
    }))
}
