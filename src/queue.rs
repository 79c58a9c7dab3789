//! Bounded dispatch queue between the HTTP handlers and the worker pool.
//!
//! The [`DispatchQueue`] wraps a bounded `tokio::sync::mpsc` channel. Any
//! number of handlers enqueue through a shared `Arc<DispatchQueue>`; workers
//! take turns on the receiver, so each event is handed to exactly one worker.
//!
//! # Admission
//!
//! What happens when the queue is full is governed by [`AdmissionPolicy`]:
//!
//! ```text
//! Policy  | Queue full
//! --------|-------------------------------------------------
//! reject  | enqueue fails immediately with Saturated
//! block   | enqueue waits up to `timeout`, then Saturated
//! ```
//!
//! Rejecting is the default; it keeps request latency predictable and lets
//! the caller retry.

use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info};

use crate::event::CanonicalEvent;

/// Errors returned by [`DispatchQueue::enqueue`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The queue is at capacity (immediately, or after the block timeout)
    #[error("dispatch queue saturated ({capacity} events queued)")]
    Saturated { capacity: usize },

    /// The queue no longer accepts events because shutdown has begun
    #[error("dispatch queue is closed")]
    Closed,
}

impl QueueError {
    /// Machine-readable reason used in busy responses.
    pub fn reason(&self) -> &'static str {
        match self {
            QueueError::Saturated { .. } => "queue_saturated",
            QueueError::Closed => "queue_closed",
        }
    }
}

/// Behavior of `enqueue` when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdmissionPolicy {
    /// Fail immediately.
    #[default]
    Reject,

    /// Wait for space up to the given deadline.
    Block { timeout: Duration },
}

/// Policy name as written in configuration files.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionMode {
    #[default]
    Reject,
    Block,
}

/// Bounded FIFO of canonical events with multi-consumer dequeue.
pub struct DispatchQueue {
    /// `None` once the queue has been closed
    sender: RwLock<Option<mpsc::Sender<CanonicalEvent>>>,

    /// Shared by all workers; whoever holds the lock receives the next event
    receiver: Mutex<mpsc::Receiver<CanonicalEvent>>,

    capacity: usize,
    policy: AdmissionPolicy,

    /// Events admitted but not yet dequeued
    depth: AtomicUsize,
}

impl DispatchQueue {
    /// Create a queue holding at most `capacity` events.
    ///
    /// A capacity of zero is raised to one; configuration validation rejects
    /// it before it gets here.
    pub fn new(capacity: usize, policy: AdmissionPolicy) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);

        Self {
            sender: RwLock::new(Some(sender)),
            receiver: Mutex::new(receiver),
            capacity,
            policy,
            depth: AtomicUsize::new(0),
        }
    }

    /// Maximum number of queued events.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of events waiting to be picked up by a worker.
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true once [`close`](Self::close) has been called.
    pub async fn is_closed(&self) -> bool {
        self.sender.read().await.is_none()
    }

    /// Hand an event to the worker pool, honoring the admission policy.
    ///
    /// On error the event is dropped and the caller is expected to report
    /// backpressure; the queue itself is left untouched.
    pub async fn enqueue(&self, event: CanonicalEvent) -> Result<(), QueueError> {
        // Clone out of the lock so a blocked producer doesn't hold up close().
        let sender = self.sender.read().await.clone().ok_or(QueueError::Closed)?;

        let permit = match self.policy {
            AdmissionPolicy::Reject => sender.try_reserve().map_err(|e| match e {
                mpsc::error::TrySendError::Full(()) => QueueError::Saturated {
                    capacity: self.capacity,
                },
                mpsc::error::TrySendError::Closed(()) => QueueError::Closed,
            })?,
            AdmissionPolicy::Block { timeout } => {
                match tokio::time::timeout(timeout, sender.reserve()).await {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => return Err(QueueError::Closed),
                    Err(_) => {
                        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                        debug!(
                            timeout_ms = timeout_ms,
                            "Enqueue timed out waiting for space"
                        );
                        return Err(QueueError::Saturated {
                            capacity: self.capacity,
                        });
                    }
                }
            }
        };

        // Count before sending so a fast consumer never sees depth underflow.
        self.depth.fetch_add(1, Ordering::AcqRel);
        permit.send(event);
        Ok(())
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the queue is closed and fully drained. Cancel safe:
    /// dropping the future never loses an event.
    pub async fn dequeue(&self) -> Option<CanonicalEvent> {
        let mut receiver = self.receiver.lock().await;
        let event = receiver.recv().await?;
        self.depth.fetch_sub(1, Ordering::AcqRel);
        Some(event)
    }

    /// Stop accepting events. Already queued events stay available to
    /// [`dequeue`](Self::dequeue).
    pub async fn close(&self) {
        if self.sender.write().await.take().is_some() {
            info!(queued = self.len(), "Dispatch queue closed");
        }
    }

    /// Remove every event still queued without delivering it.
    ///
    /// Only meant for the end of shutdown, after workers have stopped.
    pub async fn drain_remaining(&self) -> usize {
        let mut receiver = self.receiver.lock().await;
        let mut drained = 0;

        while receiver.try_recv().is_ok() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            drained += 1;
        }

        drained
    }
}
