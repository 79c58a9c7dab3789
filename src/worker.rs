//! Worker pool draining the dispatch queue.
//!
//! A fixed number of tokio tasks loop over `dequeue -> deliver`, one event at
//! a time each. Workers are interchangeable; the queue is the only state
//! they share.
//!
//! # Lifecycle
//!
//! ```text
//!            ┌──────────────────────────────┐
//!            ▼                              │
//! Idle ──► Dequeuing ──► Delivering ────────┘
//!            │
//!            └──► Terminated   (queue closed and empty, or stop requested)
//! ```
//!
//! # Shutdown
//!
//! [`WorkerPool::shutdown`] closes the queue, then gives the workers a grace
//! period to drain it. When the grace period runs out the workers are told
//! to stop; each finishes the delivery it is in the middle of and exits.
//! Whatever is still queued at that point is dropped and counted.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::delivery::{Deliver, DeliveryOutcome};
use crate::metrics::Metrics;
use crate::queue::DispatchQueue;

/// What happened to the queued backlog during shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// True if the workers emptied the queue within the grace period
    pub drained_in_time: bool,

    /// Events discarded without a delivery attempt
    pub dropped: usize,
}

/// A fixed set of workers delivering events from a [`DispatchQueue`].
pub struct WorkerPool {
    queue: Arc<DispatchQueue>,
    metrics: Arc<Metrics>,
    workers: JoinSet<u64>,
    stop: CancellationToken,
    worker_count: usize,
}

impl WorkerPool {
    /// Spawn `worker_count` workers onto the current tokio runtime.
    pub fn spawn(
        worker_count: usize,
        queue: Arc<DispatchQueue>,
        sink: Arc<dyn Deliver>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let stop = CancellationToken::new();
        let mut workers = JoinSet::new();

        info!(
            worker_count = worker_count,
            sink = %sink.name(),
            queue_capacity = queue.capacity(),
            "Spawning delivery workers"
        );

        for worker_id in 0..worker_count {
            workers.spawn(run_worker(
                worker_id,
                queue.clone(),
                sink.clone(),
                metrics.clone(),
                stop.clone(),
            ));
        }

        Self {
            queue,
            metrics,
            workers,
            stop,
            worker_count,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Close the queue, drain it for at most `grace`, then stop the workers.
    pub async fn shutdown(mut self, grace: Duration) -> ShutdownReport {
        let grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        info!(
            queued = self.queue.len(),
            grace_ms = grace_ms,
            "Shutting down worker pool"
        );

        self.queue.close().await;

        let drained_in_time = tokio::time::timeout(grace, join_workers(&mut self.workers))
            .await
            .is_ok();

        if !drained_in_time {
            warn!(
                queued = self.queue.len(),
                grace_ms = grace_ms,
                "Shutdown grace period expired, stopping workers"
            );
            self.stop.cancel();
            join_workers(&mut self.workers).await;
        }

        let dropped = self.queue.drain_remaining().await;
        if dropped > 0 {
            warn!(dropped = dropped, "Dropped queued events at shutdown");
            self.metrics.record_dropped(dropped as u64);
        }

        info!(
            drained_in_time = drained_in_time,
            dropped = dropped,
            "Worker pool stopped"
        );

        ShutdownReport {
            drained_in_time,
            dropped,
        }
    }
}

/// Wait for every worker task to exit.
///
/// Cancel safe: tasks that already finished are removed from the set.
async fn join_workers(workers: &mut JoinSet<u64>) {
    while let Some(result) = workers.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "Delivery worker panicked");
        }
    }
}

/// One worker: take the next event, deliver it, repeat.
///
/// The stop token is only observed while waiting for an event, so an
/// in-flight delivery always runs to completion (or its own timeout).
async fn run_worker(
    worker_id: usize,
    queue: Arc<DispatchQueue>,
    sink: Arc<dyn Deliver>,
    metrics: Arc<Metrics>,
    stop: CancellationToken,
) -> u64 {
    debug!(worker_id = worker_id, "Delivery worker started");
    let mut processed: u64 = 0;

    loop {
        let event = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            event = queue.dequeue() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let outcome = sink.deliver(&event).await;
        metrics.record_outcome(&outcome);
        processed += 1;

        if let DeliveryOutcome::Failed { attempts, error } = &outcome {
            debug!(
                worker_id = worker_id,
                attempts = attempts,
                error = %error,
                "Worker moving on after failed delivery"
            );
        }
    }

    info!(
        worker_id = worker_id,
        events_processed = processed,
        "Delivery worker stopped"
    );
    processed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::CanonicalEvent;
    use crate::queue::AdmissionPolicy;
    use async_trait::async_trait;

    struct AlwaysDelivered;

    #[async_trait]
    impl Deliver for AlwaysDelivered {
        fn name(&self) -> &str {
            "test"
        }

        async fn deliver(&self, _event: &CanonicalEvent) -> DeliveryOutcome {
            DeliveryOutcome::Delivered {
                status: 200,
                attempts: 1,
            }
        }
    }

    #[tokio::test]
    async fn test_idle_pool_shuts_down_cleanly() {
        let queue = Arc::new(DispatchQueue::new(4, AdmissionPolicy::Reject));
        let pool = WorkerPool::spawn(
            3,
            queue,
            Arc::new(AlwaysDelivered),
            Arc::new(Metrics::new()),
        );
        assert_eq!(pool.worker_count(), 3);

        let report = pool.shutdown(Duration::from_secs(1)).await;
        assert!(report.drained_in_time);
        assert_eq!(report.dropped, 0);
    }

    #[tokio::test]
    async fn test_outcomes_are_counted() {
        let queue = Arc::new(DispatchQueue::new(8, AdmissionPolicy::Reject));
        let metrics = Arc::new(Metrics::new());
        let pool = WorkerPool::spawn(2, queue.clone(), Arc::new(AlwaysDelivered), metrics.clone());

        for _ in 0..5 {
            queue.enqueue(CanonicalEvent::default()).await.unwrap();
        }

        pool.shutdown(Duration::from_secs(1)).await;
        assert_eq!(metrics.snapshot().delivered, 5);
    }
}
