//! Worker pool tests.
//!
//! Uses an in-process recording sink to check ordering, exactly-once
//! delivery across workers, and the shutdown drain/drop behavior.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon::delivery::{Deliver, DeliveryOutcome};
use beacon::metrics::Metrics;
use beacon::queue::{AdmissionPolicy, DispatchQueue};
use beacon::worker::WorkerPool;
use beacon::CanonicalEvent;
use serde_json::json;
use tokio::sync::Mutex;

/// Records every event it is handed, optionally taking its time.
struct RecordingSink {
    seen: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
}

impl RecordingSink {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            delay,
        })
    }

    async fn seen(&self) -> Vec<String> {
        self.seen.lock().await.clone()
    }
}

#[async_trait]
impl Deliver for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, event: &CanonicalEvent) -> DeliveryOutcome {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.seen.lock().await.push(event.label().to_string());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        DeliveryOutcome::Delivered {
            status: 200,
            attempts: 1,
        }
    }
}

fn event(name: String) -> CanonicalEvent {
    CanonicalEvent {
        event: json!(name),
        ..Default::default()
    }
}

#[tokio::test]
async fn single_worker_preserves_fifo_order() {
    let queue = Arc::new(DispatchQueue::new(8, AdmissionPolicy::Reject));
    let sink = RecordingSink::new(Duration::ZERO);

    for name in ["e1", "e2", "e3"] {
        queue.enqueue(event(name.to_string())).await.unwrap();
    }

    let pool = WorkerPool::spawn(1, queue, sink.clone(), Arc::new(Metrics::new()));
    let report = pool.shutdown(Duration::from_secs(5)).await;

    assert!(report.drained_in_time);
    assert_eq!(sink.seen().await, vec!["e1", "e2", "e3"]);
}

#[tokio::test]
async fn many_workers_deliver_each_event_exactly_once() {
    const EVENTS: usize = 200;

    let queue = Arc::new(DispatchQueue::new(EVENTS, AdmissionPolicy::Reject));
    let sink = RecordingSink::new(Duration::from_millis(1));
    let metrics = Arc::new(Metrics::new());
    let pool = WorkerPool::spawn(8, queue.clone(), sink.clone(), metrics.clone());

    for i in 0..EVENTS {
        queue.enqueue(event(format!("event-{i}"))).await.unwrap();
    }

    let report = pool.shutdown(Duration::from_secs(10)).await;
    assert!(report.drained_in_time);
    assert_eq!(report.dropped, 0);

    let mut seen = sink.seen().await;
    seen.sort();
    let mut expected: Vec<String> = (0..EVENTS).map(|i| format!("event-{i}")).collect();
    expected.sort();

    assert_eq!(seen, expected);
    assert_eq!(metrics.snapshot().delivered, EVENTS as u64);
}

#[tokio::test]
async fn workers_deliver_concurrently() {
    let queue = Arc::new(DispatchQueue::new(16, AdmissionPolicy::Reject));
    let sink = RecordingSink::new(Duration::from_millis(50));

    for i in 0..8 {
        queue.enqueue(event(format!("e{i}"))).await.unwrap();
    }

    let pool = WorkerPool::spawn(4, queue, sink.clone(), Arc::new(Metrics::new()));
    pool.shutdown(Duration::from_secs(5)).await;

    assert!(sink.max_in_flight.load(Ordering::SeqCst) > 1);
    assert_eq!(sink.seen().await.len(), 8);
}

#[tokio::test]
async fn enqueue_does_not_wait_for_delivery() {
    let queue = Arc::new(DispatchQueue::new(4, AdmissionPolicy::Reject));
    let sink = RecordingSink::new(Duration::from_secs(1));
    let pool = WorkerPool::spawn(1, queue.clone(), sink, Arc::new(Metrics::new()));

    let enqueued = tokio::time::timeout(
        Duration::from_millis(100),
        queue.enqueue(event("slow".to_string())),
    )
    .await;
    assert!(matches!(enqueued, Ok(Ok(()))));

    pool.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn grace_expiry_drops_and_counts_remaining_events() {
    let queue = Arc::new(DispatchQueue::new(16, AdmissionPolicy::Reject));
    let sink = RecordingSink::new(Duration::from_millis(200));
    let metrics = Arc::new(Metrics::new());

    for i in 0..10 {
        queue.enqueue(event(format!("e{i}"))).await.unwrap();
    }

    let pool = WorkerPool::spawn(1, queue.clone(), sink.clone(), metrics.clone());
    let report = pool.shutdown(Duration::from_millis(50)).await;

    assert!(!report.drained_in_time);
    assert!(report.dropped > 0);

    let delivered = sink.seen().await.len();
    assert_eq!(delivered + report.dropped, 10);
    assert_eq!(metrics.snapshot().dropped, report.dropped as u64);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn shutdown_refuses_new_events() {
    let queue = Arc::new(DispatchQueue::new(4, AdmissionPolicy::Reject));
    let pool = WorkerPool::spawn(
        2,
        queue.clone(),
        RecordingSink::new(Duration::ZERO),
        Arc::new(Metrics::new()),
    );

    pool.shutdown(Duration::from_secs(1)).await;

    assert_eq!(
        queue.enqueue(event("late".to_string())).await,
        Err(beacon::QueueError::Closed)
    );
}
