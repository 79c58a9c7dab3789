//! Webhook delivery tests against a wiremock server.
//!
//! Covers outcome classification, retry counts, and backoff behavior of
//! `WebhookClient`.

use std::time::Duration;

use beacon::delivery::{Deliver, DeliveryError, DeliveryOutcome, RetryPolicy, WebhookClient};
use beacon::CanonicalEvent;
use serde_json::json;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

fn fast_retries(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter_factor: 0.0,
    }
}

fn client_for(server: &MockServer, max_attempts: u32) -> WebhookClient {
    WebhookClient::new(format!("{}/webhook", server.uri()))
        .with_timeout(Duration::from_millis(200))
        .with_retry_policy(fast_retries(max_attempts))
}

fn sample_event() -> CanonicalEvent {
    CanonicalEvent {
        event: json!("click"),
        user_id: json!("u1"),
        ..Default::default()
    }
}

#[tokio::test]
async fn delivers_json_body_on_success() {
    let server = MockServer::start().await;

    Mock::given(matchers::method("POST"))
        .and(matchers::path("/webhook"))
        .and(matchers::header("content-type", "application/json"))
        .and(matchers::body_json(serde_json::to_value(sample_event()).unwrap()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = client_for(&server, 3).deliver(&sample_event()).await;

    assert_eq!(
        outcome,
        DeliveryOutcome::Delivered {
            status: 200,
            attempts: 1
        }
    );
}

#[tokio::test]
async fn any_2xx_counts_as_delivered() {
    let server = MockServer::start().await;

    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = client_for(&server, 3).deliver(&sample_event()).await;
    assert!(outcome.is_delivered());
}

#[tokio::test]
async fn client_error_is_rejected_without_retry() {
    let server = MockServer::start().await;

    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = client_for(&server, 3).deliver(&sample_event()).await;
    assert_eq!(
        outcome,
        DeliveryOutcome::Rejected {
            status: 400,
            attempts: 1
        }
    );
}

#[tokio::test]
async fn rejection_after_retry_reports_every_attempt() {
    let server = MockServer::start().await;

    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = client_for(&server, 3).deliver(&sample_event()).await;

    assert_eq!(
        outcome,
        DeliveryOutcome::Rejected {
            status: 400,
            attempts: 2
        }
    );
    assert_eq!(outcome.attempts(), 2);
}

#[tokio::test]
async fn succeeds_on_second_attempt_and_stops() {
    let server = MockServer::start().await;

    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = client_for(&server, 3).deliver(&sample_event()).await;

    assert_eq!(
        outcome,
        DeliveryOutcome::Delivered {
            status: 200,
            attempts: 2
        }
    );
}

#[tokio::test]
async fn timeouts_exhaust_retries_then_fail() {
    let server = MockServer::start().await;

    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .expect(3)
        .mount(&server)
        .await;

    let outcome = client_for(&server, 3).deliver(&sample_event()).await;

    assert_eq!(
        outcome,
        DeliveryOutcome::Failed {
            attempts: 3,
            error: DeliveryError::Timeout(200),
        }
    );
}

#[tokio::test]
async fn server_errors_exhaust_retries_then_fail() {
    let server = MockServer::start().await;

    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let outcome = client_for(&server, 2).deliver(&sample_event()).await;

    assert_eq!(
        outcome,
        DeliveryOutcome::Failed {
            attempts: 2,
            error: DeliveryError::ServerError(500),
        }
    );
}

#[tokio::test]
async fn rate_limit_is_retried() {
    let server = MockServer::start().await;

    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = client_for(&server, 3).deliver(&sample_event()).await;
    assert_eq!(outcome.attempts(), 2);
    assert!(outcome.is_delivered());
}

#[tokio::test]
async fn single_attempt_policy_does_not_retry() {
    let server = MockServer::start().await;

    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = client_for(&server, 1).deliver(&sample_event()).await;
    assert_eq!(outcome.attempts(), 1);
    assert!(matches!(outcome, DeliveryOutcome::Failed { .. }));
}
