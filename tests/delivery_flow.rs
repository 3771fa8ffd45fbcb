//! Delivery attempt flow against a scripted local downstream endpoint.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use tokio::sync::Mutex;

use webhook_pipeline::delivery::{
    attempt_delivery, classify_outcome, EXPONENTIAL_BACKOFF, MAX_RETRY_ATTEMPTS,
};
use webhook_pipeline::models::WebhookStatus;

struct MockResponse {
    status: u16,
    retry_after: Option<String>,
    delay_ms: u64,
}

impl MockResponse {
    fn status(status: u16) -> Self {
        Self {
            status,
            retry_after: None,
            delay_ms: 0,
        }
    }
}

#[derive(Clone)]
struct Script(Arc<Mutex<VecDeque<MockResponse>>>);

async fn respond(State(script): State<Script>) -> (StatusCode, HeaderMap) {
    let next = script
        .0
        .lock()
        .await
        .pop_front()
        .unwrap_or(MockResponse::status(200));
    if next.delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(next.delay_ms)).await;
    }
    let mut headers = HeaderMap::new();
    if let Some(retry_after) = next.retry_after {
        headers.insert("Retry-After", retry_after.parse().unwrap());
    }
    (StatusCode::from_u16(next.status).unwrap(), headers)
}

async fn spawn_downstream(responses: Vec<MockResponse>) -> String {
    let script = Script(Arc::new(Mutex::new(responses.into())));
    let app = Router::new().route("/", post(respond)).with_state(script);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/")
}

fn short_timeout_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_millis(300))
        .build()
        .unwrap()
}

#[tokio::test]
async fn happy_path_delivers_on_first_attempt() {
    let url = spawn_downstream(vec![MockResponse::status(200)]).await;
    let client = short_timeout_client();

    let (code, retry_after) =
        attempt_delivery(&client, &url, &serde_json::json!({"order_id": 1})).await;
    assert_eq!(code, 200);
    assert_eq!(retry_after, None);

    let outcome = classify_outcome(1, code, retry_after);
    assert_eq!(outcome.status, WebhookStatus::Delivered);
    assert_eq!(outcome.retry_delay_secs, None);
}

#[tokio::test]
async fn transient_500_then_success() {
    let url = spawn_downstream(vec![MockResponse::status(500), MockResponse::status(200)]).await;
    let client = short_timeout_client();
    let payload = serde_json::json!({"order_id": 2});

    let (code, retry_after) = attempt_delivery(&client, &url, &payload).await;
    let first = classify_outcome(1, code, retry_after);
    assert_eq!(first.status, WebhookStatus::FailedTemporarily);
    assert_eq!(first.retry_delay_secs, Some(1));

    let (code, retry_after) = attempt_delivery(&client, &url, &payload).await;
    let second = classify_outcome(2, code, retry_after);
    assert_eq!(second.status, WebhookStatus::Delivered);
}

#[tokio::test]
async fn retry_after_header_is_honored() {
    let url = spawn_downstream(vec![MockResponse {
        status: 429,
        retry_after: Some("7".into()),
        delay_ms: 0,
    }])
    .await;
    let client = short_timeout_client();

    let (code, retry_after) =
        attempt_delivery(&client, &url, &serde_json::json!({"order_id": 3})).await;
    assert_eq!(code, 429);
    assert_eq!(retry_after, Some(7));

    let outcome = classify_outcome(1, code, retry_after);
    assert_eq!(outcome.status, WebhookStatus::FailedTemporarily);
    assert_eq!(outcome.retry_delay_secs, Some(7));
}

#[tokio::test]
async fn unparseable_retry_after_falls_back_to_schedule() {
    let url = spawn_downstream(vec![MockResponse {
        status: 429,
        retry_after: Some("soon".into()),
        delay_ms: 0,
    }])
    .await;
    let client = short_timeout_client();

    let (code, retry_after) =
        attempt_delivery(&client, &url, &serde_json::json!({"order_id": 4})).await;
    assert_eq!(code, 429);
    assert_eq!(retry_after, None);

    let outcome = classify_outcome(1, code, retry_after);
    assert_eq!(outcome.retry_delay_secs, Some(EXPONENTIAL_BACKOFF[0]));
}

#[tokio::test]
async fn permanent_4xx_fails_on_first_attempt() {
    let url = spawn_downstream(vec![MockResponse::status(400)]).await;
    let client = short_timeout_client();

    let (code, retry_after) =
        attempt_delivery(&client, &url, &serde_json::json!({"order_id": 5})).await;
    let outcome = classify_outcome(1, code, retry_after);
    assert_eq!(outcome.status, WebhookStatus::FailedPermanently);
    assert_eq!(outcome.retry_delay_secs, None);
}

#[tokio::test]
async fn exhausted_retries_end_permanently_after_five_attempts() {
    let url =
        spawn_downstream((0..5).map(|_| MockResponse::status(503)).collect()).await;
    let client = short_timeout_client();
    let payload = serde_json::json!({"order_id": 6});

    let mut delays = Vec::new();
    let mut final_status = None;
    for attempt in 1..=MAX_RETRY_ATTEMPTS {
        let (code, retry_after) = attempt_delivery(&client, &url, &payload).await;
        assert_eq!(code, 503);
        let outcome = classify_outcome(attempt, code, retry_after);
        if let Some(delay) = outcome.retry_delay_secs {
            delays.push(delay);
        }
        final_status = Some(outcome.status);
    }

    assert_eq!(delays, vec![1, 2, 4, 8]);
    assert_eq!(final_status, Some(WebhookStatus::FailedPermanently));
}

#[tokio::test]
async fn slow_downstream_becomes_synthetic_504() {
    let url = spawn_downstream(vec![MockResponse {
        status: 200,
        retry_after: None,
        delay_ms: 800,
    }])
    .await;
    let client = short_timeout_client();

    let (code, retry_after) =
        attempt_delivery(&client, &url, &serde_json::json!({"order_id": 7})).await;
    assert_eq!(code, 504);

    let outcome = classify_outcome(1, code, retry_after);
    assert_eq!(outcome.status, WebhookStatus::FailedTemporarily);
}

#[tokio::test]
async fn unreachable_downstream_becomes_synthetic_500() {
    // Bind then drop a listener so the port is closed when we connect.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = short_timeout_client();
    let (code, _) = attempt_delivery(
        &client,
        &format!("http://{addr}/"),
        &serde_json::json!({"order_id": 8}),
    )
    .await;
    assert!(code == 500 || code == 504);

    let outcome = classify_outcome(1, code, None);
    assert_eq!(outcome.status, WebhookStatus::FailedTemporarily);
}
