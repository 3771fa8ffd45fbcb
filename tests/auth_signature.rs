//! Signature acceptance and rejection coverage for the HMAC authenticator.

use axum::http::{HeaderMap, HeaderValue};
use chrono::Utc;

use webhook_pipeline::auth::{
    sign_payload, verify_webhook_signature, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};
use webhook_pipeline::config::Settings;

fn settings() -> Settings {
    Settings {
        debug: true,
        app_name: "webhook-pipeline".into(),
        app_description: "test".into(),
        app_version: "0.0.0".into(),
        allowed_origins: "*".into(),
        allowed_headers: "*".into(),
        allowed_methods: "*".into(),
        database_url: "postgres://localhost/webhooks_test".into(),
        secret_key: "super-secret-signing-key".into(),
        timestamp_tolerance_seconds: 300,
        redis_host: "127.0.0.1".into(),
        redis_port: 6379,
        be_base_url: "http://localhost:8000".into(),
        bind_addr: "127.0.0.1:0".into(),
        concurrent_workers: 2,
        page_size: 10,
        default_page: 1,
    }
}

fn headers_for(timestamp: &str, signature: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(TIMESTAMP_HEADER, HeaderValue::from_str(timestamp).unwrap());
    headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(signature).unwrap());
    headers
}

#[test]
fn signed_request_within_tolerance_is_accepted() {
    let settings = settings();
    let body = br#"{"order_id":1}"#;
    let timestamp = Utc::now().to_rfc3339();
    let signature = sign_payload(&settings.secret_key, &timestamp, body);
    let headers = headers_for(&timestamp, &signature);

    assert!(verify_webhook_signature(&settings, &headers, body).is_ok());
}

#[test]
fn every_single_bit_flip_of_the_signature_is_rejected() {
    let settings = settings();
    let body = br#"{"order_id":1}"#;
    let timestamp = Utc::now().to_rfc3339();
    let signature = sign_payload(&settings.secret_key, &timestamp, body);

    // Flip each hex nibble to a different valid hex digit.
    for (i, c) in signature.char_indices() {
        let replacement = if c == '0' { '1' } else { '0' };
        let mut mutated: Vec<char> = signature.chars().collect();
        mutated[i] = replacement;
        let mutated: String = mutated.into_iter().collect();

        let headers = headers_for(&timestamp, &mutated);
        let err = verify_webhook_signature(&settings, &headers, body).unwrap_err();
        assert_eq!(err.kind(), "unauthorized-request");
    }
}

#[test]
fn mutated_body_is_rejected() {
    let settings = settings();
    let timestamp = Utc::now().to_rfc3339();
    let signature = sign_payload(&settings.secret_key, &timestamp, br#"{"order_id":1}"#);
    let headers = headers_for(&timestamp, &signature);

    let err =
        verify_webhook_signature(&settings, &headers, br#"{"order_id":1} "#).unwrap_err();
    assert_eq!(err.kind(), "unauthorized-request");
}

#[test]
fn mutated_timestamp_is_rejected() {
    let settings = settings();
    let body = br#"{"order_id":1}"#;
    let timestamp = Utc::now().to_rfc3339();
    let signature = sign_payload(&settings.secret_key, &timestamp, body);

    // Signature was computed over a different timestamp than the header.
    let other = (Utc::now() + chrono::Duration::seconds(1)).to_rfc3339();
    let headers = headers_for(&other, &signature);

    let err = verify_webhook_signature(&settings, &headers, body).unwrap_err();
    assert_eq!(err.kind(), "unauthorized-request");
}

#[test]
fn timestamp_outside_tolerance_is_a_bad_request() {
    let settings = settings();
    let body = br#"{"order_id":1}"#;

    for offset in [-600i64, 600] {
        let timestamp = (Utc::now() + chrono::Duration::seconds(offset)).to_rfc3339();
        let signature = sign_payload(&settings.secret_key, &timestamp, body);
        let headers = headers_for(&timestamp, &signature);

        let err = verify_webhook_signature(&settings, &headers, body).unwrap_err();
        assert_eq!(err.kind(), "bad-request");
    }
}

#[test]
fn timestamp_without_timezone_is_a_bad_request() {
    let settings = settings();
    let body = br#"{"order_id":1}"#;
    let timestamp = "2026-08-01T10:00:00";
    let signature = sign_payload(&settings.secret_key, timestamp, body);
    let headers = headers_for(timestamp, &signature);

    let err = verify_webhook_signature(&settings, &headers, body).unwrap_err();
    assert_eq!(err.kind(), "bad-request");
}
