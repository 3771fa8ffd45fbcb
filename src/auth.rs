use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use ring::hmac;

use crate::config::Settings;
use crate::error::{PipelineError, Result};

pub const SIGNATURE_HEADER: &str = "x-signature";
pub const TIMESTAMP_HEADER: &str = "x-timestamp";

/// Verify webhook authenticity by validating the timestamp window and the
/// HMAC-SHA256 signature over `timestamp || '.' || body`.
///
/// Binding the timestamp into the signed region is what bounds replay to
/// the tolerance window.
pub fn verify_webhook_signature(
    settings: &Settings,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<()> {
    let timestamp = header_value(headers, TIMESTAMP_HEADER)
        .ok_or_else(|| PipelineError::bad_request("Missing X-Timestamp header"))?;
    let signature = header_value(headers, SIGNATURE_HEADER)
        .ok_or_else(|| PipelineError::bad_request("Missing X-Signature header"))?;

    // RFC 3339 parsing requires an explicit offset, so naive timestamps are
    // rejected here as well as malformed ones.
    let request_time: DateTime<Utc> = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|_| {
            PipelineError::bad_request("Invalid timestamp format! Must be ISO 8601 with timezone.")
        })?
        .with_timezone(&Utc);

    let skew = (Utc::now() - request_time).num_seconds().abs();
    if skew > settings.timestamp_tolerance_seconds {
        return Err(PipelineError::bad_request("Timestamp too old in request."));
    }

    let key = hmac::Key::new(hmac::HMAC_SHA256, settings.secret_key.as_bytes());
    let provided = decode_hex(signature)
        .ok_or_else(|| PipelineError::unauthorized("Invalid HMAC signature"))?;

    // ring's verify is constant-time over the computed tag.
    hmac::verify(&key, &signed_message(timestamp, body), &provided)
        .map_err(|_| PipelineError::unauthorized("Invalid HMAC signature"))?;

    Ok(())
}

/// Compute the lowercase-hex signature for a payload; the counterpart of
/// [`verify_webhook_signature`], used by publishers and tests.
pub fn sign_payload(secret: &str, timestamp: &str, body: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    let tag = hmac::sign(&key, &signed_message(timestamp, body));
    encode_hex(tag.as_ref())
}

fn signed_message(timestamp: &str, body: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(timestamp.len() + 1 + body.len());
    message.extend_from_slice(timestamp.as_bytes());
    message.push(b'.');
    message.extend_from_slice(body);
    message
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if !s.is_ascii() || s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}
