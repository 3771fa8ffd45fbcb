use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth;
use crate::error::{PipelineError, Result};
use crate::metrics;
use crate::models::{EventFilter, PaginatedResults, SearchResults, WebhookEvent, WebhookStatus};
use crate::rate_limit::DOWNSTREAM_BUCKET_KEY;
use crate::state::AppState;

const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

fn success_envelope(code: StatusCode, message: &str, data: Value) -> Json<Value> {
    Json(json!({
        "code": code.as_u16(),
        "message": message,
        "data": data,
    }))
}

/// POST /api/v1/webhooks/ingest
///
/// Authenticates the caller, persists the event exactly once per
/// idempotency key, and enqueues fresh events for delivery.
pub async fn ingest_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>)> {
    let idempotency_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PipelineError::bad_request("Missing Idempotency-Key header"))?
        .to_string();

    auth::verify_webhook_signature(&state.settings, &headers, &body)?;

    let payload: Value = serde_json::from_slice(&body)?;
    let event_type = payload
        .get("event_type")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let event = WebhookEvent::new(idempotency_key.clone(), payload, event_type, Utc::now());

    let stored = match state.store.insert_event(&event).await? {
        Some(inserted) => {
            metrics::inc_ingested();
            // Enqueue failure is a transient operational fault, not an
            // ingest failure: the scheduler's scan fallback re-publishes
            // eligible events.
            if let Err(e) = state.queue.push_ready(inserted.id).await {
                tracing::warn!(event_id = %inserted.id, error = %e, "failed to enqueue fresh event");
            }
            tracing::info!(event_id = %inserted.id, "webhook event ingested");
            inserted
        }
        None => {
            let existing = state
                .store
                .find_by_idempotency_key(&idempotency_key)
                .await?
                .ok_or_else(|| {
                    PipelineError::internal("idempotency conflict without a stored event")
                })?;
            if existing.data != event.data {
                return Err(PipelineError::bad_request(
                    "Idempotency key reused with different payload!",
                ));
            }
            tracing::info!(event_id = %existing.id, "duplicate ingest resolved to existing event");
            existing
        }
    };

    Ok((
        StatusCode::CREATED,
        success_envelope(
            StatusCode::CREATED,
            "Webhook ingested successfully!",
            json!({ "id": stored.id }),
        ),
    ))
}

/// POST /api/v1/webhooks/downstream/receive
///
/// The receiving end the delivery workers POST to, protected by the
/// broker-evaluated token bucket.
pub async fn downstream_webhook_receive(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>> {
    let allowed = state
        .limiter
        .is_request_allowed(DOWNSTREAM_BUCKET_KEY, 1)
        .await?;
    if !allowed {
        metrics::inc_rate_limited();
        return Err(PipelineError::rate_limited(
            "Too many requests! Please try again after some time.",
        ));
    }
    Ok(success_envelope(
        StatusCode::OK,
        "Webhook received successfully!",
        json!([]),
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub status: Option<WebhookStatus>,
    pub event_type: Option<String>,
    pub timestamp_from: Option<DateTime<Utc>>,
    pub timestamp_to: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl SearchParams {
    pub fn validate(&self) -> Result<()> {
        if self.page == Some(0) || self.page_size == Some(0) {
            return Err(PipelineError::bad_request(
                "page and page_size must be greater than zero",
            ));
        }
        if let (Some(from), Some(to)) = (self.timestamp_from, self.timestamp_to) {
            if from >= to {
                return Err(PipelineError::bad_request(
                    "Timestamp start should always be less than timestamp end!",
                ));
            }
        }
        Ok(())
    }
}

/// GET /api/v1/webhooks/search
///
/// Filtered, paginated reads with aggregates computed over the filtered
/// set rather than the current page.
pub async fn search_webhook_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Value>> {
    params.validate()?;

    let filter = EventFilter {
        status: params.status,
        event_type: params.event_type.clone(),
        timestamp_from: params.timestamp_from,
        timestamp_to: params.timestamp_to,
    };

    let page = i64::from(params.page.unwrap_or(state.settings.default_page));
    let page_size = i64::from(params.page_size.unwrap_or(state.settings.page_size));
    let offset = (page - 1) * page_size;

    let total_count = state.store.count(&filter).await?;
    let events = state.store.search(&filter, page_size, offset).await?;
    let aggregates = state.store.aggregates(&filter).await?;

    let data = PaginatedResults {
        total_count,
        results: SearchResults { events, aggregates },
    };

    Ok(success_envelope(
        StatusCode::OK,
        "Webhook events retrieved successfully!",
        serde_json::to_value(data)?,
    ))
}

/// GET /health
pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "OK" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverted_time_range_is_rejected() {
        let params = SearchParams {
            timestamp_from: Some(Utc::now()),
            timestamp_to: Some(Utc::now() - chrono::Duration::hours(1)),
            ..Default::default()
        };
        let err = params.validate().unwrap_err();
        assert_eq!(err.kind(), "bad-request");
    }

    #[test]
    fn equal_bounds_are_rejected() {
        let now = Utc::now();
        let params = SearchParams {
            timestamp_from: Some(now),
            timestamp_to: Some(now),
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn zero_page_is_rejected() {
        let params = SearchParams {
            page: Some(0),
            ..Default::default()
        };
        assert!(params.validate().is_err());

        let params = SearchParams {
            page_size: Some(0),
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn open_ranges_and_single_bounds_pass() {
        assert!(SearchParams::default().validate().is_ok());
        let params = SearchParams {
            timestamp_from: Some(Utc::now()),
            ..Default::default()
        };
        assert!(params.validate().is_ok());
    }

    #[test]
    fn status_param_parses_from_query_string() {
        let params: SearchParams =
            serde_urlencoded::from_str("status=failed_temporarily&page=2").unwrap();
        assert_eq!(params.status, Some(WebhookStatus::FailedTemporarily));
        assert_eq!(params.page, Some(2));
    }
}
