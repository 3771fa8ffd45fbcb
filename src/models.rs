use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::types::Json;
use uuid::Uuid;

/// Lifecycle state of a webhook event.
///
/// `Delivered` and `FailedPermanently` are absorbing: once reached, no
/// further transition may change the status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Received,
    FailedTemporarily,
    FailedPermanently,
    Delivered,
}

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookStatus::Received => "received",
            WebhookStatus::FailedTemporarily => "failed_temporarily",
            WebhookStatus::FailedPermanently => "failed_permanently",
            WebhookStatus::Delivered => "delivered",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WebhookStatus::Delivered | WebhookStatus::FailedPermanently
        )
    }
}

impl std::str::FromStr for WebhookStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(WebhookStatus::Received),
            "failed_temporarily" => Ok(WebhookStatus::FailedTemporarily),
            "failed_permanently" => Ok(WebhookStatus::FailedPermanently),
            "delivered" => Ok(WebhookStatus::Delivered),
            other => Err(format!("unknown webhook status: {other}")),
        }
    }
}

// Stored as TEXT; hand-rolled bindings keep the column free of a custom
// Postgres enum type.
impl sqlx::Type<sqlx::Postgres> for WebhookStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <&str as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for WebhookStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> sqlx::encode::IsNull {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for WebhookStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        s.parse().map_err(Into::into)
    }
}

/// One delivery attempt, appended to the event's `delivery_logs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryLog {
    pub timestamp: DateTime<Utc>,
    pub attempt_number: i32,
    pub status_code: u16,
    pub success: bool,
}

/// The single persistent entity of the pipeline.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub idempotency_key: String,
    pub data: Value,
    pub event_type: Option<String>,
    pub status: WebhookStatus,
    pub received_at: DateTime<Utc>,
    pub attempt_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub locked_until: Option<DateTime<Utc>>,
    pub delivery_logs: Json<Vec<DeliveryLog>>,
}

impl WebhookEvent {
    /// Fresh event as produced by the ingestor: eligible for immediate
    /// delivery (`next_retry_at` equals `received_at`), unlocked, with no
    /// attempts recorded yet.
    pub fn new(
        idempotency_key: String,
        data: Value,
        event_type: Option<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            idempotency_key,
            data,
            event_type,
            status: WebhookStatus::Received,
            received_at,
            attempt_count: 0,
            next_retry_at: Some(received_at),
            locked_until: None,
            delivery_logs: Json(Vec::new()),
        }
    }
}

/// Search filters over stored events; all optional, combined with AND.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub status: Option<WebhookStatus>,
    pub event_type: Option<String>,
    pub timestamp_from: Option<DateTime<Utc>>,
    pub timestamp_to: Option<DateTime<Utc>>,
}

/// A single aggregate bucket: group key plus row count.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateBucket {
    pub id: Value,
    pub count: i64,
}

/// Aggregates computed over the filtered event set (not the current page).
#[derive(Debug, Clone, Serialize)]
pub struct EventAggregates {
    pub count_by_status: Vec<AggregateBucket>,
    pub count_by_event_type: Vec<AggregateBucket>,
    pub hourly_histogram: Vec<AggregateBucket>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub events: Vec<WebhookEvent>,
    pub aggregates: EventAggregates,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaginatedResults {
    pub total_count: i64,
    pub results: SearchResults,
}
