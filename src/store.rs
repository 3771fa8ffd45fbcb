use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::models::{
    AggregateBucket, DeliveryLog, EventAggregates, EventFilter, WebhookEvent, WebhookStatus,
};

/// Lease duration granted by a successful claim. Must exceed the maximum
/// realistic attempt latency (delivery timeout plus the store write).
pub const TASK_LOCKED_SECONDS: i64 = 30;

const SELECT_COLUMNS: &str = "id, idempotency_key, data, event_type, status, received_at, \
     attempt_count, next_retry_at, locked_until, delivery_logs";

/// Connectivity failures surface as 503, everything else (constraint,
/// decode, row shape) stays a 500. Counterpart of the broker-side
/// `classify_redis_error`.
fn classify_sqlx_error(e: sqlx::Error) -> PipelineError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => {
            PipelineError::service_unavailable("Event store unreachable")
        }
        other => PipelineError::Database(other),
    }
}

/// Durable event store. Owns the canonical state of every webhook event;
/// the broker holds only id references.
#[derive(Clone)]
pub struct EventStore {
    pool: PgPool,
}

impl EventStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(std::time::Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(classify_sqlx_error)?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Idempotent DDL run at startup: the events table, the unique
    /// idempotency index, and the compound index backing claim scans.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS webhook_events (
                id UUID PRIMARY KEY,
                idempotency_key TEXT NOT NULL,
                data JSONB NOT NULL,
                event_type TEXT,
                status TEXT NOT NULL,
                received_at TIMESTAMPTZ NOT NULL,
                attempt_count INT NOT NULL DEFAULT 0,
                next_retry_at TIMESTAMPTZ,
                locked_until TIMESTAMPTZ,
                delivery_logs JSONB NOT NULL DEFAULT '[]'::jsonb
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx_error)?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_webhook_events_idempotency_key
             ON webhook_events (idempotency_key)",
        )
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx_error)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_webhook_events_claim
             ON webhook_events (status, next_retry_at, locked_until, received_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx_error)?;

        Ok(())
    }

    /// Insert a fresh event. Returns `None` when another event already holds
    /// the idempotency key; the caller resolves the duplicate branch.
    pub async fn insert_event(&self, event: &WebhookEvent) -> Result<Option<WebhookEvent>> {
        let inserted = sqlx::query_as::<_, WebhookEvent>(&format!(
            "INSERT INTO webhook_events
                 (id, idempotency_key, data, event_type, status, received_at,
                  attempt_count, next_retry_at, locked_until, delivery_logs)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NULL, '[]'::jsonb)
             ON CONFLICT (idempotency_key) DO NOTHING
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(event.id)
        .bind(&event.idempotency_key)
        .bind(&event.data)
        .bind(&event.event_type)
        .bind(event.status)
        .bind(event.received_at)
        .bind(event.attempt_count)
        .bind(event.next_retry_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify_sqlx_error)?;
        Ok(inserted)
    }

    pub async fn find_by_idempotency_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<WebhookEvent>> {
        let event = sqlx::query_as::<_, WebhookEvent>(&format!(
            "SELECT {SELECT_COLUMNS} FROM webhook_events WHERE idempotency_key = $1"
        ))
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify_sqlx_error)?;
        Ok(event)
    }

    /// Atomically lease an eligible event for processing.
    ///
    /// The compare-and-set condition is the sole enforcement of
    /// at-most-one-in-flight: the update only matches an unlocked (or
    /// lease-expired) event that is due and not terminal, and it returns
    /// the post-update row.
    pub async fn claim(&self, event_id: Uuid, now: DateTime<Utc>) -> Result<Option<WebhookEvent>> {
        let locked_until = now + Duration::seconds(TASK_LOCKED_SECONDS);
        let claimed = sqlx::query_as::<_, WebhookEvent>(&format!(
            "UPDATE webhook_events
             SET locked_until = $2
             WHERE id = $1
               AND status IN ('received', 'failed_temporarily')
               AND next_retry_at <= $3
               AND (locked_until IS NULL OR locked_until <= $3)
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(event_id)
        .bind(locked_until)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify_sqlx_error)?;
        Ok(claimed)
    }

    /// Persist the outcome of a delivery attempt in one update: new status,
    /// released lease, next retry time, bumped attempt count, and the
    /// appended delivery log.
    pub async fn mark_delivery(
        &self,
        event_id: Uuid,
        status: WebhookStatus,
        next_retry_at: Option<DateTime<Utc>>,
        attempt_count: i32,
        log_entry: &DeliveryLog,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE webhook_events
             SET status = $2,
                 locked_until = NULL,
                 next_retry_at = $3,
                 attempt_count = $4,
                 delivery_logs = delivery_logs || $5
             WHERE id = $1",
        )
        .bind(event_id)
        .bind(status)
        .bind(next_retry_at)
        .bind(attempt_count)
        .bind(serde_json::to_value(log_entry)?)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx_error)?;
        Ok(())
    }

    /// Ids of events eligible for a delivery attempt right now. Used by the
    /// retry scheduler's scan fallback to self-heal from lost broker
    /// references; duplicates are harmless because claims filter them.
    pub async fn find_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM webhook_events
             WHERE status IN ('received', 'failed_temporarily')
               AND next_retry_at <= $1
               AND (locked_until IS NULL OR locked_until <= $1)
             ORDER BY received_at ASC
             LIMIT $2",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(classify_sqlx_error)?;
        Ok(ids)
    }

    pub async fn search(
        &self,
        filter: &EventFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WebhookEvent>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {SELECT_COLUMNS} FROM webhook_events WHERE 1=1"
        ));
        push_filter_clauses(&mut qb, filter);
        qb.push(" ORDER BY received_at DESC LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        let events = qb
            .build_query_as::<WebhookEvent>()
            .fetch_all(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;
        Ok(events)
    }

    pub async fn count(&self, filter: &EventFilter) -> Result<i64> {
        let mut qb =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM webhook_events WHERE 1=1");
        push_filter_clauses(&mut qb, filter);
        let total = qb
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;
        Ok(total)
    }

    /// Aggregates over the filtered set: counts by status and event type,
    /// and an hourly histogram of `received_at` in ascending time order.
    pub async fn aggregates(&self, filter: &EventFilter) -> Result<EventAggregates> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT status, COUNT(*) FROM webhook_events WHERE 1=1",
        );
        push_filter_clauses(&mut qb, filter);
        qb.push(" GROUP BY status");
        let by_status: Vec<(String, i64)> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;

        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT event_type, COUNT(*) FROM webhook_events WHERE 1=1",
        );
        push_filter_clauses(&mut qb, filter);
        qb.push(" GROUP BY event_type");
        let by_event_type: Vec<(Option<String>, i64)> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;

        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT date_trunc('hour', received_at) AS bucket, COUNT(*) \
             FROM webhook_events WHERE 1=1",
        );
        push_filter_clauses(&mut qb, filter);
        qb.push(" GROUP BY bucket ORDER BY bucket ASC");
        let histogram: Vec<(DateTime<Utc>, i64)> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;

        Ok(EventAggregates {
            count_by_status: by_status
                .into_iter()
                .map(|(status, count)| AggregateBucket {
                    id: json!(status),
                    count,
                })
                .collect(),
            count_by_event_type: by_event_type
                .into_iter()
                .map(|(event_type, count)| AggregateBucket {
                    id: json!(event_type),
                    count,
                })
                .collect(),
            hourly_histogram: histogram
                .into_iter()
                .map(|(bucket, count)| AggregateBucket {
                    id: json!(bucket.to_rfc3339()),
                    count,
                })
                .collect(),
        })
    }
}

fn push_filter_clauses(qb: &mut QueryBuilder<'_, Postgres>, filter: &EventFilter) {
    if let Some(status) = filter.status {
        qb.push(" AND status = ");
        qb.push_bind(status);
    }
    if let Some(event_type) = &filter.event_type {
        qb.push(" AND event_type = ");
        qb.push_bind(event_type.clone());
    }
    if let Some(from) = filter.timestamp_from {
        qb.push(" AND received_at >= ");
        qb.push_bind(from);
    }
    if let Some(to) = filter.timestamp_to {
        qb.push(" AND received_at <= ");
        qb.push_bind(to);
    }
}
