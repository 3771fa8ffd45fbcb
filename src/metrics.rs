use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::models::WebhookStatus;

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static INGESTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "webhook_ingested_total",
        "Webhook events persisted by the ingestor",
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static DELIVERY_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "webhook_delivery_attempts_total",
            "Finished delivery attempts by resulting status",
        ),
        &["status"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static RATE_LIMITED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "webhook_rate_limited_total",
        "Downstream receive calls rejected by the token bucket",
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static RETRIES_MIGRATED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "webhook_retries_migrated_total",
        "Due entries moved from the retry set back to the ready queue",
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub fn inc_ingested() {
    INGESTED_TOTAL.inc();
}

pub fn observe_delivery(status: WebhookStatus) {
    DELIVERY_TOTAL.with_label_values(&[status.as_str()]).inc();
}

pub fn inc_rate_limited() {
    RATE_LIMITED_TOTAL.inc();
}

pub fn inc_retries_migrated() {
    RETRIES_MIGRATED_TOTAL.inc();
}

/// Prometheus text exposition for the `/metrics` route.
pub async fn metrics_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
