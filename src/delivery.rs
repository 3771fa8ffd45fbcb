use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Result;
use crate::metrics;
use crate::models::{DeliveryLog, WebhookEvent, WebhookStatus};
use crate::state::AppState;

/// Terminal attempt cap: an event never sees a sixth delivery attempt.
pub const MAX_RETRY_ATTEMPTS: i32 = 5;
/// Retry delays in seconds, indexed by attempt number minus one.
pub const EXPONENTIAL_BACKOFF: [i64; 5] = [1, 2, 4, 8, 16];
/// Hard total timeout for one outbound POST.
pub const DELIVERY_TIMEOUT_SECS: u64 = 3;

/// How long the dispatcher blocks on the ready queue before re-checking
/// for shutdown.
const POP_TIMEOUT_SECS: u64 = 1;

/// Classification of one finished delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub status: WebhookStatus,
    pub retry_delay_secs: Option<i64>,
}

/// Map an attempt's HTTP status (real or synthetic) to the event's next
/// state.
///
/// `attempt_count` is the number of the attempt that just finished
/// (previous count plus one). `retry_after` is the parsed `Retry-After`
/// header, honored only for 429 responses; everything else falls back to
/// the exponential schedule. Timeouts arrive here as 504 and transport
/// errors as 500, so both retry. Any other 4xx is permanent, as is any
/// failure once the attempt cap is reached.
pub fn classify_outcome(
    attempt_count: i32,
    status_code: u16,
    retry_after: Option<i64>,
) -> DeliveryOutcome {
    if (200..300).contains(&status_code) {
        return DeliveryOutcome {
            status: WebhookStatus::Delivered,
            retry_delay_secs: None,
        };
    }

    if attempt_count >= MAX_RETRY_ATTEMPTS {
        return DeliveryOutcome {
            status: WebhookStatus::FailedPermanently,
            retry_delay_secs: None,
        };
    }

    if status_code == 429 || (500..600).contains(&status_code) {
        let backoff_index = attempt_count.saturating_sub(1) as usize;
        let delay = if status_code == 429 { retry_after } else { None }
            .filter(|secs| *secs >= 0)
            .unwrap_or_else(|| {
                EXPONENTIAL_BACKOFF
                    .get(backoff_index)
                    .copied()
                    .unwrap_or(EXPONENTIAL_BACKOFF[EXPONENTIAL_BACKOFF.len() - 1])
            });
        DeliveryOutcome {
            status: WebhookStatus::FailedTemporarily,
            retry_delay_secs: Some(delay),
        }
    } else {
        DeliveryOutcome {
            status: WebhookStatus::FailedPermanently,
            retry_delay_secs: None,
        }
    }
}

/// POST the payload downstream and reduce the result to a status code plus
/// the optional parsed `Retry-After` value. Timeouts become a synthetic
/// 504, any other transport failure a synthetic 500.
pub async fn attempt_delivery(
    client: &reqwest::Client,
    url: &str,
    payload: &serde_json::Value,
) -> (u16, Option<i64>) {
    match client.post(url).json(payload).send().await {
        Ok(response) => {
            let status_code = response.status().as_u16();
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<i64>().ok())
                .filter(|secs| *secs >= 0);
            (status_code, retry_after)
        }
        Err(e) if e.is_timeout() => (504, None),
        Err(e) => {
            tracing::warn!(error = %e, "downstream request failed at transport level");
            (500, None)
        }
    }
}

/// Process one claimed event: attempt delivery, classify, persist the
/// outcome in a single update, and schedule the retry when temporary.
pub async fn process_webhook_event(state: &AppState, event: &WebhookEvent) -> Result<()> {
    let attempt_count = event.attempt_count + 1;
    let now = Utc::now();

    tracing::info!(event_id = %event.id, attempt = attempt_count, "starting delivery attempt");

    let (status_code, retry_after) =
        attempt_delivery(&state.http, &state.downstream_url, &event.data).await;

    tracing::info!(event_id = %event.id, status_code, "downstream responded");

    let outcome = classify_outcome(attempt_count, status_code, retry_after);
    let next_retry_at = outcome
        .retry_delay_secs
        .map(|secs| now + ChronoDuration::seconds(secs));

    let log_entry = DeliveryLog {
        timestamp: now,
        attempt_number: attempt_count,
        status_code,
        success: outcome.status == WebhookStatus::Delivered,
    };

    state
        .store
        .mark_delivery(
            event.id,
            outcome.status,
            next_retry_at,
            attempt_count,
            &log_entry,
        )
        .await?;

    if outcome.status == WebhookStatus::FailedTemporarily {
        if let Some(due) = next_retry_at {
            state.queue.schedule_retry(event.id, due.timestamp()).await?;
        }
    }

    metrics::observe_delivery(outcome.status);
    tracing::info!(
        event_id = %event.id,
        attempt = attempt_count,
        status = outcome.status.as_str(),
        "delivery attempt processed"
    );
    Ok(())
}

/// Main delivery loop: drain the ready queue, claim, and fan out to a
/// semaphore-bounded worker pool until shutdown.
///
/// On shutdown the dispatcher stops consuming, outstanding workers are
/// cancelled and awaited with their errors suppressed. Events cancelled
/// mid-request stay locked until their lease expires and are then
/// reclaimable, which keeps the at-least-once contract.
pub async fn run_delivery_loop(state: Arc<AppState>, shutdown: CancellationToken) {
    let semaphore = Arc::new(Semaphore::new(state.settings.concurrent_workers));
    let mut tasks: JoinSet<()> = JoinSet::new();

    tracing::info!(
        workers = state.settings.concurrent_workers,
        "delivery loop started"
    );

    loop {
        // Reap finished workers so the join set does not grow unbounded.
        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                if !e.is_cancelled() {
                    tracing::error!(error = %e, "delivery worker panicked");
                }
            }
        }

        let popped = tokio::select! {
            _ = shutdown.cancelled() => break,
            popped = state.queue.pop_ready(POP_TIMEOUT_SECS) => popped,
        };

        let raw_id = match popped {
            Ok(Some(raw_id)) => raw_id,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "ready queue pop failed");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                continue;
            }
        };

        let event_id = match raw_id.parse::<Uuid>() {
            Ok(event_id) => event_id,
            Err(_) => {
                tracing::warn!(value = %raw_id, "discarding malformed queue entry");
                continue;
            }
        };

        // Another worker owns the event, or it is not yet due.
        let event = match state.store.claim(event_id, Utc::now()).await {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                tracing::error!(event_id = %event_id, error = %e, "claim failed");
                continue;
            }
        };

        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        let worker_state = state.clone();
        tasks.spawn(async move {
            let _permit = permit;
            if let Err(e) = process_webhook_event(&worker_state, &event).await {
                // Worker errors never surface to a caller. The event stays
                // locked until the lease expires, then re-enters via a
                // claim.
                tracing::error!(event_id = %event.id, error = %e, "delivery worker error");
            }
        });
    }

    tracing::info!(in_flight = tasks.len(), "delivery loop draining workers");
    tasks.abort_all();
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            if !e.is_cancelled() {
                tracing::error!(error = %e, "delivery worker failed during shutdown");
            }
        }
    }
    tracing::info!("delivery loop shutdown complete");
}
