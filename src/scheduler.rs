use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::metrics;
use crate::state::AppState;

const SCHEDULER_TICK: Duration = Duration::from_secs(1);
/// Every this many ticks, fall back to a store scan that re-publishes any
/// due event the broker may have lost track of.
const SCAN_EVERY_TICKS: u32 = 30;
const SCAN_BATCH: i64 = 256;

/// Periodically migrate due entries from the delayed-retry set back onto
/// the ready queue, plus the store scan fallback.
pub async fn run_retry_scheduler(state: Arc<AppState>, shutdown: CancellationToken) {
    let mut ticks: u32 = 0;
    tracing::info!("retry scheduler started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(SCHEDULER_TICK) => {}
        }

        let now_unix = Utc::now().timestamp();
        match state.queue.due_retries(now_unix).await {
            Ok(due) => {
                for member in due {
                    let Ok(event_id) = member.parse::<Uuid>() else {
                        tracing::warn!(value = %member, "dropping malformed retry entry");
                        let _ = state.queue.remove_retry(&member).await;
                        continue;
                    };
                    // Push before removing: a duplicate push is tolerable
                    // since claims filter unready events, whereas the
                    // reverse order could lose the reference entirely.
                    if let Err(e) = state.queue.push_ready(event_id).await {
                        tracing::warn!(event_id = %event_id, error = %e, "failed to re-enqueue retry");
                        continue;
                    }
                    if let Err(e) = state.queue.remove_retry(&member).await {
                        tracing::warn!(event_id = %event_id, error = %e, "failed to clear retry entry");
                    }
                    metrics::inc_retries_migrated();
                    tracing::debug!(event_id = %event_id, "retry moved back to ready queue");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to read delayed-retry set");
            }
        }

        ticks = ticks.wrapping_add(1);
        if ticks % SCAN_EVERY_TICKS == 0 {
            match state.store.find_due(Utc::now(), SCAN_BATCH).await {
                Ok(ids) => {
                    for event_id in ids {
                        if let Err(e) = state.queue.push_ready(event_id).await {
                            tracing::warn!(event_id = %event_id, error = %e, "scan fallback enqueue failed");
                            break;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "scan fallback query failed");
                }
            }
        }
    }

    tracing::info!("retry scheduler shutdown complete");
}
