use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;

use crate::config::Settings;
use crate::delivery::DELIVERY_TIMEOUT_SECS;
use crate::error::{PipelineError, Result};
use crate::queue::BrokerQueue;
use crate::rate_limit::{TokenBucketRateLimiter, DOWNSTREAM_BURST, DOWNSTREAM_RATE};
use crate::store::EventStore;

/// Shared resources, configured once at startup and injected everywhere:
/// handlers, the worker pool, and the retry scheduler all borrow from here.
pub struct AppState {
    pub store: EventStore,
    pub queue: BrokerQueue,
    pub limiter: TokenBucketRateLimiter,
    pub http: reqwest::Client,
    pub settings: Settings,
    pub downstream_url: String,
}

impl AppState {
    pub async fn initialize(settings: Settings) -> Result<Arc<Self>> {
        let store = EventStore::connect(&settings.database_url).await?;
        store.init_schema().await?;
        tracing::info!("event store connected, schema ensured");

        let redis_client = redis::Client::open(settings.redis_url())?;
        let redis_conn = ConnectionManager::new(redis_client).await?;
        tracing::info!(url = %settings.redis_url(), "broker connected");

        let queue = BrokerQueue::from_manager(redis_conn.clone());
        let limiter =
            TokenBucketRateLimiter::new(redis_conn, DOWNSTREAM_RATE, DOWNSTREAM_BURST);

        // Singleton outbound client: one connection pool shared by every
        // delivery worker, with the hard per-request timeout baked in.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DELIVERY_TIMEOUT_SECS))
            .build()
            .map_err(|e| PipelineError::internal(format!("failed to build HTTP client: {e}")))?;

        let downstream_url = settings.downstream_url();
        Ok(Arc::new(Self {
            store,
            queue,
            limiter,
            http,
            settings,
            downstream_url,
        }))
    }
}
