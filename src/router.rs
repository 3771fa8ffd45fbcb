use std::sync::Arc;

use axum::http::{HeaderName, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Settings;
use crate::handlers;
use crate::metrics;
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.settings);
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(metrics::metrics_text))
        .route("/api/v1/webhooks/ingest", post(handlers::ingest_webhook))
        .route(
            "/api/v1/webhooks/downstream/receive",
            post(handlers::downstream_webhook_receive),
        )
        .route(
            "/api/v1/webhooks/search",
            get(handlers::search_webhook_events),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(settings: &Settings) -> CorsLayer {
    let origins = settings.allowed_origins_list();
    let headers = settings.allowed_headers_list();
    let methods = settings.allowed_methods_list();

    let explicit_origins = origins != ["*"];
    let explicit_headers = headers != ["*"];
    let explicit_methods = methods != ["*"];

    let mut layer = CorsLayer::new();

    layer = if explicit_origins {
        layer.allow_origin(AllowOrigin::list(
            origins.iter().filter_map(|o| o.parse().ok()),
        ))
    } else {
        layer.allow_origin(Any)
    };

    layer = if explicit_headers {
        layer.allow_headers(
            headers
                .iter()
                .filter_map(|h| h.parse::<HeaderName>().ok())
                .collect::<Vec<_>>(),
        )
    } else {
        layer.allow_headers(Any)
    };

    layer = if explicit_methods {
        layer.allow_methods(
            methods
                .iter()
                .filter_map(|m| Method::from_bytes(m.as_bytes()).ok())
                .collect::<Vec<_>>(),
        )
    } else {
        layer.allow_methods(Any)
    };

    // tower-http rejects credentials combined with any wildcard.
    if explicit_origins && explicit_headers && explicit_methods {
        layer = layer.allow_credentials(true);
    }

    layer
}
