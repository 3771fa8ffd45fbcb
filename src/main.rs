//! Webhook pipeline entry point: runs the HTTP API, the delivery worker
//! pool, and the retry scheduler in a single process.

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use webhook_pipeline::config::Settings;
use webhook_pipeline::{delivery, router, scheduler, state::AppState};

/// Webhook ingest and delivery pipeline
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level when RUST_LOG is not set (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Bind address override, e.g. 0.0.0.0:8000
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .init();

    let mut settings = Settings::from_env()?;
    if let Some(bind) = cli.bind {
        settings.bind_addr = bind;
    }

    info!(
        app = %settings.app_name,
        version = %settings.app_version,
        "application startup initiated"
    );

    let state = AppState::initialize(settings.clone()).await?;

    let shutdown = CancellationToken::new();
    let delivery_task = tokio::spawn(delivery::run_delivery_loop(
        state.clone(),
        shutdown.clone(),
    ));
    let scheduler_task = tokio::spawn(scheduler::run_retry_scheduler(
        state.clone(),
        shutdown.clone(),
    ));

    let app = router::create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    info!(addr = %settings.bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The HTTP surface is down; stop consuming and drain in-flight work.
    info!("shutdown signal received, draining workers");
    shutdown.cancel();
    if let Err(e) = delivery_task.await {
        error!(error = %e, "delivery loop join failed");
    }
    if let Err(e) = scheduler_task.await {
        error!(error = %e, "retry scheduler join failed");
    }

    info!("application shutdown completed");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install ctrl-c handler");
    }
}
