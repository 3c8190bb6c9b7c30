use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use gleaner_client::{ScraperExtractor, StrategyFetcher};
use gleaner_core::{EngineConfig, Orchestrator, ScrapePipeline, TracingReporter};
use gleaner_db::{Database, DatabaseConfig};
use gleaner_server::routes;
use gleaner_server::state::AppState;

/// Upper bound on request bodies (export payloads can be large).
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("gleaner=info".parse()?))
        .with_target(false)
        .init();

    let api_key = std::env::var("GLEANER_SERVER_API_KEY")
        .ok()
        .filter(|key| !key.is_empty());
    if api_key.is_none() {
        tracing::warn!("GLEANER_SERVER_API_KEY is not set; /v1 endpoints will refuse requests");
    }
    let port = std::env::var("GLEANER_SERVER_PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{port}");

    let config = EngineConfig::from_env()?;
    let db = Database::connect(&DatabaseConfig::from_env()?)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;

    let fetcher = StrategyFetcher::from_config(&config);
    let pipeline = ScrapePipeline::new(fetcher.clone(), ScraperExtractor::new());
    let orchestrator = Arc::new(Orchestrator::new(pipeline, db.record_repo()));

    let cancel = CancellationToken::new();
    let worker = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        let cancel = cancel.clone();
        async move { orchestrator.run(cancel, &TracingReporter).await }
    });

    let state = Arc::new(AppState {
        orchestrator,
        db,
        config,
        api_key,
    });

    let app = routes::router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    match worker.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Orchestrator stopped with an error"),
        Err(e) => tracing::error!(error = %e, "Orchestrator task panicked"),
    }
    fetcher.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for CTRL+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
