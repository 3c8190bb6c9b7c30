use std::sync::Arc;

use axum::Router;
use gleaner_client::{ScraperExtractor, StaticFetcher, StrategyFetcher};
use gleaner_core::{EngineConfig, Orchestrator, Rotation, ScrapePipeline};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

use gleaner_db::Database;
use gleaner_server::routes;
use gleaner_server::state::AppState;

pub const TEST_API_KEY: &str = "test-secret-key";

/// Router plus the state behind it. Tests drive the orchestrator directly
/// through `state` instead of running the background loop.
pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    _container: ContainerAsync<GenericImage>,
}

pub async fn setup_test_app() -> TestApp {
    build_app(Some(TEST_API_KEY.to_string())).await
}

pub async fn setup_test_app_no_auth() -> TestApp {
    build_app(None).await
}

async fn build_app(api_key: Option<String>) -> TestApp {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "gleaner_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let url = format!("postgresql://postgres:postgres@{host}:{port}/gleaner_test");

    let db = Database::from_pool(retry_connect(&url).await);
    db.migrate().await.expect("Failed to run migrations");

    // Test pages are served by wiremock on loopback.
    let config = EngineConfig {
        allow_private_urls: true,
        default_timeout_ms: 5_000,
        ..Default::default()
    };
    let fetcher =
        StrategyFetcher::new(StaticFetcher::new(Rotation::default()).allow_private_urls());
    let pipeline = ScrapePipeline::new(fetcher, ScraperExtractor::new());
    let orchestrator = Arc::new(Orchestrator::new(pipeline, db.record_repo()));

    let state = Arc::new(AppState {
        orchestrator,
        db,
        config,
        api_key,
    });

    TestApp {
        router: routes::router(state.clone()),
        state,
        _container: container,
    }
}

async fn retry_connect(url: &str) -> PgPool {
    for _ in 0..30 {
        if let Ok(pool) = PgPoolOptions::new().max_connections(5).connect(url).await {
            return pool;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    panic!("Failed to connect to test database");
}
