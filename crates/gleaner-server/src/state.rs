use std::sync::Arc;

use gleaner_client::{ScraperExtractor, StrategyFetcher};
use gleaner_core::{EngineConfig, Orchestrator};
use gleaner_db::{Database, RecordRepository};

/// The orchestrator as wired by the server: strategy fetcher, scraper-based
/// extraction, PostgreSQL persistence.
pub type ServerOrchestrator = Orchestrator<StrategyFetcher, ScraperExtractor, RecordRepository>;

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub orchestrator: Arc<ServerOrchestrator>,
    pub db: Database,
    pub config: EngineConfig,
    /// API key for the `/v1` endpoints (None = those endpoints are disabled).
    pub api_key: Option<String>,
}
