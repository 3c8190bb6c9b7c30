pub mod config;
pub mod crawl;
pub mod error;
pub mod export;
pub mod job;
pub mod job_queue;
pub mod models;
pub mod orchestrator;
pub mod rotation;
pub mod scrape;
#[cfg(test)]
pub mod testutil;
pub mod throttle;
pub mod traits;

pub use config::EngineConfig;
pub use crawl::{CrawlController, DiscoveryOptions, merge_records};
pub use error::AppError;
pub use export::{ExportFormat, ExportOptions, export_dataset};
pub use job::{CreateScrapeJobRequest, JobStatus, RetryConfig, ScrapeJob};
pub use models::{
    ExtractedRecord, ExtractionMode, FetchStrategy, FetchedPage, FieldValue, ScrapeOptions,
    Selector, SelectorKind, compute_hash,
};
pub use orchestrator::{Orchestrator, OrchestratorEvent, OrchestratorReporter, TracingReporter};
pub use rotation::{Identity, IdentityFilter, Proxy, Rotation, RotationPool};
pub use scrape::ScrapePipeline;
pub use traits::{Extractor, Fetcher, NullStore, RecordStore, StoredRecord};
