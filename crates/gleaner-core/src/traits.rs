use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{ExtractedRecord, FetchedPage, ScrapeOptions, Selector};

/// Acquires the markup of a page.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        url: &str,
        options: &ScrapeOptions,
    ) -> impl Future<Output = Result<FetchedPage, AppError>> + Send;
}

/// Turns fetched markup into records and outbound links.
///
/// Extraction is infallible at the record level: a selector that fails is
/// logged and left out of the record.
pub trait Extractor: Send + Sync + Clone {
    fn extract(
        &self,
        page: &FetchedPage,
        selectors: &[Selector],
        options: &ScrapeOptions,
    ) -> ExtractedRecord;

    /// Absolute `href` targets of every anchor, in document order.
    fn links(&self, html: &str, base_url: &str) -> Vec<String>;

    /// `href` of the first match of `selector`, resolved against `base_url`.
    fn next_page(&self, html: &str, base_url: &str, selector: &str) -> Option<String>;
}

/// A payload held by the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    pub id: Uuid,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Persists opaque JSON payloads. No schema is imposed on them.
pub trait RecordStore: Send + Sync + Clone {
    /// Save a payload. Returns the generated UUID.
    fn save(
        &self,
        payload: &serde_json::Value,
    ) -> impl Future<Output = Result<Uuid, AppError>> + Send;

    /// Most recent payloads first.
    fn list(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<StoredRecord>, AppError>> + Send;

    fn get(&self, id: Uuid) -> impl Future<Output = Result<Option<StoredRecord>, AppError>> + Send;
}

/// A no-op RecordStore for use when persistence is not needed.
#[derive(Debug, Clone)]
pub struct NullStore;

impl RecordStore for NullStore {
    async fn save(&self, _payload: &serde_json::Value) -> Result<Uuid, AppError> {
        Ok(Uuid::nil())
    }

    async fn list(&self, _limit: usize) -> Result<Vec<StoredRecord>, AppError> {
        Ok(vec![])
    }

    async fn get(&self, _id: Uuid) -> Result<Option<StoredRecord>, AppError> {
        Ok(None)
    }
}
