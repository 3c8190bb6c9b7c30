use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gleaner_core::{ScrapeJob, StoredRecord};

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// A scrape submission. `selectors` and `options` use the engine's JSON
/// shapes; unset option fields take the server's defaults.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreateJobRequest {
    pub url: String,
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub selectors: serde_json::Value,
    #[schema(value_type = Option<Object>)]
    pub options: Option<serde_json::Value>,
    pub priority: Option<i32>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CreateJobResponse {
    pub job_id: Uuid,
    pub status: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobResponse {
    pub id: Uuid,
    pub url: String,
    pub status: String,
    pub priority: i32,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub result: Option<serde_json::Value>,
    pub record_id: Option<Uuid>,
}

impl From<ScrapeJob> for JobResponse {
    fn from(job: ScrapeJob) -> Self {
        Self {
            id: job.id,
            url: job.url,
            status: job.status.to_string(),
            priority: job.priority,
            retry_count: job.retry_count,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error: job.error,
            result: job
                .result
                .and_then(|record| serde_json::to_value(record).ok()),
            record_id: job.record_id,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListJobsQuery {
    /// pending, in-progress, completed or failed
    pub status: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobListResponse {
    pub jobs: Vec<JobResponse>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ExportRequest {
    /// A record or an array of records.
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
    /// json, csv, sql or vector
    pub format: String,
    pub table_name: Option<String>,
    pub pretty: Option<bool>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ExportResponse {
    pub format: String,
    pub content: String,
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct DiscoverRequest {
    pub url: String,
    pub max_depth: Option<u32>,
    pub max_urls: Option<usize>,
    pub include_patterns: Option<Vec<String>>,
    pub same_origin: Option<bool>,
    /// Fetch options used for every page.
    #[schema(value_type = Option<Object>)]
    pub options: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct DiscoverResponse {
    pub urls: Vec<String>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Rewrite
// ---------------------------------------------------------------------------

/// Either `url` (fetched server-side) or `html` together with `origin`.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct RewriteRequest {
    pub url: Option<String>,
    pub html: Option<String>,
    pub origin: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub options: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RewriteResponse {
    pub origin: String,
    pub html: String,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct RecordsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RecordResponse {
    pub id: Uuid,
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<StoredRecord> for RecordResponse {
    fn from(record: StoredRecord) -> Self {
        Self {
            id: record.id,
            payload: record.payload,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RecordListResponse {
    pub records: Vec<RecordResponse>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Health / errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub pending_jobs: usize,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}
