use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{ExtractedRecord, ScrapeOptions, Selector, SelectorKind};

/// Status of a scrape job.
///
/// `pending -> in-progress -> {completed, failed}`; a retried job goes back
/// to `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in-progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "in-progress" | "in_progress" => Ok(JobStatus::InProgress),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// Retry policy: immediate requeue with lowered priority.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Subtracted from a job's priority on every requeue.
    pub priority_decay: i32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            priority_decay: 1,
        }
    }
}

/// A scrape job. Owned and mutated only by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeJob {
    pub id: Uuid,
    pub url: String,
    pub status: JobStatus,
    pub selectors: Vec<Selector>,
    pub options: ScrapeOptions,
    /// Higher runs sooner.
    pub priority: i32,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ExtractedRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<Uuid>,
}

impl ScrapeJob {
    pub fn from_request(request: CreateScrapeJobRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: request.url,
            status: JobStatus::Pending,
            selectors: request.selectors,
            options: request.options,
            priority: request.priority,
            retry_count: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
            record_id: None,
        }
    }

    pub fn can_retry(&self, config: &RetryConfig) -> bool {
        self.retry_count < config.max_retries
    }
}

/// Request to submit a new scrape job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateScrapeJobRequest {
    pub url: String,
    #[serde(default)]
    pub selectors: Vec<Selector>,
    #[serde(default)]
    pub options: ScrapeOptions,
    #[serde(default)]
    pub priority: i32,
}

impl CreateScrapeJobRequest {
    pub fn new(url: impl Into<String>, selectors: Vec<Selector>) -> Self {
        Self {
            url: url.into(),
            selectors,
            options: ScrapeOptions::default(),
            priority: 0,
        }
    }

    pub fn with_options(mut self, options: ScrapeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Reject requests that can never succeed.
    pub fn validate(&self) -> Result<(), AppError> {
        validate_target_url(&self.url)?;

        for selector in &self.selectors {
            if selector.selector.trim().is_empty() {
                return Err(AppError::ValidationError(
                    "Selector expression must not be empty".into(),
                ));
            }
            if let SelectorKind::Attribute { attribute } = &selector.kind
                && attribute.trim().is_empty()
            {
                return Err(AppError::ValidationError(format!(
                    "Attribute selector '{}' is missing an attribute name",
                    selector.selector
                )));
            }
        }

        self.options.validate()?;
        Ok(())
    }
}

/// Parse a scrape target, accepting only absolute http(s) URLs.
pub fn validate_target_url(raw: &str) -> Result<Url, AppError> {
    let url = Url::parse(raw)
        .map_err(|e| AppError::ValidationError(format!("Invalid URL '{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        "http" | "https" => Err(AppError::ValidationError(format!(
            "URL '{raw}' has no host"
        ))),
        scheme => Err(AppError::ValidationError(format!(
            "Unsupported URL scheme '{scheme}'"
        ))),
    }
}
