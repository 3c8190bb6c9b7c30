//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{JobStatus, ScrapeJob};
use crate::models::{
    ExtractedRecord, FetchStrategy, FetchedPage, FieldValue, ScrapeOptions, Selector,
};
use crate::orchestrator::{OrchestratorEvent, OrchestratorReporter};
use crate::traits::{Extractor, Fetcher, RecordStore, StoredRecord};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// A scripted fetch outcome. Errors surface as `AppError::NetworkError`.
///
/// `Redirect` serves the target URL's current response under the target URL.
#[derive(Debug, Clone)]
pub enum MockResponse {
    Page(String),
    Error(String),
    Redirect(String),
}

/// Mock fetcher with per-URL scripted responses.
///
/// Each call to a URL pops its next response; the last one repeats. URLs
/// without a script fail with a 404 `HttpError`.
#[derive(Clone, Default)]
pub struct MockFetcher {
    routes: Arc<Mutex<HashMap<String, VecDeque<MockResponse>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, html: &str) -> Self {
        self.with_responses(url, vec![MockResponse::Page(html.to_string())])
    }

    pub fn with_responses(self, url: &str, responses: Vec<MockResponse>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), responses.into());
        self
    }

    /// URLs fetched so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str, _options: &ScrapeOptions) -> Result<FetchedPage, AppError> {
        self.calls.lock().unwrap().push(url.to_string());

        let mut landed = url.to_string();
        let response = {
            let mut routes = self.routes.lock().unwrap();
            let response = routes.get_mut(url).and_then(|queue| {
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            });
            match response {
                Some(MockResponse::Redirect(target)) => {
                    let next = routes.get(&target).and_then(|q| q.front().cloned());
                    landed = target;
                    next
                }
                other => other,
            }
        };

        match response {
            Some(MockResponse::Page(html)) => {
                Ok(FetchedPage::new(&landed, html, FetchStrategy::Static))
            }
            Some(MockResponse::Error(msg)) => Err(AppError::NetworkError(msg)),
            Some(MockResponse::Redirect(_)) => {
                Err(AppError::NetworkError(format!("Too many redirects for {url}")))
            }
            None => Err(AppError::HttpError(format!("HTTP 404 Not Found for {landed}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// A page in a [`MockSite`]: its record, outbound links and next-page link.
#[derive(Debug, Clone, Default)]
pub struct MockPage {
    pub url: String,
    pub fields: BTreeMap<String, FieldValue>,
    pub links: Vec<String>,
    pub next: Option<String>,
}

impl MockPage {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Default::default()
        }
    }

    pub fn with_field(mut self, key: &str, value: FieldValue) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    pub fn with_links(mut self, links: &[&str]) -> Self {
        self.links = links.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn with_next(mut self, next: Option<&str>) -> Self {
        self.next = next.map(str::to_string);
        self
    }
}

/// Mock extractor keyed by page URL.
///
/// Pages it knows about yield their scripted fields, links and next link;
/// anything else yields the default record and no links.
#[derive(Clone)]
pub struct MockExtractor {
    pages: Arc<HashMap<String, MockPage>>,
    default: ExtractedRecord,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockExtractor {
    /// Extractor that returns `record` for every page.
    pub fn new(record: ExtractedRecord) -> Self {
        Self {
            pages: Arc::new(HashMap::new()),
            default: record,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn for_pages(pages: Vec<MockPage>) -> Self {
        Self {
            pages: Arc::new(pages.into_iter().map(|p| (p.url.clone(), p)).collect()),
            default: ExtractedRecord::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Page URLs extracted so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Extractor for MockExtractor {
    fn extract(
        &self,
        page: &FetchedPage,
        _selectors: &[Selector],
        _options: &ScrapeOptions,
    ) -> ExtractedRecord {
        self.calls.lock().unwrap().push(page.url.clone());
        match self.pages.get(&page.url) {
            Some(p) => ExtractedRecord {
                fields: p.fields.clone(),
                ..Default::default()
            },
            None => self.default.clone(),
        }
    }

    fn links(&self, _html: &str, base_url: &str) -> Vec<String> {
        self.pages
            .get(base_url)
            .map(|p| p.links.clone())
            .unwrap_or_default()
    }

    fn next_page(&self, _html: &str, base_url: &str, _selector: &str) -> Option<String> {
        self.pages.get(base_url).and_then(|p| p.next.clone())
    }
}

/// A fetcher and extractor pair sharing one set of pages.
pub struct MockSite {
    fetcher: MockFetcher,
    extractor: MockExtractor,
}

impl MockSite {
    pub fn new(pages: Vec<MockPage>) -> Self {
        let fetcher = pages
            .iter()
            .fold(MockFetcher::new(), |f, p| f.with_page(&p.url, &p.url));
        Self {
            fetcher,
            extractor: MockExtractor::for_pages(pages),
        }
    }

    pub fn fetcher(&self) -> MockFetcher {
        self.fetcher.clone()
    }

    pub fn extractor(&self) -> MockExtractor {
        self.extractor.clone()
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

/// Mock store that keeps saved payloads in memory.
#[derive(Clone, Default)]
pub struct MockStore {
    records: Arc<Mutex<Vec<StoredRecord>>>,
    fail_saves: bool,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose every save fails.
    pub fn failing() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
            fail_saves: true,
        }
    }

    /// Saved payloads, oldest first.
    pub fn saved(&self) -> Vec<serde_json::Value> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.payload.clone())
            .collect()
    }
}

impl RecordStore for MockStore {
    async fn save(&self, payload: &serde_json::Value) -> Result<Uuid, AppError> {
        if self.fail_saves {
            return Err(AppError::DatabaseError("connection closed".into()));
        }
        let id = Uuid::new_v4();
        self.records.lock().unwrap().push(StoredRecord {
            id,
            payload: payload.clone(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn list(&self, limit: usize) -> Result<Vec<StoredRecord>, AppError> {
        let records = self.records.lock().unwrap();
        Ok(records.iter().rev().take(limit).cloned().collect())
    }

    async fn get(&self, id: Uuid) -> Result<Option<StoredRecord>, AppError> {
        let records = self.records.lock().unwrap();
        Ok(records.iter().find(|r| r.id == id).cloned())
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Mock orchestrator reporter that records event names.
#[derive(Default)]
pub struct MockReporter {
    events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl OrchestratorReporter for MockReporter {
    fn report(&self, event: OrchestratorEvent<'_>) {
        let label = match &event {
            OrchestratorEvent::Started => "started",
            OrchestratorEvent::JobStarted { .. } => "job_started",
            OrchestratorEvent::JobCompleted { .. } => "job_completed",
            OrchestratorEvent::JobRetrying { .. } => "job_retrying",
            OrchestratorEvent::JobFailed { .. } => "job_failed",
            OrchestratorEvent::Drained { .. } => "drained",
            OrchestratorEvent::Stopped { .. } => "stopped",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Create a dummy ScrapeJob for testing.
pub fn make_test_job() -> ScrapeJob {
    ScrapeJob {
        id: Uuid::new_v4(),
        url: "https://example.com".to_string(),
        status: JobStatus::Pending,
        selectors: vec![Selector::text("h1").named("title")],
        options: ScrapeOptions::default(),
        priority: 0,
        retry_count: 0,
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
        error: None,
        result: None,
        record_id: None,
    }
}
