use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{CreateScrapeJobRequest, JobStatus, RetryConfig, ScrapeJob};
use crate::job_queue::JobQueue;
use crate::models::ExtractedRecord;
use crate::scrape::ScrapePipeline;
use crate::traits::{Extractor, Fetcher, RecordStore};

/// Events emitted by the orchestrator for monitoring/logging.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent<'a> {
    Started,
    JobStarted {
        job_id: Uuid,
        url: &'a str,
        retry_count: u32,
    },
    JobCompleted {
        job_id: Uuid,
        record_id: Option<Uuid>,
    },
    JobRetrying {
        job_id: Uuid,
        error: &'a str,
        retry_count: u32,
        priority: i32,
    },
    JobFailed {
        job_id: Uuid,
        error: &'a str,
        retry_count: u32,
    },
    Drained {
        processed: usize,
    },
    Stopped {
        pending: usize,
    },
}

/// Trait for receiving orchestrator events (decoupled logging).
pub trait OrchestratorReporter: Send + Sync {
    fn report(&self, event: OrchestratorEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl OrchestratorReporter for TracingReporter {
    fn report(&self, event: OrchestratorEvent<'_>) {
        match event {
            OrchestratorEvent::Started => {
                tracing::info!("Orchestrator started");
            }
            OrchestratorEvent::JobStarted {
                job_id,
                url,
                retry_count,
            } => {
                tracing::info!(%job_id, %url, %retry_count, "Processing job");
            }
            OrchestratorEvent::JobCompleted { job_id, record_id } => {
                tracing::info!(%job_id, ?record_id, "Job completed");
            }
            OrchestratorEvent::JobRetrying {
                job_id,
                error,
                retry_count,
                priority,
            } => {
                tracing::warn!(%job_id, %error, %retry_count, %priority, "Job failed, requeued");
            }
            OrchestratorEvent::JobFailed {
                job_id,
                error,
                retry_count,
            } => {
                tracing::error!(%job_id, %error, %retry_count, "Job failed permanently");
            }
            OrchestratorEvent::Drained { processed } => {
                tracing::debug!(%processed, "Queue drained");
            }
            OrchestratorEvent::Stopped { pending } => {
                tracing::info!(%pending, "Orchestrator stopped");
            }
        }
    }
}

#[derive(Default)]
struct JobBook {
    jobs: HashMap<Uuid, ScrapeJob>,
    queue: JobQueue,
}

/// Owns every scrape job and drains the queue one job at a time.
///
/// Submission only touches the in-memory book and never waits on I/O.
/// Processing is serialized: `drain` and `run` hold a consumer lock, so at
/// most one job executes at a time no matter how many callers drive them.
pub struct Orchestrator<F, E, S>
where
    F: Fetcher,
    E: Extractor,
    S: RecordStore,
{
    pipeline: ScrapePipeline<F, E>,
    store: S,
    retry: RetryConfig,
    book: Mutex<JobBook>,
    wake: Notify,
    consumer: tokio::sync::Mutex<()>,
}

impl<F, E, S> Orchestrator<F, E, S>
where
    F: Fetcher,
    E: Extractor,
    S: RecordStore,
{
    pub fn new(pipeline: ScrapePipeline<F, E>, store: S) -> Self {
        Self::with_retry(pipeline, store, RetryConfig::default())
    }

    pub fn with_retry(pipeline: ScrapePipeline<F, E>, store: S, retry: RetryConfig) -> Self {
        Self {
            pipeline,
            store,
            retry,
            book: Mutex::new(JobBook::default()),
            wake: Notify::new(),
            consumer: tokio::sync::Mutex::new(()),
        }
    }

    pub fn pipeline(&self) -> &ScrapePipeline<F, E> {
        &self.pipeline
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn book(&self) -> MutexGuard<'_, JobBook> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate and enqueue a job. Returns its id.
    pub fn submit(&self, request: CreateScrapeJobRequest) -> Result<Uuid, AppError> {
        request.validate()?;
        let job = ScrapeJob::from_request(request);
        let id = job.id;
        tracing::info!(job_id = %id, url = %job.url, priority = job.priority, "Job submitted");
        {
            let mut book = self.book();
            book.queue.push(id, job.priority);
            book.jobs.insert(id, job);
        }
        self.wake.notify_one();
        Ok(id)
    }

    pub fn get_job(&self, id: Uuid) -> Option<ScrapeJob> {
        self.book().jobs.get(&id).cloned()
    }

    /// Jobs in submission order, optionally filtered by status.
    pub fn list_jobs(&self, status: Option<JobStatus>) -> Vec<ScrapeJob> {
        let mut jobs: Vec<ScrapeJob> = self
            .book()
            .jobs
            .values()
            .filter(|job| status.is_none_or(|s| job.status == s))
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    pub fn pending_count(&self) -> usize {
        self.book().queue.len()
    }

    /// Process queued jobs until the queue is empty. Returns how many
    /// attempts ran.
    pub async fn drain<R: OrchestratorReporter>(&self, reporter: &R) -> usize {
        self.drain_until(None, reporter).await
    }

    /// Drain the queue, then wait for new submissions, until cancelled.
    ///
    /// Cancellation is observed between jobs; a job already running finishes.
    pub async fn run<R: OrchestratorReporter>(
        &self,
        cancel_token: CancellationToken,
        reporter: &R,
    ) -> Result<(), AppError> {
        reporter.report(OrchestratorEvent::Started);

        loop {
            if cancel_token.is_cancelled() {
                break;
            }
            self.drain_until(Some(&cancel_token), reporter).await;

            tokio::select! {
                () = self.wake.notified() => {}
                () = cancel_token.cancelled() => break,
            }
        }

        reporter.report(OrchestratorEvent::Stopped {
            pending: self.pending_count(),
        });
        Ok(())
    }

    async fn drain_until<R: OrchestratorReporter>(
        &self,
        cancel_token: Option<&CancellationToken>,
        reporter: &R,
    ) -> usize {
        let _consumer = self.consumer.lock().await;
        let mut processed = 0;

        while cancel_token.is_none_or(|t| !t.is_cancelled()) {
            let Some(job) = self.claim_next() else {
                break;
            };
            self.process_job(job, reporter).await;
            processed += 1;
        }

        reporter.report(OrchestratorEvent::Drained { processed });
        processed
    }

    /// Pop the highest-priority job and mark it in progress.
    fn claim_next(&self) -> Option<ScrapeJob> {
        let mut book = self.book();
        while let Some(id) = book.queue.pop() {
            if let Some(job) = book.jobs.get_mut(&id) {
                job.status = JobStatus::InProgress;
                job.started_at = Some(Utc::now());
                return Some(job.clone());
            }
        }
        None
    }

    async fn process_job<R: OrchestratorReporter>(&self, job: ScrapeJob, reporter: &R) {
        reporter.report(OrchestratorEvent::JobStarted {
            job_id: job.id,
            url: &job.url,
            retry_count: job.retry_count,
        });

        let result = self
            .pipeline
            .scrape(&job.url, &job.selectors, &job.options)
            .await;

        match result {
            Ok(record) => self.complete(job, record, reporter).await,
            Err(e) => self.fail(job, e.to_string(), reporter).await,
        }
    }

    async fn complete<R: OrchestratorReporter>(
        &self,
        job: ScrapeJob,
        record: ExtractedRecord,
        reporter: &R,
    ) {
        let completed_at = Utc::now();
        let payload = serde_json::json!({
            "jobId": job.id,
            "url": job.url,
            "status": JobStatus::Completed,
            "data": record,
            "startedAt": job.started_at,
            "completedAt": completed_at,
        });

        if let Some(stored) = self.book().jobs.get_mut(&job.id) {
            stored.status = JobStatus::Completed;
            stored.completed_at = Some(completed_at);
            stored.error = None;
            stored.result = Some(record);
        }

        let record_id = self.persist(job.id, &payload).await;
        if let Some(stored) = self.book().jobs.get_mut(&job.id) {
            stored.record_id = record_id;
        }

        reporter.report(OrchestratorEvent::JobCompleted {
            job_id: job.id,
            record_id,
        });
    }

    async fn fail<R: OrchestratorReporter>(&self, job: ScrapeJob, error: String, reporter: &R) {
        let retried = {
            let mut book = self.book();
            let JobBook { jobs, queue } = &mut *book;
            match jobs.get_mut(&job.id) {
                Some(stored) if stored.can_retry(&self.retry) => {
                    stored.retry_count += 1;
                    stored.priority = stored.priority.saturating_sub(self.retry.priority_decay);
                    stored.status = JobStatus::Pending;
                    stored.error = Some(error.clone());
                    queue.push(stored.id, stored.priority);
                    Some((stored.retry_count, stored.priority))
                }
                Some(stored) => {
                    stored.status = JobStatus::Failed;
                    stored.error = Some(error.clone());
                    stored.completed_at = Some(Utc::now());
                    None
                }
                None => return,
            }
        };

        if let Some((retry_count, priority)) = retried {
            reporter.report(OrchestratorEvent::JobRetrying {
                job_id: job.id,
                error: &error,
                retry_count,
                priority,
            });
            return;
        }

        reporter.report(OrchestratorEvent::JobFailed {
            job_id: job.id,
            error: &error,
            retry_count: job.retry_count,
        });

        let payload = serde_json::json!({
            "jobId": job.id,
            "url": job.url,
            "status": JobStatus::Failed,
            "error": error,
            "retryCount": job.retry_count,
            "startedAt": job.started_at,
            "completedAt": Utc::now(),
        });
        let record_id = self.persist(job.id, &payload).await;
        if let Some(stored) = self.book().jobs.get_mut(&job.id) {
            stored.record_id = record_id;
        }
    }

    async fn persist(&self, job_id: Uuid, payload: &serde_json::Value) -> Option<Uuid> {
        match self.store.save(payload).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!(%job_id, error = %e, "Failed to persist job outcome");
                None
            }
        }
    }
}
