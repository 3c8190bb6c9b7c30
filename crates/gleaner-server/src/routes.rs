use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use gleaner_client::rewrite_for_embedding;
use gleaner_core::{
    AppError, CreateScrapeJobRequest, DiscoveryOptions, ExportFormat, ExportOptions, Fetcher,
    JobStatus, Selector, export_dataset,
};

use crate::auth::require_api_key;
use crate::dto::{
    CreateJobRequest, CreateJobResponse, DiscoverRequest, DiscoverResponse, ErrorResponse,
    ExportRequest, ExportResponse, HealthResponse, JobListResponse, JobResponse, ListJobsQuery,
    RecordListResponse, RecordResponse, RecordsQuery, RewriteRequest, RewriteResponse,
};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::AppState;

/// Build the full router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/jobs", post(create_job))
        .route("/v1/jobs", get(list_jobs))
        .route("/v1/jobs/{id}", get(get_job))
        .route("/v1/export", post(export))
        .route("/v1/discover", post(discover))
        .route("/v1/rewrite", post(rewrite))
        .route("/v1/records", get(list_records))
        .route("/v1/records/{id}", get(get_record))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    let public = Router::new()
        .route("/health", get(health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    public.merge(api).with_state(state)
}

fn not_found(what: &str, id: Uuid) -> axum::response::Response {
    let body = ErrorResponse::new("not_found", format!("{what} not found: {id}"));
    (StatusCode::NOT_FOUND, axum::Json(body)).into_response()
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/jobs",
    request_body = CreateJobRequest,
    responses(
        (status = 202, description = "Job queued", body = CreateJobResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "jobs"
)]
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<CreateJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let selectors: Vec<Selector> = match body.selectors {
        serde_json::Value::Null => Vec::new(),
        raw => serde_json::from_value(raw)
            .map_err(|e| AppError::ValidationError(format!("Invalid selectors: {e}")))?,
    };
    let options = state.config.options_from_json(body.options.as_ref())?;

    let request = CreateScrapeJobRequest::new(body.url, selectors)
        .with_options(options)
        .with_priority(body.priority.unwrap_or(0));
    let job_id = state.orchestrator.submit(request)?;

    let response = CreateJobResponse {
        job_id,
        status: JobStatus::Pending.to_string(),
    };

    Ok((StatusCode::ACCEPTED, axum::Json(response)))
}

#[utoipa::path(
    get,
    path = "/v1/jobs",
    params(ListJobsQuery),
    responses(
        (status = 200, description = "Jobs in submission order", body = JobListResponse),
        (status = 400, description = "Unknown status", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "jobs"
)]
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListJobsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status_filter = query
        .status
        .map(|s| s.parse::<JobStatus>().map_err(AppError::ValidationError))
        .transpose()?;

    let jobs = state.orchestrator.list_jobs(status_filter);
    let total = jobs.len();

    let response = JobListResponse {
        jobs: jobs.into_iter().map(JobResponse::from).collect(),
        total,
    };

    Ok(axum::Json(response))
}

#[utoipa::path(
    get,
    path = "/v1/jobs/{id}",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job details", body = JobResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.orchestrator.get_job(id) {
        Some(job) => axum::Json(JobResponse::from(job)).into_response(),
        None => not_found("Job", id),
    }
}

// ---------------------------------------------------------------------------
// Export / discovery / rewrite
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/export",
    request_body = ExportRequest,
    responses(
        (status = 200, description = "Serialized dataset", body = ExportResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "tools"
)]
pub async fn export(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<ExportRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let format: ExportFormat = body.format.parse()?;
    let defaults = ExportOptions::default();
    let options = ExportOptions {
        pretty: body.pretty.unwrap_or(defaults.pretty),
        table_name: body.table_name.unwrap_or(defaults.table_name),
        embedding_dimensions: state.config.embedding_dimensions,
    };

    let content = export_dataset(&body.data, format, &options)?;

    Ok(axum::Json(ExportResponse {
        format: format.to_string(),
        content,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/discover",
    request_body = DiscoverRequest,
    responses(
        (status = 200, description = "Discovered URLs, seed first", body = DiscoverResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "tools"
)]
pub async fn discover(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<DiscoverRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let defaults = DiscoveryOptions::default();
    let discovery = DiscoveryOptions {
        max_depth: body.max_depth.unwrap_or(defaults.max_depth),
        max_urls: body.max_urls.unwrap_or(defaults.max_urls),
        include_patterns: body.include_patterns.unwrap_or_default(),
        same_origin: body.same_origin.unwrap_or(defaults.same_origin),
        options: state.config.options_from_json(body.options.as_ref())?,
    };

    let urls = state
        .orchestrator
        .pipeline()
        .crawler()
        .discover(&body.url, &discovery)
        .await?;
    let total = urls.len();

    Ok(axum::Json(DiscoverResponse { urls, total }))
}

#[utoipa::path(
    post,
    path = "/v1/rewrite",
    request_body = RewriteRequest,
    responses(
        (status = 200, description = "Embeddable HTML", body = RewriteResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 502, description = "Page could not be fetched", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "tools"
)]
pub async fn rewrite(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<RewriteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (html, origin) = match (body.url, body.html, body.origin) {
        (Some(url), None, _) => {
            let options = state.config.options_from_json(body.options.as_ref())?;
            let page = state
                .orchestrator
                .pipeline()
                .crawler()
                .fetcher()
                .fetch(&url, &options)
                .await?;
            (page.html, page.url)
        }
        (None, Some(html), Some(origin)) => (html, origin),
        _ => {
            return Err(AppError::ValidationError(
                "Provide either 'url', or 'html' together with 'origin'".into(),
            )
            .into());
        }
    };

    let html = rewrite_for_embedding(&html, &origin)?;
    Ok(axum::Json(RewriteResponse { origin, html }))
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/records",
    params(RecordsQuery),
    responses(
        (status = 200, description = "Most recent records first", body = RecordListResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "records"
)]
pub async fn list_records(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecordsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(20).min(100);
    let records = state.db.record_repo().list(limit).await?;
    let total = records.len();

    Ok(axum::Json(RecordListResponse {
        records: records.into_iter().map(RecordResponse::from).collect(),
        total,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/records/{id}",
    params(
        ("id" = Uuid, Path, description = "Record ID")
    ),
    responses(
        (status = 200, description = "Stored record", body = RecordResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "records"
)]
pub async fn get_record(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    match state.db.record_repo().get(id).await? {
        Some(record) => Ok(axum::Json(RecordResponse::from(record)).into_response()),
        None => Ok(not_found("Record", id)),
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db_ok = state.db.record_repo().health_check().await.is_ok();

    let response = HealthResponse {
        status: if db_ok { "healthy" } else { "unhealthy" },
        database: if db_ok { "ok" } else { "error" },
        pending_jobs: state.orchestrator.pending_count(),
    };

    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, axum::Json(response))
}
