use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Gleaner API",
        version = "0.1.0",
        description = "Scrape orchestration: prioritized jobs, URL discovery, dataset export and embeddable page rewriting."
    ),
    paths(
        crate::routes::create_job,
        crate::routes::list_jobs,
        crate::routes::get_job,
        crate::routes::export,
        crate::routes::discover,
        crate::routes::rewrite,
        crate::routes::list_records,
        crate::routes::get_record,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::CreateJobRequest,
        crate::dto::CreateJobResponse,
        crate::dto::JobResponse,
        crate::dto::JobListResponse,
        crate::dto::ExportRequest,
        crate::dto::ExportResponse,
        crate::dto::DiscoverRequest,
        crate::dto::DiscoverResponse,
        crate::dto::RewriteRequest,
        crate::dto::RewriteResponse,
        crate::dto::RecordResponse,
        crate::dto::RecordListResponse,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "jobs", description = "Scrape job submission and status"),
        (name = "tools", description = "Export, discovery and rewriting"),
        (name = "records", description = "Persisted job outcomes"),
        (name = "system", description = "Health and system status"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Adds Bearer token security scheme to the OpenAPI document.
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("token")
                        .description(Some(
                            "API key. Set via GLEANER_SERVER_API_KEY environment variable.",
                        ))
                        .build(),
                ),
            );
        }
    }
}
