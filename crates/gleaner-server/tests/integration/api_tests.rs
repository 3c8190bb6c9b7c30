use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use gleaner_core::TracingReporter;
use http_body_util::BodyExt;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{TEST_API_KEY, setup_test_app, setup_test_app_no_auth};

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri)
        .header("authorization", format!("Bearer {TEST_API_KEY}"))
        .body(Body::empty())
        .unwrap()
}

fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header("authorization", format!("Bearer {TEST_API_KEY}"))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

async fn serve_page(server: &MockServer, route: &str, html: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(html))
        .mount(server)
        .await;
}

// ---------------------------------------------------------------------------
// System / auth
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_200() {
    let app = setup_test_app().await;

    let (status, json) = send(
        &app.router,
        Request::get("/health").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["database"], "ok");
    assert_eq!(json["pending_jobs"], 0);
}

#[tokio::test]
async fn unauthenticated_request_returns_401() {
    let app = setup_test_app().await;

    let (status, json) = send(
        &app.router,
        Request::get("/v1/jobs").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "unauthorized");
}

#[tokio::test]
async fn wrong_api_key_returns_401() {
    let app = setup_test_app().await;

    let (status, _) = send(
        &app.router,
        Request::get("/v1/jobs")
            .header("authorization", "Bearer wrong-key")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn no_api_key_configured_returns_403() {
    let app = setup_test_app_no_auth().await;

    let (status, json) = send(
        &app.router,
        Request::get("/v1/jobs")
            .header("authorization", "Bearer any-token")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["error"], "forbidden");
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_and_get_job() {
    let app = setup_test_app().await;

    let (status, json) = send(
        &app.router,
        post(
            "/v1/jobs",
            serde_json::json!({
                "url": "https://example.com",
                "selectors": [{"selector": "h1", "type": "text", "name": "title"}],
                "priority": 4
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["status"], "pending");
    let job_id = json["job_id"].as_str().unwrap().to_string();

    let (status, json) = send(&app.router, get(&format!("/v1/jobs/{job_id}"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], job_id.as_str());
    assert_eq!(json["status"], "pending");
    assert_eq!(json["url"], "https://example.com");
    assert_eq!(json["priority"], 4);
    assert_eq!(app.state.orchestrator.pending_count(), 1);
}

#[tokio::test]
async fn invalid_submission_is_rejected() {
    let app = setup_test_app().await;

    let (status, json) = send(
        &app.router,
        post("/v1/jobs", serde_json::json!({"url": "ftp://example.com/file"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "validation_error");

    let (status, _) = send(
        &app.router,
        post(
            "/v1/jobs",
            serde_json::json!({
                "url": "https://example.com",
                "selectors": [{"selector": "img", "type": "attribute"}]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app.router,
        post(
            "/v1/jobs",
            serde_json::json!({"url": "https://example.com", "options": {"timeout": "soon"}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = send(
        &app.router,
        post(
            "/v1/jobs",
            serde_json::json!({"url": "https://example.com", "options": {"delay": 1e300}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "validation_error");
    assert_eq!(app.state.orchestrator.pending_count(), 0);
}

#[tokio::test]
async fn unknown_job_returns_404() {
    let app = setup_test_app().await;

    let (status, json) = send(
        &app.router,
        get("/v1/jobs/00000000-0000-0000-0000-000000000000"),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "not_found");
}

#[tokio::test]
async fn completed_job_is_persisted() {
    let app = setup_test_app().await;
    let site = MockServer::start().await;
    serve_page(
        &site,
        "/product",
        "<html><body><h1>Widget</h1><li class='tag'>a</li><li class='tag'>b</li></body></html>",
    )
    .await;

    let (status, json) = send(
        &app.router,
        post(
            "/v1/jobs",
            serde_json::json!({
                "url": format!("{}/product", site.uri()),
                "selectors": [
                    {"selector": "h1", "type": "text", "name": "title"},
                    {"selector": ".tag", "type": "list", "name": "tags"}
                ]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = json["job_id"].as_str().unwrap().to_string();

    app.state.orchestrator.drain(&TracingReporter).await;

    let (_, job) = send(&app.router, get(&format!("/v1/jobs/{job_id}"))).await;
    assert_eq!(job["status"], "completed");
    assert_eq!(job["result"]["title"], "Widget");
    assert_eq!(job["result"]["tags"], serde_json::json!(["a", "b"]));
    let record_id = job["record_id"].as_str().unwrap().to_string();

    let (status, listed) = send(&app.router, get("/v1/records?limit=5")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["total"], 1);
    assert_eq!(listed["records"][0]["id"], record_id.as_str());

    let (status, record) = send(&app.router, get(&format!("/v1/records/{record_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["payload"]["jobId"], job_id.as_str());
    assert_eq!(record["payload"]["status"], "completed");
    assert_eq!(record["payload"]["data"]["title"], "Widget");
}

#[tokio::test]
async fn failed_job_is_persisted_after_retries() {
    let app = setup_test_app().await;
    let site = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(4)
        .mount(&site)
        .await;

    let (_, json) = send(
        &app.router,
        post("/v1/jobs", serde_json::json!({"url": format!("{}/down", site.uri())})),
    )
    .await;
    let job_id = json["job_id"].as_str().unwrap().to_string();

    app.state.orchestrator.drain(&TracingReporter).await;

    let (_, job) = send(&app.router, get(&format!("/v1/jobs/{job_id}"))).await;
    assert_eq!(job["status"], "failed");
    assert_eq!(job["retry_count"], 3);
    assert!(job["error"].as_str().unwrap().contains("503"));

    let (_, failed) = send(&app.router, get("/v1/jobs?status=failed")).await;
    assert_eq!(failed["total"], 1);

    let (_, listed) = send(&app.router, get("/v1/records")).await;
    assert_eq!(listed["records"][0]["payload"]["status"], "failed");
    assert_eq!(listed["records"][0]["payload"]["retryCount"], 3);
}

#[tokio::test]
async fn list_jobs_filters_by_status() {
    let app = setup_test_app().await;

    for url in ["https://a.example", "https://b.example"] {
        send(&app.router, post("/v1/jobs", serde_json::json!({"url": url}))).await;
    }

    let (status, all) = send(&app.router, get("/v1/jobs")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all["total"], 2);
    assert_eq!(all["jobs"][0]["url"], "https://a.example");

    let (_, pending) = send(&app.router, get("/v1/jobs?status=pending")).await;
    assert_eq!(pending["total"], 2);

    let (_, completed) = send(&app.router, get("/v1/jobs?status=completed")).await;
    assert_eq!(completed["total"], 0);

    let (status, _) = send(&app.router, get("/v1/jobs?status=paused")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

#[tokio::test]
async fn export_formats() {
    let app = setup_test_app().await;
    let data = serde_json::json!([{"name": "Widget", "price": 9.5}, {"name": "Gadget"}]);

    let (status, json) = send(
        &app.router,
        post("/v1/export", serde_json::json!({"data": data, "format": "csv"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["format"], "csv");
    assert_eq!(json["content"].as_str().unwrap().lines().count(), 3);

    let (status, json) = send(
        &app.router,
        post(
            "/v1/export",
            serde_json::json!({"data": data, "format": "sql", "table_name": "products"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["content"].as_str().unwrap().contains("products"));

    let (status, json) = send(
        &app.router,
        post("/v1/export", serde_json::json!({"data": data, "format": "xml"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "validation_error");
}

#[tokio::test]
async fn discover_walks_same_origin_links() {
    let app = setup_test_app().await;
    let site = MockServer::start().await;
    serve_page(&site, "/", r#"<a href="/a">a</a><a href="/b">b</a><a href="https://elsewhere.example/">x</a>"#).await;
    serve_page(&site, "/a", r#"<a href="/c">c</a><a href="/">home</a>"#).await;
    serve_page(&site, "/b", "<p>leaf</p>").await;
    serve_page(&site, "/c", "<p>leaf</p>").await;

    let (status, json) = send(
        &app.router,
        post(
            "/v1/discover",
            serde_json::json!({"url": format!("{}/", site.uri()), "max_depth": 2}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 4);
    let urls: Vec<&str> = json["urls"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u.as_str().unwrap())
        .collect();
    assert_eq!(urls[0], format!("{}/", site.uri()));
    assert!(urls.contains(&format!("{}/c", site.uri()).as_str()));
    assert!(!urls.iter().any(|u| u.contains("elsewhere")));
}

#[tokio::test]
async fn rewrite_html_and_url() {
    let app = setup_test_app().await;

    let (status, json) = send(
        &app.router,
        post(
            "/v1/rewrite",
            serde_json::json!({
                "html": r#"<html><head></head><body><img src="/logo.png"></body></html>"#,
                "origin": "https://shop.example/"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let html = json["html"].as_str().unwrap();
    assert!(html.contains(r#"src="https://shop.example/logo.png""#));
    assert!(html.contains("window.parent.postMessage"));

    let site = MockServer::start().await;
    serve_page(&site, "/page", r#"<html><head></head><body><a href="next">n</a></body></html>"#).await;
    let (status, json) = send(
        &app.router,
        post("/v1/rewrite", serde_json::json!({"url": format!("{}/page", site.uri())})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["html"].as_str().unwrap().contains(&format!(r#"href="{}/next""#, site.uri())));

    let (status, _) = send(
        &app.router,
        post("/v1/rewrite", serde_json::json!({"html": "<p></p>"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_record_returns_404() {
    let app = setup_test_app().await;

    let (status, _) = send(
        &app.router,
        get("/v1/records/00000000-0000-0000-0000-000000000000"),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
