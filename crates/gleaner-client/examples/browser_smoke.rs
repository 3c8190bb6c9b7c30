/// Smoke-test for `BrowserFetcher`.
///
/// Launches a headless Chromium through the browser pool, renders
/// <https://example.com>, and checks that extraction sees the `<h1>`.
///
/// Run with:
///   cargo run --example browser_smoke --features browser
use std::sync::Arc;

use gleaner_client::{BrowserFetcher, BrowserPool, ChromiumLauncher, ScraperExtractor};
use gleaner_core::models::{ResourceClass, ScrapeOptions, Selector};
use gleaner_core::rotation::Rotation;
use gleaner_core::traits::{Extractor, Fetcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .init();

    let pool = Arc::new(BrowserPool::new(ChromiumLauncher));
    let fetcher = BrowserFetcher::new(Arc::clone(&pool), Rotation::default());

    let options = ScrapeOptions {
        javascript: true,
        wait_for_selector: Some("h1".into()),
        block_resources: vec![ResourceClass::Image, ResourceClass::Font],
        ..Default::default()
    };

    let url = "https://example.com";
    println!("Rendering {url} …");
    let page = fetcher.fetch(url, &options).await?;

    let record = ScraperExtractor::new().extract(
        &page,
        &[Selector::text("h1").named("title")],
        &options,
    );
    let title = record.get("title").and_then(|v| v.as_text()).unwrap_or_default();
    assert_eq!(title, "Example Domain", "Expected <h1> not found in rendered HTML");

    println!(
        "OK: {} bytes of rendered HTML in {} ms",
        page.html.len(),
        page.latency_ms
    );
    pool.close_all().await;
    Ok(())
}
