use crate::crawl::CrawlController;
use crate::error::AppError;
use crate::models::{ExtractedRecord, ScrapeOptions, Selector};
use crate::traits::{Extractor, Fetcher};

/// The per-job pipeline: fetch → extract → paginate.
///
/// Generic over the fetch strategy and extraction engine, enabling tests
/// without real HTTP or a browser.
#[derive(Clone)]
pub struct ScrapePipeline<F, E>
where
    F: Fetcher,
    E: Extractor,
{
    crawler: CrawlController<F, E>,
}

impl<F, E> ScrapePipeline<F, E>
where
    F: Fetcher,
    E: Extractor,
{
    pub fn new(fetcher: F, extractor: E) -> Self {
        Self {
            crawler: CrawlController::new(fetcher, extractor),
        }
    }

    pub fn crawler(&self) -> &CrawlController<F, E> {
        &self.crawler
    }

    /// Run the pipeline for one URL.
    ///
    /// A failure fetching the first page is returned to the caller; later
    /// pagination failures only end pagination early.
    pub async fn scrape(
        &self,
        url: &str,
        selectors: &[Selector],
        options: &ScrapeOptions,
    ) -> Result<ExtractedRecord, AppError> {
        tracing::info!(%url, javascript = options.javascript, "Fetching");
        let page = self.crawler.fetcher().fetch(url, options).await?;
        tracing::info!(
            url = %page.url,
            bytes = page.html.len(),
            latency_ms = page.latency_ms,
            "Fetched page"
        );

        let record = self.crawler.extractor().extract(&page, selectors, options);
        tracing::debug!(fields = record.fields.len(), "Extracted first page");

        Ok(self
            .crawler
            .paginate(&page, record, selectors, options)
            .await)
    }
}
