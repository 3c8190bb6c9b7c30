#[cfg(feature = "browser")]
use std::sync::Arc;

use gleaner_core::config::EngineConfig;
use gleaner_core::error::AppError;
use gleaner_core::models::{FetchedPage, ScrapeOptions};
use gleaner_core::rotation::Rotation;
use gleaner_core::traits::Fetcher;

use crate::fetcher::{StaticFetcher, validate_url};

#[cfg(feature = "browser")]
use crate::browser_pool::BrowserPool;
#[cfg(feature = "browser")]
use crate::chromium::{BrowserFetcher, ChromiumLauncher};

/// Picks the fetch strategy per request from `options.javascript`.
///
/// Without the `browser` feature, or when no browser fetcher was supplied,
/// JavaScript requests fail with a `BrowserError` and go through the normal
/// retry policy.
#[derive(Clone)]
pub struct StrategyFetcher {
    static_fetcher: StaticFetcher,
    #[cfg(feature = "browser")]
    browser: Option<BrowserFetcher>,
}

impl StrategyFetcher {
    pub fn new(static_fetcher: StaticFetcher) -> Self {
        Self {
            static_fetcher,
            #[cfg(feature = "browser")]
            browser: None,
        }
    }

    /// Both strategies wired to one rotation seeded from `config`.
    pub fn from_config(config: &EngineConfig) -> Self {
        let rotation = Rotation::with_proxies(config.proxies.clone());
        let mut static_fetcher = StaticFetcher::new(rotation.clone());
        if config.allow_private_urls {
            static_fetcher = static_fetcher.allow_private_urls();
        }

        #[cfg(feature = "browser")]
        {
            let pool = BrowserPool::with_capacity(ChromiumLauncher, config.browser_capacity);
            Self::new(static_fetcher).with_browser(BrowserFetcher::new(Arc::new(pool), rotation))
        }
        #[cfg(not(feature = "browser"))]
        {
            Self::new(static_fetcher)
        }
    }

    #[cfg(feature = "browser")]
    pub fn with_browser(mut self, browser: BrowserFetcher) -> Self {
        self.browser = Some(browser);
        self
    }

    pub fn static_fetcher(&self) -> &StaticFetcher {
        &self.static_fetcher
    }

    /// Close any launched browsers.
    pub async fn shutdown(&self) {
        #[cfg(feature = "browser")]
        if let Some(browser) = &self.browser {
            browser.pool().close_all().await;
        }
    }

    #[cfg(feature = "browser")]
    async fn fetch_rendered(&self, url: &str, options: &ScrapeOptions) -> Result<FetchedPage, AppError> {
        match &self.browser {
            Some(browser) => browser.fetch(url, options).await,
            None => Err(browser_unavailable()),
        }
    }

    #[cfg(not(feature = "browser"))]
    async fn fetch_rendered(&self, _url: &str, _options: &ScrapeOptions) -> Result<FetchedPage, AppError> {
        Err(browser_unavailable())
    }
}

fn browser_unavailable() -> AppError {
    AppError::BrowserError("JavaScript rendering is not available in this build".into())
}

impl Fetcher for StrategyFetcher {
    async fn fetch(&self, url: &str, options: &ScrapeOptions) -> Result<FetchedPage, AppError> {
        if options.javascript {
            if self.static_fetcher.ssrf_protection() {
                validate_url(url).await?;
            }
            self.fetch_rendered(url, options).await
        } else {
            self.static_fetcher.fetch(url, options).await
        }
    }
}
