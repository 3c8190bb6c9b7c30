pub mod browser_pool;
#[cfg(feature = "browser")]
pub mod chromium;
pub mod cleaner;
pub mod extractor;
pub mod fetcher;
pub mod rewriter;
pub mod strategy;

pub use browser_pool::{AcquiredBrowser, BrowserHandle, BrowserLauncher, BrowserPool};
#[cfg(feature = "browser")]
pub use chromium::{BrowserFetcher, ChromiumInstance, ChromiumLauncher};
pub use cleaner::HtmdCleaner;
pub use extractor::ScraperExtractor;
pub use fetcher::StaticFetcher;
pub use rewriter::rewrite_for_embedding;
pub use strategy::StrategyFetcher;
