use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams, EventRequestPaused, FailRequestParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, ErrorReason, Headers, SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    EventLifecycleEvent, SetLifecycleEventsEnabledParams,
};
use chromiumoxide::{Browser, BrowserConfig};
use futures::{Stream, StreamExt};
use gleaner_core::error::AppError;
use gleaner_core::models::{FetchStrategy, FetchedPage, ResourceClass, ScrapeOptions};
use gleaner_core::rotation::{Proxy, Rotation};
use gleaner_core::throttle::pause_before_request;
use gleaner_core::traits::Fetcher;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::browser_pool::{BrowserHandle, BrowserLauncher, BrowserPool};

/// Polling interval while waiting for a ready selector.
const READY_POLL: Duration = Duration::from_millis(100);

/// Lifecycle event that starts a new document load in a frame.
const LIFECYCLE_INIT: &str = "init";

/// Lifecycle event fired after 500ms without network connections.
const NETWORK_IDLE: &str = "networkIdle";

/// Launches headless Chromium processes via the Chrome DevTools Protocol.
#[derive(Debug, Clone, Default)]
pub struct ChromiumLauncher;

impl ChromiumLauncher {
    /// Tries to locate the real Chrome/Chromium binary.
    ///
    /// On systems where Chromium is installed via **snap**, the wrapper at
    /// `/snap/bin/chromium` strips unknown CLI flags, breaking headless mode.
    /// We look for the real binary inside the snap first, then fall back to
    /// well-known system paths.  If nothing is found we return `None` and let
    /// `chromiumoxide` do its own lookup.
    fn find_chrome_binary() -> Option<PathBuf> {
        if let Ok(p) = std::env::var("CHROME_BIN") {
            let path = PathBuf::from(&p);
            if path.exists() {
                return Some(path);
            }
        }

        [
            "/snap/chromium/current/usr/lib/chromium-browser/chrome",
            "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
        ]
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
    }
}

impl BrowserLauncher for ChromiumLauncher {
    type Instance = ChromiumInstance;

    async fn launch(&self, proxy: Option<&Proxy>) -> Result<ChromiumInstance, AppError> {
        // Sandbox off: headless Chromium in containers has no user namespaces.
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();
        if let Some(bin) = Self::find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }
        builder = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--disable-translate")
            .arg("--no-first-run");
        if let Some(proxy) = proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy.url()));
        }

        let config = builder
            .build()
            .map_err(|e| AppError::BrowserError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        Ok(ChromiumInstance {
            browser: Mutex::new(browser),
            handler_task,
        })
    }
}

/// One launched Chromium process and its CDP handler task.
pub struct ChromiumInstance {
    browser: Mutex<Browser>,
    handler_task: JoinHandle<()>,
}

impl ChromiumInstance {
    /// Open a blank page configured for `options` and `user_agent`.
    pub async fn configure_page(
        &self,
        options: &ScrapeOptions,
        user_agent: &str,
        target_url: &str,
    ) -> Result<Page, AppError> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to open page: {e}")))?;

        if let Err(e) = apply_page_settings(&page, options, user_agent, target_url).await {
            let _ = page.close().await;
            return Err(e);
        }
        Ok(page)
    }
}

impl BrowserHandle for ChromiumInstance {
    async fn close(&self) -> Result<(), AppError> {
        let mut browser = self.browser.lock().await;
        let result = browser
            .close()
            .await
            .map(|_| ())
            .map_err(|e| AppError::BrowserError(format!("Failed to close browser: {e}")));
        let _ = browser.wait().await;
        self.handler_task.abort();
        result
    }
}

fn cdp_error(action: &str) -> impl Fn(chromiumoxide::error::CdpError) -> AppError + '_ {
    move |e| AppError::BrowserError(format!("Failed to {action}: {e}"))
}

async fn apply_page_settings(
    page: &Page,
    options: &ScrapeOptions,
    user_agent: &str,
    target_url: &str,
) -> Result<(), AppError> {
    page.execute(SetUserAgentOverrideParams {
        user_agent: user_agent.to_string(),
        accept_language: None,
        platform: None,
        user_agent_metadata: None,
    })
    .await
    .map_err(cdp_error("set user agent"))?;

    let metrics = SetDeviceMetricsOverrideParams::builder()
        .width(i64::from(options.viewport.width))
        .height(i64::from(options.viewport.height))
        .device_scale_factor(1.0)
        .mobile(false)
        .build()
        .map_err(AppError::BrowserError)?;
    page.execute(metrics)
        .await
        .map_err(cdp_error("set viewport"))?;

    if !options.headers.is_empty() {
        let headers = serde_json::to_value(&options.headers)?;
        page.execute(SetExtraHttpHeadersParams::new(Headers::new(headers)))
            .await
            .map_err(cdp_error("set extra headers"))?;
    }

    if !options.cookies.is_empty() {
        let cookies = options
            .cookies
            .iter()
            .map(|(name, value)| {
                CookieParam::builder()
                    .name(name.as_str())
                    .value(value.as_str())
                    .url(target_url)
                    .build()
                    .map_err(AppError::BrowserError)
            })
            .collect::<Result<Vec<_>, _>>()?;
        page.set_cookies(cookies)
            .await
            .map_err(cdp_error("set cookies"))?;
    }

    let blocked = options.effective_block_list();
    if !blocked.is_empty() {
        intercept_requests(page, blocked).await?;
    }
    Ok(())
}

/// Pause every request and fail the ones whose resource class is blocked.
async fn intercept_requests(page: &Page, blocked: Vec<ResourceClass>) -> Result<(), AppError> {
    let mut paused = page
        .event_listener::<EventRequestPaused>()
        .await
        .map_err(cdp_error("listen for requests"))?;
    page.execute(EnableParams::default())
        .await
        .map_err(cdp_error("enable request interception"))?;

    let page = page.clone();
    tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let class = ResourceClass::from_cdp(event.resource_type.as_ref());
            let outcome = if class.is_some_and(|c| blocked.contains(&c)) {
                page.execute(FailRequestParams::new(
                    event.request_id.clone(),
                    ErrorReason::BlockedByClient,
                ))
                .await
                .map(|_| ())
            } else {
                page.execute(ContinueRequestParams::new(event.request_id.clone()))
                    .await
                    .map(|_| ())
            };
            if let Err(e) = outcome {
                // The page closing ends the stream; anything else is worth a line.
                tracing::debug!(error = %e, "Request interception reply failed");
            }
        }
    });
    Ok(())
}

/// Best-effort wait for `selector`; a timeout is not an error.
async fn wait_for_ready(page: &Page, selector: &str, timeout: Duration) {
    let found = tokio::time::timeout(timeout, async {
        loop {
            if page.find_element(selector).await.is_ok() {
                return;
            }
            tokio::time::sleep(READY_POLL).await;
        }
    })
    .await;
    if found.is_err() {
        tracing::debug!(%selector, "Ready selector did not appear before timeout");
    }
}

/// Browser fetch strategy: renders the page in headless Chromium.
///
/// Each fetch launches an instance through the shared [`BrowserPool`] (so
/// the proxy for that fetch becomes the instance's upstream proxy), opens a
/// fresh page, and closes the page on every exit path.
#[derive(Clone)]
pub struct BrowserFetcher {
    pool: Arc<BrowserPool<ChromiumLauncher>>,
    rotation: Rotation,
}

impl BrowserFetcher {
    pub fn new(pool: Arc<BrowserPool<ChromiumLauncher>>, rotation: Rotation) -> Self {
        Self { pool, rotation }
    }

    pub fn pool(&self) -> &Arc<BrowserPool<ChromiumLauncher>> {
        &self.pool
    }

    async fn render(
        &self,
        url: &str,
        options: &ScrapeOptions,
        proxy: Option<&Proxy>,
        user_agent: &str,
    ) -> Result<FetchedPage, AppError> {
        let acquired = self.pool.acquire(proxy).await?;
        let page = acquired
            .instance
            .configure_page(options, user_agent, url)
            .await?;

        let started = Instant::now();
        let result = navigate_and_read(&page, url, options).await;
        if let Err(e) = page.close().await {
            tracing::debug!(instance = acquired.id, error = %e, "Failed to close page");
        }

        let (final_url, html) = result?;
        Ok(FetchedPage {
            url: final_url,
            html,
            status: 200,
            latency_ms: started.elapsed().as_millis() as u64,
            strategy: FetchStrategy::Browser,
        })
    }
}

/// Wait until a [`NETWORK_IDLE`] event follows a [`LIFECYCLE_INIT`].
///
/// Idle events from a load that began before the stream was opened are
/// ignored. Returns false when the stream ends or `timeout` passes first.
async fn wait_for_network_idle<S>(names: S, timeout: Duration) -> bool
where
    S: Stream<Item = String>,
{
    let mut names = std::pin::pin!(names);
    tokio::time::timeout(timeout, async {
        let mut loading = false;
        while let Some(name) = names.next().await {
            match name.as_str() {
                LIFECYCLE_INIT => loading = true,
                NETWORK_IDLE if loading => return true,
                _ => {}
            }
        }
        false
    })
    .await
    .unwrap_or(false)
}

async fn navigate_and_read(
    page: &Page,
    url: &str,
    options: &ScrapeOptions,
) -> Result<(String, String), AppError> {
    let timeout = options.timeout();
    let started = Instant::now();

    page.execute(SetLifecycleEventsEnabledParams::new(true))
        .await
        .map_err(cdp_error("enable lifecycle events"))?;
    let lifecycle = page
        .event_listener::<EventLifecycleEvent>()
        .await
        .map_err(cdp_error("listen for lifecycle events"))?;

    let navigation = tokio::time::timeout(timeout, async {
        page.goto(url)
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to navigate to {url}: {e}")))?;
        page.wait_for_navigation()
            .await
            .map_err(|e| AppError::BrowserError(format!("Navigation to {url} did not settle: {e}")))?;
        Ok::<(), AppError>(())
    })
    .await;
    match navigation {
        Ok(inner) => inner?,
        Err(_) => return Err(AppError::Timeout(options.timeout)),
    }

    let main_frame = page.mainframe().await.ok().flatten();
    let names = lifecycle.filter_map(move |event| {
        let in_main = main_frame.as_ref().is_none_or(|id| *id == event.frame_id);
        std::future::ready(in_main.then(|| event.name.clone()))
    });
    if !wait_for_network_idle(names, timeout.saturating_sub(started.elapsed())).await {
        return Err(AppError::Timeout(options.timeout));
    }
    tracing::debug!(%url, elapsed_ms = %started.elapsed().as_millis(), "Network idle");

    if let Some(selector) = &options.wait_for_selector {
        wait_for_ready(page, selector, timeout).await;
    }

    let html: String = page
        .evaluate("document.documentElement.outerHTML")
        .await
        .map_err(cdp_error("read page content"))?
        .into_value()
        .map_err(|e| AppError::BrowserError(format!("Failed to convert page content: {e}")))?;

    let final_url = page
        .url()
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| url.to_string());

    Ok((final_url, html))
}

impl Fetcher for BrowserFetcher {
    async fn fetch(&self, url: &str, options: &ScrapeOptions) -> Result<FetchedPage, AppError> {
        let lease = self.rotation.lease(options)?;
        pause_before_request(options.delay).await;

        let result = self
            .render(url, options, lease.proxy.as_ref(), &lease.user_agent)
            .await;
        match &result {
            Ok(page) => self.rotation.report_success(&lease, page.latency_ms),
            Err(e) if e.is_fetch_failure() => {
                tracing::debug!(%url, proxy = ?lease.proxy, error = %e, "Browser fetch failed");
                self.rotation.report_failure(&lease);
            }
            Err(_) => {}
        }
        result
    }
}
