use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use gleaner_core::error::AppError;
use gleaner_core::models::{FetchStrategy, FetchedPage, ScrapeOptions};
use gleaner_core::rotation::{Rotation, RotationLease};
use gleaner_core::throttle::pause_before_request;
use gleaner_core::traits::Fetcher;
use reqwest::Client;
use reqwest::header::{COOKIE, REFERER, USER_AGENT};
use reqwest::redirect::Policy;
use url::Url;

/// Redirect hops followed when `followRedirects` is on.
const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    proxy: Option<String>,
    follow_redirects: bool,
}

/// Static fetch strategy: a plain HTTP GET through reqwest.
///
/// Every request draws its proxy and identity from the shared [`Rotation`]
/// and reports the outcome back to it. By default, SSRF protection is
/// **enabled**: requests to private/reserved IP ranges are blocked. Use
/// [`allow_private_urls`](Self::allow_private_urls) to disable this (e.g., for
/// CLI usage where the user controls the machine).
#[derive(Clone)]
pub struct StaticFetcher {
    rotation: Rotation,
    clients: Arc<Mutex<HashMap<ClientKey, Client>>>,
    ssrf_protection: bool,
}

impl StaticFetcher {
    pub fn new(rotation: Rotation) -> Self {
        Self {
            rotation,
            clients: Arc::new(Mutex::new(HashMap::new())),
            ssrf_protection: true,
        }
    }

    /// Disable SSRF protection, allowing requests to private/reserved IPs.
    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }

    pub fn ssrf_protection(&self) -> bool {
        self.ssrf_protection
    }

    pub fn rotation(&self) -> &Rotation {
        &self.rotation
    }

    /// Clients are cached per proxy and redirect policy; timeouts are set per request.
    fn client_for(&self, key: ClientKey) -> Result<Client, AppError> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let policy = if key.follow_redirects {
            Policy::limited(MAX_REDIRECTS)
        } else {
            Policy::none()
        };
        let mut builder = Client::builder().redirect(policy);
        if let Some(proxy_url) = &key.proxy {
            let proxy = reqwest::Proxy::all(proxy_url.as_str())
                .map_err(|e| AppError::ValidationError(format!("Invalid proxy {proxy_url}: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        clients.insert(key, client.clone());
        Ok(client)
    }

    async fn send(
        &self,
        url: &str,
        options: &ScrapeOptions,
        lease: &RotationLease,
    ) -> Result<FetchedPage, AppError> {
        let client = self.client_for(ClientKey {
            proxy: lease.proxy.as_ref().map(|p| p.url()),
            follow_redirects: options.follow_redirects,
        })?;

        let mut request = client
            .get(url)
            .timeout(options.timeout())
            .header(USER_AGENT, lease.user_agent.as_str());
        if let Some(referer) = origin_referer(url) {
            request = request.header(REFERER, referer);
        }
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if !options.cookies.is_empty() {
            let cookie = options
                .cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; ");
            request = request.header(COOKIE, cookie);
        }

        let started = Instant::now();
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(options.timeout)
            } else if e.is_builder() {
                AppError::ValidationError(format!("Invalid request: {e}"))
            } else if e.is_connect() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else {
                AppError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }

        let final_url = response.url().to_string();
        let html = response.text().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(options.timeout)
            } else {
                AppError::HttpError(format!("Failed to read response body: {e}"))
            }
        })?;

        Ok(FetchedPage {
            url: final_url,
            html,
            status: status.as_u16(),
            latency_ms: started.elapsed().as_millis() as u64,
            strategy: FetchStrategy::Static,
        })
    }
}

impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &str, options: &ScrapeOptions) -> Result<FetchedPage, AppError> {
        if self.ssrf_protection {
            validate_url(url).await?;
        }

        let lease = self.rotation.lease(options)?;
        pause_before_request(options.delay).await;

        let result = self.send(url, options, &lease).await;
        match &result {
            Ok(page) => self.rotation.report_success(&lease, page.latency_ms),
            Err(e) if e.is_fetch_failure() => {
                tracing::debug!(%url, proxy = ?lease.proxy, error = %e, "Static fetch failed");
                self.rotation.report_failure(&lease);
            }
            Err(_) => {}
        }
        result
    }
}

/// `scheme://host[:port]/` of the target, sent as `Referer`.
pub(crate) fn origin_referer(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let origin = parsed.origin();
    origin
        .is_tuple()
        .then(|| format!("{}/", origin.ascii_serialization()))
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Validate a URL to prevent server-side request forgery (SSRF).
///
/// 1. Only allow `http` and `https` schemes.
/// 2. Resolve the hostname via DNS.
/// 3. Reject if any resolved IP is private/reserved.
pub(crate) async fn validate_url(url: &str) -> Result<(), AppError> {
    let parsed =
        Url::parse(url).map_err(|e| AppError::ValidationError(format!("Invalid URL: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::ValidationError(format!(
                "URL scheme '{scheme}' is not allowed (only http/https)"
            )));
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::ValidationError("URL has no host".to_string()))?;

    // IP literals are checked directly; brackets come off IPv6 hosts.
    let literal = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        if is_private_ip(ip) {
            return Err(AppError::ValidationError(format!(
                "SSRF blocked: {host} resolves to private/reserved IP"
            )));
        }
        return Ok(());
    }

    let port = parsed.port_or_known_default().unwrap_or(80);
    let addr = format!("{host}:{port}");
    let addrs: Vec<_> = tokio::net::lookup_host(&addr)
        .await
        .map_err(|e| AppError::NetworkError(format!("DNS resolution failed for {host}: {e}")))?
        .collect();

    if addrs.is_empty() {
        return Err(AppError::NetworkError(format!(
            "DNS resolution returned no addresses for {host}"
        )));
    }

    for socket_addr in &addrs {
        if is_private_ip(socket_addr.ip()) {
            return Err(AppError::ValidationError(format!(
                "SSRF blocked: {host} resolves to private/reserved IP {}",
                socket_addr.ip()
            )));
        }
    }

    Ok(())
}

/// Check if an IP address is in a private/reserved/link-local range.
fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local() // 169.254.0.0/16, cloud metadata
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64 // 100.64.0.0/10 (CGN)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xFFC0) == 0xFE80 // fe80::/10
                || (v6.segments()[0] & 0xFE00) == 0xFC00 // fc00::/7
                || match v6.to_ipv4_mapped() {
                    Some(v4) => is_private_ip(IpAddr::V4(v4)),
                    None => false,
                }
        }
    }
}
