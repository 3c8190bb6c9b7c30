//! Proxy and identity rotation pools.
//!
//! A [`RotationPool`] hands out members round-robin, tracks per-member
//! success/failure counters and prunes members that keep failing:
//!
//! ```text
//! active --[failures > 5 and successes/failures < 0.5]--> inactive
//! all inactive --[next()]--> all active, selection restarts at the first member
//! ```
//!
//! Every operation takes the pool's lock for its whole duration, so
//! selection and counter updates never interleave.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{ProxyMode, ScrapeOptions};

/// Failures tolerated before a member becomes eligible for deactivation.
pub const FAILURE_THRESHOLD: u64 = 5;

/// Members below this success/failure ratio are deactivated once past the threshold.
pub const MIN_SUCCESS_RATIO: f64 = 0.5;

/// Used when the identity pool is empty and no explicit user agent is given.
pub const FALLBACK_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Something a [`RotationPool`] can rotate through.
pub trait PoolMember: Clone + Send + Sync + 'static {
    /// Stable identifier used to report outcomes back to the pool.
    fn key(&self) -> &str;
}

/// Health counters for one pool member.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberStats {
    pub success_count: u64,
    pub failure_count: u64,
    pub last_used: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub last_latency_ms: Option<u64>,
    pub avg_latency_ms: Option<f64>,
}

impl Default for MemberStats {
    fn default() -> Self {
        Self {
            success_count: 0,
            failure_count: 0,
            last_used: None,
            is_active: true,
            last_latency_ms: None,
            avg_latency_ms: None,
        }
    }
}

impl MemberStats {
    fn should_deactivate(&self) -> bool {
        if self.failure_count <= FAILURE_THRESHOLD {
            return false;
        }
        (self.success_count as f64 / self.failure_count as f64) < MIN_SUCCESS_RATIO
    }
}

/// A member together with its counters.
#[derive(Debug, Clone, Serialize)]
pub struct PoolEntry<M> {
    pub member: M,
    pub stats: MemberStats,
}

struct PoolState<M> {
    entries: Vec<PoolEntry<M>>,
    cursor: usize,
}

impl<M> PoolState<M> {
    fn reactivate_if_exhausted(&mut self) -> bool {
        if self.entries.is_empty() || self.entries.iter().any(|e| e.stats.is_active) {
            return false;
        }
        for entry in &mut self.entries {
            entry.stats.is_active = true;
        }
        self.cursor = 0;
        true
    }

    fn position(&self, key: &str) -> Option<usize>
    where
        M: PoolMember,
    {
        self.entries.iter().position(|e| e.member.key() == key)
    }
}

/// Round-robin pool with failure-driven eviction.
pub struct RotationPool<M> {
    name: &'static str,
    state: Mutex<PoolState<M>>,
}

impl<M: PoolMember> RotationPool<M> {
    /// Create a pool. Members with a duplicate key are dropped.
    pub fn new(name: &'static str, members: impl IntoIterator<Item = M>) -> Self {
        let pool = Self {
            name,
            state: Mutex::new(PoolState {
                entries: Vec::new(),
                cursor: 0,
            }),
        };
        for member in members {
            pool.add(member);
        }
        pool
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<M>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a member. Returns false if a member with the same key exists.
    pub fn add(&self, member: M) -> bool {
        let mut state = self.lock();
        if state.position(member.key()).is_some() {
            return false;
        }
        state.entries.push(PoolEntry {
            member,
            stats: MemberStats::default(),
        });
        true
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.lock()
            .entries
            .iter()
            .filter(|e| e.stats.is_active)
            .count()
    }

    /// Next active member in round-robin order.
    ///
    /// If every member is inactive, all are reactivated and selection
    /// restarts from the first member. Returns `None` only for an empty pool.
    pub fn next(&self) -> Option<M> {
        let mut state = self.lock();
        let len = state.entries.len();
        if len == 0 {
            return None;
        }
        if state.reactivate_if_exhausted() {
            tracing::warn!(pool = self.name, members = len, "All members inactive, reactivating pool");
        }

        let start = state.cursor % len;
        let mut chosen = None;
        for offset in 0..len {
            let idx = (start + offset) % len;
            if state.entries[idx].stats.is_active {
                chosen = Some(idx);
                break;
            }
        }
        let idx = chosen?;

        state.cursor = (idx + 1) % len;
        let entry = &mut state.entries[idx];
        entry.stats.last_used = Some(Utc::now());
        Some(entry.member.clone())
    }

    /// Record a successful use. Unknown keys are ignored.
    pub fn report_success(&self, key: &str, latency_ms: u64) {
        let mut state = self.lock();
        let Some(idx) = state.position(key) else {
            return;
        };
        let stats = &mut state.entries[idx].stats;
        stats.success_count += 1;
        stats.last_latency_ms = Some(latency_ms);
        let n = stats.success_count as f64;
        stats.avg_latency_ms = Some(match stats.avg_latency_ms {
            Some(avg) => avg + (latency_ms as f64 - avg) / n,
            None => latency_ms as f64,
        });
    }

    /// Record a failed use, deactivating the member if it keeps failing.
    /// Unknown keys are ignored.
    pub fn report_failure(&self, key: &str) {
        let mut state = self.lock();
        let Some(idx) = state.position(key) else {
            return;
        };
        let stats = &mut state.entries[idx].stats;
        stats.failure_count += 1;
        if stats.is_active && stats.should_deactivate() {
            stats.is_active = false;
            tracing::warn!(
                pool = self.name,
                member = %key,
                successes = stats.success_count,
                failures = stats.failure_count,
                "Deactivating pool member"
            );
        }
    }

    pub fn stats(&self, key: &str) -> Option<MemberStats> {
        let state = self.lock();
        state.position(key).map(|idx| state.entries[idx].stats.clone())
    }

    /// Copy of every member with its counters, in pool order.
    pub fn snapshot(&self) -> Vec<PoolEntry<M>> {
        self.lock().entries.clone()
    }
}

// ---------------------------------------------------------------------------
// Proxies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks5,
}

impl ProxyProtocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks5 => "socks5",
        }
    }
}

/// An upstream proxy, addressed as `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proxy {
    pub address: String,
    pub protocol: ProxyProtocol,
}

impl Proxy {
    /// Parse `scheme://host:port` or bare `host:port` (HTTP).
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let raw = raw.trim();
        let (protocol, rest) = match raw.split_once("://") {
            Some(("http", rest)) => (ProxyProtocol::Http, rest),
            Some(("https", rest)) => (ProxyProtocol::Https, rest),
            Some(("socks5", rest)) | Some(("socks5h", rest)) => (ProxyProtocol::Socks5, rest),
            Some((scheme, _)) => {
                return Err(AppError::ValidationError(format!(
                    "Unsupported proxy scheme '{scheme}'"
                )));
            }
            None => (ProxyProtocol::Http, raw),
        };
        let address = rest.trim_end_matches('/');
        let valid = address
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if !valid {
            return Err(AppError::ValidationError(format!(
                "Invalid proxy address '{raw}': expected host:port"
            )));
        }
        Ok(Self {
            address: address.to_string(),
            protocol,
        })
    }

    pub fn url(&self) -> String {
        format!("{}://{}", self.protocol.scheme(), self.address)
    }
}

impl PoolMember for Proxy {
    fn key(&self) -> &str {
        &self.address
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url())
    }
}

pub type ProxyPool = RotationPool<Proxy>;

// ---------------------------------------------------------------------------
// Identities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserFamily {
    Chrome,
    Firefox,
    Safari,
    Edge,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Windows,
    Macos,
    Linux,
    Android,
    Ios,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Desktop,
    Mobile,
    Tablet,
}

/// A simulated client fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_agent: String,
    /// Relative popularity used by weighted selection.
    pub weight: u32,
    pub browser: BrowserFamily,
    pub os: OsFamily,
    pub device: DeviceClass,
}

impl Identity {
    /// Build an identity, inferring browser, OS and device from the UA string.
    pub fn new(user_agent: impl Into<String>, weight: u32) -> Self {
        let user_agent = user_agent.into();
        let ua = user_agent.as_str();

        let browser = if ua.contains("Edg/") {
            BrowserFamily::Edge
        } else if ua.contains("Firefox/") || ua.contains("FxiOS") {
            BrowserFamily::Firefox
        } else if ua.contains("Chrome/") || ua.contains("CriOS") {
            BrowserFamily::Chrome
        } else if ua.contains("Safari/") {
            BrowserFamily::Safari
        } else {
            BrowserFamily::Other
        };

        let os = if ua.contains("iPhone") || ua.contains("iPad") {
            OsFamily::Ios
        } else if ua.contains("Android") {
            OsFamily::Android
        } else if ua.contains("Windows") {
            OsFamily::Windows
        } else if ua.contains("Mac OS X") || ua.contains("Macintosh") {
            OsFamily::Macos
        } else if ua.contains("Linux") {
            OsFamily::Linux
        } else {
            OsFamily::Other
        };

        let device = if ua.contains("iPad") || (ua.contains("Android") && !ua.contains("Mobile"))
        {
            DeviceClass::Tablet
        } else if ua.contains("Mobile") || ua.contains("iPhone") {
            DeviceClass::Mobile
        } else {
            DeviceClass::Desktop
        };

        Self {
            user_agent,
            weight,
            browser,
            os,
            device,
        }
    }
}

impl PoolMember for Identity {
    fn key(&self) -> &str {
        &self.user_agent
    }
}

/// Narrows identity selection. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdentityFilter {
    pub browser: Option<BrowserFamily>,
    pub os: Option<OsFamily>,
    pub device: Option<DeviceClass>,
}

impl IdentityFilter {
    pub fn matches(&self, identity: &Identity) -> bool {
        self.browser.is_none_or(|b| b == identity.browser)
            && self.os.is_none_or(|o| o == identity.os)
            && self.device.is_none_or(|d| d == identity.device)
    }
}

pub type IdentityPool = RotationPool<Identity>;

impl RotationPool<Identity> {
    fn pick_weighted<P: Fn(&Identity) -> bool>(&self, predicate: P) -> Option<Identity> {
        let mut state = self.lock();
        if state.reactivate_if_exhausted() {
            tracing::warn!(pool = self.name, "All members inactive, reactivating pool");
        }

        let candidates: Vec<usize> = state
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.stats.is_active && predicate(&e.member))
            .map(|(idx, _)| idx)
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let total: u64 = candidates
            .iter()
            .map(|&idx| u64::from(state.entries[idx].member.weight.max(1)))
            .sum();
        let mut roll = rand::rng().random_range(0..total);
        for idx in candidates {
            let weight = u64::from(state.entries[idx].member.weight.max(1));
            if roll < weight {
                let entry = &mut state.entries[idx];
                entry.stats.last_used = Some(Utc::now());
                return Some(entry.member.clone());
            }
            roll -= weight;
        }
        None
    }

    /// Weighted-random choice among active identities.
    pub fn weighted(&self) -> Option<Identity> {
        self.pick_weighted(|_| true)
    }

    /// Weighted-random choice among identities matching `filter`, falling back
    /// to an unfiltered weighted choice when nothing matches.
    pub fn select(&self, filter: &IdentityFilter) -> Option<Identity> {
        self.pick_weighted(|identity| filter.matches(identity))
            .or_else(|| self.weighted())
    }
}

/// Built-in identity set, weighted by rough market share.
pub fn default_identities() -> Vec<Identity> {
    [
        ("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36", 30),
        ("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36", 15),
        ("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36 Edg/126.0.0.0", 10),
        ("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15", 10),
        ("Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:127.0) Gecko/20100101 Firefox/127.0", 8),
        ("Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36", 5),
        ("Mozilla/5.0 (iPhone; CPU iPhone OS 17_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Mobile/15E148 Safari/604.1", 12),
        ("Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Mobile Safari/537.36", 10),
    ]
    .into_iter()
    .map(|(ua, weight)| Identity::new(ua, weight))
    .collect()
}

// ---------------------------------------------------------------------------
// Per-request lease
// ---------------------------------------------------------------------------

/// Proxy and identity chosen for one request.
#[derive(Debug, Clone)]
pub struct RotationLease {
    pub proxy: Option<Proxy>,
    pub user_agent: String,
    rotated_identity: bool,
}

/// Shared proxy and identity pools handed to every fetch strategy.
#[derive(Clone)]
pub struct Rotation {
    pub proxies: Arc<ProxyPool>,
    pub identities: Arc<IdentityPool>,
}

impl Rotation {
    pub fn new(proxies: ProxyPool, identities: IdentityPool) -> Self {
        Self {
            proxies: Arc::new(proxies),
            identities: Arc::new(identities),
        }
    }

    /// Pools seeded with the given proxies and the built-in identity set.
    pub fn with_proxies(proxies: Vec<Proxy>) -> Self {
        Self::new(
            ProxyPool::new("proxy", proxies),
            IdentityPool::new("identity", default_identities()),
        )
    }

    /// Choose the proxy and user agent for a request.
    pub fn lease(&self, options: &ScrapeOptions) -> Result<RotationLease, AppError> {
        let proxy = match &options.proxy {
            ProxyMode::None => None,
            ProxyMode::Auto => self.proxies.next(),
            ProxyMode::Explicit(raw) => Some(Proxy::parse(raw)?),
        };

        let (user_agent, rotated_identity) = match &options.user_agent {
            Some(ua) => (ua.clone(), false),
            None => {
                let chosen = match &options.identity {
                    Some(filter) => self.identities.select(filter),
                    None => self.identities.next(),
                };
                match chosen {
                    Some(identity) => (identity.user_agent, true),
                    None => (FALLBACK_USER_AGENT.to_string(), false),
                }
            }
        };

        Ok(RotationLease {
            proxy,
            user_agent,
            rotated_identity,
        })
    }

    pub fn report_success(&self, lease: &RotationLease, latency_ms: u64) {
        if let Some(proxy) = &lease.proxy {
            self.proxies.report_success(proxy.key(), latency_ms);
        }
        if lease.rotated_identity {
            self.identities.report_success(&lease.user_agent, latency_ms);
        }
    }

    pub fn report_failure(&self, lease: &RotationLease) {
        if let Some(proxy) = &lease.proxy {
            self.proxies.report_failure(proxy.key());
        }
        if lease.rotated_identity {
            self.identities.report_failure(&lease.user_agent);
        }
    }
}

impl Default for Rotation {
    fn default() -> Self {
        Self::with_proxies(Vec::new())
    }
}
