use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AppError;
use crate::rotation::IdentityFilter;

/// Default fetch/navigation timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Largest accepted pre-request delay, in seconds.
pub const MAX_DELAY_SECS: f64 = 3600.0;

/// How a selector's matched element is read.
///
/// `attribute` carries the attribute name it reads, so an attribute selector
/// without a name cannot be constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SelectorKind {
    /// Trimmed text of the first match.
    Text,
    /// Inner markup of the first match.
    Html,
    /// Named attribute of the first match.
    Attribute { attribute: String },
    /// `src` of the first match.
    Image,
    /// `href` of the first match.
    Link,
    /// Trimmed texts of all matches.
    List,
}

impl SelectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectorKind::Text => "text",
            SelectorKind::Html => "html",
            SelectorKind::Attribute { .. } => "attribute",
            SelectorKind::Image => "image",
            SelectorKind::Link => "link",
            SelectorKind::List => "list",
        }
    }
}

/// Declarative descriptor of which element(s) to read and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    /// CSS selector expression.
    pub selector: String,
    #[serde(flatten)]
    pub kind: SelectorKind,
    /// Output field name; the raw selector string is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Selector {
    pub fn new(selector: impl Into<String>, kind: SelectorKind) -> Self {
        Self {
            selector: selector.into(),
            kind,
            name: None,
        }
    }

    pub fn text(selector: impl Into<String>) -> Self {
        Self::new(selector, SelectorKind::Text)
    }

    pub fn list(selector: impl Into<String>) -> Self {
        Self::new(selector, SelectorKind::List)
    }

    pub fn attribute(selector: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::new(
            selector,
            SelectorKind::Attribute {
                attribute: attribute.into(),
            },
        )
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Key under which this selector's value is stored in a record.
    pub fn key(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.selector)
    }
}

/// Which proxy a fetch goes through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProxyMode {
    /// Direct connection.
    #[default]
    None,
    /// Rotate through the proxy pool.
    Auto,
    /// A fixed proxy address.
    Explicit(String),
}

impl From<String> for ProxyMode {
    fn from(value: String) -> Self {
        match value.trim() {
            "" | "none" => ProxyMode::None,
            "auto" => ProxyMode::Auto,
            other => ProxyMode::Explicit(other.to_string()),
        }
    }
}

impl From<ProxyMode> for String {
    fn from(mode: ProxyMode) -> Self {
        match mode {
            ProxyMode::None => "none".to_string(),
            ProxyMode::Auto => "auto".to_string(),
            ProxyMode::Explicit(address) => address,
        }
    }
}

/// Post-selector extraction behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    #[default]
    Raw,
    Cleaned,
    Semantic,
    Vectorized,
}

/// Opportunistic hints for cleaned/vectorized content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormatOptions {
    pub skip_headers: bool,
    pub skip_footers: bool,
    pub exclude_ads: bool,
    pub exclude_media: bool,
    pub summarize: bool,
}

/// Resource classes the browser strategy can refuse to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
    Image,
    Stylesheet,
    Font,
    Media,
    Websocket,
    Script,
    Xhr,
    Fetch,
}

impl ResourceClass {
    /// Map a DevTools protocol resource type name onto a class.
    pub fn from_cdp(name: &str) -> Option<Self> {
        match name {
            "Image" => Some(ResourceClass::Image),
            "Stylesheet" => Some(ResourceClass::Stylesheet),
            "Font" => Some(ResourceClass::Font),
            "Media" => Some(ResourceClass::Media),
            "WebSocket" => Some(ResourceClass::Websocket),
            "Script" => Some(ResourceClass::Script),
            "XHR" => Some(ResourceClass::Xhr),
            "Fetch" => Some(ResourceClass::Fetch),
            _ => None,
        }
    }
}

/// Browser viewport in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1366,
            height: 768,
        }
    }
}

/// Per-job fetch and extraction options. Immutable once the job starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScrapeOptions {
    /// Fetch/navigation timeout in milliseconds.
    pub timeout: u64,
    pub proxy: ProxyMode,
    /// Explicit user agent; rotated from the identity pool when absent.
    pub user_agent: Option<String>,
    /// Filter for identity selection when no explicit user agent is given.
    pub identity: Option<IdentityFilter>,
    pub cookies: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub follow_redirects: bool,
    /// Pre-request delay in seconds, jittered to `delay * (0.5 + rand)`.
    pub delay: Option<f64>,
    /// Render with the browser strategy instead of plain HTTP.
    pub javascript: bool,
    /// Ready selector awaited (best-effort) after browser navigation.
    pub wait_for_selector: Option<String>,
    /// Resource classes aborted by the browser strategy.
    pub block_resources: Vec<ResourceClass>,
    pub viewport: Viewport,
    pub pagination: bool,
    pub pagination_selector: Option<String>,
    pub max_pages: u32,
    pub extraction_mode: ExtractionMode,
    pub format_options: FormatOptions,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT_MS,
            proxy: ProxyMode::None,
            user_agent: None,
            identity: None,
            cookies: BTreeMap::new(),
            headers: BTreeMap::new(),
            follow_redirects: true,
            delay: None,
            javascript: false,
            wait_for_selector: None,
            block_resources: Vec::new(),
            viewport: Viewport::default(),
            pagination: false,
            pagination_selector: None,
            max_pages: 1,
            extraction_mode: ExtractionMode::Raw,
            format_options: FormatOptions::default(),
        }
    }
}

impl ScrapeOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// Reject timeouts and delays the fetchers cannot honor.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.timeout == 0 {
            return Err(AppError::ValidationError(
                "Timeout must be greater than zero".into(),
            ));
        }
        if let Some(delay) = self.delay
            && !(delay.is_finite() && (0.0..=MAX_DELAY_SECS).contains(&delay))
        {
            return Err(AppError::ValidationError(format!(
                "Invalid delay: {delay} (expected 0 to {MAX_DELAY_SECS} seconds)"
            )));
        }
        Ok(())
    }

    /// Pagination selector, if pagination is enabled for more than one page.
    pub fn pagination_target(&self) -> Option<&str> {
        if self.pagination && self.max_pages > 1 {
            self.pagination_selector.as_deref().filter(|s| !s.trim().is_empty())
        } else {
            None
        }
    }

    /// Resource classes to abort. Media and websockets ride along with any
    /// configured class.
    pub fn effective_block_list(&self) -> Vec<ResourceClass> {
        if self.block_resources.is_empty() {
            return Vec::new();
        }
        let mut list = self.block_resources.clone();
        for extra in [ResourceClass::Media, ResourceClass::Websocket] {
            if !list.contains(&extra) {
                list.push(extra);
            }
        }
        list
    }
}

/// A single extracted value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
    Map(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }
}

/// Heading plus full text of an article-like container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    pub content: String,
}

/// Result of extracting one page (or several merged pages).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tables: Option<Vec<Vec<Vec<String>>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lists: Option<Vec<Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub articles: Option<Vec<Article>>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl ExtractedRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: FieldValue) {
        self.fields.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
            && self.tables.is_none()
            && self.lists.is_none()
            && self.articles.is_none()
    }
}

/// Which fetch strategy produced a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStrategy {
    Static,
    Browser,
}

/// Markup acquired by a fetch strategy.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects; relative links resolve against it.
    pub url: String,
    pub html: String,
    pub status: u16,
    pub latency_ms: u64,
    pub strategy: FetchStrategy,
}

impl FetchedPage {
    pub fn new(url: impl Into<String>, html: impl Into<String>, strategy: FetchStrategy) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
            status: 200,
            latency_ms: 0,
            strategy,
        }
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_hash_consistency() {
        let h1 = compute_hash("hello world");
        let h2 = compute_hash("hello world");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert_ne!(h1, compute_hash("hello"));
    }

    #[test]
    fn selector_deserializes_tagged_kind() {
        let sel: Selector = serde_json::from_value(serde_json::json!({
            "selector": "a.more",
            "type": "attribute",
            "attribute": "data-id",
            "name": "id"
        }))
        .unwrap();
        assert_eq!(
            sel.kind,
            SelectorKind::Attribute {
                attribute: "data-id".into()
            }
        );
        assert_eq!(sel.key(), "id");

        let plain: Selector =
            serde_json::from_value(serde_json::json!({"selector": "h1", "type": "text"})).unwrap();
        assert_eq!(plain.key(), "h1");
    }

    #[test]
    fn attribute_selector_requires_attribute_name() {
        let result: Result<Selector, _> = serde_json::from_value(serde_json::json!({
            "selector": "a",
            "type": "attribute"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn options_reject_unbounded_delay() {
        let mut options = ScrapeOptions {
            delay: Some(2.5),
            ..Default::default()
        };
        assert!(options.validate().is_ok());

        for delay in [1e300, f64::INFINITY, f64::NAN, -1.0, MAX_DELAY_SECS + 1.0] {
            options.delay = Some(delay);
            assert!(
                matches!(options.validate(), Err(AppError::ValidationError(_))),
                "{delay}"
            );
        }

        options.delay = None;
        options.timeout = 0;
        assert!(options.validate().is_err());
    }

    #[test]
    fn options_use_camel_case_and_defaults() {
        let opts: ScrapeOptions = serde_json::from_value(serde_json::json!({
            "proxy": "auto",
            "userAgent": "Bot/1.0",
            "paginationSelector": "a.next",
            "pagination": true,
            "maxPages": 3,
            "extractionMode": "semantic",
            "formatOptions": {"skipHeaders": true}
        }))
        .unwrap();
        assert_eq!(opts.proxy, ProxyMode::Auto);
        assert_eq!(opts.timeout, DEFAULT_TIMEOUT_MS);
        assert!(opts.follow_redirects);
        assert_eq!(opts.user_agent.as_deref(), Some("Bot/1.0"));
        assert_eq!(opts.pagination_target(), Some("a.next"));
        assert_eq!(opts.extraction_mode, ExtractionMode::Semantic);
        assert!(opts.format_options.skip_headers);
    }

    #[test]
    fn proxy_mode_parses_explicit_address() {
        assert_eq!(ProxyMode::from("none".to_string()), ProxyMode::None);
        assert_eq!(
            ProxyMode::from("socks5://10.0.0.1:1080".to_string()),
            ProxyMode::Explicit("socks5://10.0.0.1:1080".into())
        );
        let back: String = ProxyMode::Auto.into();
        assert_eq!(back, "auto");
    }

    #[test]
    fn pagination_requires_more_than_one_page() {
        let opts = ScrapeOptions {
            pagination: true,
            pagination_selector: Some("a.next".into()),
            max_pages: 1,
            ..Default::default()
        };
        assert_eq!(opts.pagination_target(), None);
    }

    #[test]
    fn block_list_adds_media_and_websocket() {
        let opts = ScrapeOptions {
            block_resources: vec![ResourceClass::Image, ResourceClass::Font],
            ..Default::default()
        };
        let list = opts.effective_block_list();
        assert!(list.contains(&ResourceClass::Media));
        assert!(list.contains(&ResourceClass::Websocket));
        assert_eq!(list.len(), 4);

        assert!(ScrapeOptions::default().effective_block_list().is_empty());
    }

    #[test]
    fn record_serializes_fields_flat_with_sections() {
        let mut record = ExtractedRecord::new();
        record.insert("title", FieldValue::Text("Hello".into()));
        record.insert("tags", FieldValue::List(vec!["a".into(), "b".into()]));
        record.lists = Some(vec![vec!["one".into()]]);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["title"], "Hello");
        assert_eq!(json["tags"][1], "b");
        assert_eq!(json["lists"][0][0], "one");
        assert!(json.get("tables").is_none());
    }
}
