use crate::error::AppError;
use crate::models::{DEFAULT_TIMEOUT_MS, ScrapeOptions};
use crate::rotation::Proxy;

/// Default browser pool capacity.
pub const DEFAULT_BROWSER_CAPACITY: usize = 3;

/// Default length of placeholder embeddings in vector exports.
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;

/// Engine-wide settings shared by the binaries.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub proxies: Vec<Proxy>,
    pub browser_capacity: usize,
    pub default_timeout_ms: u64,
    pub allow_private_urls: bool,
    pub embedding_dimensions: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            proxies: Vec::new(),
            browser_capacity: DEFAULT_BROWSER_CAPACITY,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            allow_private_urls: false,
            embedding_dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl EngineConfig {
    /// Read configuration from environment variables.
    ///
    /// - `GLEANER_PROXIES` (optional, comma-separated proxy addresses)
    /// - `GLEANER_BROWSER_CAPACITY` (optional, defaults to 3)
    /// - `GLEANER_DEFAULT_TIMEOUT_MS` (optional, defaults to 30000)
    /// - `GLEANER_ALLOW_PRIVATE_URLS` (optional, defaults to false)
    /// - `GLEANER_EMBEDDING_DIMENSIONS` (optional, defaults to 384)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, AppError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let proxies = match lookup("GLEANER_PROXIES") {
            None => Vec::new(),
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    Proxy::parse(s).map_err(|e| {
                        AppError::ConfigError(format!("Invalid GLEANER_PROXIES entry: {e}"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
        };

        let browser_capacity =
            positive(&lookup, "GLEANER_BROWSER_CAPACITY", DEFAULT_BROWSER_CAPACITY as u64)?
                as usize;
        let default_timeout_ms = positive(&lookup, "GLEANER_DEFAULT_TIMEOUT_MS", DEFAULT_TIMEOUT_MS)?;
        let embedding_dimensions = positive(
            &lookup,
            "GLEANER_EMBEDDING_DIMENSIONS",
            DEFAULT_EMBEDDING_DIMENSIONS as u64,
        )? as usize;

        let allow_private_urls = match lookup("GLEANER_ALLOW_PRIVATE_URLS") {
            None => false,
            Some(raw) => match raw.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                _ => {
                    return Err(AppError::ConfigError(format!(
                        "Invalid GLEANER_ALLOW_PRIVATE_URLS '{raw}': expected true or false"
                    )));
                }
            },
        };

        Ok(Self {
            proxies,
            browser_capacity,
            default_timeout_ms,
            allow_private_urls,
            embedding_dimensions,
        })
    }

    /// Option defaults for requests that leave fields unset.
    pub fn default_options(&self) -> ScrapeOptions {
        ScrapeOptions {
            timeout: self.default_timeout_ms,
            ..Default::default()
        }
    }

    /// Deserialize caller-supplied options over [`default_options`](Self::default_options).
    ///
    /// Only the top-level keys present in `raw` override the defaults. The merged
    /// options must pass [`ScrapeOptions::validate`].
    pub fn options_from_json(
        &self,
        raw: Option<&serde_json::Value>,
    ) -> Result<ScrapeOptions, AppError> {
        let mut merged = serde_json::to_value(self.default_options())?;
        match raw {
            None | Some(serde_json::Value::Null) => {}
            Some(serde_json::Value::Object(fields)) => {
                if let serde_json::Value::Object(base) = &mut merged {
                    for (key, value) in fields {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
            Some(other) => {
                return Err(AppError::ValidationError(format!(
                    "options must be an object, got {other}"
                )));
            }
        }
        let options: ScrapeOptions = serde_json::from_value(merged)
            .map_err(|e| AppError::ValidationError(format!("Invalid options: {e}")))?;
        options.validate()?;
        Ok(options)
    }
}

fn positive<L>(lookup: &L, key: &str, default: u64) -> Result<u64, AppError>
where
    L: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => {
            let parsed: u64 = raw.trim().parse().map_err(|_| {
                AppError::ConfigError(format!(
                    "Invalid {key} '{raw}': must be a positive integer"
                ))
            })?;
            if parsed == 0 {
                return Err(AppError::ConfigError(format!("{key} must be at least 1")));
            }
            Ok(parsed)
        }
    }
}
