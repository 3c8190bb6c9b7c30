use thiserror::Error;

/// Application-wide error types for Gleaner.
#[derive(Error, Debug)]
pub enum AppError {
    /// Rejected input (malformed URL, missing selector field, bad option).
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// HTTP request failed or returned a non-success status.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Request or navigation timed out.
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// Network/connection error (DNS, refused, reset, proxy unreachable).
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Browser launch, page setup or navigation failed.
    #[error("Browser error: {0}")]
    BrowserError(String),

    /// A single selector could not be parsed or applied.
    #[error("Selector error: {0}")]
    SelectorError(String),

    /// Dataset export failed.
    #[error("Export error: {0}")]
    ExportError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error came from acquiring the page itself.
    ///
    /// Fetch failures are reported to the rotation pools against the proxy
    /// and identity that were in use.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            AppError::HttpError(_)
                | AppError::Timeout(_)
                | AppError::NetworkError(_)
                | AppError::BrowserError(_)
        )
    }
}
