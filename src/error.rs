//! Error types raised at the provider boundary.

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

/// Maximum number of characters of an upstream body kept in an error.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Errors raised by provider adapters and other network clients.
///
/// These describe what went wrong on the wire. The dispatcher turns them into
/// a [`GenerationError`](crate::video::GenerationError) before they reach a caller.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// API key missing or rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Rate limit exceeded.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    /// Operation timed out (polling or the whole call).
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Content was blocked by safety filters.
    #[error("content blocked: {0}")]
    ContentBlocked(String),

    /// Invalid request parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Account has no credit or billing is disabled.
    #[error("billing error: {0}")]
    Billing(String),

    /// Provider reported success but returned nothing usable.
    #[error("empty result: {0}")]
    EmptyResult(String),

    /// Response did not have the expected shape.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Network or HTTP error.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Failed to decode base64 data.
    #[error("failed to decode: {0}")]
    Decode(String),

    /// I/O error (reading images, writing videos, credential files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generation failed upstream after it was accepted.
    #[error("video generation failed: {0}")]
    VideoGeneration(String),
}

impl ProviderError {
    /// Returns true if the failure is transient (overload, rate limit, timeout).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) => true,
            Self::Api { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            Self::Network(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Returns the suggested retry delay, if the provider sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// HTTP status reported by the provider, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Result type alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

static SECRET_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)([?&]key=)[^&\s]+", "${1}[REDACTED]"),
        (r"(?i)(bearer\s+)[A-Za-z0-9._\-]+", "${1}[REDACTED]"),
        (r#"(?i)("?(?:api[_-]?key|access_token|private_key)"?\s*[:=]\s*"?)[^"\s,}]+"#, "${1}[REDACTED]"),
        (r"AIza[0-9A-Za-z_\-]{20,}", "[REDACTED]"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// Redacts credentials from an upstream error body, keeping the rest intact.
pub fn redact_secrets(text: &str) -> String {
    let mut cleaned = text.trim().to_string();
    for (re, replacement) in SECRET_PATTERNS.iter() {
        cleaned = re.replace_all(&cleaned, *replacement).into_owned();
    }
    cleaned
}

/// Redacts credentials from an upstream error body and caps its length.
pub fn sanitize_error_message(text: &str) -> String {
    let cleaned = redact_secrets(text);
    if cleaned.chars().count() > MAX_ERROR_BODY_CHARS {
        let truncated: String = cleaned.chars().take(MAX_ERROR_BODY_CHARS).collect();
        return format!("{truncated}...");
    }
    cleaned
}

/// Parses a `Retry-After` header given in seconds.
pub fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
