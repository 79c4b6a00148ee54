//! Typed generation errors and upstream error classification.

use crate::error::ProviderError;
use crate::video::types::ProviderId;
use serde::{Deserialize, Serialize};

/// Upstream text that means the request was refused on safety grounds.
const CONTENT_POLICY_PATTERNS: &[&str] = &[
    "content_policy",
    "content policy",
    "policy violation",
    "safety",
    "prohibited",
    "moderation",
    "nsfw",
    "responsible ai",
];

/// Upstream text that means the credentials were rejected.
const AUTH_PATTERNS: &[&str] = &[
    "invalid api key",
    "api key not valid",
    "unauthorized",
    "unauthenticated",
    "no user found",
    "authentication",
    "permission denied",
    "forbidden",
];

/// Upstream text that means the service is overloaded or slow.
const UNAVAILABLE_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "overloaded",
    "unavailable",
    "temporarily",
    "rate limit",
    "too many requests",
    "resource_exhausted",
];

/// Upstream text that means the request shape was rejected.
const INVALID_PATTERNS: &[&str] = &[
    "validation error",
    "invalid",
    "unprocessable",
    "bad request",
    "not supported",
];

const AUTH_STATUSES: &[u16] = &[401, 403];
const UNAVAILABLE_STATUSES: &[u16] = &[429, 500, 502, 503, 504];
const INVALID_STATUSES: &[u16] = &[400, 422];

/// Machine-readable error tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Provider has no usable credentials.
    #[serde(rename = "configuration_error")]
    Configuration,
    /// Refused by the provider's content filter.
    #[serde(rename = "content_policy_error")]
    ContentPolicy,
    /// Credentials rejected upstream.
    #[serde(rename = "authentication_error")]
    Authentication,
    /// Request shape rejected upstream.
    #[serde(rename = "invalid_parameter_error")]
    InvalidParameter,
    /// Transient upstream failure or timeout.
    #[serde(rename = "service_unavailable_error")]
    ServiceUnavailable,
    /// Upstream reported success without a video.
    #[serde(rename = "empty_result_error")]
    EmptyResult,
    /// Anything else.
    #[serde(rename = "unknown_generation_error")]
    Unknown,
}

impl ErrorKind {
    /// Wire tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration_error",
            Self::ContentPolicy => "content_policy_error",
            Self::Authentication => "authentication_error",
            Self::InvalidParameter => "invalid_parameter_error",
            Self::ServiceUnavailable => "service_unavailable_error",
            Self::EmptyResult => "empty_result_error",
            Self::Unknown => "unknown_generation_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a generation request, as surfaced to callers.
///
/// The `Display` text is the user-facing message. The raw upstream text, when
/// there is one, is kept in [`GenerationError::detail`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// The provider is unknown to this process or has no credentials.
    #[error("{provider} is not available: {reason}")]
    Configuration {
        /// Requested provider.
        provider: ProviderId,
        /// Why it cannot be used.
        reason: String,
    },

    /// The provider refused the content.
    #[error(
        "The video service's safety filter rejected this request. Rephrase the prompt with \
         neutral, descriptive vocabulary and avoid violent or threatening words and requests \
         to preserve a real person's exact facial identity."
    )]
    ContentPolicy {
        /// Upstream text.
        detail: String,
    },

    /// The provider rejected the configured credentials.
    #[error("The video service rejected its API credentials. Check the provider configuration.")]
    Authentication {
        /// Upstream text.
        detail: String,
    },

    /// The provider rejected the request parameters.
    #[error("The video service rejected the request: {detail}. Check the image, duration and audio inputs.")]
    InvalidParameter {
        /// Upstream text.
        detail: String,
    },

    /// The provider is overloaded or did not answer in time.
    #[error("The video service is temporarily unavailable. Try again in a few minutes.")]
    ServiceUnavailable {
        /// Upstream text or timeout description.
        detail: String,
    },

    /// The provider finished without returning a video.
    #[error("The video service finished without returning a video.")]
    EmptyResult {
        /// Raw upstream reply.
        detail: String,
    },

    /// Unclassified failure.
    #[error("Video generation failed: {detail}")]
    Unknown {
        /// Upstream text, verbatim.
        detail: String,
    },
}

impl GenerationError {
    /// Machine-readable tag.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::ContentPolicy { .. } => ErrorKind::ContentPolicy,
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            Self::ServiceUnavailable { .. } => ErrorKind::ServiceUnavailable,
            Self::EmptyResult { .. } => ErrorKind::EmptyResult,
            Self::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    /// Human-readable message for end users.
    pub fn user_message(&self) -> String {
        self.to_string()
    }

    /// Raw upstream text, when the failure came from a provider.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Configuration { reason, .. } => Some(reason),
            Self::ContentPolicy { detail }
            | Self::Authentication { detail }
            | Self::InvalidParameter { detail }
            | Self::ServiceUnavailable { detail }
            | Self::EmptyResult { detail }
            | Self::Unknown { detail } => Some(detail),
        }
    }

    /// HTTP status a web layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::ContentPolicy => 422,
            ErrorKind::InvalidParameter => 400,
            ErrorKind::Authentication | ErrorKind::EmptyResult => 502,
            ErrorKind::Configuration | ErrorKind::ServiceUnavailable => 503,
            ErrorKind::Unknown => 500,
        }
    }

    /// Serializable error body.
    ///
    /// Content-policy and authentication failures carry no detail: the first
    /// would echo the refused wording, the second may echo credential hints.
    pub fn to_response(&self) -> ErrorResponse {
        let detail = match self.kind() {
            ErrorKind::ContentPolicy | ErrorKind::Authentication => None,
            _ => self.detail().map(str::to_string),
        };
        ErrorResponse {
            success: false,
            error_kind: self.kind(),
            message: self.user_message(),
            detail,
        }
    }
}

/// Body of a failed generation response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always `false`.
    pub success: bool,
    /// Machine-readable tag.
    pub error_kind: ErrorKind,
    /// User-facing message.
    pub message: String,
    /// Upstream detail for debugging.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// The message the provider sent, without this crate's framing.
///
/// Adapters redact credentials but do not truncate, so this is the full body.
fn upstream_text(err: &ProviderError) -> String {
    match err {
        ProviderError::Auth(m)
        | ProviderError::ContentBlocked(m)
        | ProviderError::InvalidRequest(m)
        | ProviderError::Billing(m)
        | ProviderError::EmptyResult(m)
        | ProviderError::UnexpectedResponse(m)
        | ProviderError::Decode(m)
        | ProviderError::VideoGeneration(m)
        | ProviderError::Api { message: m, .. } => m.clone(),
        other => other.to_string(),
    }
}

fn matches_any(text: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| text.contains(p))
}

/// Maps an adapter failure onto the caller-facing taxonomy.
///
/// Checks run in a fixed order: content policy, authentication, service
/// unavailable, invalid parameter, empty result. Anything left is `Unknown`
/// with the upstream text preserved verbatim.
pub fn classify(err: &ProviderError) -> GenerationError {
    let detail = upstream_text(err);
    let lower = detail.to_lowercase();
    let status = err.status();
    let status_in = |set: &[u16]| status.is_some_and(|s| set.contains(&s));

    if matches!(err, ProviderError::ContentBlocked(_)) || matches_any(&lower, CONTENT_POLICY_PATTERNS)
    {
        return GenerationError::ContentPolicy { detail };
    }
    if matches!(err, ProviderError::Auth(_) | ProviderError::Billing(_))
        || status_in(AUTH_STATUSES)
        || matches_any(&lower, AUTH_PATTERNS)
    {
        return GenerationError::Authentication { detail };
    }
    if err.is_transient()
        || status_in(UNAVAILABLE_STATUSES)
        || matches_any(&lower, UNAVAILABLE_PATTERNS)
    {
        return GenerationError::ServiceUnavailable { detail };
    }
    if matches!(err, ProviderError::InvalidRequest(_))
        || status_in(INVALID_STATUSES)
        || matches_any(&lower, INVALID_PATTERNS)
    {
        return GenerationError::InvalidParameter { detail };
    }
    if matches!(err, ProviderError::EmptyResult(_)) {
        return GenerationError::EmptyResult { detail };
    }
    GenerationError::Unknown { detail }
}
