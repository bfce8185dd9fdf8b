// Error taxonomy: one error type for every provider, framing, and buffer failure.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Error category. Callers branch on this, never on provider-native payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    // Raised before any network call
    Validation,
    NotInitialized,

    // Provider errors (from HTTP responses or in-stream error events)
    Authentication,
    RateLimit,
    ContentPolicy,
    InvalidRequest,
    #[serde(rename = "server_error")]
    Server,

    // Client-side errors
    Network,
    Cancelled,
    #[serde(rename = "parse_error")]
    Parse,
}

impl ErrorKind {
    /// Returns `true` if the provider produced this error (as opposed to the
    /// caller, the transport, or the local parser).
    pub fn is_provider_error(&self) -> bool {
        matches!(
            self,
            Self::Authentication
                | Self::RateLimit
                | Self::ContentPolicy
                | Self::InvalidRequest
                | Self::Server
        )
    }

    /// Returns `true` if the request was rejected before anything was sent.
    pub fn is_pre_flight(&self) -> bool {
        matches!(self, Self::Validation | Self::NotInitialized)
    }

    fn default_retryable(&self) -> bool {
        matches!(self, Self::RateLimit | Self::Server | Self::Network)
    }
}

/// Structured detail bag carried by every error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// HTTP status, when the error came from an HTTP response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Seconds since the Unix epoch at which the error was created.
    pub timestamp: u64,
    /// How long the provider asked us to wait before retrying.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<Duration>,
    /// Provider-native error body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

/// The single error type for the entire library.
#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    /// Originating provider name (`"openai"`, `"gemini"`).
    pub provider: Option<String>,
    /// Provider-specific error code (`"invalid_api_key"`, `"RESOURCE_EXHAUSTED"`).
    pub code: Option<String>,
    pub details: ErrorDetails,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

pub(crate) fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl Error {
    /// Bare constructor; the convenience constructors below cover common cases.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.default_retryable(),
            provider: None,
            code: None,
            details: ErrorDetails {
                timestamp: now_epoch_secs(),
                ..Default::default()
            },
            source: None,
        }
    }

    /// Construct from an HTTP status code (for provider error formatting).
    ///
    /// Message-based reclassification runs after the status mapping, so a 400
    /// carrying "API key not valid" ends up as `Authentication`.
    pub fn from_http_status(
        status: u16,
        message: String,
        provider: &str,
        raw: Option<serde_json::Value>,
        retry_after: Option<Duration>,
    ) -> Self {
        let kind = match status {
            401 | 403 => ErrorKind::Authentication,
            429 => ErrorKind::RateLimit,
            400..=499 => ErrorKind::InvalidRequest,
            500..=599 => ErrorKind::Server,
            _ => ErrorKind::Server,
        };
        let kind = Self::classify_by_message(&message, kind);

        let mut err = Self::new(kind, message);
        err.provider = Some(provider.to_string());
        err.details.status = Some(status);
        err.details.retry_after = retry_after;
        err.details.raw = raw;
        err
    }

    /// Caller-side validation failure (bad message, out-of-range parameter).
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Operation attempted on a provider that was never initialized.
    pub fn not_initialized(provider: &str) -> Self {
        let mut err = Self::new(
            ErrorKind::NotInitialized,
            format!("provider '{provider}' is not initialized; call initialize() first"),
        );
        err.provider = Some(provider.to_string());
        err
    }

    /// Transport-level failure with source.
    pub fn network(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::new(ErrorKind::Network, message).with_source(source)
    }

    /// The caller's abort signal was observed.
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "request cancelled")
    }

    /// Malformed incremental payload that cannot be safely reassembled.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, message)
    }

    /// Parse failure with the underlying decoder error attached.
    pub fn parse_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::parse(message).with_source(source)
    }

    /// Attach the originating provider name.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Attach a provider-specific error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Override the kind and recompute retryability to match it.
    pub fn reclassify(&mut self, kind: ErrorKind) {
        self.kind = kind;
        self.retryable = kind.default_retryable();
    }

    /// Public so provider formatters can refine after a gRPC/status override.
    pub fn classify_by_message_pub(message: &str, default: ErrorKind) -> ErrorKind {
        Self::classify_by_message(message, default)
    }

    fn classify_by_message(message: &str, default: ErrorKind) -> ErrorKind {
        let lower = message.to_lowercase();
        if lower.contains("unauthorized")
            || lower.contains("invalid key")
            || lower.contains("incorrect api key")
            || lower.contains("api key not valid")
        {
            ErrorKind::Authentication
        } else if lower.contains("content filter")
            || lower.contains("content policy")
            || lower.contains("safety")
            || lower.contains("blocked")
        {
            ErrorKind::ContentPolicy
        } else if lower.contains("rate limit") || lower.contains("quota") {
            ErrorKind::RateLimit
        } else {
            default
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.provider, self.details.status) {
            (Some(p), Some(s)) => write!(f, "{:?} ({p}, HTTP {s}): {}", self.kind, self.message),
            (Some(p), None) => write!(f, "{:?} ({p}): {}", self.kind, self.message),
            _ => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = vec![
            (400, ErrorKind::InvalidRequest, false),
            (401, ErrorKind::Authentication, false),
            (403, ErrorKind::Authentication, false),
            (404, ErrorKind::InvalidRequest, false),
            (429, ErrorKind::RateLimit, true),
            (500, ErrorKind::Server, true),
            (503, ErrorKind::Server, true),
        ];
        for (status, expected_kind, expected_retryable) in cases {
            let err = Error::from_http_status(status, "test".into(), "openai", None, None);
            assert_eq!(err.kind, expected_kind, "status {status}");
            assert_eq!(err.retryable, expected_retryable, "status {status}");
            assert_eq!(err.details.status, Some(status));
            assert_eq!(err.provider.as_deref(), Some("openai"));
        }
    }

    #[test]
    fn test_api_key_not_valid_on_400_is_authentication() {
        let err = Error::from_http_status(
            400,
            "API key not valid. Please pass a valid API key.".into(),
            "gemini",
            None,
            None,
        );
        assert_eq!(err.kind, ErrorKind::Authentication);
        assert!(!err.retryable);
    }

    #[test]
    fn test_blocked_message_is_content_policy() {
        let err = Error::from_http_status(
            400,
            "response blocked by safety filter".into(),
            "gemini",
            None,
            None,
        );
        assert_eq!(err.kind, ErrorKind::ContentPolicy);
    }

    #[test]
    fn test_retry_after_and_raw_preserved() {
        let raw = serde_json::json!({"error": {"code": "rate_limit_exceeded"}});
        let err = Error::from_http_status(
            429,
            "slow down".into(),
            "openai",
            Some(raw.clone()),
            Some(Duration::from_secs(60)),
        );
        assert_eq!(err.details.retry_after, Some(Duration::from_secs(60)));
        assert_eq!(err.details.raw, Some(raw));
        assert!(err.details.timestamp > 0);
    }

    #[test]
    fn test_pre_flight_kinds() {
        assert!(Error::validation("bad").kind.is_pre_flight());
        assert!(Error::not_initialized("gemini").kind.is_pre_flight());
        assert!(!Error::cancelled().kind.is_pre_flight());
    }

    #[test]
    fn test_cancelled_is_distinct_from_network() {
        let cancelled = Error::cancelled();
        let inner = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let network = Error::network("connection dropped", inner);
        assert_ne!(cancelled.kind, network.kind);
        assert!(!cancelled.retryable);
        assert!(network.retryable);
    }

    #[test]
    fn test_reclassify_updates_retryable() {
        let mut err = Error::from_http_status(400, "bad".into(), "gemini", None, None);
        err.reclassify(ErrorKind::RateLimit);
        assert!(err.retryable);
    }

    #[test]
    fn test_display_includes_provider_and_status() {
        let err = Error::from_http_status(500, "boom".into(), "gemini", None, None);
        let shown = err.to_string();
        assert!(shown.contains("gemini"));
        assert!(shown.contains("500"));
        assert!(shown.contains("boom"));
    }

    #[test]
    fn test_kind_serializes_to_taxonomy_names() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::Server).unwrap(),
            "\"server_error\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorKind::Parse).unwrap(),
            "\"parse_error\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorKind::NotInitialized).unwrap(),
            "\"not_initialized\""
        );
    }

    #[test]
    fn test_source_chain() {
        let inner = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = Error::network("connection failed", inner);
        assert!(std::error::Error::source(&err).is_some());
    }
}
