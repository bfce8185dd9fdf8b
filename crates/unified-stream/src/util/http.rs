// HTTP helpers shared by the provider error formatters.

use std::time::Duration;

use reqwest::header::HeaderMap;
use serde_json::{json, Value};
use unified_stream_types::Metadata;

/// Parse `Retry-After` as numeric seconds or an HTTP-date.
/// Missing, unparseable, negative, non-finite, out-of-range, or past values
/// give `None`.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get("retry-after")?.to_str().ok()?;

    if let Ok(secs) = value.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).ok();
    }

    let date = httpdate::parse_http_date(value).ok()?;
    date.duration_since(std::time::SystemTime::now()).ok()
}

/// Walk a nested JSON value by object keys.
pub fn extract_json_path<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for key in path {
        current = current.get(*key)?;
    }
    Some(current)
}

/// Pull `(message, code)` out of a provider error body.
///
/// Falls back to the whole body as the message when the path is missing.
pub fn parse_provider_error_message(
    body: &Value,
    message_path: &[&str],
    code_path: &[&str],
) -> (String, Option<String>) {
    let message = extract_json_path(body, message_path)
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string());

    let code = extract_json_path(body, code_path)
        .and_then(Value::as_str)
        .map(str::to_string);

    (message, code)
}

/// Decode an error response body. Non-JSON bodies are wrapped so the message
/// path `error.message` still resolves.
pub fn error_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap_or_else(|_| {
        let text = String::from_utf8_lossy(bytes);
        json!({"error": {"message": text.trim()}})
    })
}

/// Collect `x-ratelimit-*` headers into response metadata.
pub fn parse_rate_limit_headers(headers: &HeaderMap) -> Option<Metadata> {
    const NUMERIC: [(&str, &str); 4] = [
        ("x-ratelimit-remaining-requests", "requests_remaining"),
        ("x-ratelimit-limit-requests", "requests_limit"),
        ("x-ratelimit-remaining-tokens", "tokens_remaining"),
        ("x-ratelimit-limit-tokens", "tokens_limit"),
    ];
    let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let mut info = Metadata::new();
    for (header, key) in NUMERIC {
        if let Some(n) = header_str(header).and_then(|s| s.parse::<u64>().ok()) {
            info.insert(key.into(), json!(n));
        }
    }
    let reset = header_str("x-ratelimit-reset-requests")
        .or_else(|| header_str("x-ratelimit-reset-tokens"))
        .or_else(|| header_str("x-ratelimit-reset"));
    if let Some(reset) = reset {
        info.insert("reset_at".into(), json!(reset));
    }

    (!info.is_empty()).then_some(info)
}
