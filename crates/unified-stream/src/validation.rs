// Pre-flight checks. Everything here runs before a request is built, and
// every failure is `ErrorKind::Validation`.

use std::ops::RangeInclusive;

use secrecy::ExposeSecret;
use unified_stream_types::{Error, Message, ProviderConfig, ThinkingMode};

use crate::provider::ChatOptions;

/// Check a temperature against a provider's inclusive range.
pub fn validate_temperature(temperature: f64, range: &RangeInclusive<f64>) -> Result<(), Error> {
    if !temperature.is_finite() {
        return Err(Error::validation(format!(
            "temperature must be a finite number, got {temperature}"
        )));
    }
    if !range.contains(&temperature) {
        return Err(Error::validation(format!(
            "temperature {temperature} is outside the supported range {}..={}",
            range.start(),
            range.end()
        )));
    }
    Ok(())
}

fn validate_max_tokens(max_tokens: Option<u32>) -> Result<(), Error> {
    if max_tokens == Some(0) {
        return Err(Error::validation("max_tokens must be greater than 0"));
    }
    Ok(())
}

fn validate_thinking_mode(mode: Option<ThinkingMode>) -> Result<(), Error> {
    if mode == Some(ThinkingMode::Budget(0)) {
        return Err(Error::validation(
            "a thinking budget of 0 is ambiguous; use \"off\" instead",
        ));
    }
    Ok(())
}

/// Check a configuration before a provider accepts it.
pub fn validate_config(
    config: &ProviderConfig,
    temperature_range: &RangeInclusive<f64>,
) -> Result<(), Error> {
    if config.api_key.expose_secret().trim().is_empty() {
        return Err(Error::validation("api key must not be empty"));
    }
    if config.model.trim().is_empty() {
        return Err(Error::validation("model must not be empty"));
    }
    if let Some(t) = config.temperature {
        validate_temperature(t, temperature_range)?;
    }
    if let Some(top_p) = config.top_p {
        if !top_p.is_finite() || !(0.0..=1.0).contains(&top_p) {
            return Err(Error::validation(format!(
                "top_p must be between 0 and 1, got {top_p}"
            )));
        }
    }
    if config.top_k == Some(0) {
        return Err(Error::validation("top_k must be greater than 0"));
    }
    validate_max_tokens(config.max_tokens)?;
    validate_thinking_mode(config.thinking_mode)?;
    if let Some(url) = &config.base_url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::validation(format!(
                "base_url must be an http(s) URL, got {url:?}"
            )));
        }
    }
    Ok(())
}

/// Check per-call overrides.
pub fn validate_options(
    options: &ChatOptions,
    temperature_range: &RangeInclusive<f64>,
) -> Result<(), Error> {
    if let Some(t) = options.temperature {
        validate_temperature(t, temperature_range)?;
    }
    validate_max_tokens(options.max_tokens)?;
    validate_thinking_mode(options.thinking_mode)
}

/// Check the conversation: at least one message, each with content (text or
/// attachments), and attachments the provider accepts.
pub fn validate_messages(messages: &[Message], supported_types: &[&str]) -> Result<(), Error> {
    if messages.is_empty() {
        return Err(Error::validation("messages must not be empty"));
    }
    for (i, message) in messages.iter().enumerate() {
        if message.content.trim().is_empty() && message.attachments.is_empty() {
            return Err(Error::validation(format!(
                "message {i} ({}) has no content",
                message.role.as_str()
            )));
        }
        for attachment in &message.attachments {
            if !supported_types.contains(&attachment.mime_type.as_str()) {
                return Err(Error::validation(format!(
                    "message {i}: attachment type {:?} is not supported (supported: {})",
                    attachment.mime_type,
                    supported_types.join(", ")
                )));
            }
            if attachment.data.is_empty() || !attachment.is_valid_base64() {
                return Err(Error::validation(format!(
                    "message {i}: attachment data is not valid base64"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use unified_stream_types::{Attachment, ErrorKind, ProviderKind};

    const RANGE: RangeInclusive<f64> = 0.0..=2.0;

    fn config() -> ProviderConfig {
        ProviderConfig::new(
            ProviderKind::OpenAi,
            SecretString::from("sk-test".to_string()),
            "gpt-4o",
        )
    }

    #[test]
    fn test_temperature_bounds() {
        assert!(validate_temperature(0.0, &RANGE).is_ok());
        assert!(validate_temperature(2.0, &RANGE).is_ok());
        for bad in [-0.1, 2.01, f64::NAN, f64::INFINITY] {
            let err = validate_temperature(bad, &RANGE).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Validation, "{bad}");
        }
    }

    #[test]
    fn test_config_checks() {
        assert!(validate_config(&config(), &RANGE).is_ok());
        assert!(validate_config(&config().temperature(3.0), &RANGE).is_err());
        assert!(validate_config(&config().top_p(1.5), &RANGE).is_err());
        assert!(validate_config(&config().max_tokens(0), &RANGE).is_err());
        assert!(validate_config(&config().top_k(0), &RANGE).is_err());
        assert!(validate_config(&config().base_url("ftp://x"), &RANGE).is_err());

        let mut empty_key = config();
        empty_key.api_key = SecretString::from("  ".to_string());
        assert!(validate_config(&empty_key, &RANGE).is_err());

        let mut empty_model = config();
        empty_model.model = String::new();
        assert!(validate_config(&empty_model, &RANGE).is_err());
    }

    #[test]
    fn test_options_checks() {
        assert!(validate_options(&ChatOptions::default(), &RANGE).is_ok());
        assert!(validate_options(&ChatOptions::default().temperature(-1.0), &RANGE).is_err());
        assert!(validate_options(&ChatOptions::default().max_tokens(0), &RANGE).is_err());
    }

    #[test]
    fn test_messages_must_have_content() {
        assert!(validate_messages(&[], &[]).is_err());
        assert!(validate_messages(&[Message::user("   ")], &[]).is_err());
        assert!(validate_messages(&[Message::system("be brief"), Message::user("hi")], &[]).is_ok());
    }

    #[test]
    fn test_attachment_checks() {
        let png = Attachment::from_bytes("image/png", b"\x89PNG");
        let ok = Message::user("").with_attachment(png.clone());
        assert!(validate_messages(&[ok], &["image/png"]).is_ok());

        let wrong_type = Message::user("look").with_attachment(png);
        let err = validate_messages(&[wrong_type], &["image/jpeg"]).unwrap_err();
        assert!(err.message.contains("image/png"));

        let bad_data = Message::user("look").with_attachment(Attachment::new("image/png", "%%%"));
        assert!(validate_messages(&[bad_data], &["image/png"]).is_err());
    }
}
