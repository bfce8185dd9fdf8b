use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// Which provider protocol family a configuration targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[serde(alias = "open_ai")]
    OpenAi,
    #[serde(alias = "google")]
    Gemini,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
        }
    }
}

/// Reasoning mode: `"off"`, `"dynamic"`, or an explicit token budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingMode {
    Off,
    Dynamic,
    Budget(u32),
}

impl Serialize for ThinkingMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Off => serializer.serialize_str("off"),
            Self::Dynamic => serializer.serialize_str("dynamic"),
            Self::Budget(n) => serializer.serialize_u32(*n),
        }
    }
}

impl<'de> Deserialize<'de> for ThinkingMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Budget(u32),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Budget(0) => Ok(Self::Off),
            Raw::Budget(n) => Ok(Self::Budget(n)),
            Raw::Text(s) => match s.as_str() {
                "off" => Ok(Self::Off),
                "dynamic" => Ok(Self::Dynamic),
                other => other.parse::<u32>().map(Self::Budget).map_err(|_| {
                    serde::de::Error::custom(format!(
                        "thinking mode must be \"off\", \"dynamic\", or a token budget, got {other:?}"
                    ))
                }),
            },
        }
    }
}

/// Wire framing requested from (and expected of) the Gemini streaming endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeminiStreamFormat {
    /// `?alt=sse` event-stream framing.
    #[default]
    Sse,
    /// One JSON document per line.
    Ndjson,
    /// A single streamed top-level JSON array (the endpoint's default).
    JsonArray,
    /// Sniff the framing from the first non-whitespace byte.
    Auto,
}

fn deserialize_secret<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SecretString, D::Error> {
    String::deserialize(deserializer).map(SecretString::from)
}

/// Provider configuration, as handed to `Provider::initialize`.
///
/// Unrecognized keys are ignored when deserializing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub provider: ProviderKind,
    #[serde(deserialize_with = "deserialize_secret")]
    pub api_key: SecretString,
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub thinking_mode: Option<ThinkingMode>,
    #[serde(default)]
    pub show_thoughts: Option<bool>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub safety_settings: Option<serde_json::Value>,
    #[serde(default)]
    pub stop_sequences: Option<Vec<String>>,
    /// Override the provider's API origin (proxies, tests).
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub stream_format: GeminiStreamFormat,
}

impl ProviderConfig {
    pub fn new(provider: ProviderKind, api_key: SecretString, model: impl Into<String>) -> Self {
        Self {
            provider,
            api_key,
            model: model.into(),
            temperature: None,
            thinking_mode: None,
            show_thoughts: None,
            max_tokens: None,
            top_p: None,
            top_k: None,
            safety_settings: None,
            stop_sequences: None,
            base_url: None,
            stream_format: GeminiStreamFormat::default(),
        }
    }

    /// Read the API key from the environment.
    ///
    /// - `OpenAi`: `OPENAI_API_KEY`
    /// - `Gemini`: `GEMINI_API_KEY`, falling back to `GOOGLE_API_KEY`
    ///
    /// The model comes from `UNIFIED_STREAM_MODEL` when set, otherwise a
    /// per-provider default.
    pub fn from_env(provider: ProviderKind) -> Result<Self, Error> {
        let api_key = match provider {
            ProviderKind::OpenAi => std::env::var("OPENAI_API_KEY")
                .map_err(|_| Error::validation("OPENAI_API_KEY not set"))?,
            ProviderKind::Gemini => std::env::var("GEMINI_API_KEY")
                .or_else(|_| std::env::var("GOOGLE_API_KEY"))
                .map_err(|_| Error::validation("GEMINI_API_KEY or GOOGLE_API_KEY not set"))?,
        };
        let model = std::env::var("UNIFIED_STREAM_MODEL").unwrap_or_else(|_| {
            match provider {
                ProviderKind::OpenAi => "gpt-4o-mini",
                ProviderKind::Gemini => "gemini-2.5-flash",
            }
            .to_string()
        });
        Ok(Self::new(provider, SecretString::from(api_key), model))
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn thinking_mode(mut self, mode: ThinkingMode) -> Self {
        self.thinking_mode = Some(mode);
        self
    }

    pub fn show_thoughts(mut self, show: bool) -> Self {
        self.show_thoughts = Some(show);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn safety_settings(mut self, settings: serde_json::Value) -> Self {
        self.safety_settings = Some(settings);
        self
    }

    pub fn stop_sequences(mut self, stops: Vec<String>) -> Self {
        self.stop_sequences = Some(stops);
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn stream_format(mut self, format: GeminiStreamFormat) -> Self {
        self.stream_format = format;
        self
    }
}

/// Timeouts for the HTTP transport, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportTimeout {
    /// Connection timeout (default: 10.0).
    pub connect: f64,
    /// Whole-request timeout for buffered calls (default: 120.0).
    pub request: f64,
    /// Maximum wait between two streamed chunks (default: 30.0).
    pub stream_read: f64,
}

impl Default for TransportTimeout {
    fn default() -> Self {
        Self {
            connect: 10.0,
            request: 120.0,
            stream_read: 30.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_thinking_mode_accepts_all_forms() {
        let off: ThinkingMode = serde_json::from_str("\"off\"").unwrap();
        assert_eq!(off, ThinkingMode::Off);
        let dynamic: ThinkingMode = serde_json::from_str("\"dynamic\"").unwrap();
        assert_eq!(dynamic, ThinkingMode::Dynamic);
        let budget: ThinkingMode = serde_json::from_str("1024").unwrap();
        assert_eq!(budget, ThinkingMode::Budget(1024));
        let zero: ThinkingMode = serde_json::from_str("0").unwrap();
        assert_eq!(zero, ThinkingMode::Off);
        assert!(serde_json::from_str::<ThinkingMode>("\"sometimes\"").is_err());
    }

    #[test]
    fn test_config_deserialize_ignores_unknown_keys() {
        let json = r#"{
            "provider": "gemini",
            "apiKey": "k-123",
            "model": "gemini-2.5-flash",
            "temperature": 0.4,
            "thinkingMode": "dynamic",
            "showThoughts": true,
            "favouriteColour": "teal"
        }"#;
        let config: ProviderConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.provider, ProviderKind::Gemini);
        assert_eq!(config.api_key.expose_secret(), "k-123");
        assert_eq!(config.temperature, Some(0.4));
        assert_eq!(config.thinking_mode, Some(ThinkingMode::Dynamic));
        assert_eq!(config.show_thoughts, Some(true));
        assert_eq!(config.stream_format, GeminiStreamFormat::Sse);
    }

    #[test]
    fn test_config_debug_redacts_key() {
        let config = ProviderConfig::new(
            ProviderKind::OpenAi,
            SecretString::from("sk-very-secret".to_string()),
            "gpt-4o",
        );
        let shown = format!("{config:?}");
        assert!(!shown.contains("sk-very-secret"));
    }

    #[test]
    fn test_builder_setters() {
        let config = ProviderConfig::new(
            ProviderKind::Gemini,
            SecretString::from("k".to_string()),
            "gemini-2.5-pro",
        )
        .temperature(1.2)
        .top_k(40)
        .stream_format(GeminiStreamFormat::JsonArray);
        assert_eq!(config.temperature, Some(1.2));
        assert_eq!(config.top_k, Some(40));
        assert_eq!(config.stream_format, GeminiStreamFormat::JsonArray);
    }

    #[test]
    fn test_transport_timeout_defaults() {
        let t = TransportTimeout::default();
        assert_eq!(t.connect, 10.0);
        assert_eq!(t.request, 120.0);
        assert_eq!(t.stream_read, 30.0);
    }

    #[test]
    fn test_provider_kind_aliases() {
        let k: ProviderKind = serde_json::from_str("\"google\"").unwrap();
        assert_eq!(k, ProviderKind::Gemini);
        assert_eq!(ProviderKind::OpenAi.as_str(), "openai");
    }
}
