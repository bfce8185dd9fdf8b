//! The provider abstraction every backend implements.

use std::ops::RangeInclusive;

use reqwest::header::HeaderMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use unified_stream_types::{
    BoxFuture, BoxStream, Error, Message, ProviderConfig, ProviderResponse, StreamChunk,
    ThinkingMode,
};

/// Per-call overrides. Anything set here wins over the provider's config.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub temperature: Option<f64>,
    pub thinking_mode: Option<ThinkingMode>,
    pub show_thoughts: Option<bool>,
    pub max_tokens: Option<u32>,
    /// Cooperative cancellation for both buffered and streamed calls.
    pub abort_signal: Option<CancellationToken>,
}

impl ChatOptions {
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

    pub fn abort_signal(mut self, token: CancellationToken) -> Self {
        self.abort_signal = Some(token);
        self
    }
}

/// Settings after merging call options over provider config.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveSettings {
    pub temperature: Option<f64>,
    pub thinking_mode: Option<ThinkingMode>,
    pub show_thoughts: bool,
    pub max_tokens: Option<u32>,
}

impl EffectiveSettings {
    pub fn resolve(config: &ProviderConfig, options: &ChatOptions) -> Self {
        Self {
            temperature: options.temperature.or(config.temperature),
            thinking_mode: options.thinking_mode.or(config.thinking_mode),
            show_thoughts: options
                .show_thoughts
                .or(config.show_thoughts)
                .unwrap_or(false),
            max_tokens: options.max_tokens.or(config.max_tokens),
        }
    }
}

/// A chat backend.
///
/// `initialize` must succeed before `chat` or `stream_chat`; until then both
/// fail with `not_initialized`. Validation failures are reported before any
/// network I/O: `stream_chat` returns them directly, `chat` resolves to them
/// without touching the transport.
pub trait Provider: Send + Sync {
    /// Stable provider name (`"openai"`, `"gemini"`).
    fn name(&self) -> &str;

    /// Validate and store configuration.
    fn initialize(&mut self, config: ProviderConfig) -> Result<(), Error>;

    fn is_configured(&self) -> bool;

    /// One buffered request.
    fn chat(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> BoxFuture<'_, Result<ProviderResponse, Error>>;

    /// One streamed request. The returned stream is lazy: no request is sent
    /// until it is first polled.
    fn stream_chat(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> Result<BoxStream<'static, Result<StreamChunk, Error>>, Error>;

    /// Map a non-success HTTP response into the shared error taxonomy.
    fn format_error(&self, status: u16, headers: &HeaderMap, body: Value) -> Error;

    /// MIME types accepted as message attachments.
    fn supported_attachment_types(&self) -> &'static [&'static str];

    /// Inclusive temperature bounds.
    fn temperature_range(&self) -> RangeInclusive<f64>;
}
