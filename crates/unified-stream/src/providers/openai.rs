// OpenAI Responses API adapter.

use std::ops::RangeInclusive;
use std::sync::Arc;

use reqwest::header::HeaderMap;
use secrecy::ExposeSecret;
use serde_json::{json, Map, Value};
use unified_stream_types::{
    BoxFuture, BoxStream, Error, ErrorKind, Message, ProviderConfig, ProviderResponse, Role,
    StreamChunk, ThinkingMode,
};

use super::{
    json_headers, open_stream, response_metadata, secret_header, send_buffered, system_text,
    visible_thinking,
};
use crate::framing::{FrameDecoder, Framing};
use crate::processor::openai::{
    kind_for_code, map_chat_finish_reason, map_status, parse_chat_usage, parse_usage,
    OpenAiStreamProcessor,
};
use crate::provider::{ChatOptions, EffectiveSettings, Provider};
use crate::transport::{RequestDescriptor, Transport};
use crate::util::http::{parse_provider_error_message, parse_retry_after};
use crate::validation::{validate_config, validate_messages, validate_options};

/// Default OpenAI API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

const PROVIDER: &str = "openai";

const SUPPORTED_ATTACHMENTS: &[&str] = &["image/png", "image/jpeg", "image/webp", "image/gif"];

/// OpenAI chat over the Responses API.
pub struct OpenAiProvider {
    transport: Arc<dyn Transport>,
    config: Option<ProviderConfig>,
}

impl OpenAiProvider {
    /// An unconfigured provider; call [`Provider::initialize`] before use.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            config: None,
        }
    }

    fn config(&self) -> Result<&ProviderConfig, Error> {
        self.config
            .as_ref()
            .ok_or_else(|| Error::not_initialized(PROVIDER))
    }

    fn build_headers(config: &ProviderConfig) -> Result<HeaderMap, Error> {
        let mut headers = json_headers();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            secret_header(format!("Bearer {}", config.api_key.expose_secret()))?,
        );
        Ok(headers)
    }

    /// Validate and build a request. Runs before any I/O.
    fn prepare(
        &self,
        messages: &[Message],
        options: &ChatOptions,
        stream: bool,
    ) -> Result<(RequestDescriptor, EffectiveSettings), Error> {
        let config = self.config()?;
        validate_options(options, &self.temperature_range())?;
        validate_messages(messages, SUPPORTED_ATTACHMENTS)?;

        let settings = EffectiveSettings::resolve(config, options);
        let base = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let url = format!("{}/v1/responses", base.trim_end_matches('/'));
        let body = build_request_body(config, messages, &settings, stream);
        let descriptor = RequestDescriptor::post(url, Self::build_headers(config)?, body)
            .with_cancel(options.abort_signal.clone());
        Ok((descriptor, settings))
    }
}

/// Reasoning effort for a thinking mode. `Off` sends no reasoning block.
fn reasoning_effort(mode: ThinkingMode) -> Option<&'static str> {
    match mode {
        ThinkingMode::Off => None,
        ThinkingMode::Dynamic => Some("medium"),
        ThinkingMode::Budget(n) if n <= 1024 => Some("low"),
        ThinkingMode::Budget(n) if n <= 8192 => Some("medium"),
        ThinkingMode::Budget(_) => Some("high"),
    }
}

fn translate_message(message: &Message) -> Value {
    let (role, text_type) = match message.role {
        Role::Assistant => ("assistant", "output_text"),
        _ => ("user", "input_text"),
    };
    let mut content = Vec::new();
    if !message.content.is_empty() {
        content.push(json!({"type": text_type, "text": message.content}));
    }
    for attachment in &message.attachments {
        content.push(json!({
            "type": "input_image",
            "image_url": attachment.data_url(),
        }));
    }
    json!({"role": role, "content": content})
}

/// Build the Responses API request body.
pub(crate) fn build_request_body(
    config: &ProviderConfig,
    messages: &[Message],
    settings: &EffectiveSettings,
    stream: bool,
) -> Value {
    let input: Vec<Value> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(translate_message)
        .collect();

    let mut body = Map::new();
    body.insert("model".into(), json!(config.model));
    body.insert("input".into(), Value::Array(input));
    if let Some(instructions) = system_text(messages) {
        body.insert("instructions".into(), json!(instructions));
    }
    if let Some(t) = settings.temperature {
        body.insert("temperature".into(), json!(t));
    }
    if let Some(max) = settings.max_tokens {
        body.insert("max_output_tokens".into(), json!(max));
    }
    if let Some(top_p) = config.top_p {
        body.insert("top_p".into(), json!(top_p));
    }
    if config.top_k.is_some() || config.stop_sequences.is_some() {
        tracing::debug!("top_k and stop sequences are not supported by the Responses API");
    }
    if let Some(effort) = settings.thinking_mode.and_then(reasoning_effort) {
        let mut reasoning = json!({"effort": effort});
        if settings.show_thoughts {
            reasoning["summary"] = json!("auto");
        }
        body.insert("reasoning".into(), reasoning);
    }
    if stream {
        body.insert("stream".into(), json!(true));
    }
    Value::Object(body)
}

impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn initialize(&mut self, config: ProviderConfig) -> Result<(), Error> {
        validate_config(&config, &self.temperature_range())?;
        tracing::debug!(model = %config.model, "openai provider initialized");
        self.config = Some(config);
        Ok(())
    }

    fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    fn chat(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> BoxFuture<'_, Result<ProviderResponse, Error>> {
        Box::pin(async move {
            let (descriptor, settings) = self.prepare(&messages, &options, false)?;
            let (body, headers) =
                send_buffered(self.transport.as_ref(), descriptor, parse_error).await?;
            parse_response(body, &headers, settings.show_thoughts)
        })
    }

    fn stream_chat(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> Result<BoxStream<'static, Result<StreamChunk, Error>>, Error> {
        let (descriptor, settings) = self.prepare(&messages, &options, true)?;
        let model = self.config()?.model.clone();
        Ok(open_stream(
            Arc::clone(&self.transport),
            descriptor,
            FrameDecoder::new(Framing::Sse),
            OpenAiStreamProcessor::new(model, settings.show_thoughts),
            parse_error,
        ))
    }

    fn format_error(&self, status: u16, headers: &HeaderMap, body: Value) -> Error {
        parse_error(status, headers, body)
    }

    fn supported_attachment_types(&self) -> &'static [&'static str] {
        SUPPORTED_ATTACHMENTS
    }

    fn temperature_range(&self) -> RangeInclusive<f64> {
        0.0..=2.0
    }
}

// === Response Translation ===

/// Parse a buffered Responses API body. A chat-completions body (with
/// `choices`) is accepted too, for OpenAI-compatible endpoints.
pub fn parse_response(
    raw: Value,
    headers: &HeaderMap,
    show_thoughts: bool,
) -> Result<ProviderResponse, Error> {
    if !raw.is_object() {
        return Err(Error::parse("OpenAI response is not a JSON object").with_provider(PROVIDER));
    }
    if raw.get("choices").is_some() {
        return Ok(parse_chat_completion(&raw, headers, show_thoughts));
    }

    let str_field = |key: &str| raw.get(key).and_then(Value::as_str).map(str::to_string);
    let mut metadata = response_metadata(
        PROVIDER,
        str_field("model").unwrap_or_default(),
        str_field("id"),
        headers,
    );

    let mut content = String::new();
    let mut thinking = String::new();
    let mut function_calls = Vec::new();
    let mut citations = Vec::new();
    let mut web_searches = Vec::new();

    for item in raw
        .get("output")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        match item.get("type").and_then(Value::as_str).unwrap_or("") {
            "message" => {
                for block in item
                    .get("content")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                {
                    if block.get("type").and_then(Value::as_str) == Some("output_text") {
                        content.push_str(block.get("text").and_then(Value::as_str).unwrap_or(""));
                        if let Some(annotations) = block.get("annotations").and_then(Value::as_array) {
                            citations.extend(annotations.iter().cloned());
                        }
                    }
                }
            }
            "reasoning" => {
                for key in ["summary", "content"] {
                    for block in item.get(key).and_then(Value::as_array).into_iter().flatten() {
                        if let Some(text) = block.get("text").and_then(Value::as_str) {
                            if !thinking.is_empty() {
                                thinking.push('\n');
                            }
                            thinking.push_str(text);
                        }
                    }
                }
            }
            "function_call" => {
                function_calls.push(json!({
                    "id": item.get("call_id").cloned().unwrap_or(Value::Null),
                    "name": item.get("name").cloned().unwrap_or(Value::Null),
                    "arguments": item.get("arguments").and_then(Value::as_str).unwrap_or("{}"),
                }));
            }
            "web_search_call" => {
                web_searches.push(json!({
                    "id": item.get("id").cloned().unwrap_or(Value::Null),
                    "status": item.get("status").cloned().unwrap_or(Value::Null),
                    "action": item.get("action").cloned().unwrap_or(Value::Null),
                }));
            }
            _ => {}
        }
    }

    let status = raw.get("status").and_then(Value::as_str).unwrap_or("completed");
    let reason = raw
        .pointer("/incomplete_details/reason")
        .and_then(Value::as_str);
    let finish_reason = map_status(status, reason, !function_calls.is_empty());
    metadata
        .extra
        .insert("native_finish_reason".into(), json!(reason.unwrap_or(status)));

    if !function_calls.is_empty() {
        metadata.extra.insert("function_calls".into(), Value::Array(function_calls));
    }
    if !citations.is_empty() {
        metadata.extra.insert("citations".into(), Value::Array(citations));
    }
    if !web_searches.is_empty() {
        metadata
            .extra
            .insert("grounding".into(), json!({ "web_search_calls": web_searches }));
    }

    Ok(ProviderResponse {
        content,
        thinking: visible_thinking(thinking, show_thoughts),
        usage: raw.get("usage").map(parse_usage).unwrap_or_default(),
        finish_reason,
        metadata,
    })
}

fn parse_chat_completion(raw: &Value, headers: &HeaderMap, show_thoughts: bool) -> ProviderResponse {
    let str_field = |key: &str| raw.get(key).and_then(Value::as_str).map(str::to_string);
    let mut metadata = response_metadata(
        PROVIDER,
        str_field("model").unwrap_or_default(),
        str_field("id"),
        headers,
    );

    let choice = raw.pointer("/choices/0");
    let message = choice.and_then(|c| c.get("message"));
    let text = |key: &str| {
        message
            .and_then(|m| m.get(key))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string()
    };

    let function_calls: Vec<Value> = message
        .and_then(|m| m.get("tool_calls"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .map(|call| {
            json!({
                "id": call.get("id").cloned().unwrap_or(Value::Null),
                "name": call.pointer("/function/name").cloned().unwrap_or(Value::Null),
                "arguments": call.pointer("/function/arguments").and_then(Value::as_str).unwrap_or("{}"),
            })
        })
        .collect();

    let native = choice
        .and_then(|c| c.get("finish_reason"))
        .and_then(Value::as_str)
        .unwrap_or("stop");
    let finish_reason = map_chat_finish_reason(native);
    metadata
        .extra
        .insert("native_finish_reason".into(), json!(native));
    if !function_calls.is_empty() {
        metadata.extra.insert("function_calls".into(), Value::Array(function_calls));
    }

    let usage = raw.get("usage").map(parse_chat_usage).unwrap_or_default();

    ProviderResponse {
        content: text("content"),
        thinking: visible_thinking(text("reasoning_content"), show_thoughts),
        usage,
        finish_reason,
        metadata,
    }
}

// === Error Translation ===

/// Map an OpenAI error response into the shared error taxonomy.
///
/// The HTTP status decides the category; a specific `error.code` (rate limit,
/// auth, content policy) refines it.
pub fn parse_error(status: u16, headers: &HeaderMap, body: Value) -> Error {
    let (message, code) = parse_provider_error_message(&body, &["error", "message"], &["error", "code"]);
    let code = code.or_else(|| {
        body.pointer("/error/type")
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    let retry_after = parse_retry_after(headers);

    let mut err = Error::from_http_status(status, message, PROVIDER, Some(body), retry_after);
    if let Some(code) = code {
        if let Some(kind) = kind_for_code(&code) {
            if matches!(
                kind,
                ErrorKind::RateLimit | ErrorKind::Authentication | ErrorKind::ContentPolicy
            ) {
                err.reclassify(kind);
            }
        }
        err = err.with_code(code);
    }
    err
}
