// Gemini generateContent adapter.

use std::ops::RangeInclusive;
use std::sync::Arc;

use reqwest::header::HeaderMap;
use secrecy::ExposeSecret;
use serde_json::{json, Map, Value};
use unified_stream_types::{
    BoxFuture, BoxStream, Error, FinishReason, GeminiStreamFormat, Message, Metadata,
    ProviderConfig, ProviderResponse, Role, StreamChunk, ThinkingMode,
};

use super::{
    json_headers, open_stream, response_metadata, secret_header, send_buffered, system_text,
    visible_thinking,
};
use crate::framing::{FrameDecoder, Framing};
use crate::processor::gemini::{
    grpc_kind, map_finish_reason, merge_grounding, parse_usage, GeminiStreamProcessor,
};
use crate::provider::{ChatOptions, EffectiveSettings, Provider};
use crate::transport::{RequestDescriptor, Transport};
use crate::util::http::{parse_provider_error_message, parse_retry_after};
use crate::validation::{validate_config, validate_messages, validate_options};

/// Default Gemini API base URL.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

const PROVIDER: &str = "gemini";

const SUPPORTED_ATTACHMENTS: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/webp",
    "image/gif",
    "application/pdf",
    "audio/wav",
    "audio/mp3",
    "audio/mpeg",
    "audio/ogg",
    "audio/flac",
    "video/mp4",
    "text/plain",
];

/// Gemini chat over `generateContent` / `streamGenerateContent`.
pub struct GeminiProvider {
    transport: Arc<dyn Transport>,
    config: Option<ProviderConfig>,
}

impl GeminiProvider {
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

    // The key goes in a header rather than the `?key=` query parameter so it
    // never shows up in logged URLs.
    fn build_headers(config: &ProviderConfig) -> Result<HeaderMap, Error> {
        let mut headers = json_headers();
        headers.insert(
            "x-goog-api-key",
            secret_header(config.api_key.expose_secret().to_string())?,
        );
        Ok(headers)
    }

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
        let url = endpoint(config, stream);
        let body = build_request_body(config, messages, &settings);
        let descriptor = RequestDescriptor::post(url, Self::build_headers(config)?, body)
            .with_cancel(options.abort_signal.clone());
        Ok((descriptor, settings))
    }
}

/// Request URL. Only SSE framing needs `alt=sse`; without it the endpoint
/// streams a JSON array.
fn endpoint(config: &ProviderConfig, stream: bool) -> String {
    let base = config
        .base_url
        .as_deref()
        .unwrap_or(DEFAULT_BASE_URL)
        .trim_end_matches('/');
    let model = config.model.trim_start_matches("models/");
    if !stream {
        return format!("{base}/v1beta/models/{model}:generateContent");
    }
    match config.stream_format {
        GeminiStreamFormat::Sse => {
            format!("{base}/v1beta/models/{model}:streamGenerateContent?alt=sse")
        }
        _ => format!("{base}/v1beta/models/{model}:streamGenerateContent"),
    }
}

fn thinking_config(mode: Option<ThinkingMode>, show_thoughts: bool) -> Option<Value> {
    let mut config = Map::new();
    match mode {
        Some(ThinkingMode::Off) => {
            config.insert("thinkingBudget".into(), json!(0));
        }
        Some(ThinkingMode::Dynamic) => {
            config.insert("thinkingBudget".into(), json!(-1));
        }
        Some(ThinkingMode::Budget(n)) => {
            config.insert("thinkingBudget".into(), json!(n));
        }
        None => {}
    }
    if show_thoughts && mode != Some(ThinkingMode::Off) {
        config.insert("includeThoughts".into(), json!(true));
    }
    (!config.is_empty()).then_some(Value::Object(config))
}

fn translate_message(message: &Message) -> Value {
    let role = match message.role {
        Role::Assistant => "model",
        _ => "user",
    };
    let mut parts = Vec::new();
    if !message.content.is_empty() {
        parts.push(json!({"text": message.content}));
    }
    for attachment in &message.attachments {
        parts.push(json!({
            "inlineData": {
                "mimeType": attachment.mime_type,
                "data": attachment.data,
            }
        }));
    }
    json!({"role": role, "parts": parts})
}

/// Build the `generateContent` request body.
pub(crate) fn build_request_body(
    config: &ProviderConfig,
    messages: &[Message],
    settings: &EffectiveSettings,
) -> Value {
    let contents: Vec<Value> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(translate_message)
        .collect();

    let mut body = Map::new();
    body.insert("contents".into(), Value::Array(contents));
    if let Some(system) = system_text(messages) {
        body.insert("systemInstruction".into(), json!({"parts": [{"text": system}]}));
    }

    let mut generation = Map::new();
    if let Some(t) = settings.temperature {
        generation.insert("temperature".into(), json!(t));
    }
    if let Some(max) = settings.max_tokens {
        generation.insert("maxOutputTokens".into(), json!(max));
    }
    if let Some(top_p) = config.top_p {
        generation.insert("topP".into(), json!(top_p));
    }
    if let Some(top_k) = config.top_k {
        generation.insert("topK".into(), json!(top_k));
    }
    if let Some(stops) = config.stop_sequences.as_ref().filter(|s| !s.is_empty()) {
        generation.insert("stopSequences".into(), json!(stops));
    }
    if let Some(thinking) = thinking_config(settings.thinking_mode, settings.show_thoughts) {
        generation.insert("thinkingConfig".into(), thinking);
    }
    if !generation.is_empty() {
        body.insert("generationConfig".into(), Value::Object(generation));
    }
    if let Some(safety) = &config.safety_settings {
        body.insert("safetySettings".into(), safety.clone());
    }
    Value::Object(body)
}

impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn initialize(&mut self, config: ProviderConfig) -> Result<(), Error> {
        validate_config(&config, &self.temperature_range())?;
        tracing::debug!(
            model = %config.model,
            stream_format = ?config.stream_format,
            "gemini provider initialized"
        );
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
            let model = self.config()?.model.clone();
            let (body, headers) =
                send_buffered(self.transport.as_ref(), descriptor, parse_error).await?;
            parse_response(body, &headers, &model, settings.show_thoughts)
        })
    }

    fn stream_chat(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> Result<BoxStream<'static, Result<StreamChunk, Error>>, Error> {
        let (descriptor, settings) = self.prepare(&messages, &options, true)?;
        let config = self.config()?;
        Ok(open_stream(
            Arc::clone(&self.transport),
            descriptor,
            FrameDecoder::new(Framing::from(config.stream_format)),
            GeminiStreamProcessor::new(config.model.clone(), settings.show_thoughts),
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

/// Parse a buffered `generateContent` body.
///
/// No candidates means an empty `stop` response, unless the prompt itself was
/// blocked, which maps to `content_filter`.
pub fn parse_response(
    raw: Value,
    headers: &HeaderMap,
    model: &str,
    show_thoughts: bool,
) -> Result<ProviderResponse, Error> {
    if !raw.is_object() {
        return Err(Error::parse("Gemini response is not a JSON object").with_provider(PROVIDER));
    }
    let mut metadata = response_metadata(
        PROVIDER,
        raw.get("modelVersion")
            .and_then(Value::as_str)
            .unwrap_or(model)
            .to_string(),
        raw.get("responseId").and_then(Value::as_str).map(str::to_string),
        headers,
    );
    let usage = raw.get("usageMetadata").map(parse_usage).unwrap_or_default();

    let candidate = raw
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first());
    let Some(candidate) = candidate else {
        if let Some(feedback) = raw.get("promptFeedback") {
            if let Some(reason) = feedback.get("blockReason").and_then(Value::as_str) {
                metadata.extra.insert("native_finish_reason".into(), json!(reason));
                metadata.extra.insert("prompt_feedback".into(), feedback.clone());
                let mut resp = ProviderResponse::empty(metadata);
                resp.finish_reason = FinishReason::ContentFilter;
                resp.usage = usage;
                return Ok(resp);
            }
        }
        tracing::debug!("response carried no candidates");
        let mut resp = ProviderResponse::empty(metadata);
        resp.usage = usage;
        return Ok(resp);
    };

    let mut content = String::new();
    let mut thinking = String::new();
    let mut function_calls = Vec::new();
    let mut thought_signature = None;

    for part in candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        if let Some(sig) = part.get("thoughtSignature").and_then(Value::as_str) {
            thought_signature = Some(sig.to_string());
        }
        if let Some(call) = part.get("functionCall") {
            let id = call
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
            function_calls.push(json!({
                "id": id,
                "name": call.get("name").cloned().unwrap_or(Value::Null),
                "arguments": call.get("args").cloned().unwrap_or_else(|| json!({})).to_string(),
            }));
            continue;
        }
        let Some(text) = part.get("text").and_then(Value::as_str) else {
            continue;
        };
        if part.get("thought").and_then(Value::as_bool) == Some(true) {
            thinking.push_str(text);
        } else {
            content.push_str(text);
        }
    }

    let native = candidate
        .get("finishReason")
        .and_then(Value::as_str)
        .unwrap_or("STOP");
    let finish_reason = map_finish_reason(native, !function_calls.is_empty());

    let extra = &mut metadata.extra;
    extra.insert("native_finish_reason".into(), json!(native));
    if !function_calls.is_empty() {
        extra.insert("function_calls".into(), Value::Array(function_calls));
    }
    if let Some(grounding) = candidate.get("groundingMetadata") {
        let mut merged = Metadata::new();
        merge_grounding(&mut merged, grounding);
        extra.insert("grounding".into(), Value::Object(merged));
    }
    if let Some(sources) = candidate.pointer("/citationMetadata/citationSources") {
        extra.insert("citations".into(), sources.clone());
    }
    if let Some(ratings) = candidate.get("safetyRatings") {
        extra.insert("safety_ratings".into(), ratings.clone());
    }
    if let Some(sig) = thought_signature {
        extra.insert("thought_signature".into(), json!(sig));
    }

    Ok(ProviderResponse {
        content,
        thinking: visible_thinking(thinking, show_thoughts),
        usage,
        finish_reason,
        metadata,
    })
}

// === Error Translation ===

/// Map a Gemini error response into the shared error taxonomy.
///
/// The gRPC `error.status` overrides the HTTP-status category, then message
/// text refines it (`INVALID_ARGUMENT` + "API key not valid" is an auth
/// failure). Retryability follows the final category.
pub fn parse_error(status: u16, headers: &HeaderMap, body: Value) -> Error {
    let (message, grpc_status) =
        parse_provider_error_message(&body, &["error", "message"], &["error", "status"]);
    let retry_after = parse_retry_after(headers);

    let mut err = Error::from_http_status(status, message, PROVIDER, Some(body), retry_after);
    if let Some(grpc_status) = grpc_status {
        if let Some(kind) = grpc_kind(&grpc_status) {
            err.reclassify(Error::classify_by_message_pub(&err.message, kind));
        }
        err = err.with_code(grpc_status);
    }
    err
}
