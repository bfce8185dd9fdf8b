// Gemini stream translation: GenerateContentResponse objects into normalized
// chunks. Framing (SSE, NDJSON, streamed array) is handled upstream.

use serde_json::{json, Value};
use unified_stream_types::{Delta, Error, ErrorKind, FinishReason, Metadata, StreamChunk, Usage};

use super::{ChunkIdentity, ChunkTranslator};
use crate::framing::Frame;

const PROVIDER: &str = "gemini";

/// Map a Gemini `finishReason`. Any function call in the response wins.
pub(crate) fn map_finish_reason(reason: &str, has_function_calls: bool) -> FinishReason {
    if has_function_calls {
        return FinishReason::ToolCalls;
    }
    match reason {
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" | "IMAGE_SAFETY" => {
            FinishReason::ContentFilter
        }
        "MALFORMED_FUNCTION_CALL" => FinishReason::ToolCalls,
        _ => FinishReason::Other,
    }
}

/// Parse `usageMetadata`. Thinking tokens are billed separately from
/// candidate tokens, so they count toward the recomputed total.
pub(crate) fn parse_usage(usage: &Value) -> Usage {
    let get = |key: &str| usage.get(key).and_then(Value::as_u64).map(|v| v as u32);
    Usage::new(
        get("promptTokenCount").unwrap_or(0),
        get("candidatesTokenCount").unwrap_or(0),
        None,
        get("thoughtsTokenCount"),
    )
}

/// Error category for a gRPC-style `status` string.
pub(crate) fn grpc_kind(status: &str) -> Option<ErrorKind> {
    match status {
        "RESOURCE_EXHAUSTED" => Some(ErrorKind::RateLimit),
        "UNAUTHENTICATED" | "PERMISSION_DENIED" => Some(ErrorKind::Authentication),
        "INVALID_ARGUMENT" | "NOT_FOUND" | "FAILED_PRECONDITION" | "OUT_OF_RANGE" => {
            Some(ErrorKind::InvalidRequest)
        }
        "UNAVAILABLE" | "INTERNAL" | "DEADLINE_EXCEEDED" | "UNKNOWN" => Some(ErrorKind::Server),
        _ => None,
    }
}

/// Merge grounding metadata: arrays append, everything else is replaced.
pub(crate) fn merge_grounding(acc: &mut Metadata, incoming: &Value) {
    let Some(incoming) = incoming.as_object() else {
        return;
    };
    for (key, value) in incoming {
        match (acc.get_mut(key), value) {
            (Some(Value::Array(existing)), Value::Array(more)) => {
                existing.extend(more.iter().cloned());
            }
            _ => {
                acc.insert(key.clone(), value.clone());
            }
        }
    }
}

fn stream_error(error: &Value) -> Error {
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("stream failed")
        .to_string();
    let status = error.get("status").and_then(Value::as_str);
    let mut err = match error.get("code").and_then(Value::as_u64) {
        Some(code) => Error::from_http_status(
            code as u16,
            message,
            PROVIDER,
            Some(error.clone()),
            None,
        ),
        None => {
            let mut err = Error::new(ErrorKind::Server, message).with_provider(PROVIDER);
            err.details.raw = Some(error.clone());
            err
        }
    };
    if let Some(status) = status {
        if let Some(kind) = grpc_kind(status) {
            err.reclassify(Error::classify_by_message_pub(&err.message, kind));
        }
        err = err.with_code(status);
    }
    err
}

/// Translates Gemini stream objects. One instance per response.
#[derive(Debug)]
pub struct GeminiStreamProcessor {
    identity: ChunkIdentity,
    show_thoughts: bool,
    seen_any: bool,
    finished: bool,
    last_usage: Option<Usage>,
    function_calls: Vec<Value>,
    grounding: Metadata,
    citations: Vec<Value>,
    safety_ratings: Option<Value>,
    thought_signature: Option<String>,
}

impl GeminiStreamProcessor {
    pub fn new(model: impl Into<String>, show_thoughts: bool) -> Self {
        Self {
            identity: ChunkIdentity::new(model),
            show_thoughts,
            seen_any: false,
            finished: false,
            last_usage: None,
            function_calls: Vec::new(),
            grounding: Metadata::new(),
            citations: Vec::new(),
            safety_ratings: None,
            thought_signature: None,
        }
    }

    fn terminal_chunk(&mut self, finish: FinishReason, native: &str, extra: Metadata) -> StreamChunk {
        self.finished = true;
        let mut metadata = extra;
        if let Some(id) = self.identity.id() {
            metadata.insert("response_id".into(), json!(id));
        }
        metadata.insert("native_finish_reason".into(), json!(native));
        if !self.function_calls.is_empty() {
            metadata.insert("function_calls".into(), json!(self.function_calls));
        }
        if !self.grounding.is_empty() {
            metadata.insert("grounding".into(), Value::Object(self.grounding.clone()));
        }
        if !self.citations.is_empty() {
            metadata.insert("citations".into(), json!(self.citations));
        }
        if let Some(ratings) = self.safety_ratings.take() {
            metadata.insert("safety_ratings".into(), ratings);
        }
        if let Some(sig) = self.thought_signature.take() {
            metadata.insert("thought_signature".into(), json!(sig));
        }
        let usage = self.last_usage.take().unwrap_or_default();
        self.identity
            .chunk(Delta::default(), Some(finish), Some(usage), metadata)
    }

    fn process_part(&mut self, part: &Value, chunks: &mut Vec<StreamChunk>) {
        let signature = part.get("thoughtSignature").and_then(Value::as_str);

        if let Some(call) = part.get("functionCall") {
            let id = call
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
            let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
            self.function_calls.push(json!({
                "id": id,
                "name": call.get("name").cloned().unwrap_or(Value::Null),
                "arguments": args.to_string(),
            }));
            if let Some(sig) = signature {
                self.thought_signature = Some(sig.to_string());
            }
            return;
        }

        let Some(text) = part.get("text").and_then(Value::as_str) else {
            if let Some(sig) = signature {
                self.thought_signature = Some(sig.to_string());
            }
            return;
        };
        let is_thought = part.get("thought").and_then(Value::as_bool) == Some(true);
        if text.is_empty() || (is_thought && !self.show_thoughts) {
            if let Some(sig) = signature {
                self.thought_signature = Some(sig.to_string());
            }
            return;
        }

        let mut metadata = Metadata::new();
        if let Some(sig) = signature {
            metadata.insert("thought_signature".into(), json!(sig));
        }
        let delta = if is_thought {
            Delta::thinking(text)
        } else {
            Delta::content(text)
        };
        chunks.push(self.identity.chunk(delta, None, None, metadata));
    }
}

impl ChunkTranslator for GeminiStreamProcessor {
    fn process(&mut self, frame: &Frame) -> Result<Vec<StreamChunk>, Error> {
        let data = frame.json()?;
        if let Some(error) = data.get("error") {
            return Err(stream_error(error));
        }
        if self.finished {
            if data.get("usageMetadata").is_some() {
                tracing::warn!("usage reported after the terminal chunk; dropping it");
            }
            return Ok(Vec::new());
        }
        self.seen_any = true;

        self.identity.observe(
            data.get("responseId").and_then(Value::as_str),
            data.get("modelVersion").and_then(Value::as_str),
            None,
        );
        if let Some(usage) = data.get("usageMetadata") {
            self.last_usage = Some(parse_usage(usage));
        }

        let mut chunks = Vec::new();

        if let Some(feedback) = data.get("promptFeedback") {
            if let Some(reason) = feedback.get("blockReason").and_then(Value::as_str) {
                let reason = reason.to_string();
                let mut extra = Metadata::new();
                extra.insert("prompt_feedback".into(), feedback.clone());
                chunks.push(self.terminal_chunk(FinishReason::ContentFilter, &reason, extra));
                return Ok(chunks);
            }
        }

        let Some(candidate) = data
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
        else {
            return Ok(chunks);
        };

        for part in candidate
            .pointer("/content/parts")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            self.process_part(part, &mut chunks);
        }

        if let Some(grounding) = candidate.get("groundingMetadata") {
            merge_grounding(&mut self.grounding, grounding);
            if let Some(last) = chunks.last_mut() {
                last.metadata.insert("grounding".into(), grounding.clone());
            }
        }
        if let Some(sources) = candidate
            .pointer("/citationMetadata/citationSources")
            .and_then(Value::as_array)
        {
            self.citations.extend(sources.iter().cloned());
            if let Some(last) = chunks.last_mut() {
                last.metadata.insert("citations".into(), json!(sources));
            }
        }
        if let Some(ratings) = candidate.get("safetyRatings") {
            self.safety_ratings = Some(ratings.clone());
        }

        if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
            let finish = map_finish_reason(reason, !self.function_calls.is_empty());
            let reason = reason.to_string();
            chunks.push(self.terminal_chunk(finish, &reason, Metadata::new()));
        }

        Ok(chunks)
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn finalize(&mut self) -> Vec<StreamChunk> {
        if self.finished || !self.seen_any {
            return Vec::new();
        }
        tracing::debug!("stream closed without a finishReason");
        let finish = if self.function_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        };
        vec![self.terminal_chunk(finish, "stream_closed", Metadata::new())]
    }
}
