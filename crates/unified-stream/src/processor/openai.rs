// OpenAI-family stream translation: Responses API events (and the older
// chat-completions delta shape) into normalized chunks.

use std::collections::HashMap;

use serde_json::{json, Value};
use unified_stream_types::{Delta, Error, ErrorKind, FinishReason, Metadata, StreamChunk, Usage};

use super::{ChunkIdentity, ChunkTranslator};
use crate::framing::Frame;

const PROVIDER: &str = "openai";

/// Parse a Responses API `usage` object.
pub(crate) fn parse_usage(usage: &Value) -> Usage {
    let input = usage
        .get("input_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32;
    let output = usage
        .get("output_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32;
    let reasoning = usage
        .pointer("/output_tokens_details/reasoning_tokens")
        .and_then(Value::as_u64)
        .map(|v| v as u32);
    Usage::new(input, output, reasoning, None)
}

/// Parse a chat-completions `usage` object.
pub(crate) fn parse_chat_usage(usage: &Value) -> Usage {
    let prompt = usage
        .get("prompt_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32;
    let completion = usage
        .get("completion_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32;
    let reasoning = usage
        .pointer("/completion_tokens_details/reasoning_tokens")
        .and_then(Value::as_u64)
        .map(|v| v as u32);
    Usage::new(prompt, completion, reasoning, None)
}

/// Map a Responses API status (plus `incomplete_details.reason`) to a finish reason.
pub(crate) fn map_status(
    status: &str,
    incomplete_reason: Option<&str>,
    has_function_calls: bool,
) -> FinishReason {
    match status {
        "completed" if has_function_calls => FinishReason::ToolCalls,
        "completed" => FinishReason::Stop,
        "incomplete" => match incomplete_reason {
            Some("max_output_tokens") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Other,
        },
        _ => FinishReason::Other,
    }
}

/// Map a chat-completions `finish_reason` string.
pub(crate) fn map_chat_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "content_filter" => FinishReason::ContentFilter,
        "tool_calls" => FinishReason::ToolCalls,
        "function_call" => FinishReason::FunctionCall,
        _ => FinishReason::Other,
    }
}

/// Error category for an OpenAI error `code` / `type` string.
pub(crate) fn kind_for_code(code: &str) -> Option<ErrorKind> {
    match code {
        "rate_limit_exceeded" | "insufficient_quota" | "rate_limit_error" => {
            Some(ErrorKind::RateLimit)
        }
        "invalid_api_key" | "authentication_error" | "permission_denied" => {
            Some(ErrorKind::Authentication)
        }
        "content_filter" | "content_policy_violation" => Some(ErrorKind::ContentPolicy),
        "invalid_request_error" | "invalid_prompt" | "context_length_exceeded"
        | "model_not_found" => Some(ErrorKind::InvalidRequest),
        "server_error" | "server_is_overloaded" => Some(ErrorKind::Server),
        _ => None,
    }
}

/// Build an error from an in-stream `error` object.
fn stream_error(error: &Value) -> Error {
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("stream failed")
        .to_string();
    let code = error
        .get("code")
        .and_then(Value::as_str)
        .or_else(|| error.get("type").and_then(Value::as_str));
    let kind = code
        .and_then(kind_for_code)
        .unwrap_or_else(|| Error::classify_by_message_pub(&message, ErrorKind::Server));

    let mut err = Error::new(kind, message).with_provider(PROVIDER);
    if let Some(code) = code {
        err = err.with_code(code);
    }
    err.details.raw = Some(error.clone());
    err
}

#[derive(Debug, Default)]
struct PendingCall {
    call_id: String,
    name: String,
    arguments: String,
}

/// Translates OpenAI-family events. One instance per response.
#[derive(Debug)]
pub struct OpenAiStreamProcessor {
    identity: ChunkIdentity,
    show_thoughts: bool,
    seen_any: bool,
    finished: bool,
    /// Function calls in progress, keyed by output item id (or chat index).
    pending_calls: HashMap<String, PendingCall>,
    /// Insertion order of `pending_calls`.
    call_order: Vec<String>,
    function_calls: Vec<Value>,
    output_items: Vec<Value>,
    citations: Vec<Value>,
    /// Citations not yet attached to any chunk.
    unattached_citations: Vec<Value>,
    web_searches: Vec<Value>,
    last_usage: Option<Usage>,
    /// Chat-completions streams report finish before usage; hold it here.
    deferred_finish: Option<String>,
}

impl OpenAiStreamProcessor {
    pub fn new(model: impl Into<String>, show_thoughts: bool) -> Self {
        Self {
            identity: ChunkIdentity::new(model),
            show_thoughts,
            seen_any: false,
            finished: false,
            pending_calls: HashMap::new(),
            call_order: Vec::new(),
            function_calls: Vec::new(),
            output_items: Vec::new(),
            citations: Vec::new(),
            unattached_citations: Vec::new(),
            web_searches: Vec::new(),
            last_usage: None,
            deferred_finish: None,
        }
    }

    fn content_chunk(&mut self, text: &str) -> Option<StreamChunk> {
        if text.is_empty() {
            return None;
        }
        let mut metadata = Metadata::new();
        if !self.unattached_citations.is_empty() {
            metadata.insert(
                "citations".into(),
                Value::Array(std::mem::take(&mut self.unattached_citations)),
            );
        }
        Some(self.identity.chunk(Delta::content(text), None, None, metadata))
    }

    fn thinking_chunk(&mut self, text: &str) -> Option<StreamChunk> {
        if !self.show_thoughts || text.is_empty() {
            return None;
        }
        Some(
            self.identity
                .chunk(Delta::thinking(text), None, None, Metadata::new()),
        )
    }

    fn observe_response(&mut self, response: &Value) {
        self.identity.observe(
            response.get("id").and_then(Value::as_str),
            response.get("model").and_then(Value::as_str),
            response.get("created_at").and_then(Value::as_u64),
        );
    }

    fn flush_pending_calls(&mut self) {
        for key in std::mem::take(&mut self.call_order) {
            if let Some(call) = self.pending_calls.remove(&key) {
                self.push_function_call(call);
            }
        }
    }

    fn push_function_call(&mut self, call: PendingCall) {
        self.function_calls.push(json!({
            "id": call.call_id,
            "name": call.name,
            "arguments": call.arguments,
        }));
    }

    fn terminal_chunk(&mut self, finish: FinishReason, native: &str) -> StreamChunk {
        self.finished = true;
        self.flush_pending_calls();

        let mut metadata = Metadata::new();
        if let Some(id) = self.identity.id() {
            metadata.insert("response_id".into(), json!(id));
        }
        metadata.insert("native_finish_reason".into(), json!(native));
        if !self.function_calls.is_empty() {
            metadata.insert("function_calls".into(), json!(self.function_calls));
        }
        if !self.output_items.is_empty() {
            metadata.insert("output_items".into(), json!(self.output_items));
        }
        if !self.citations.is_empty() {
            metadata.insert("citations".into(), json!(self.citations));
        }
        if !self.web_searches.is_empty() {
            metadata.insert("grounding".into(), json!({ "web_search_calls": self.web_searches }));
        }
        self.unattached_citations.clear();

        let usage = self.last_usage.take().unwrap_or_default();
        self.identity
            .chunk(Delta::default(), Some(finish), Some(usage), metadata)
    }

    fn record_item(&mut self, phase: &str, item: &Value) {
        self.output_items.push(json!({
            "event": phase,
            "type": item.get("type").cloned().unwrap_or(Value::Null),
            "id": item.get("id").cloned().unwrap_or(Value::Null),
            "status": item.get("status").cloned().unwrap_or(Value::Null),
        }));
    }

    fn process_event(&mut self, event_type: &str, data: &Value) -> Result<Vec<StreamChunk>, Error> {
        let mut chunks = Vec::new();

        match event_type {
            "response.created" | "response.in_progress" => {
                self.observe_response(data.get("response").unwrap_or(data));
            }

            "response.output_item.added" => {
                if let Some(item) = data.get("item") {
                    self.record_item("added", item);
                    if item.get("type").and_then(Value::as_str) == Some("function_call") {
                        let key = item
                            .get("id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        let call = PendingCall {
                            call_id: item
                                .get("call_id")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            name: item
                                .get("name")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            arguments: String::new(),
                        };
                        self.call_order.push(key.clone());
                        self.pending_calls.insert(key, call);
                    }
                }
            }

            "response.output_item.done" => {
                if let Some(item) = data.get("item") {
                    self.record_item("done", item);
                    match item.get("type").and_then(Value::as_str).unwrap_or("") {
                        "function_call" => {
                            let key = item.get("id").and_then(Value::as_str).unwrap_or_default();
                            let mut call = self.pending_calls.remove(key).unwrap_or_default();
                            self.call_order.retain(|k| k != key);
                            if let Some(args) = item.get("arguments").and_then(Value::as_str) {
                                call.arguments = args.to_string();
                            }
                            if let Some(name) = item.get("name").and_then(Value::as_str) {
                                call.name = name.to_string();
                            }
                            if let Some(call_id) = item.get("call_id").and_then(Value::as_str) {
                                call.call_id = call_id.to_string();
                            }
                            self.push_function_call(call);
                        }
                        "web_search_call" => {
                            self.web_searches.push(json!({
                                "id": item.get("id").cloned().unwrap_or(Value::Null),
                                "status": item.get("status").cloned().unwrap_or(Value::Null),
                                "action": item.get("action").cloned().unwrap_or(Value::Null),
                            }));
                        }
                        _ => {}
                    }
                }
            }

            "response.output_text.delta" => {
                let delta = data.get("delta").and_then(Value::as_str).unwrap_or("");
                chunks.extend(self.content_chunk(delta));
            }

            "response.output_text.annotation.added" => {
                if let Some(annotation) = data.get("annotation") {
                    self.citations.push(annotation.clone());
                    self.unattached_citations.push(annotation.clone());
                }
            }

            "response.reasoning_summary_text.delta" | "response.reasoning_text.delta" => {
                let delta = data.get("delta").and_then(Value::as_str).unwrap_or("");
                chunks.extend(self.thinking_chunk(delta));
            }

            "response.function_call_arguments.delta" => {
                let key = data.get("item_id").and_then(Value::as_str).unwrap_or_default();
                let delta = data.get("delta").and_then(Value::as_str).unwrap_or("");
                if let Some(call) = self.pending_calls.get_mut(key) {
                    call.arguments.push_str(delta);
                }
            }

            "response.function_call_arguments.done" => {
                let key = data.get("item_id").and_then(Value::as_str).unwrap_or_default();
                if let (Some(call), Some(args)) = (
                    self.pending_calls.get_mut(key),
                    data.get("arguments").and_then(Value::as_str),
                ) {
                    call.arguments = args.to_string();
                }
            }

            "response.content_part.added"
            | "response.content_part.done"
            | "response.output_text.done"
            | "response.reasoning_summary_part.added"
            | "response.reasoning_summary_part.done"
            | "response.reasoning_summary_text.done"
            | "response.reasoning_text.done" => {}

            t if t.starts_with("response.web_search_call.") => {
                tracing::debug!(event = t, "web search progress");
            }

            "response.completed" | "response.incomplete" => {
                let response = data.get("response").unwrap_or(data);
                self.observe_response(response);
                if let Some(usage) = response.get("usage").filter(|u| !u.is_null()) {
                    self.last_usage = Some(parse_usage(usage));
                }
                let status = response
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or(if event_type == "response.completed" {
                        "completed"
                    } else {
                        "incomplete"
                    });
                let reason = response
                    .pointer("/incomplete_details/reason")
                    .and_then(Value::as_str);
                let has_calls = !self.function_calls.is_empty() || !self.pending_calls.is_empty();
                let finish = map_status(status, reason, has_calls);
                let native = reason.unwrap_or(status).to_string();
                chunks.push(self.terminal_chunk(finish, &native));
            }

            "response.failed" => {
                let response = data.get("response").unwrap_or(data);
                let error = response.get("error").cloned().unwrap_or_else(|| json!({}));
                return Err(stream_error(&error));
            }

            "error" => {
                return Err(stream_error(data.get("error").unwrap_or(data)));
            }

            other => {
                tracing::debug!(event = other, "skipping unrecognized event");
            }
        }

        Ok(chunks)
    }

    fn process_chat_completion(&mut self, data: &Value) -> Vec<StreamChunk> {
        let mut chunks = Vec::new();
        self.identity.observe(
            data.get("id").and_then(Value::as_str),
            data.get("model").and_then(Value::as_str),
            data.get("created").and_then(Value::as_u64),
        );
        if let Some(usage) = data.get("usage").filter(|u| !u.is_null()) {
            self.last_usage = Some(parse_chat_usage(usage));
        }

        let choice = data
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first());
        if let Some(choice) = choice {
            let delta = choice.get("delta");
            let field = |name: &str| delta.and_then(|d| d.get(name));
            if let Some(text) = field("reasoning_content").and_then(Value::as_str) {
                chunks.extend(self.thinking_chunk(text));
            }
            if let Some(text) = field("content").and_then(Value::as_str) {
                chunks.extend(self.content_chunk(text));
            }
            for call in field("tool_calls")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                let key = call
                    .get("index")
                    .and_then(Value::as_u64)
                    .unwrap_or(0)
                    .to_string();
                if !self.pending_calls.contains_key(&key) {
                    self.call_order.push(key.clone());
                }
                let pending = self.pending_calls.entry(key).or_default();
                if let Some(id) = call.get("id").and_then(Value::as_str) {
                    pending.call_id = id.to_string();
                }
                if let Some(name) = call.pointer("/function/name").and_then(Value::as_str) {
                    pending.name.push_str(name);
                }
                if let Some(args) = call.pointer("/function/arguments").and_then(Value::as_str) {
                    pending.arguments.push_str(args);
                }
            }
            if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
                self.deferred_finish = Some(reason.to_string());
            }
        }

        // Usage rides on a trailing choice-less chunk when requested; emit
        // the terminal chunk once both are known.
        if self.last_usage.is_some() {
            if let Some(native) = self.deferred_finish.take() {
                chunks.push(self.terminal_chunk(map_chat_finish_reason(&native), &native));
            }
        }
        chunks
    }
}

impl ChunkTranslator for OpenAiStreamProcessor {
    fn process(&mut self, frame: &Frame) -> Result<Vec<StreamChunk>, Error> {
        let data = frame.json()?;
        if self.finished {
            tracing::debug!("ignoring event after terminal chunk");
            return Ok(Vec::new());
        }
        self.seen_any = true;

        if data.get("choices").is_some() {
            return Ok(self.process_chat_completion(&data));
        }
        let event_type = frame
            .event
            .clone()
            .or_else(|| data.get("type").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default();
        self.process_event(&event_type, &data)
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn finalize(&mut self) -> Vec<StreamChunk> {
        if self.finished || !self.seen_any {
            return Vec::new();
        }
        match self.deferred_finish.take() {
            Some(native) => vec![self.terminal_chunk(map_chat_finish_reason(&native), &native)],
            None => {
                tracing::debug!("stream closed without a terminal event");
                let finish = if self.function_calls.is_empty() && self.pending_calls.is_empty() {
                    FinishReason::Stop
                } else {
                    FinishReason::ToolCalls
                };
                vec![self.terminal_chunk(finish, "stream_closed")]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(event: &str, data: Value) -> Frame {
        Frame::new(Some(event.to_string()), data.to_string())
    }

    fn run(processor: &mut OpenAiStreamProcessor, frames: Vec<Frame>) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        for f in &frames {
            out.extend(processor.process(f).unwrap());
        }
        out.extend(processor.finalize());
        out
    }

    fn completed(status: &str, usage: Value) -> Frame {
        frame(
            "response.completed",
            json!({"type": "response.completed", "response": {"id": "resp_1", "status": status, "usage": usage}}),
        )
    }

    #[test]
    fn test_text_deltas_and_terminal_usage() {
        let mut p = OpenAiStreamProcessor::new("gpt-4o", false);
        let chunks = run(
            &mut p,
            vec![
                frame(
                    "response.created",
                    json!({"response": {"id": "resp_1", "model": "gpt-4o-2024", "created_at": 1700000000}}),
                ),
                frame("response.output_text.delta", json!({"delta": "Hel"})),
                frame("response.output_text.delta", json!({"delta": "lo"})),
                completed(
                    "completed",
                    json!({"input_tokens": 10, "output_tokens": 5, "total_tokens": 999}),
                ),
            ],
        );
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].content(), Some("Hel"));
        assert_eq!(chunks[1].content(), Some("lo"));
        assert!(chunks[0].usage.is_none() && chunks[1].usage.is_none());
        let last = &chunks[2];
        assert_eq!(last.finish_reason(), Some(FinishReason::Stop));
        let usage = last.usage.as_ref().unwrap();
        assert_eq!(usage.total_tokens, 15);
        assert!(chunks.iter().all(|c| c.id == "resp_1"));
        assert_eq!(chunks[0].model, "gpt-4o-2024");
        assert_eq!(chunks[0].created_at, 1700000000);
        assert_eq!(last.metadata["native_finish_reason"], "completed");
    }

    #[test]
    fn test_item_events_never_emit_content() {
        let mut p = OpenAiStreamProcessor::new("gpt-4o", false);
        let chunks = run(
            &mut p,
            vec![
                frame(
                    "response.output_item.added",
                    json!({"item": {"type": "message", "id": "msg_1", "status": "in_progress"}}),
                ),
                frame(
                    "response.content_part.added",
                    json!({"part": {"type": "output_text", "text": ""}}),
                ),
                frame("response.output_text.delta", json!({"delta": "Hi"})),
                frame(
                    "response.output_item.done",
                    json!({"item": {"type": "message", "id": "msg_1", "status": "completed"}}),
                ),
                completed("completed", json!({"input_tokens": 1, "output_tokens": 1})),
            ],
        );
        let content: Vec<_> = chunks.iter().filter_map(|c| c.content()).collect();
        assert_eq!(content, vec!["Hi"]);
        let items = chunks.last().unwrap().metadata["output_items"]
            .as_array()
            .unwrap()
            .clone();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["event"], "added");
        assert_eq!(items[1]["event"], "done");
    }

    #[test]
    fn test_function_call_routes_to_metadata_and_finish_tool_calls() {
        let mut p = OpenAiStreamProcessor::new("gpt-4o", false);
        let chunks = run(
            &mut p,
            vec![
                frame(
                    "response.output_item.added",
                    json!({"item": {"type": "function_call", "id": "fc_1", "call_id": "call_9", "name": "get_weather"}}),
                ),
                frame(
                    "response.function_call_arguments.delta",
                    json!({"item_id": "fc_1", "delta": "{\"city\":"}),
                ),
                frame(
                    "response.function_call_arguments.delta",
                    json!({"item_id": "fc_1", "delta": "\"Paris\"}"}),
                ),
                frame(
                    "response.output_item.done",
                    json!({"item": {"type": "function_call", "id": "fc_1", "call_id": "call_9", "name": "get_weather"}}),
                ),
                completed("completed", json!({"input_tokens": 3, "output_tokens": 7})),
            ],
        );
        assert_eq!(chunks.len(), 1, "only the terminal chunk is emitted");
        let last = &chunks[0];
        assert_eq!(last.finish_reason(), Some(FinishReason::ToolCalls));
        let calls = last.metadata["function_calls"].as_array().unwrap();
        assert_eq!(calls[0]["id"], "call_9");
        assert_eq!(calls[0]["name"], "get_weather");
        assert_eq!(calls[0]["arguments"], "{\"city\":\"Paris\"}");
    }

    #[test]
    fn test_reasoning_hidden_unless_show_thoughts() {
        let frames = || {
            vec![
                frame("response.reasoning_summary_text.delta", json!({"delta": "thinking..."})),
                frame("response.output_text.delta", json!({"delta": "answer"})),
                completed("completed", json!({"input_tokens": 1, "output_tokens": 1})),
            ]
        };
        let hidden = run(&mut OpenAiStreamProcessor::new("o3", false), frames());
        assert!(hidden.iter().all(|c| c.thinking().is_none()));

        let shown = run(&mut OpenAiStreamProcessor::new("o3", true), frames());
        assert_eq!(shown[0].thinking(), Some("thinking..."));
        assert_eq!(shown[0].content(), None);
        assert_eq!(shown[1].content(), Some("answer"));
    }

    #[test]
    fn test_incomplete_max_tokens_is_length() {
        let mut p = OpenAiStreamProcessor::new("gpt-4o", false);
        let chunks = run(
            &mut p,
            vec![frame(
                "response.incomplete",
                json!({"response": {"status": "incomplete", "incomplete_details": {"reason": "max_output_tokens"}}}),
            )],
        );
        assert_eq!(chunks[0].finish_reason(), Some(FinishReason::Length));
        assert_eq!(chunks[0].metadata["native_finish_reason"], "max_output_tokens");
    }

    #[test]
    fn test_annotations_attach_to_next_chunk_and_terminal() {
        let mut p = OpenAiStreamProcessor::new("gpt-4o", false);
        let chunks = run(
            &mut p,
            vec![
                frame("response.output_text.delta", json!({"delta": "See "})),
                frame(
                    "response.output_text.annotation.added",
                    json!({"annotation": {"type": "url_citation", "url": "https://example.com"}}),
                ),
                frame("response.output_text.delta", json!({"delta": "this."})),
                completed("completed", json!({"input_tokens": 1, "output_tokens": 2})),
            ],
        );
        assert!(chunks[0].metadata.get("citations").is_none());
        assert_eq!(chunks[1].metadata["citations"][0]["url"], "https://example.com");
        assert_eq!(chunks[2].metadata["citations"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_failed_event_is_error_with_code() {
        let mut p = OpenAiStreamProcessor::new("gpt-4o", false);
        let err = p
            .process(&frame(
                "response.failed",
                json!({"response": {"status": "failed", "error": {"code": "rate_limit_exceeded", "message": "Too many requests"}}}),
            ))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RateLimit);
        assert_eq!(err.code.as_deref(), Some("rate_limit_exceeded"));
        assert_eq!(err.provider.as_deref(), Some("openai"));
    }

    #[test]
    fn test_error_event_is_error() {
        let mut p = OpenAiStreamProcessor::new("gpt-4o", false);
        let err = p
            .process(&Frame::new(
                None,
                json!({"type": "error", "code": "server_error", "message": "boom"}).to_string(),
            ))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Server);
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn test_unknown_event_skipped() {
        let mut p = OpenAiStreamProcessor::new("gpt-4o", false);
        let chunks = p
            .process(&frame("response.some_future_event", json!({"x": 1})))
            .unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_close_without_terminal_finalizes_with_stop() {
        let mut p = OpenAiStreamProcessor::new("gpt-4o", false);
        let chunks = run(
            &mut p,
            vec![frame("response.output_text.delta", json!({"delta": "partial"}))],
        );
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].finish_reason(), Some(FinishReason::Stop));
        assert_eq!(chunks[1].usage, Some(Usage::default()));
    }

    #[test]
    fn test_empty_stream_emits_nothing() {
        let mut p = OpenAiStreamProcessor::new("gpt-4o", false);
        assert!(p.finalize().is_empty());
    }

    #[test]
    fn test_chat_completion_deltas_with_trailing_usage() {
        let mut p = OpenAiStreamProcessor::new("gpt-4o-mini", false);
        let data = |v: Value| Frame::new(None, v.to_string());
        let chunks = run(
            &mut p,
            vec![
                data(json!({"id": "chatcmpl-1", "model": "gpt-4o-mini", "created": 5, "choices": [{"index": 0, "delta": {"role": "assistant", "content": ""}}]})),
                data(json!({"id": "chatcmpl-1", "choices": [{"index": 0, "delta": {"content": "Hi"}}]})),
                data(json!({"id": "chatcmpl-1", "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]})),
                data(json!({"id": "chatcmpl-1", "choices": [], "usage": {"prompt_tokens": 4, "completion_tokens": 1, "total_tokens": 5}})),
            ],
        );
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content(), Some("Hi"));
        assert_eq!(chunks[1].finish_reason(), Some(FinishReason::Stop));
        assert_eq!(chunks[1].usage.as_ref().unwrap().total_tokens, 5);
        assert_eq!(chunks[1].id, "chatcmpl-1");
    }

    #[test]
    fn test_chat_completion_finish_without_usage_emitted_on_finalize() {
        let mut p = OpenAiStreamProcessor::new("gpt-4o-mini", false);
        let chunks = run(
            &mut p,
            vec![Frame::new(
                None,
                json!({"choices": [{"index": 0, "delta": {"content": "x"}, "finish_reason": "length"}]}).to_string(),
            )],
        );
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].finish_reason(), Some(FinishReason::Length));
        assert_eq!(chunks[1].metadata["native_finish_reason"], "length");
    }
}
