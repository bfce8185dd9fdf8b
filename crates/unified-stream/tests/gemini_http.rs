//! Gemini provider end-to-end over real HTTP, one test per wire framing.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::{json, Value};
use unified_stream::testing::{build_json_array_body, build_ndjson_body, build_sse_body, test_config};
use unified_stream::*;
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MODEL: &str = "gemini-2.5-flash";
const STREAM_PATH: &str = "/v1beta/models/gemini-2.5-flash:streamGenerateContent";

fn provider(server: &MockServer, format: GeminiStreamFormat) -> Box<dyn Provider> {
    let transport = Arc::new(HttpTransport::new(TransportTimeout::default()).unwrap());
    ProviderRegistry::with_defaults()
        .create(
            test_config(ProviderKind::Gemini, MODEL)
                .base_url(server.uri())
                .stream_format(format),
            transport,
        )
        .unwrap()
}

fn responses() -> Vec<Value> {
    vec![
        json!({
            "candidates": [{"content": {"role": "model", "parts": [
                {"text": "Weighing {options}", "thought": true}
            ]}}],
            "responseId": "gem-1",
            "modelVersion": MODEL
        }),
        json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "Hello, \"world\""}]}}],
            "responseId": "gem-1",
            "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 1}
        }),
        json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": " ✓"}]}, "finishReason": "STOP"}],
            "responseId": "gem-1",
            "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 2, "thoughtsTokenCount": 4}
        }),
    ]
}

async fn collect(
    server: &MockServer,
    format: GeminiStreamFormat,
    options: ChatOptions,
) -> Vec<StreamChunk> {
    provider(server, format)
        .stream_chat(vec![Message::user("hi")], options)
        .unwrap()
        .map(|c| c.unwrap())
        .collect()
        .await
}

fn assert_canonical(chunks: &[StreamChunk]) {
    let text: String = chunks.iter().filter_map(|c| c.content()).collect();
    assert_eq!(text, "Hello, \"world\" ✓");
    assert!(chunks.iter().all(|c| c.thinking().is_none()));
    assert!(chunks.iter().all(|c| c.id == "gem-1"));

    let (last, rest) = chunks.split_last().unwrap();
    assert!(rest.iter().all(|c| c.usage.is_none() && !c.is_terminal()));
    assert_eq!(last.finish_reason(), Some(FinishReason::Stop));
    let usage = last.usage.as_ref().unwrap();
    assert_eq!(usage.prompt_tokens, 3);
    assert_eq!(usage.completion_tokens, 2);
    assert_eq!(usage.thinking_tokens, Some(4));
    assert_eq!(usage.total_tokens, 9);
}

#[tokio::test]
async fn test_sse_stream() {
    let server = MockServer::start().await;
    let payloads: Vec<String> = responses().iter().map(Value::to_string).collect();
    let events: Vec<(Option<&str>, &str)> = payloads.iter().map(|p| (None, p.as_str())).collect();
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .and(query_param("alt", "sse"))
        .and(header("x-goog-api-key", "test-key"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(build_sse_body(&events)),
        )
        .mount(&server)
        .await;

    let chunks = collect(&server, GeminiStreamFormat::Sse, ChatOptions::default()).await;
    assert_canonical(&chunks);
}

#[tokio::test]
async fn test_ndjson_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .and(query_param_is_missing("alt"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/x-ndjson")
                .set_body_string(build_ndjson_body(&responses())),
        )
        .mount(&server)
        .await;

    let chunks = collect(&server, GeminiStreamFormat::Ndjson, ChatOptions::default()).await;
    assert_canonical(&chunks);
}

#[tokio::test]
async fn test_json_array_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .and(query_param_is_missing("alt"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_string(build_json_array_body(&responses())),
        )
        .mount(&server)
        .await;

    let chunks = collect(&server, GeminiStreamFormat::JsonArray, ChatOptions::default()).await;
    assert_canonical(&chunks);
}

#[tokio::test]
async fn test_auto_detects_json_array() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!("  \n{}", build_json_array_body(&responses()))),
        )
        .mount(&server)
        .await;

    let chunks = collect(&server, GeminiStreamFormat::Auto, ChatOptions::default()).await;
    assert_canonical(&chunks);
}

#[tokio::test]
async fn test_thoughts_surface_when_requested() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(build_ndjson_body(&responses())))
        .mount(&server)
        .await;

    let chunks = collect(
        &server,
        GeminiStreamFormat::Ndjson,
        ChatOptions::default().show_thoughts(true),
    )
    .await;
    assert_eq!(chunks[0].thinking(), Some("Weighing {options}"));
    assert_eq!(chunks[0].content(), None);
    assert_eq!(chunks[1].content(), Some("Hello, \"world\""));
}

#[tokio::test]
async fn test_buffered_generate_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.5-flash:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"text": "Done."}]}, "finishReason": "MAX_TOKENS"}],
            "responseId": "gem-buf",
            "usageMetadata": {"promptTokenCount": 2, "candidatesTokenCount": 1}
        })))
        .mount(&server)
        .await;

    let resp = provider(&server, GeminiStreamFormat::Sse)
        .chat(vec![Message::user("hi")], ChatOptions::default())
        .await
        .unwrap();
    assert_eq!(resp.content, "Done.");
    assert_eq!(resp.finish_reason, FinishReason::Length);
    assert_eq!(resp.usage.total_tokens, 3);
    assert_eq!(resp.metadata.provider, "gemini");
    assert_eq!(resp.metadata.response_id.as_deref(), Some("gem-buf"));
}

#[tokio::test]
async fn test_grpc_status_classifies_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "3")
                .set_body_json(json!({"error": {
                    "code": 429,
                    "message": "Resource has been exhausted (e.g. check quota).",
                    "status": "RESOURCE_EXHAUSTED"
                }})),
        )
        .mount(&server)
        .await;

    let mut stream = provider(&server, GeminiStreamFormat::Sse)
        .stream_chat(vec![Message::user("hi")], ChatOptions::default())
        .unwrap();
    let err = stream.next().await.unwrap().unwrap_err();
    assert_eq!(err.kind, ErrorKind::RateLimit);
    assert_eq!(err.code.as_deref(), Some("RESOURCE_EXHAUSTED"));
    assert_eq!(err.provider.as_deref(), Some("gemini"));
    assert_eq!(err.details.retry_after, Some(std::time::Duration::from_secs(3)));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_invalid_argument_is_invalid_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.5-flash:generateContent"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": {
            "code": 400,
            "message": "Invalid JSON payload received.",
            "status": "INVALID_ARGUMENT"
        }})))
        .mount(&server)
        .await;

    let err = provider(&server, GeminiStreamFormat::Sse)
        .chat(vec![Message::user("hi")], ChatOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidRequest);
    assert!(!err.retryable);
    assert_eq!(err.details.status, Some(400));
}

#[tokio::test]
async fn test_validation_happens_before_any_request() {
    let server = MockServer::start().await;
    let p = provider(&server, GeminiStreamFormat::Sse);

    let err = p
        .chat(vec![], ChatOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);

    let err = p
        .stream_chat(
            vec![Message::user("hi")],
            ChatOptions::default().temperature(-0.5),
        )
        .err()
        .unwrap();
    assert_eq!(err.kind, ErrorKind::Validation);

    assert!(server.received_requests().await.unwrap().is_empty());
}
