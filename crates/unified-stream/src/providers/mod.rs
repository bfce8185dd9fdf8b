// Provider adapters, each behind a feature flag, plus the request plumbing
// they share.

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(feature = "gemini")]
pub mod gemini;

use std::sync::Arc;

use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use unified_stream_types::{
    now_epoch_secs, BoxStream, Error, Message, ResponseMetadata, Role, StreamChunk,
};

use crate::framing::FrameDecoder;
use crate::processor::{drive, until_cancelled, ChunkTranslator};
use crate::transport::{BufferedResponse, RequestDescriptor, Transport};
use crate::util::http::{error_body, parse_rate_limit_headers};

/// Maps a non-success response into the shared error taxonomy.
pub(crate) type ErrorFormatter = fn(u16, &HeaderMap, Value) -> Error;

/// Build a header value from a secret without echoing it in the error.
pub(crate) fn secret_header(value: String) -> Result<HeaderValue, Error> {
    let mut header = HeaderValue::from_str(&value).map_err(|_| {
        Error::validation("api key contains characters not allowed in an HTTP header")
    })?;
    header.set_sensitive(true);
    Ok(header)
}

pub(crate) fn json_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        reqwest::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers
}

/// Send a buffered request, racing it against the caller's abort signal.
pub(crate) async fn send_buffered(
    transport: &dyn Transport,
    descriptor: RequestDescriptor,
    format_error: ErrorFormatter,
) -> Result<(Value, HeaderMap), Error> {
    let cancel = descriptor.cancel.clone();
    if cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
        return Err(Error::cancelled());
    }
    let response: BufferedResponse = until_cancelled(cancel.as_ref(), transport.request(descriptor))
        .await
        .ok_or_else(Error::cancelled)??;

    if !response.is_success() {
        tracing::debug!(status = response.status, "provider returned an error status");
        return Err(format_error(
            response.status,
            &response.headers,
            error_body(&response.body),
        ));
    }
    let body = response.json()?;
    Ok((body, response.headers))
}

/// Open a streamed request lazily and run its body through `translator`.
///
/// Nothing is sent until the returned stream is first polled. A non-success
/// status becomes a single error item; a cancelled token ends the stream with
/// a single `Cancelled` error.
pub(crate) fn open_stream<T>(
    transport: Arc<dyn Transport>,
    descriptor: RequestDescriptor,
    decoder: FrameDecoder,
    translator: T,
    format_error: ErrorFormatter,
) -> BoxStream<'static, Result<StreamChunk, Error>>
where
    T: ChunkTranslator + 'static,
{
    let cancel: Option<CancellationToken> = descriptor.cancel.clone();
    Box::pin(async_stream::stream! {
        if cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            yield Err(Error::cancelled());
            return;
        }
        let response = match until_cancelled(cancel.as_ref(), transport.stream(descriptor)).await {
            None => {
                yield Err(Error::cancelled());
                return;
            }
            Some(Err(e)) => {
                yield Err(e);
                return;
            }
            Some(Ok(response)) => response,
        };

        if !response.is_success() {
            let status = response.status;
            let headers = response.headers.clone();
            match until_cancelled(cancel.as_ref(), response.collect_body()).await {
                None => yield Err(Error::cancelled()),
                Some(Err(e)) => yield Err(e),
                Some(Ok(body)) => yield Err(format_error(status, &headers, error_body(&body))),
            }
            return;
        }

        let mut chunks = drive(response.body, decoder, translator, cancel);
        while let Some(item) = chunks.next().await {
            yield item;
        }
    })
}

/// Metadata common to every buffered response.
pub(crate) fn response_metadata(
    provider: &str,
    model: String,
    response_id: Option<String>,
    headers: &HeaderMap,
) -> ResponseMetadata {
    let mut metadata = ResponseMetadata {
        provider: provider.to_string(),
        timestamp: now_epoch_secs(),
        model,
        response_id,
        ..Default::default()
    };
    if let Some(limits) = parse_rate_limit_headers(headers) {
        metadata.extra.insert("rate_limit".into(), Value::Object(limits));
    }
    metadata
}

/// Join system messages into one instruction block.
pub(crate) fn system_text(messages: &[Message]) -> Option<String> {
    let parts: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.trim())
        .filter(|s| !s.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join("\n\n"))
}

/// Reasoning text for a buffered response, `None` when hidden or empty.
pub(crate) fn visible_thinking(thinking: String, show_thoughts: bool) -> Option<String> {
    (show_thoughts && !thinking.is_empty()).then_some(thinking)
}
