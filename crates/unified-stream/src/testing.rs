// Test doubles: a scripted transport, a manual clock, and wire-body builders.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::header::HeaderMap;
use secrecy::SecretString;
use serde_json::Value;
use unified_stream_types::{BoxFuture, Error, ErrorKind, ProviderConfig, ProviderKind};

use crate::buffer::Clock;
use crate::transport::{BufferedResponse, RequestDescriptor, StreamingResponse, Transport};

/// Build an SSE body from `(event, data)` pairs. `None` omits the `event:` line.
pub fn build_sse_body(events: &[(Option<&str>, &str)]) -> String {
    let mut body = String::new();
    for (event, data) in events {
        if let Some(event) = event {
            body.push_str(&format!("event: {event}\n"));
        }
        body.push_str(&format!("data: {data}\n\n"));
    }
    body
}

/// One JSON object per line.
pub fn build_ndjson_body(objects: &[Value]) -> String {
    objects.iter().map(|o| format!("{o}\n")).collect()
}

/// A streamed JSON array, laid out the way Gemini sends it (one element per
/// line with leading commas).
pub fn build_json_array_body(objects: &[Value]) -> String {
    let items: Vec<String> = objects.iter().map(Value::to_string).collect();
    format!("[{}\n]", items.join("\n,"))
}

/// Split `body` at the given byte offsets. Offsets may land inside a UTF-8
/// sequence; out-of-range and repeated offsets are ignored.
pub fn split_at(body: &[u8], offsets: &[usize]) -> Vec<Bytes> {
    let mut cuts: Vec<usize> = offsets
        .iter()
        .copied()
        .filter(|&o| o > 0 && o < body.len())
        .collect();
    cuts.sort_unstable();
    cuts.dedup();

    let mut pieces = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0;
    for cut in cuts {
        pieces.push(Bytes::copy_from_slice(&body[start..cut]));
        start = cut;
    }
    pieces.push(Bytes::copy_from_slice(&body[start..]));
    pieces
}

/// Split `body` into pieces of at most `size` bytes.
pub fn split_every(body: &[u8], size: usize) -> Vec<Bytes> {
    body.chunks(size.max(1)).map(Bytes::copy_from_slice).collect()
}

/// A provider config with a dummy key.
pub fn test_config(provider: ProviderKind, model: &str) -> ProviderConfig {
    ProviderConfig::new(provider, SecretString::from("test-key".to_string()), model)
}

enum StreamAction {
    Body {
        status: u16,
        headers: HeaderMap,
        pieces: Vec<Bytes>,
        hang: bool,
    },
    Fail(Error),
}

/// A [`Transport`] that replays queued responses in FIFO order and records
/// every request it receives.
#[derive(Default)]
pub struct MockTransport {
    buffered: Mutex<VecDeque<Result<BufferedResponse, Error>>>,
    streams: Mutex<VecDeque<StreamAction>>,
    recorded: Mutex<Vec<RequestDescriptor>>,
    /// Body pieces handed to consumers so far, across all streams.
    pieces_read: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a buffered JSON response.
    pub fn with_json(self, status: u16, body: Value) -> Self {
        self.with_json_and_headers(status, HeaderMap::new(), body)
    }

    pub fn with_json_and_headers(self, status: u16, headers: HeaderMap, body: Value) -> Self {
        self.buffered.lock().unwrap().push_back(Ok(BufferedResponse {
            status,
            headers,
            body: Bytes::from(body.to_string()),
        }));
        self
    }

    /// Queue a transport failure for the next buffered request.
    pub fn with_request_error(self, error: Error) -> Self {
        self.buffered.lock().unwrap().push_back(Err(error));
        self
    }

    /// Queue a streamed response delivered as the given pieces.
    pub fn with_stream(self, status: u16, pieces: Vec<Bytes>) -> Self {
        self.with_stream_and_headers(status, HeaderMap::new(), pieces)
    }

    pub fn with_stream_and_headers(
        self,
        status: u16,
        headers: HeaderMap,
        pieces: Vec<Bytes>,
    ) -> Self {
        self.streams.lock().unwrap().push_back(StreamAction::Body {
            status,
            headers,
            pieces,
            hang: false,
        });
        self
    }

    /// Queue a 200 stream that delivers `pieces` and then never ends.
    pub fn with_hanging_stream(self, pieces: Vec<Bytes>) -> Self {
        self.streams.lock().unwrap().push_back(StreamAction::Body {
            status: 200,
            headers: HeaderMap::new(),
            pieces,
            hang: true,
        });
        self
    }

    /// Queue a failure to open the next stream.
    pub fn with_stream_error(self, error: Error) -> Self {
        self.streams.lock().unwrap().push_back(StreamAction::Fail(error));
        self
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<RequestDescriptor> {
        self.recorded.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.recorded.lock().unwrap().len()
    }

    /// Body pieces pulled by consumers so far.
    pub fn pieces_read(&self) -> usize {
        self.pieces_read.load(Ordering::SeqCst)
    }

    fn record(&self, descriptor: RequestDescriptor) {
        self.recorded.lock().unwrap().push(descriptor);
    }
}

fn exhausted() -> Error {
    Error::new(ErrorKind::Network, "MockTransport: no queued response")
}

impl Transport for MockTransport {
    fn request(&self, descriptor: RequestDescriptor) -> BoxFuture<'_, Result<BufferedResponse, Error>> {
        self.record(descriptor);
        let next = self.buffered.lock().unwrap().pop_front();
        Box::pin(async move { next.unwrap_or_else(|| Err(exhausted())) })
    }

    fn stream(&self, descriptor: RequestDescriptor) -> BoxFuture<'_, Result<StreamingResponse, Error>> {
        self.record(descriptor);
        let next = self.streams.lock().unwrap().pop_front();
        let counter = Arc::clone(&self.pieces_read);
        Box::pin(async move {
            match next {
                None => Err(exhausted()),
                Some(StreamAction::Fail(error)) => Err(error),
                Some(StreamAction::Body {
                    status,
                    headers,
                    pieces,
                    hang,
                }) => {
                    let body = async_stream::stream! {
                        for piece in pieces {
                            counter.fetch_add(1, Ordering::SeqCst);
                            yield Ok(piece);
                        }
                        if hang {
                            futures::future::pending::<()>().await;
                        }
                    };
                    Ok(StreamingResponse {
                        status,
                        headers,
                        body: Box::pin(body),
                    })
                }
            }
        })
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    start: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + *self.offset.lock().unwrap()
    }
}
