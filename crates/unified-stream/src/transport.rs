//! HTTP transport boundary.
//!
//! Providers build a [`RequestDescriptor`] and hand it to a [`Transport`].
//! Buffered calls get the whole body back; streaming calls get status and
//! headers plus a lazy byte stream, read only as the consumer pulls chunks.

use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::Method;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use unified_stream_types::{BoxFuture, BoxStream, Error, TransportTimeout};

/// Everything needed to issue one provider request.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    /// Caller's abort signal, for transports that can abandon in-flight I/O.
    pub cancel: Option<CancellationToken>,
}

impl RequestDescriptor {
    pub fn post(url: impl Into<String>, headers: HeaderMap, body: Value) -> Self {
        Self {
            url: url.into(),
            method: Method::POST,
            headers,
            body: Some(body),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: Option<CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }
}

/// A fully read response.
#[derive(Debug, Clone)]
pub struct BufferedResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl BufferedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON.
    pub fn json(&self) -> Result<Value, Error> {
        serde_json::from_slice(&self.body).map_err(|e| {
            Error::parse_with_source(format!("response body is not valid JSON: {e}"), e)
        })
    }
}

/// A response whose body has not been read yet.
pub struct StreamingResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: BoxStream<'static, Result<Bytes, Error>>,
}

impl StreamingResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Drain the body (used for error responses, which are small).
    pub async fn collect_body(mut self) -> Result<Bytes, Error> {
        let mut buf = Vec::new();
        while let Some(piece) = self.body.next().await {
            buf.extend_from_slice(&piece?);
        }
        Ok(Bytes::from(buf))
    }
}

impl std::fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// The seam between providers and the network.
pub trait Transport: Send + Sync {
    fn request(&self, descriptor: RequestDescriptor) -> BoxFuture<'_, Result<BufferedResponse, Error>>;

    fn stream(&self, descriptor: RequestDescriptor) -> BoxFuture<'_, Result<StreamingResponse, Error>>;
}

/// `reqwest`-backed transport.
///
/// `connect` applies to every request, `request` bounds buffered calls end to
/// end, and `stream_read` bounds the wait between two streamed body chunks.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    request_timeout: Duration,
    stream_read_timeout: Duration,
}

/// Convert a configured timeout, rejecting negative, NaN, and
/// out-of-range values.
fn timeout_duration(name: &str, secs: f64) -> Result<Duration, Error> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        Error::validation(format!(
            "{name} timeout must be a non-negative finite number of seconds, got {secs}"
        ))
    })
}

impl HttpTransport {
    pub fn new(timeout: TransportTimeout) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout_duration("connect", timeout.connect)?)
            .build()
            .map_err(|e| Error::network(format!("failed to build HTTP client: {e}"), e))?;
        Self::with_client(client, timeout)
    }

    /// Use a preconfigured client (proxies, custom TLS). Its own timeouts
    /// still apply on top of these.
    pub fn with_client(client: reqwest::Client, timeout: TransportTimeout) -> Result<Self, Error> {
        Ok(Self {
            client,
            request_timeout: timeout_duration("request", timeout.request)?,
            stream_read_timeout: timeout_duration("stream_read", timeout.stream_read)?,
        })
    }

    fn build(&self, descriptor: &RequestDescriptor) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(descriptor.method.clone(), &descriptor.url)
            .headers(descriptor.headers.clone());
        if let Some(body) = &descriptor.body {
            builder = builder.json(body);
        }
        builder
    }
}

fn send_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::network("request timed out", e)
    } else {
        Error::network(format!("HTTP request failed: {e}"), e)
    }
}

impl Transport for HttpTransport {
    fn request(&self, descriptor: RequestDescriptor) -> BoxFuture<'_, Result<BufferedResponse, Error>> {
        Box::pin(async move {
            tracing::debug!(url = %descriptor.url, "sending request");
            let response = self
                .build(&descriptor)
                .timeout(self.request_timeout)
                .send()
                .await
                .map_err(send_error)?;
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response.bytes().await.map_err(send_error)?;
            Ok(BufferedResponse {
                status,
                headers,
                body,
            })
        })
    }

    fn stream(&self, descriptor: RequestDescriptor) -> BoxFuture<'_, Result<StreamingResponse, Error>> {
        Box::pin(async move {
            tracing::debug!(url = %descriptor.url, "opening stream");
            let response = tokio::time::timeout(self.request_timeout, self.build(&descriptor).send())
                .await
                .map_err(|_| {
                    Error::network(
                        "timed out waiting for response headers",
                        std::io::Error::new(std::io::ErrorKind::TimedOut, "response headers"),
                    )
                })?
                .map_err(send_error)?;
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let read_timeout = self.stream_read_timeout;

            let body = async_stream::stream! {
                let mut bytes = response.bytes_stream();
                loop {
                    match tokio::time::timeout(read_timeout, bytes.next()).await {
                        Ok(Some(Ok(chunk))) => yield Ok(chunk),
                        Ok(Some(Err(e))) => {
                            yield Err(Error::network(format!("stream read failed: {e}"), e));
                            return;
                        }
                        Ok(None) => return,
                        Err(_) => {
                            yield Err(Error::network(
                                format!("no stream data for {read_timeout:?}"),
                                std::io::Error::new(std::io::ErrorKind::TimedOut, "stream read timeout"),
                            ));
                            return;
                        }
                    }
                }
            };

            Ok(StreamingResponse {
                status,
                headers,
                body: Box::pin(body),
            })
        })
    }
}
