//! Stream processors: provider frames in, normalized [`StreamChunk`]s out.
//!
//! [`drive`] owns the pull loop shared by every provider: read bytes from the
//! transport, decode UTF-8, split frames, hand each frame to a provider
//! [`ChunkTranslator`], and yield its chunks in order. The translator never
//! sees bytes and the driver never sees provider JSON.

#[cfg(feature = "gemini")]
pub mod gemini;
#[cfg(feature = "openai")]
pub mod openai;

use std::future::Future;

use bytes::Bytes;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use unified_stream_types::{
    now_epoch_secs, BoxStream, Choice, Delta, Error, FinishReason, Metadata, StreamChunk, Usage,
};

use crate::framing::{Frame, FrameDecoder, Utf8Decoder};

/// Provider-specific half of a stream processor.
pub trait ChunkTranslator: Send {
    /// Translate one provider event into zero or more chunks. An `Err` ends
    /// the stream (provider error event, malformed payload).
    fn process(&mut self, frame: &Frame) -> Result<Vec<StreamChunk>, Error>;

    /// Called once when the transport closes (or signals completion). Emits a
    /// terminal chunk if the provider never sent one.
    fn finalize(&mut self) -> Vec<StreamChunk>;

    /// Whether the terminal chunk has been produced. Once true the driver
    /// stops reading the transport.
    fn is_finished(&self) -> bool {
        false
    }
}

/// Run `fut` unless `cancel` fires first. `None` means cancelled.
pub(crate) async fn until_cancelled<F: Future>(
    cancel: Option<&CancellationToken>,
    fut: F,
) -> Option<F::Output> {
    match cancel {
        Some(token) => {
            if token.is_cancelled() {
                return None;
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => None,
                out = fut => Some(out),
            }
        }
        None => Some(fut.await),
    }
}

fn is_cancelled(cancel: &Option<CancellationToken>) -> bool {
    cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
}

/// Decode one transport read (or, with `None`, the end of the body) into frames.
fn decode_step(
    utf8: &mut Utf8Decoder,
    decoder: &mut FrameDecoder,
    bytes: Option<&Bytes>,
) -> Result<(Vec<Frame>, bool), Error> {
    match bytes {
        Some(bytes) => {
            let decoded = decoder.feed(&utf8.decode(bytes))?;
            Ok((decoded.frames, decoded.done))
        }
        None => {
            let tail = utf8.finish();
            let mut decoded = decoder.feed(&tail)?;
            if !decoded.done {
                decoded.frames.extend(decoder.finish()?);
            }
            Ok((decoded.frames, true))
        }
    }
}

/// Drive a response body through a decoder and translator.
///
/// The returned stream is lazy: nothing is read until it is polled, and each
/// transport read happens only when the consumer asks for more. Cancellation
/// is observed while waiting on the transport and before every yielded chunk;
/// once observed, the stream yields a single `Cancelled` error and ends.
/// Dropping the stream drops the body and any partially buffered frame.
pub fn drive<T>(
    body: BoxStream<'static, Result<Bytes, Error>>,
    decoder: FrameDecoder,
    translator: T,
    cancel: Option<CancellationToken>,
) -> BoxStream<'static, Result<StreamChunk, Error>>
where
    T: ChunkTranslator + 'static,
{
    Box::pin(async_stream::stream! {
        let mut body = body;
        let mut decoder = decoder;
        let mut translator = translator;
        let mut utf8 = Utf8Decoder::new();

        loop {
            let next = match until_cancelled(cancel.as_ref(), body.next()).await {
                Some(next) => next,
                None => {
                    yield Err(Error::cancelled());
                    return;
                }
            };
            let step = match next {
                Some(Ok(bytes)) => decode_step(&mut utf8, &mut decoder, Some(&bytes)),
                Some(Err(e)) => {
                    yield Err(e);
                    return;
                }
                None => decode_step(&mut utf8, &mut decoder, None),
            };
            let (frames, mut finished) = match step {
                Ok(step) => step,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            for frame in &frames {
                let chunks = match translator.process(frame) {
                    Ok(chunks) => chunks,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                for chunk in chunks {
                    if is_cancelled(&cancel) {
                        yield Err(Error::cancelled());
                        return;
                    }
                    yield Ok(chunk);
                }
                if translator.is_finished() {
                    tracing::debug!("terminal chunk produced; closing body");
                    finished = true;
                    break;
                }
            }

            if finished {
                break;
            }
        }

        for chunk in translator.finalize() {
            if is_cancelled(&cancel) {
                yield Err(Error::cancelled());
                return;
            }
            yield Ok(chunk);
        }
    })
}

/// Stream-scoped identity shared by every chunk of one response.
///
/// The provider's response id is adopted when it is known before the first
/// chunk is built; after that the id, model, and timestamp are frozen.
#[derive(Debug)]
pub struct ChunkIdentity {
    id: Option<String>,
    model: String,
    created_at: Option<u64>,
    frozen: bool,
}

impl ChunkIdentity {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: None,
            model: model.into(),
            created_at: None,
            frozen: false,
        }
    }

    /// Record provider-reported identity. Ignored once chunks have been built.
    pub fn observe(&mut self, id: Option<&str>, model: Option<&str>, created_at: Option<u64>) {
        if self.frozen {
            return;
        }
        if let Some(id) = id.filter(|s| !s.is_empty()) {
            self.id = Some(id.to_string());
        }
        if let Some(model) = model.filter(|s| !s.is_empty()) {
            self.model = model.to_string();
        }
        if created_at.is_some() {
            self.created_at = created_at;
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn freeze(&mut self) {
        if !self.frozen {
            self.frozen = true;
            if self.id.is_none() {
                self.id = Some(format!("stream-{}", uuid::Uuid::new_v4().simple()));
            }
            if self.created_at.is_none() {
                self.created_at = Some(now_epoch_secs());
            }
        }
    }

    /// Build a chunk stamped with this stream's identity.
    pub fn chunk(
        &mut self,
        delta: Delta,
        finish_reason: Option<FinishReason>,
        usage: Option<Usage>,
        metadata: Metadata,
    ) -> StreamChunk {
        self.freeze();
        StreamChunk {
            id: self.id.clone().unwrap_or_default(),
            created_at: self.created_at.unwrap_or_default(),
            model: self.model.clone(),
            choices: vec![Choice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage,
            metadata,
        }
    }
}
