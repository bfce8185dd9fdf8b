// Adapts a chunk stream into a stream of buffered fragments.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::StreamExt;
use unified_stream_types::{BoxStream, Error, StreamChunk};

use super::{BufferConfig, Clock, Fragment, SystemClock, TokenBuffer};

/// Re-batch `chunks` into [`Fragment`]s.
///
/// The time check ticks on every pull, and whatever is left is force-flushed
/// when the source ends. An error from the source is yielded after the
/// fragments buffered before it.
pub fn buffered(
    chunks: BoxStream<'static, Result<StreamChunk, Error>>,
    config: BufferConfig,
) -> Result<BoxStream<'static, Result<Fragment, Error>>, Error> {
    buffered_with_clock(chunks, config, Arc::new(SystemClock))
}

pub fn buffered_with_clock(
    chunks: BoxStream<'static, Result<StreamChunk, Error>>,
    config: BufferConfig,
    clock: Arc<dyn Clock>,
) -> Result<BoxStream<'static, Result<Fragment, Error>>, Error> {
    let mut buffer = TokenBuffer::with_clock(config, VecDeque::<Fragment>::new(), clock)?;

    Ok(Box::pin(async_stream::stream! {
        let mut chunks = chunks;
        loop {
            let failure = match chunks.next().await {
                Some(Ok(chunk)) => {
                    buffer.add_stream_chunk(&chunk);
                    buffer.check_time_flush();
                    None
                }
                Some(Err(e)) => {
                    buffer.force_flush();
                    Some(Some(e))
                }
                None => {
                    buffer.force_flush();
                    Some(None)
                }
            };

            while let Some(fragment) = buffer.sink_mut().pop_front() {
                yield Ok(fragment);
            }

            match failure {
                None => {}
                Some(Some(e)) => {
                    yield Err(e);
                    return;
                }
                Some(None) => return,
            }
        }
    }))
}
