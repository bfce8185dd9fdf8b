// unified-stream-types: the shared chunk, message, config, and error types
#![allow(clippy::result_large_err)]

use std::future::Future;
use std::pin::Pin;

pub mod chunk;
pub mod config;
pub mod error;
pub mod message;
pub mod response;

pub use chunk::*;
pub use config::*;
pub use error::*;
pub use message::*;
pub use response::*;

/// Current time in epoch seconds, used for synthesized timestamps.
pub fn now_epoch_secs() -> u64 {
    error::now_epoch_secs()
}

/// A boxed future that is Send.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A boxed stream that is Send.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;
