// unified-stream: transport, wire framing, stream processors, the token
// buffer, and the provider adapters built on them.
#![allow(clippy::result_large_err)]

pub mod buffer;
pub mod framing;
pub mod processor;
pub mod provider;
pub mod providers;
pub mod registry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;
pub(crate) mod util;
pub mod validation;

// --- Curated re-exports from unified-stream-types (Layer 1) ---
pub use unified_stream_types::{
    // Messages
    Attachment,
    // Type aliases
    BoxFuture,
    BoxStream,
    // Streaming
    Choice,
    Delta,
    // Errors
    Error,
    ErrorDetails,
    ErrorKind,
    FinishReason,
    // Config
    GeminiStreamFormat,
    Message,
    Metadata,
    ProviderConfig,
    ProviderKind,
    // Buffered responses
    ProviderResponse,
    ResponseMetadata,
    Role,
    StreamChunk,
    ThinkingMode,
    TransportTimeout,
    Usage,
};

// --- Core types at crate root ---
pub use buffer::{
    buffered, BufferConfig, BufferStats, FlushInfo, FlushReason, FlushSink, FlushStrategy,
    Fragment, TokenBuffer,
};
pub use provider::{ChatOptions, Provider};
pub use registry::ProviderRegistry;
pub use transport::{HttpTransport, RequestDescriptor, Transport};

// Provider variants at crate root (behind feature flags).
#[cfg(feature = "gemini")]
pub use providers::gemini::GeminiProvider;
#[cfg(feature = "openai")]
pub use providers::openai::OpenAiProvider;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_curated_reexports_available() {
        let _ = Message::user("hi");
        let _ = ErrorKind::Cancelled;
        let _ = TransportTimeout::default();
        let _ = BufferConfig::default();
        let _ = ChatOptions::default();
        let _: fn() -> ProviderRegistry = ProviderRegistry::with_defaults;
    }
}
