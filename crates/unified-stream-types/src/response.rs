use serde::{Deserialize, Serialize};

use crate::chunk::{FinishReason, Metadata, Usage};

/// Metadata attached to every buffered response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub provider: String,
    /// Epoch seconds at which the response was received.
    pub timestamp: u64,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    /// Provider extras: grounding, citations, function calls, rate limits.
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub extra: Metadata,
}

/// The common shape every provider's buffered `chat` result is mapped into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub content: String,
    /// Reasoning text, present only when thought visibility is on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    pub usage: Usage,
    pub finish_reason: FinishReason,
    pub metadata: ResponseMetadata,
}

impl ProviderResponse {
    /// An empty reply (no candidates) maps to empty content and `stop`.
    pub fn empty(metadata: ResponseMetadata) -> Self {
        Self {
            content: String::new(),
            thinking: None,
            usage: Usage::default(),
            finish_reason: FinishReason::Stop,
            metadata,
        }
    }
}
