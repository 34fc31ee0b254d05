/// Streaming completion backends.
///
/// The session only ever sees a stream of [`AssistantChunk`]s; where they
/// come from is decided here.
///
/// - `http` - server speaking the UI message stream protocol over SSE
/// - `ollama` - local Ollama chat API (newline-delimited JSON)
/// - `frames` - shared byte-stream → chunk-stream plumbing
mod frames;
mod http;
mod ollama;

pub use frames::{FrameDecoder, StreamItem, into_chunk_stream};
pub use http::{SseDecoder, UiStreamBackend, parse_ui_stream_data};
pub use ollama::{NdjsonDecoder, OllamaBackend, parse_ollama_stream_line};

use crate::config::BackendConfig;
use crate::types::{Message, MessageId, MessagePart};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

/// One increment of assistant output.
#[derive(Clone, Debug, PartialEq)]
pub enum AssistantChunk {
    /// The server announced the id of the message it is about to stream.
    Start { message_id: Option<MessageId> },
    /// A complete new part.
    Part(MessagePart),
    /// Text to append to the current text part.
    TextDelta(String),
    /// Text to append to the current reasoning part.
    ReasoningDelta(String),
    Finish,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed stream data: {0}")]
    Decode(String),

    #[error("{0}")]
    Stream(String),

    #[error(
        "No chat backend configured. Set CHAT_ENDPOINT for a chat server, or LLM_USE_OLLAMA=true for local Ollama."
    )]
    NotConfigured,
}

pub type ChunkStream = BoxStream<'static, Result<AssistantChunk, BackendError>>;

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Start generating a reply to `messages` (prior transcript plus the new
    /// user message). Dropping the stream cancels the request.
    async fn stream(&self, messages: &[Message]) -> Result<ChunkStream, BackendError>;
}

/// Stand-in used when nothing is configured; every turn fails with a hint.
pub struct UnconfiguredBackend;

#[async_trait]
impl ChatBackend for UnconfiguredBackend {
    async fn stream(&self, _messages: &[Message]) -> Result<ChunkStream, BackendError> {
        Err(BackendError::NotConfigured)
    }
}

pub fn backend_from_config(config: &BackendConfig) -> Arc<dyn ChatBackend> {
    match config {
        BackendConfig::UiStream { endpoint, api_key } => {
            tracing::info!(%endpoint, "using chat endpoint");
            Arc::new(UiStreamBackend::new(endpoint.clone(), api_key.clone()))
        }
        BackendConfig::Ollama { host, model } => {
            tracing::info!(%host, %model, "using local Ollama");
            Arc::new(OllamaBackend::new(host, model.clone()))
        }
        BackendConfig::None => {
            tracing::warn!("no chat backend configured");
            Arc::new(UnconfiguredBackend)
        }
    }
}
