use super::frames::{FrameDecoder, StreamItem, drain_lines, into_chunk_stream};
use super::{AssistantChunk, BackendError, ChatBackend, ChunkStream};
use crate::types::Message;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub struct OllamaBackend {
    client: Client,
    model: String,
    endpoint: String,
}

impl OllamaBackend {
    pub fn new(host: &str, model: String) -> Self {
        Self {
            client: Client::new(),
            model,
            endpoint: format!("{}/api/chat", host.trim_end_matches('/')),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[derive(Serialize)]
struct OllamaWireMessage {
    role: &'static str,
    content: String,
}

impl From<&Message> for OllamaWireMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role.as_str(),
            content: message.text(),
        }
    }
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaWireMessage>,
    stream: bool,
}

#[derive(Deserialize, Debug)]
struct StreamChunkMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    thinking: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamChunk {
    message: Option<StreamChunkMessage>,
    done: Option<bool>,
    error: Option<String>,
}

/// Interpret one NDJSON line from `/api/chat`.
pub fn parse_ollama_stream_line(line_with_ws: &str) -> Vec<StreamItem> {
    let line = line_with_ws.trim();
    if line.is_empty() {
        return Vec::new();
    }
    let Ok(parsed) = serde_json::from_str::<StreamChunk>(line) else {
        tracing::debug!(line, "skipping unparsable ollama line");
        return Vec::new();
    };
    if let Some(error) = parsed.error {
        return vec![StreamItem::Error(error)];
    }

    let mut items = Vec::new();
    if let Some(msg) = parsed.message {
        if let Some(thinking) = msg.thinking.filter(|t| !t.is_empty()) {
            items.push(StreamItem::Chunk(AssistantChunk::ReasoningDelta(thinking)));
        }
        if !msg.content.is_empty() {
            items.push(StreamItem::Chunk(AssistantChunk::TextDelta(msg.content)));
        }
    }
    if parsed.done.unwrap_or(false) {
        items.push(StreamItem::Chunk(AssistantChunk::Finish));
        items.push(StreamItem::Done);
    }
    items
}

#[derive(Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder for NdjsonDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<StreamItem> {
        self.buffer.extend_from_slice(bytes);
        drain_lines(&mut self.buffer)
            .iter()
            .flat_map(|line| parse_ollama_stream_line(line))
            .collect()
    }

    fn finish(&mut self) -> Vec<StreamItem> {
        let tail = std::mem::take(&mut self.buffer);
        parse_ollama_stream_line(&String::from_utf8_lossy(&tail))
    }
}

#[async_trait]
impl ChatBackend for OllamaBackend {
    async fn stream(&self, messages: &[Message]) -> Result<ChunkStream, BackendError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&OllamaChatRequest {
                model: &self.model,
                messages: messages.iter().map(OllamaWireMessage::from).collect(),
                stream: true,
            })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(into_chunk_stream(
            Box::pin(response.bytes_stream()),
            NdjsonDecoder::default(),
        ))
    }
}
