use super::frames::{FrameDecoder, StreamItem, drain_lines, into_chunk_stream};
use super::{AssistantChunk, BackendError, ChatBackend, ChunkStream};
use crate::types::{Message, MessageId, MessagePart};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Client for a chat server that answers with a UI message stream over
/// server-sent events.
pub struct UiStreamBackend {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    chat_id: String,
}

impl UiStreamBackend {
    pub fn new(endpoint: String, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            api_key,
            chat_id: uuid::Uuid::new_v4().simple().to_string(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    id: &'a str,
    messages: &'a [Message],
    trigger: &'static str,
}

#[async_trait]
impl ChatBackend for UiStreamBackend {
    async fn stream(&self, messages: &[Message]) -> Result<ChunkStream, BackendError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("accept", "text/event-stream")
            .json(&ChatRequest {
                id: &self.chat_id,
                messages,
                trigger: "submit-message",
            });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(messages = messages.len(), "chat stream opened");
        Ok(into_chunk_stream(
            Box::pin(response.bytes_stream()),
            SseDecoder::default(),
        ))
    }
}

// -----------------
// SSE framing
// -----------------

/// Collects `data:` lines until a blank line ends the event.
#[derive(Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Option<String>,
}

impl SseDecoder {
    fn flush_event(&mut self, items: &mut Vec<StreamItem>) {
        if let Some(data) = self.data.take()
            && let Some(item) = parse_ui_stream_data(&data)
        {
            items.push(item);
        }
    }
}

impl FrameDecoder for SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<StreamItem> {
        self.buffer.extend_from_slice(bytes);
        let mut items = Vec::new();
        for line in drain_lines(&mut self.buffer) {
            if line.is_empty() {
                self.flush_event(&mut items);
                continue;
            }
            if let Some(rest) = line.strip_prefix("data:") {
                let fragment = rest.strip_prefix(' ').unwrap_or(rest);
                match &mut self.data {
                    Some(existing) => {
                        existing.push('\n');
                        existing.push_str(fragment);
                    }
                    None => self.data = Some(fragment.to_string()),
                }
            }
        }
        items
    }

    fn finish(&mut self) -> Vec<StreamItem> {
        let mut items = Vec::new();
        if !self.buffer.is_empty() {
            let mut tail = std::mem::take(&mut self.buffer);
            tail.push(b'\n');
            items.extend(self.push(&tail));
        }
        self.flush_event(&mut items);
        items
    }
}

// -----------------
// Event payloads
// -----------------

#[derive(Deserialize)]
struct OAIDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OAIMessage {
    content: String,
}

#[derive(Deserialize)]
struct OAIChoice {
    #[serde(default)]
    delta: Option<OAIDelta>,
    #[serde(default)]
    message: Option<OAIMessage>,
}

#[derive(Deserialize)]
struct OpenAIShape {
    choices: Vec<OAIChoice>,
}

#[derive(Deserialize)]
struct ContentOnly {
    content: String,
}

fn str_field<'a>(fields: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    fields.get(name).and_then(Value::as_str)
}

/// Interpret one SSE `data` payload.
///
/// Understands UI message stream chunks (`{"type":"text-delta",...}`),
/// OpenAI-style `choices[].delta` payloads and bare `{"content":...}`.
/// Returns `None` for payloads that carry nothing for the transcript.
pub fn parse_ui_stream_data(data: &str) -> Option<StreamItem> {
    let trimmed = data.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed == "[DONE]" {
        return Some(StreamItem::Done);
    }

    let fields = match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(fields)) => fields,
        Ok(_) | Err(_) => {
            tracing::debug!(payload = trimmed, "skipping unparsable stream event");
            return None;
        }
    };

    let Some(kind) = str_field(&fields, "type") else {
        return parse_untyped(trimmed);
    };

    let chunk = match kind {
        "start" => AssistantChunk::Start {
            message_id: str_field(&fields, "messageId").map(MessageId::from),
        },
        "text-start" => AssistantChunk::Part(MessagePart::streaming_text()),
        "reasoning-start" => AssistantChunk::Part(MessagePart::streaming_reasoning()),
        "text-delta" => AssistantChunk::TextDelta(str_field(&fields, "delta")?.to_string()),
        "reasoning-delta" => {
            AssistantChunk::ReasoningDelta(str_field(&fields, "delta")?.to_string())
        }
        "start-step" => {
            let mut marker = Map::new();
            marker.insert("type".into(), Value::from("step-start"));
            AssistantChunk::Part(MessagePart::Other(marker))
        }
        "source-url" | "source-document" | "file" => {
            AssistantChunk::Part(MessagePart::Other(fields.clone()))
        }
        "finish" => AssistantChunk::Finish,
        "error" => {
            let text = str_field(&fields, "errorText").unwrap_or("stream error");
            return Some(StreamItem::Error(text.to_string()));
        }
        // text-end, finish-step, tool input chunks, metadata, ...
        _ => return None,
    };
    Some(StreamItem::Chunk(chunk))
}

fn parse_untyped(trimmed: &str) -> Option<StreamItem> {
    if let Ok(parsed) = serde_json::from_str::<OpenAIShape>(trimmed) {
        let first = parsed.choices.into_iter().next()?;
        if let Some(piece) = first.delta.and_then(|delta| delta.content) {
            return Some(StreamItem::Chunk(AssistantChunk::TextDelta(piece)));
        }
        return first
            .message
            .map(|msg| StreamItem::Chunk(AssistantChunk::TextDelta(msg.content)));
    }
    if let Ok(parsed) = serde_json::from_str::<ContentOnly>(trimmed) {
        return Some(StreamItem::Chunk(AssistantChunk::TextDelta(parsed.content)));
    }
    None
}
