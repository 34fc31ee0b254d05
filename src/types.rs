use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Identifier of a message, unique within one transcript.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Fresh random id for messages created on this side of the wire.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Id for a synthesized greeting, `welcome-<unix millis>`.
    pub fn welcome() -> Self {
        let millis = time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        Self(format!("welcome-{millis}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartState {
    Streaming,
    Done,
}

/// One piece of typed message content.
///
/// Text and reasoning parts are understood; every other part type (tool
/// invocations, sources, step markers) is kept as its raw JSON object so a
/// stored transcript written by another client survives a load/save cycle.
/// Fields of text and reasoning parts beyond `text` and `state` (provider
/// metadata and the like) ride along in `extra`.
#[derive(Clone, Debug, PartialEq)]
pub enum MessagePart {
    Text {
        text: String,
        state: Option<PartState>,
        extra: Map<String, Value>,
    },
    Reasoning {
        text: String,
        state: Option<PartState>,
        extra: Map<String, Value>,
    },
    Other(Map<String, Value>),
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        MessagePart::Text {
            text: text.into(),
            state: None,
            extra: Map::new(),
        }
    }

    /// Empty part that deltas are appended to while a reply streams.
    pub fn streaming_text() -> Self {
        MessagePart::Text {
            text: String::new(),
            state: Some(PartState::Streaming),
            extra: Map::new(),
        }
    }

    pub fn streaming_reasoning() -> Self {
        MessagePart::Reasoning {
            text: String::new(),
            state: Some(PartState::Streaming),
            extra: Map::new(),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            MessagePart::Text { .. } => "text",
            MessagePart::Reasoning { .. } => "reasoning",
            MessagePart::Other(fields) => fields
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("unknown"),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessagePart::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    pub(crate) fn mark_done(&mut self) {
        match self {
            MessagePart::Text { state, .. } | MessagePart::Reasoning { state, .. } => {
                if state.is_some() {
                    *state = Some(PartState::Done);
                }
            }
            MessagePart::Other(_) => {}
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum PartRef<'a> {
    Text {
        text: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        state: Option<PartState>,
        #[serde(flatten)]
        extra: &'a Map<String, Value>,
    },
    Reasoning {
        text: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        state: Option<PartState>,
        #[serde(flatten)]
        extra: &'a Map<String, Value>,
    },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum KnownPart {
    Text {
        text: String,
        #[serde(default)]
        state: Option<PartState>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    Reasoning {
        text: String,
        #[serde(default)]
        state: Option<PartState>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
}

impl Serialize for MessagePart {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            MessagePart::Text { text, state, extra } => PartRef::Text {
                text,
                state: *state,
                extra,
            }
            .serialize(serializer),
            MessagePart::Reasoning { text, state, extra } => PartRef::Reasoning {
                text,
                state: *state,
                extra,
            }
            .serialize(serializer),
            MessagePart::Other(fields) => fields.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for MessagePart {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let fields = Map::<String, Value>::deserialize(deserializer)?;
        match fields.get("type").and_then(Value::as_str) {
            Some("text") | Some("reasoning") => {
                let known = serde_json::from_value::<KnownPart>(Value::Object(fields))
                    .map_err(D::Error::custom)?;
                Ok(match known {
                    KnownPart::Text { text, state, extra } => {
                        MessagePart::Text { text, state, extra }
                    }
                    KnownPart::Reasoning { text, state, extra } => {
                        MessagePart::Reasoning { text, state, extra }
                    }
                })
            }
            Some(_) => Ok(MessagePart::Other(fields)),
            None => Err(D::Error::custom("message part is missing `type`")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub parts: Vec<MessagePart>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            role: Role::User,
            parts: vec![MessagePart::text(text)],
        }
    }

    pub fn assistant(id: MessageId, parts: Vec<MessagePart>) -> Self {
        Self {
            id,
            role: Role::Assistant,
            parts,
        }
    }

    /// Concatenated body of all text parts.
    pub fn text(&self) -> String {
        self.parts.iter().filter_map(MessagePart::as_text).collect()
    }
}

/// Client-visible state of the current backend request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportStatus {
    #[default]
    Ready,
    Submitted,
    Streaming,
    Error,
}

impl TransportStatus {
    /// A request is in flight and may be stopped.
    pub fn is_busy(self) -> bool {
        matches!(self, TransportStatus::Submitted | TransportStatus::Streaming)
    }
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransportStatus::Ready => "ready",
            TransportStatus::Submitted => "submitted",
            TransportStatus::Streaming => "streaming",
            TransportStatus::Error => "error",
        };
        f.write_str(label)
    }
}
