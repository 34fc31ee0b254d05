use super::SessionError;
use crate::backend::AssistantChunk;
use crate::input::UserText;
use crate::types::{Message, MessageId, MessagePart, PartState, Role, TransportStatus};
use futures::future::{AbortHandle, AbortRegistration};
use serde_json::Map;

/// Identifies one send/stream cycle so late chunks from a stopped turn can
/// be told apart from the current one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TurnId(u64);

/// Everything a backend call needs for one turn.
#[derive(Debug)]
pub struct TurnRequest {
    pub turn: TurnId,
    /// Prior transcript followed by the new user message.
    pub messages: Vec<Message>,
    pub user_message_id: MessageId,
    /// Registration half of the turn's cancellation; wrap the backend
    /// stream in `futures::stream::Abortable` with it.
    pub abort: AbortRegistration,
}

struct ActiveTurn {
    id: TurnId,
    abort: AbortHandle,
    assistant: Option<MessageId>,
}

/// Ordered messages plus the status of the current backend request.
#[derive(Default)]
pub struct TranscriptStore {
    messages: Vec<Message>,
    status: TransportStatus,
    active: Option<ActiveTurn>,
    last_error: Option<String>,
    next_turn: u64,
    revision: u64,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn status(&self) -> TransportStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.messages.iter().any(|message| &message.id == id)
    }

    /// Bumped on every change to the message list.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Add a user turn and hand back what the backend needs to answer it.
    pub fn append(&mut self, text: UserText) -> Result<TurnRequest, SessionError> {
        if self.status.is_busy() {
            return Err(SessionError::Busy);
        }

        let mut user = Message::user(text.into_inner());
        while self.contains(&user.id) {
            user.id = MessageId::generate();
        }
        let user_message_id = user.id.clone();
        self.messages.push(user);

        self.next_turn += 1;
        let turn = TurnId(self.next_turn);
        let (handle, registration) = AbortHandle::new_pair();
        self.active = Some(ActiveTurn {
            id: turn,
            abort: handle,
            assistant: None,
        });
        self.status = TransportStatus::Submitted;
        self.last_error = None;
        self.revision += 1;

        Ok(TurnRequest {
            turn,
            messages: self.messages.clone(),
            user_message_id,
            abort: registration,
        })
    }

    /// Merge one chunk of assistant output. Returns `false` when the chunk
    /// belongs to a turn that is no longer active.
    pub fn apply(&mut self, turn: TurnId, chunk: AssistantChunk) -> bool {
        if !self.is_active(turn) {
            return false;
        }

        match chunk {
            AssistantChunk::Finish => {
                self.finish(turn);
            }
            AssistantChunk::Start { message_id } => {
                self.assistant_message(message_id);
            }
            AssistantChunk::Part(part) => {
                self.assistant_message(None).parts.push(part);
            }
            AssistantChunk::TextDelta(delta) => {
                let parts = &mut self.assistant_message(None).parts;
                match parts.last_mut() {
                    Some(MessagePart::Text { text, .. }) => text.push_str(&delta),
                    _ => parts.push(MessagePart::Text {
                        text: delta,
                        state: Some(PartState::Streaming),
                        extra: Map::new(),
                    }),
                }
            }
            AssistantChunk::ReasoningDelta(delta) => {
                let parts = &mut self.assistant_message(None).parts;
                match parts.last_mut() {
                    Some(MessagePart::Reasoning { text, .. }) => text.push_str(&delta),
                    _ => parts.push(MessagePart::Reasoning {
                        text: delta,
                        state: Some(PartState::Streaming),
                        extra: Map::new(),
                    }),
                }
            }
        }
        true
    }

    /// Close the turn normally. Returns the id of the assistant message it
    /// produced, if any content arrived.
    pub fn finish(&mut self, turn: TurnId) -> Option<MessageId> {
        if !self.is_active(turn) {
            return None;
        }
        let assistant = self.close_active();
        self.status = TransportStatus::Ready;
        assistant
    }

    /// Close the turn with an error. Partial output stays in place.
    pub fn fail(&mut self, turn: TurnId, error: impl Into<String>) -> bool {
        if !self.is_active(turn) {
            return false;
        }
        self.close_active();
        self.status = TransportStatus::Error;
        self.last_error = Some(error.into());
        true
    }

    /// Cancel the in-flight request, keeping whatever already arrived.
    /// Only meaningful while submitted or streaming.
    pub fn stop(&mut self) -> bool {
        if !self.status.is_busy() {
            return false;
        }
        if let Some(active) = &self.active {
            active.abort.abort();
        }
        self.close_active();
        self.status = TransportStatus::Ready;
        true
    }

    /// Unconditional overwrite; the transport status is left alone.
    pub fn replace_all(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.revision += 1;
    }

    fn is_active(&self, turn: TurnId) -> bool {
        matches!(&self.active, Some(active) if active.id == turn)
    }

    fn close_active(&mut self) -> Option<MessageId> {
        let active = self.active.take()?;
        let assistant = active.assistant?;
        if let Some(message) = self.messages.iter_mut().rfind(|m| m.id == assistant) {
            message.parts.iter_mut().for_each(MessagePart::mark_done);
            self.revision += 1;
        }
        Some(assistant)
    }

    /// The assistant message of the active turn, created on first use.
    fn assistant_message(&mut self, preferred_id: Option<MessageId>) -> &mut Message {
        self.status = TransportStatus::Streaming;
        self.revision += 1;

        let existing = self
            .active
            .as_ref()
            .and_then(|active| active.assistant.clone())
            .and_then(|id| self.messages.iter().rposition(|m| m.id == id));

        let index = match existing {
            Some(index) => index,
            None => {
                let mut id = preferred_id.unwrap_or_else(MessageId::generate);
                while self.contains(&id) {
                    id = MessageId::generate();
                }
                if let Some(active) = self.active.as_mut() {
                    active.assistant = Some(id.clone());
                }
                self.messages.push(Message::assistant(id, Vec::new()));
                self.messages.len() - 1
            }
        };
        &mut self.messages[index]
    }
}

impl std::fmt::Debug for TranscriptStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriptStore")
            .field("messages", &self.messages.len())
            .field("status", &self.status)
            .field("active", &self.active.as_ref().map(|active| active.id))
            .field("revision", &self.revision)
            .finish()
    }
}

/// Role of the newest message, if any.
pub fn last_role(messages: &[Message]) -> Option<Role> {
    messages.last().map(|message| message.role)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(raw: &str) -> UserText {
        UserText::parse(raw).unwrap()
    }

    #[test]
    fn append_adds_user_message_and_submits() {
        let mut store = TranscriptStore::new();
        let request = store.append(text("hello")).unwrap();

        assert_eq!(store.status(), TransportStatus::Submitted);
        assert_eq!(store.messages().len(), 1);
        assert_eq!(store.messages()[0].role, Role::User);
        assert_eq!(store.messages()[0].text(), "hello");
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.user_message_id, store.messages()[0].id);
    }

    #[test]
    fn append_while_busy_is_rejected() {
        let mut store = TranscriptStore::new();
        store.append(text("one")).unwrap();
        assert!(matches!(store.append(text("two")), Err(SessionError::Busy)));
        assert_eq!(store.messages().len(), 1);
    }

    #[test]
    fn deltas_merge_into_one_text_part() {
        let mut store = TranscriptStore::new();
        let request = store.append(text("hi")).unwrap();
        let turn = request.turn;

        assert!(store.apply(
            turn,
            AssistantChunk::Start {
                message_id: Some("srv-1".into())
            }
        ));
        assert_eq!(store.status(), TransportStatus::Streaming);
        store.apply(turn, AssistantChunk::TextDelta("Hel".into()));
        store.apply(turn, AssistantChunk::TextDelta("lo".into()));
        store.apply(turn, AssistantChunk::Finish);

        let reply = &store.messages()[1];
        assert_eq!(reply.id.as_str(), "srv-1");
        assert_eq!(reply.role, Role::Assistant);
        assert_eq!(
            reply.parts,
            vec![MessagePart::Text {
                text: "Hello".into(),
                state: Some(PartState::Done),
                extra: Map::new(),
            }]
        );
        assert_eq!(store.status(), TransportStatus::Ready);
    }

    #[test]
    fn reasoning_and_text_become_separate_parts() {
        let mut store = TranscriptStore::new();
        let turn = store.append(text("hi")).unwrap().turn;
        store.apply(turn, AssistantChunk::ReasoningDelta("plan".into()));
        store.apply(turn, AssistantChunk::TextDelta("answer".into()));
        let kinds: Vec<_> = store.messages()[1]
            .parts
            .iter()
            .map(|part| part.kind().to_string())
            .collect();
        assert_eq!(kinds, ["reasoning", "text"]);
    }

    #[test]
    fn stop_keeps_partial_output_and_ignores_late_chunks() {
        let mut store = TranscriptStore::new();
        let turn = store.append(text("hi")).unwrap().turn;
        store.apply(turn, AssistantChunk::Part(MessagePart::text("one")));
        store.apply(turn, AssistantChunk::Part(MessagePart::text("two")));

        assert!(store.stop());
        assert_eq!(store.status(), TransportStatus::Ready);
        assert!(!store.apply(turn, AssistantChunk::Part(MessagePart::text("three"))));
        assert_eq!(store.messages()[1].parts.len(), 2);

        // Nothing left to stop.
        assert!(!store.stop());
    }

    #[test]
    fn failure_keeps_partial_output() {
        let mut store = TranscriptStore::new();
        let turn = store.append(text("hi")).unwrap().turn;
        store.apply(turn, AssistantChunk::TextDelta("partial".into()));
        assert!(store.fail(turn, "connection reset"));

        assert_eq!(store.status(), TransportStatus::Error);
        assert_eq!(store.last_error(), Some("connection reset"));
        assert_eq!(store.messages()[1].text(), "partial");

        // Sending again is allowed after an error and clears it.
        store.append(text("retry")).unwrap();
        assert_eq!(store.last_error(), None);
    }

    #[test]
    fn colliding_server_id_is_replaced() {
        let mut store = TranscriptStore::new();
        let request = store.append(text("hi")).unwrap();
        store.apply(
            request.turn,
            AssistantChunk::Start {
                message_id: Some(request.user_message_id.clone()),
            },
        );
        assert_ne!(store.messages()[1].id, request.user_message_id);
    }

    #[test]
    fn replace_all_leaves_status_alone() {
        let mut store = TranscriptStore::new();
        store.append(text("hi")).unwrap();
        let rev = store.revision();
        store.replace_all(Vec::new());
        assert!(store.is_empty());
        assert_eq!(store.status(), TransportStatus::Submitted);
        assert!(store.revision() > rev);
    }

    #[test]
    fn last_role_reports_newest_message() {
        let mut store = TranscriptStore::new();
        assert_eq!(last_role(store.messages()), None);
        store.append(text("hi")).unwrap();
        assert_eq!(last_role(store.messages()), Some(Role::User));
    }
}
