//! Session state: the transcript, the duration ledger and the bridge that
//! persists them, composed into one object.
//!
//! Every mutating call ends with a bridge sync, so the stored snapshot always
//! reflects the most recent in-memory state (best effort: failed writes are
//! logged and retried on the next change).

mod bridge;
mod ledger;
mod snapshot;
mod transcript;

pub use bridge::{PersistenceBridge, Phase, ResetTicket};
pub use ledger::DurationLedger;
pub use snapshot::Snapshot;
pub use transcript::{TranscriptStore, TurnId, TurnRequest, last_role};

use crate::backend::AssistantChunk;
use crate::config::ChatConfig;
use crate::input::{InputError, UserText};
use crate::storage::DurableStore;
use crate::types::{Message, MessageId, TransportStatus};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("a response is still being generated")]
    Busy,

    #[error("the session has not been hydrated yet")]
    NotHydrated,

    #[error("no message with id {0} in the transcript")]
    UnknownMessage(MessageId),

    #[error("invalid duration: {0} ms")]
    InvalidDuration(f64),
}

/// Read-only copy of what the UI renders.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionView {
    pub phase: Phase,
    pub messages: Vec<Message>,
    pub status: TransportStatus,
    pub durations: DurationLedger,
    pub last_error: Option<String>,
}

impl SessionView {
    pub fn is_loading(&self) -> bool {
        self.phase != Phase::Active
    }
}

pub struct ChatSession<S> {
    transcript: TranscriptStore,
    ledger: DurationLedger,
    bridge: PersistenceBridge<S>,
    max_message_chars: usize,
}

impl<S: DurableStore> ChatSession<S> {
    pub fn new(store: S, config: &ChatConfig) -> Self {
        Self {
            transcript: TranscriptStore::new(),
            ledger: DurationLedger::new(),
            bridge: PersistenceBridge::new(
                store,
                config.storage_key.clone(),
                config.welcome_message.clone(),
                config.reset_delay,
            ),
            max_message_chars: config.max_message_chars,
        }
    }

    pub fn phase(&self) -> Phase {
        self.bridge.phase()
    }

    pub fn messages(&self) -> &[Message] {
        self.transcript.messages()
    }

    pub fn status(&self) -> TransportStatus {
        self.transcript.status()
    }

    pub fn durations(&self) -> &DurationLedger {
        &self.ledger
    }

    pub fn last_error(&self) -> Option<&str> {
        self.transcript.last_error()
    }

    pub fn store(&self) -> &S {
        self.bridge.store()
    }

    /// Combined change counter, handy for cheap "did anything move" checks.
    pub fn revision(&self) -> (u64, u64, TransportStatus) {
        (
            self.transcript.revision(),
            self.ledger.revision(),
            self.transcript.status(),
        )
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            phase: self.phase(),
            messages: self.transcript.messages().to_vec(),
            status: self.transcript.status(),
            durations: self.ledger.clone(),
            last_error: self.transcript.last_error().map(str::to_string),
        }
    }

    /// Client-ready transition: read storage, seed both structures and greet
    /// a first-time visitor. Only the first call does anything.
    pub fn hydrate(&mut self) -> bool {
        self.bridge.hydrate(&mut self.transcript, &mut self.ledger)
    }

    /// Re-run the greeting check. Does nothing unless the transcript is empty
    /// and a reset re-armed the guard.
    pub fn ensure_greeting(&mut self) -> bool {
        if self.phase() != Phase::Active {
            return false;
        }
        self.bridge.bootstrap(&mut self.transcript, &mut self.ledger)
    }

    /// Validate and append a user message, returning the backend request.
    pub fn send(&mut self, raw: &str) -> Result<TurnRequest, SessionError> {
        self.require_active()?;
        let text = UserText::parse_with_limit(raw, self.max_message_chars)?;
        let request = self.transcript.append(text)?;
        self.sync();
        Ok(request)
    }

    pub fn apply(&mut self, turn: TurnId, chunk: AssistantChunk) -> bool {
        let applied = self.transcript.apply(turn, chunk);
        if applied {
            self.sync();
        }
        applied
    }

    pub fn finish(&mut self, turn: TurnId) -> Option<MessageId> {
        let assistant = self.transcript.finish(turn);
        self.sync();
        assistant
    }

    pub fn fail(&mut self, turn: TurnId, error: impl Into<String>) -> bool {
        let failed = self.transcript.fail(turn, error);
        self.sync();
        failed
    }

    pub fn stop(&mut self) -> bool {
        let stopped = self.transcript.stop();
        if stopped {
            tracing::info!("generation stopped by user");
            self.sync();
        }
        stopped
    }

    /// Store how long a message took to generate.
    pub fn record_duration(&mut self, id: MessageId, duration_ms: f64) -> Result<(), SessionError> {
        if !self.transcript.contains(&id) {
            return Err(SessionError::UnknownMessage(id));
        }
        if !self.ledger.record(id, duration_ms) {
            return Err(SessionError::InvalidDuration(duration_ms));
        }
        self.sync();
        Ok(())
    }

    /// First half of "clear chat": stop any generation, empty everything and
    /// persist that. Redeem the ticket with [`ChatSession::finish_reset`]
    /// after its delay.
    pub fn reset(&mut self) -> Result<ResetTicket, SessionError> {
        self.require_active()?;
        self.transcript.stop();
        let ticket = self.bridge.begin_reset(&mut self.transcript, &mut self.ledger);
        tracing::info!(delay_ms = ticket.delay.as_millis() as u64, "chat cleared");
        Ok(ticket)
    }

    pub fn finish_reset(&mut self, ticket: ResetTicket) -> bool {
        self.bridge
            .finish_reset(ticket, &mut self.transcript, &mut self.ledger)
    }

    fn require_active(&self) -> Result<(), SessionError> {
        if self.phase() == Phase::Active {
            Ok(())
        } else {
            Err(SessionError::NotHydrated)
        }
    }

    fn sync(&mut self) {
        self.bridge.observe(&self.transcript, &self.ledger);
    }
}
