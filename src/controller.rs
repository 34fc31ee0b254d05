//! Drives a [`ChatSession`] against a [`ChatBackend`].
//!
//! The controller never spawns anything itself. `send` and
//! [`PendingGreeting::wait`] are plain futures; the caller decides where
//! they run (a dioxus `spawn`, a tokio task, or inline in a test).

use crate::backend::{AssistantChunk, ChatBackend, backend_from_config};
use crate::clock::{self, Stopwatch};
use crate::config::ChatConfig;
use crate::prompts::SamplePrompt;
use crate::session::{ChatSession, ResetTicket, SessionError, SessionView, TurnId, TurnRequest};
use crate::storage::DurableStore;
use crate::types::{MessageId, TransportStatus};
use futures::StreamExt;
use futures::future::{AbortHandle, AbortRegistration, Abortable};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// How a turn ended.
#[derive(Clone, Debug, PartialEq)]
pub enum TurnOutcome {
    Completed {
        message_id: Option<MessageId>,
        duration_ms: f64,
    },
    /// Stopped by the user or superseded by a reset.
    Stopped,
    Failed(String),
}

pub struct ChatController<S> {
    session: Arc<Mutex<ChatSession<S>>>,
    backend: Arc<dyn ChatBackend>,
    pending_greeting: Arc<Mutex<Option<AbortHandle>>>,
}

impl<S> Clone for ChatController<S> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            backend: Arc::clone(&self.backend),
            pending_greeting: Arc::clone(&self.pending_greeting),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S: DurableStore> ChatController<S> {
    pub fn new(session: ChatSession<S>, backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            backend,
            pending_greeting: Arc::new(Mutex::new(None)),
        }
    }

    /// Session over `store` talking to whatever backend `config` names.
    pub fn from_config(store: S, config: &ChatConfig) -> Self {
        Self::new(
            ChatSession::new(store, config),
            backend_from_config(&config.backend),
        )
    }

    fn session(&self) -> MutexGuard<'_, ChatSession<S>> {
        lock(&self.session)
    }

    pub fn hydrate(&self) -> bool {
        self.session().hydrate()
    }

    pub fn view(&self) -> SessionView {
        self.session().view()
    }

    pub fn revision(&self) -> (u64, u64, TransportStatus) {
        self.session().revision()
    }

    pub fn status(&self) -> TransportStatus {
        self.session().status()
    }

    /// Submit `text` and stream the reply into the transcript. Input and
    /// state errors come back as `Err` before anything is sent; backend
    /// trouble is reported through [`TurnOutcome::Failed`].
    pub async fn send(&self, text: &str) -> Result<TurnOutcome, SessionError> {
        let request = self.session().send(text)?;
        Ok(self.run_turn(request).await)
    }

    pub async fn send_prompt(&self, prompt: &SamplePrompt) -> Result<TurnOutcome, SessionError> {
        self.send(prompt.prompt).await
    }

    async fn run_turn(&self, request: TurnRequest) -> TurnOutcome {
        let TurnRequest {
            turn,
            messages,
            user_message_id,
            abort,
        } = request;
        let started = Stopwatch::start();
        info!(turn = ?turn, user_message = %user_message_id, "sending message");

        let stream = match self.backend.stream(&messages).await {
            Ok(stream) => stream,
            Err(err) => return self.fail(turn, err.to_string()),
        };

        let mut stream = Abortable::new(stream, abort);
        while let Some(item) = stream.next().await {
            match item {
                Ok(AssistantChunk::Finish) => break,
                Ok(chunk) => {
                    let applied = self.session().apply(turn, chunk);
                    if !applied {
                        debug!(turn = ?turn, "turn closed while streaming");
                        return TurnOutcome::Stopped;
                    }
                }
                Err(err) => return self.fail(turn, err.to_string()),
            }
        }
        if stream.is_aborted() {
            return TurnOutcome::Stopped;
        }

        let duration_ms = started.elapsed_ms();
        let mut session = self.session();
        if !session.status().is_busy() {
            // Closed by stop or reset after the last chunk.
            return TurnOutcome::Stopped;
        }
        let message_id = session.finish(turn);
        if let Some(id) = &message_id
            && let Err(err) = session.record_duration(id.clone(), duration_ms)
        {
            warn!(error = %err, "could not record response time");
        }
        info!(turn = ?turn, duration_ms, "response complete");
        TurnOutcome::Completed {
            message_id,
            duration_ms,
        }
    }

    fn fail(&self, turn: TurnId, error: String) -> TurnOutcome {
        warn!(turn = ?turn, %error, "chat turn failed");
        if self.session().fail(turn, error.clone()) {
            TurnOutcome::Failed(error)
        } else {
            TurnOutcome::Stopped
        }
    }

    /// Cancel the in-flight request; partial output stays.
    pub fn stop(&self) -> bool {
        self.session().stop()
    }

    pub fn record_duration(&self, id: MessageId, duration_ms: f64) -> Result<(), SessionError> {
        self.session().record_duration(id, duration_ms)
    }

    /// Clear the chat now and hand back the delayed greeting. Any greeting
    /// still pending from an earlier reset is cancelled.
    pub fn reset(&self) -> Result<PendingGreeting<S>, SessionError> {
        let ticket = self.session().reset()?;
        let (handle, registration) = AbortHandle::new_pair();
        if let Some(previous) = lock(&self.pending_greeting).replace(handle) {
            previous.abort();
        }
        Ok(PendingGreeting {
            session: Arc::clone(&self.session),
            ticket,
            registration,
        })
    }
}

/// The second half of a reset: sleeps for the configured delay, then puts
/// the greeting back if the chat is still empty.
#[must_use = "the greeting is only re-inserted once `wait` is awaited"]
pub struct PendingGreeting<S> {
    session: Arc<Mutex<ChatSession<S>>>,
    ticket: ResetTicket,
    registration: AbortRegistration,
}

impl<S: DurableStore> PendingGreeting<S> {
    /// Returns `true` if the greeting was inserted.
    pub async fn wait(self) -> bool {
        let delay = Abortable::new(clock::sleep(self.ticket.delay), self.registration);
        if delay.await.is_err() {
            debug!("pending greeting cancelled");
            return false;
        }
        lock(&self.session).finish_reset(self.ticket)
    }
}
