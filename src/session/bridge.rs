//! Keeps the live transcript, the duration ledger and the stored snapshot
//! in agreement.
//!
//! Lifecycle: `Uninitialized` until the first client-side pass reads the
//! store, `Hydrated` while the stored state is being installed, then
//! `Active`, where every observed change is written back. Nothing is
//! written before `Active`.

use super::ledger::DurationLedger;
use super::snapshot::{self, Snapshot};
use super::transcript::TranscriptStore;
use crate::storage::DurableStore;
use crate::types::{Message, MessageId, MessagePart};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Hydrated,
    Active,
}

/// Handed out by a reset; redeem it after `delay` to re-insert the greeting.
/// A later reset makes older tickets worthless.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResetTicket {
    generation: u64,
    pub delay: Duration,
}

pub struct PersistenceBridge<S> {
    store: S,
    key: String,
    welcome_message: String,
    reset_delay: Duration,
    phase: Phase,
    greeting_armed: bool,
    saved: Option<(u64, u64)>,
    reset_generation: u64,
    pending_reset: Option<u64>,
}

impl<S: DurableStore> PersistenceBridge<S> {
    pub fn new(
        store: S,
        key: impl Into<String>,
        welcome_message: impl Into<String>,
        reset_delay: Duration,
    ) -> Self {
        Self {
            store,
            key: key.into(),
            welcome_message: welcome_message.into(),
            reset_delay,
            phase: Phase::Uninitialized,
            greeting_armed: true,
            saved: None,
            reset_generation: 0,
            pending_reset: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn has_pending_reset(&self) -> bool {
        self.pending_reset.is_some()
    }

    /// Read whatever is stored. Any failure reads as "nothing stored".
    pub fn load(&self) -> Snapshot {
        match self.store.get(&self.key) {
            Ok(raw) => Snapshot::decode(raw.as_deref()),
            Err(err) => {
                warn!(key = %self.key, error = %err, "failed to read chat snapshot; starting empty");
                Snapshot::default()
            }
        }
    }

    /// Install the stored session and, on a first visit, the greeting.
    /// Runs once; later calls are ignored and return `false`.
    pub fn hydrate(&mut self, transcript: &mut TranscriptStore, ledger: &mut DurationLedger) -> bool {
        if self.phase != Phase::Uninitialized {
            debug!(phase = ?self.phase, "hydrate called again; ignoring");
            return false;
        }

        let stored = self.load();
        let messages = dedupe_ids(stored.messages);
        let mut durations = stored.durations;
        let orphans = {
            let known: HashSet<&MessageId> = messages.iter().map(|message| &message.id).collect();
            durations.retain(|id| known.contains(id))
        };
        if orphans > 0 {
            warn!(orphans, "stored durations without a matching message were dropped");
        }
        info!(
            messages = messages.len(),
            durations = durations.len(),
            "hydrating chat session"
        );
        ledger.replace(durations);
        transcript.replace_all(messages);
        self.phase = Phase::Hydrated;
        // What is in memory now is what the store holds, unless orphans
        // were pruned and the stored copy is stale.
        self.saved = (orphans == 0).then(|| (transcript.revision(), ledger.revision()));

        self.bootstrap(transcript, ledger);
        // The greeting opportunity for this page lifetime is used up either
        // way; only a reset re-arms it.
        self.greeting_armed = false;
        self.phase = Phase::Active;
        self.observe(transcript, ledger);
        true
    }

    /// Insert the greeting if the transcript is empty and the guard allows
    /// it, writing it through immediately.
    pub fn bootstrap(&mut self, transcript: &mut TranscriptStore, ledger: &mut DurationLedger) -> bool {
        if !self.greeting_armed || !transcript.is_empty() {
            return false;
        }
        if !ledger.is_empty() {
            ledger.clear();
        }
        let greeting = Message::assistant(
            MessageId::welcome(),
            vec![MessagePart::text(self.welcome_message.clone())],
        );
        info!(id = %greeting.id, "inserting welcome message");
        transcript.replace_all(vec![greeting]);
        self.greeting_armed = false;
        self.write(transcript, ledger);
        true
    }

    /// Write a snapshot if anything changed since the last successful write.
    pub fn observe(&mut self, transcript: &TranscriptStore, ledger: &DurationLedger) {
        if self.phase != Phase::Active {
            return;
        }
        if self.saved == Some((transcript.revision(), ledger.revision())) {
            return;
        }
        self.write(transcript, ledger);
    }

    /// Clear both structures, persist the empty state right away and arm
    /// the greeting for after the delay.
    pub fn begin_reset(
        &mut self,
        transcript: &mut TranscriptStore,
        ledger: &mut DurationLedger,
    ) -> ResetTicket {
        transcript.replace_all(Vec::new());
        ledger.clear();
        self.write(transcript, ledger);

        self.greeting_armed = true;
        self.reset_generation += 1;
        if let Some(superseded) = self.pending_reset.replace(self.reset_generation) {
            debug!(superseded, "reset issued while a greeting was pending");
        }
        ResetTicket {
            generation: self.reset_generation,
            delay: self.reset_delay,
        }
    }

    /// Second half of a reset. Stale tickets do nothing.
    pub fn finish_reset(
        &mut self,
        ticket: ResetTicket,
        transcript: &mut TranscriptStore,
        ledger: &mut DurationLedger,
    ) -> bool {
        if self.pending_reset != Some(ticket.generation) {
            debug!(generation = ticket.generation, "stale reset ticket");
            return false;
        }
        self.pending_reset = None;
        if !transcript.is_empty() {
            // The user already started a new conversation during the delay.
            self.greeting_armed = false;
            return false;
        }
        self.bootstrap(transcript, ledger)
    }

    fn write(&mut self, transcript: &TranscriptStore, ledger: &DurationLedger) -> bool {
        let encoded = match snapshot::encode(transcript.messages(), ledger) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(error = %err, "failed to serialize chat snapshot");
                return false;
            }
        };
        match self.store.set(&self.key, &encoded) {
            Ok(()) => {
                self.saved = Some((transcript.revision(), ledger.revision()));
                true
            }
            Err(err) => {
                warn!(key = %self.key, bytes = encoded.len(), error = %err, "failed to save chat snapshot");
                false
            }
        }
    }
}

/// Keep the first message for every id.
fn dedupe_ids(messages: Vec<Message>) -> Vec<Message> {
    let mut seen = HashSet::new();
    let before = messages.len();
    let kept: Vec<Message> = messages
        .into_iter()
        .filter(|message| seen.insert(message.id.clone()))
        .collect();
    if kept.len() != before {
        warn!(dropped = before - kept.len(), "stored transcript had duplicate message ids");
    }
    kept
}
