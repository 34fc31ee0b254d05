//! The persisted `{ messages, durations }` record.

use super::ledger::DurationLedger;
use crate::types::{Message, MessageId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub messages: Vec<Message>,
    pub durations: DurationLedger,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    messages: &'a [Message],
    durations: &'a DurationLedger,
}

// Both fields tolerate absence and `null`.
#[derive(Deserialize)]
struct RawSnapshot {
    #[serde(default)]
    messages: Option<Vec<Message>>,
    #[serde(default)]
    durations: Option<BTreeMap<String, Value>>,
}

/// Serialize both structures together into one blob.
pub fn encode(messages: &[Message], durations: &DurationLedger) -> Result<String, serde_json::Error> {
    serde_json::to_string(&SnapshotRef {
        messages,
        durations,
    })
}

impl Snapshot {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        encode(&self.messages, &self.durations)
    }

    /// Strict decode of a stored value.
    ///
    /// Duration entries that are not finite, non-negative numbers are
    /// dropped instead of failing the whole record.
    pub fn try_decode(raw: &str) -> Result<Self, serde_json::Error> {
        let parsed: RawSnapshot = serde_json::from_str(raw)?;
        let durations = parsed
            .durations
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(id, value)| value.as_f64().map(|ms| (MessageId::new(id), ms)))
            .collect();
        Ok(Self {
            messages: parsed.messages.unwrap_or_default(),
            durations,
        })
    }

    /// Decode whatever the store returned. Absent or unreadable data is an
    /// empty snapshot, never an error.
    pub fn decode(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::default();
        };
        match Self::try_decode(raw) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(error = %err, "stored chat snapshot is unreadable; starting empty");
                Self::default()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.durations.is_empty()
    }
}
