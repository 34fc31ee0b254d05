use crate::types::MessageId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Elapsed generation time per message, in milliseconds.
///
/// A pure cache of values measured elsewhere. Keys are kept sorted so the
/// encoded form does not depend on insertion order.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DurationLedger {
    entries: BTreeMap<MessageId, f64>,
    #[serde(skip)]
    revision: u64,
}

impl DurationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a duration. Returns `false` (and changes nothing) for negative
    /// or non-finite values. Re-recording an identical value is not a change.
    pub fn record(&mut self, id: MessageId, duration_ms: f64) -> bool {
        if !duration_ms.is_finite() || duration_ms < 0.0 {
            return false;
        }
        if self.entries.get(&id) == Some(&duration_ms) {
            return true;
        }
        self.entries.insert(id, duration_ms);
        self.revision += 1;
        true
    }

    pub fn get(&self, id: &MessageId) -> Option<f64> {
        self.entries.get(id).copied()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.revision += 1;
    }

    /// Overwrite everything, used when seeding from a stored snapshot.
    pub(crate) fn replace(&mut self, other: DurationLedger) {
        self.entries = other.entries;
        self.revision += 1;
    }

    /// Drop entries whose id fails `keep`. Returns how many went.
    pub(crate) fn retain(&mut self, mut keep: impl FnMut(&MessageId) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|id, _| keep(id));
        let dropped = before - self.entries.len();
        if dropped > 0 {
            self.revision += 1;
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MessageId, f64)> {
        self.entries.iter().map(|(id, ms)| (id, *ms))
    }

    /// Bumped on every change.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

impl PartialEq for DurationLedger {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl FromIterator<(MessageId, f64)> for DurationLedger {
    fn from_iter<I: IntoIterator<Item = (MessageId, f64)>>(iter: I) -> Self {
        let mut ledger = DurationLedger::new();
        for (id, ms) in iter {
            ledger.record(id, ms);
        }
        ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_is_an_idempotent_upsert() {
        let mut ledger = DurationLedger::new();
        assert!(ledger.record("a".into(), 120.0));
        let rev = ledger.revision();
        assert!(ledger.record("a".into(), 120.0));
        assert_eq!(ledger.revision(), rev);

        assert!(ledger.record("a".into(), 250.5));
        assert_eq!(ledger.get(&"a".into()), Some(250.5));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn rejects_invalid_durations() {
        let mut ledger = DurationLedger::new();
        assert!(!ledger.record("a".into(), -1.0));
        assert!(!ledger.record("a".into(), f64::NAN));
        assert!(!ledger.record("a".into(), f64::INFINITY));
        assert!(ledger.is_empty());
        assert_eq!(ledger.revision(), 0);
    }

    #[test]
    fn clear_empties_and_counts_as_change() {
        let mut ledger: DurationLedger = [("a".into(), 1.0), ("b".into(), 2.0)]
            .into_iter()
            .collect();
        let rev = ledger.revision();
        ledger.clear();
        assert!(ledger.is_empty());
        assert!(ledger.revision() > rev);
    }

    #[test]
    fn retain_only_counts_real_removals() {
        let mut ledger: DurationLedger = [("a".into(), 1.0), ("b".into(), 2.0)]
            .into_iter()
            .collect();
        let rev = ledger.revision();
        assert_eq!(ledger.retain(|_| true), 0);
        assert_eq!(ledger.revision(), rev);

        assert_eq!(ledger.retain(|id| id.as_str() == "a"), 1);
        assert_eq!(ledger.get(&"b".into()), None);
        assert!(ledger.revision() > rev);
    }

    #[test]
    fn encodes_as_sorted_object() {
        let ledger: DurationLedger = [("z".into(), 3.0), ("a".into(), 1.5)].into_iter().collect();
        assert_eq!(
            serde_json::to_string(&ledger).unwrap(),
            r#"{"a":1.5,"z":3.0}"#
        );
    }
}
