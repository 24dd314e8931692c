use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PrismError, Result};
use crate::prism::{Ic50Record, PrismKey, PrismLookup};

/// One (drug, cell line) task, carrying the ground truth. The orchestrator
/// sees this; the agent only ever sees `drug` and `cell`.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchItem {
    pub drug: String,
    pub cell: String,
    pub ic50: f64,
    pub record: Ic50Record,
}

/// Serializable snapshot of a queue's order and progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueState {
    pub keys: Vec<(String, String)>,
    pub cursor: usize,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub shuffled: bool,
}

/// Hands out (drug, cell) tasks from a [`PrismLookup`] in a fixed order.
///
/// Only the key order and a cursor are owned here; records are always read
/// back from the lookup.
pub struct PrismDispatchQueue {
    lookup: Arc<PrismLookup>,
    keys: Vec<PrismKey>,
    cursor: usize,
    seed: Option<u64>,
    shuffled: bool,
}

fn shuffle_keys(keys: &mut [PrismKey], seed: Option<u64>) {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    keys.shuffle(&mut rng);
}

impl PrismDispatchQueue {
    /// Queue over every key of `lookup` in canonical order.
    pub fn new(lookup: Arc<PrismLookup>, shuffle: bool, seed: Option<u64>) -> Self {
        let keys = lookup.keys();
        Self::build(lookup, keys, shuffle, seed)
    }

    /// Queue over a caller-chosen order. Every key must exist in `lookup`.
    pub fn with_order(
        lookup: Arc<PrismLookup>,
        order: Vec<PrismKey>,
        shuffle: bool,
        seed: Option<u64>,
    ) -> Result<Self> {
        let unknown: Vec<(String, String)> = order
            .iter()
            .filter(|k| !lookup.contains_key(k))
            .map(PrismKey::as_tuple)
            .collect();
        if !unknown.is_empty() {
            return Err(PrismError::UnknownKeys(unknown));
        }
        Ok(Self::build(lookup, order, shuffle, seed))
    }

    fn build(lookup: Arc<PrismLookup>, mut keys: Vec<PrismKey>, shuffle: bool, seed: Option<u64>) -> Self {
        if shuffle {
            shuffle_keys(&mut keys, seed);
        }
        debug!(total = keys.len(), shuffle, ?seed, "dispatch queue built");
        Self {
            lookup,
            keys,
            cursor: 0,
            seed,
            shuffled: shuffle,
        }
    }

    pub fn has_next(&self) -> bool {
        self.cursor < self.keys.len()
    }

    fn item_at(&self, pos: usize) -> Option<DispatchItem> {
        let key = self.keys.get(pos)?;
        let record = self.lookup.get_record(&key.drug, &key.cell)?;
        Some(DispatchItem {
            drug: key.drug.clone(),
            cell: key.cell.clone(),
            ic50: record.ic50,
            record: record.clone(),
        })
    }

    /// Next item without advancing.
    pub fn peek(&self) -> Option<DispatchItem> {
        self.item_at(self.cursor)
    }

    /// Next item, advancing the cursor.
    pub fn dispatch(&mut self) -> Option<DispatchItem> {
        let item = self.item_at(self.cursor)?;
        self.cursor += 1;
        Some(item)
    }

    /// 0-based index of the next item.
    pub fn index(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.keys.len() - self.cursor
    }

    pub fn total(&self) -> usize {
        self.keys.len()
    }

    /// Items already handed out, in dispatch order.
    pub fn dispatched(&self) -> Vec<DispatchItem> {
        (0..self.cursor).filter_map(|pos| self.item_at(pos)).collect()
    }

    pub fn to_state(&self) -> QueueState {
        QueueState {
            keys: self.keys.iter().map(PrismKey::as_tuple).collect(),
            cursor: self.cursor,
            seed: self.seed,
            shuffled: self.shuffled,
        }
    }

    /// Rebuild a queue from a saved state. Keys are validated against
    /// `lookup` and the saved order is kept as-is.
    pub fn from_state(lookup: Arc<PrismLookup>, state: QueueState) -> Result<Self> {
        let order = state
            .keys
            .into_iter()
            .map(|(drug, cell)| PrismKey::new(drug, cell))
            .collect();
        let mut queue = Self::with_order(lookup, order, false, state.seed)?;
        if state.cursor > queue.keys.len() {
            return Err(PrismError::InvalidState(format!(
                "invalid cursor {} for {} items",
                state.cursor,
                queue.keys.len()
            )));
        }
        queue.cursor = state.cursor;
        queue.shuffled = state.shuffled;
        Ok(queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prism::LookupOptions;

    fn lookup() -> Arc<PrismLookup> {
        let records = vec![
            Ic50Record::new("drug1", "cell1", 1.5),
            Ic50Record::new("drug2", "cell2", 2.0),
            Ic50Record::new("drug3", "cell3", 0.5),
            Ic50Record::new("drug1", "cell2", 1.8),
        ];
        Arc::new(PrismLookup::from_records(records, LookupOptions::default()).unwrap())
    }

    fn drain(queue: &mut PrismDispatchQueue) -> Vec<(String, String)> {
        std::iter::from_fn(|| queue.dispatch())
            .map(|i| (i.drug, i.cell))
            .collect()
    }

    #[test]
    fn dispatches_in_canonical_order() {
        let mut queue = PrismDispatchQueue::new(lookup(), false, None);
        assert_eq!(queue.total(), 4);
        let first = queue.peek().unwrap();
        assert_eq!((first.drug.as_str(), first.cell.as_str()), ("drug1", "cell1"));
        assert_eq!(queue.index(), 0);

        let item = queue.dispatch().unwrap();
        assert_eq!(item.ic50, 1.5);
        assert_eq!(queue.index(), 1);
        assert_eq!(queue.remaining(), 3);

        drain(&mut queue);
        assert!(!queue.has_next());
        assert!(queue.peek().is_none());
        assert!(queue.dispatch().is_none());
    }

    #[test]
    fn seeded_shuffle_is_reproducible() {
        let mut a = PrismDispatchQueue::new(lookup(), true, Some(42));
        let mut b = PrismDispatchQueue::new(lookup(), true, Some(42));
        let order_a = drain(&mut a);
        assert_eq!(order_a, drain(&mut b));

        let mut sorted = order_a.clone();
        sorted.sort();
        let mut canonical = drain(&mut PrismDispatchQueue::new(lookup(), false, None));
        canonical.sort();
        assert_eq!(sorted, canonical);
    }

    #[test]
    fn custom_order_rejects_unknown_keys() {
        let order = vec![PrismKey::new("drug3", "cell3"), PrismKey::new("nope", "cell1")];
        let err = PrismDispatchQueue::with_order(lookup(), order, false, None)
            .err()
            .unwrap();
        assert!(matches!(err, PrismError::UnknownKeys(ref k) if k.len() == 1));

        let order = vec![PrismKey::new("drug3", "cell3"), PrismKey::new("drug1", "cell1")];
        let mut queue = PrismDispatchQueue::with_order(lookup(), order, false, None).unwrap();
        assert_eq!(queue.dispatch().unwrap().drug, "drug3");
    }

    #[test]
    fn state_round_trip_resumes_progress() {
        let mut queue = PrismDispatchQueue::new(lookup(), true, Some(3));
        queue.dispatch();
        queue.dispatch();
        let state = queue.to_state();
        let json = serde_json::to_string(&state).unwrap();

        let restored: QueueState = serde_json::from_str(&json).unwrap();
        let mut resumed = PrismDispatchQueue::from_state(lookup(), restored).unwrap();
        assert_eq!(resumed.index(), 2);
        assert_eq!(resumed.total(), 4);
        assert_eq!(resumed.dispatched(), queue.dispatched());
        assert_eq!(resumed.dispatched().len(), 2);
        assert_eq!(drain(&mut resumed), drain(&mut queue));
    }

    #[test]
    fn state_with_bad_cursor_is_rejected() {
        let state = QueueState {
            keys: vec![("drug1".into(), "cell1".into())],
            cursor: 5,
            seed: None,
            shuffled: false,
        };
        assert!(matches!(
            PrismDispatchQueue::from_state(lookup(), state),
            Err(PrismError::InvalidState(_))
        ));
    }
}
