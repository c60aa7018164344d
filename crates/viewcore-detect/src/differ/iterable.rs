#![forbid(unsafe_code)]

//! Iterable differ: item-level changes between two list snapshots.
//!
//! # Matching
//!
//! Every item has a track key: its [`IdentityKey`], or the identity of the
//! value returned by a caller-supplied track-by function. Each current item
//! is paired with a previous item of the same key:
//!
//! 1. The previous item at the same index, when its key matches.
//! 2. Otherwise the first not yet paired previous item with that key, in
//!    previous order. Duplicate keys therefore pair up first-seen first.
//!
//! Unpaired current items are additions, unpaired previous items removals,
//! pairs at different indices moves, and pairs whose items are not loosely
//! identical identity changes.
//!
//! # Invariants
//!
//! 1. [`apply_operations`] over the previous snapshot with
//!    [`IterableChanges::operations`] yields the current snapshot.
//! 2. `diff` returns `None` exactly when no addition, removal, move or
//!    identity change was found.

use std::collections::VecDeque;
use std::rc::Rc;

use ahash::AHashMap;

use crate::differ::{CollectionChanges, Differ, DifferFactory};
use crate::error::DifferError;
use crate::value::{IdentityKey, Value, loose_identical};

/// Maps `(index, item)` to the value whose identity tracks the item.
pub type TrackByFn = Rc<dyn Fn(usize, &Value) -> Value>;

/// One item with its position before and after the diff.
#[derive(Debug, Clone)]
pub struct CollectionChangeRecord {
    /// The item (current item, or the removed previous item).
    pub item: Value,
    /// Index in the previous snapshot, `None` for additions.
    pub previous_index: Option<usize>,
    /// Index in the current snapshot, `None` for removals.
    pub current_index: Option<usize>,
}

/// One step of a replay script.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Remove the element at `index`.
    Remove { index: usize, item: Value },
    /// Insert `item` at `index`.
    Insert { index: usize, item: Value },
    /// Move the element at `from` to `to` (positions at the time of the step).
    Move { from: usize, to: usize, item: Value },
    /// Replace the element at `index` with `item`.
    Replace { index: usize, item: Value },
}

/// Item-level differences between two snapshots.
#[derive(Debug, Clone)]
pub struct IterableChanges {
    /// Current snapshot.
    pub collection: Vec<Value>,
    /// One record per current item, in current order.
    pub records: Vec<CollectionChangeRecord>,
    /// Current items with no previous partner.
    pub additions: Vec<CollectionChangeRecord>,
    /// Previous items with no current partner, in previous order.
    pub removals: Vec<CollectionChangeRecord>,
    /// Paired items whose index changed.
    pub moves: Vec<CollectionChangeRecord>,
    /// Paired items whose track key matched but whose item was replaced.
    pub identity_changes: Vec<CollectionChangeRecord>,
    previous_len: usize,
}

impl IterableChanges {
    /// Whether nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty()
            && self.removals.is_empty()
            && self.moves.is_empty()
            && self.identity_changes.is_empty()
    }

    /// Replay script turning the previous snapshot into the current one.
    ///
    /// Removals come first, highest previous index first. Then, for each
    /// current index in ascending order, an insertion or a move brings the
    /// right element to that index. Identity changes replace elements last.
    /// Indices refer to the list as it is at each step.
    #[must_use]
    pub fn operations(&self) -> Vec<Operation> {
        let mut ops = Vec::with_capacity(self.removals.len() + self.records.len());
        let mut removed = vec![false; self.previous_len];

        let mut removals: Vec<&CollectionChangeRecord> = self.removals.iter().collect();
        removals.sort_by(|a, b| b.previous_index.cmp(&a.previous_index));
        for record in removals {
            if let Some(index) = record.previous_index {
                removed[index] = true;
                ops.push(Operation::Remove {
                    index,
                    item: record.item.clone(),
                });
            }
        }

        // Previous index of the element at each position; `None` for inserts.
        let mut working: Vec<Option<usize>> = (0..self.previous_len)
            .filter(|&j| !removed[j])
            .map(Some)
            .collect();

        for (index, record) in self.records.iter().enumerate() {
            match record.previous_index {
                None => {
                    working.insert(index, None);
                    ops.push(Operation::Insert {
                        index,
                        item: record.item.clone(),
                    });
                }
                Some(previous) => {
                    let Some(from) = working.iter().position(|w| *w == Some(previous)) else {
                        continue;
                    };
                    if from != index {
                        let entry = working.remove(from);
                        working.insert(index, entry);
                        ops.push(Operation::Move {
                            from,
                            to: index,
                            item: record.item.clone(),
                        });
                    }
                }
            }
        }

        for record in &self.identity_changes {
            if let Some(index) = record.current_index {
                ops.push(Operation::Replace {
                    index,
                    item: record.item.clone(),
                });
            }
        }
        ops
    }
}

/// Apply a replay script to `previous`.
#[must_use]
pub fn apply_operations(previous: &[Value], operations: &[Operation]) -> Vec<Value> {
    let mut out = previous.to_vec();
    for op in operations {
        match op {
            Operation::Remove { index, .. } => {
                if *index < out.len() {
                    out.remove(*index);
                }
            }
            Operation::Insert { index, item } => {
                out.insert((*index).min(out.len()), item.clone());
            }
            Operation::Move { from, to, .. } => {
                if *from < out.len() {
                    let item = out.remove(*from);
                    out.insert((*to).min(out.len()), item);
                }
            }
            Operation::Replace { index, item } => {
                if let Some(slot) = out.get_mut(*index) {
                    *slot = item.clone();
                }
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Differ
// ---------------------------------------------------------------------------

/// Diffs successive snapshots of a list.
#[derive(Default)]
pub struct IterableDiffer {
    track_by: Option<TrackByFn>,
    previous: Vec<(Value, IdentityKey)>,
}

impl IterableDiffer {
    /// Differ tracking items by identity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Differ tracking items by `track_by(index, item)`.
    pub fn with_track_by(track_by: impl Fn(usize, &Value) -> Value + 'static) -> Self {
        Self {
            track_by: Some(Rc::new(track_by)),
            previous: Vec::new(),
        }
    }

    fn from_track_by(track_by: Option<TrackByFn>) -> Self {
        Self {
            track_by,
            previous: Vec::new(),
        }
    }

    /// Items of the stored snapshot.
    #[must_use]
    pub fn collection(&self) -> Vec<Value> {
        self.previous.iter().map(|(item, _)| item.clone()).collect()
    }

    fn key(&self, index: usize, item: &Value) -> IdentityKey {
        match &self.track_by {
            Some(track_by) => IdentityKey::of(&track_by(index, item)),
            None => IdentityKey::of(item),
        }
    }

    /// Diff `value` against the stored snapshot and store it.
    pub fn diff_items(&mut self, value: &Value) -> Result<Option<IterableChanges>, DifferError> {
        let items: Vec<Value> = match value {
            Value::Null => Vec::new(),
            Value::List(items) => items.borrow().clone(),
            other => return Err(DifferError::InvalidCollection(other.to_string())),
        };

        #[cfg(feature = "tracing")]
        let _span = tracing::trace_span!(
            "iterable_diff",
            previous = self.previous.len(),
            current = items.len()
        )
        .entered();

        let keys: Vec<IdentityKey> = items
            .iter()
            .enumerate()
            .map(|(i, item)| self.key(i, item))
            .collect();
        let previous = std::mem::take(&mut self.previous);

        let mut partner: Vec<Option<usize>> = vec![None; items.len()];
        let mut paired = vec![false; previous.len()];
        for (i, key) in keys.iter().enumerate().take(previous.len()) {
            if previous[i].1 == *key {
                partner[i] = Some(i);
                paired[i] = true;
            }
        }

        let mut queues: AHashMap<&IdentityKey, VecDeque<usize>> = AHashMap::new();
        for (j, (_, key)) in previous.iter().enumerate() {
            if !paired[j] {
                queues.entry(key).or_default().push_back(j);
            }
        }
        for (i, key) in keys.iter().enumerate() {
            if partner[i].is_some() {
                continue;
            }
            if let Some(j) = queues.get_mut(key).and_then(VecDeque::pop_front) {
                partner[i] = Some(j);
                paired[j] = true;
            }
        }

        let mut changes = IterableChanges {
            collection: items.clone(),
            records: Vec::with_capacity(items.len()),
            additions: Vec::new(),
            removals: Vec::new(),
            moves: Vec::new(),
            identity_changes: Vec::new(),
            previous_len: previous.len(),
        };
        for (i, item) in items.iter().enumerate() {
            let record = CollectionChangeRecord {
                item: item.clone(),
                previous_index: partner[i],
                current_index: Some(i),
            };
            match partner[i] {
                None => changes.additions.push(record.clone()),
                Some(j) => {
                    if j != i {
                        changes.moves.push(record.clone());
                    }
                    if !loose_identical(&previous[j].0, item) {
                        changes.identity_changes.push(record.clone());
                    }
                }
            }
            changes.records.push(record);
        }
        for (j, (item, _)) in previous.iter().enumerate() {
            if !paired[j] {
                changes.removals.push(CollectionChangeRecord {
                    item: item.clone(),
                    previous_index: Some(j),
                    current_index: None,
                });
            }
        }

        drop(queues);
        self.previous = items.into_iter().zip(keys).collect();
        Ok((!changes.is_empty()).then_some(changes))
    }
}

impl Differ for IterableDiffer {
    fn supports(&self, value: &Value) -> bool {
        matches!(value, Value::List(_))
    }

    fn diff(&mut self, value: &Value) -> Result<Option<CollectionChanges>, DifferError> {
        Ok(self.diff_items(value)?.map(CollectionChanges::Iterable))
    }
}

impl core::fmt::Debug for IterableDiffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IterableDiffer")
            .field("tracked", &self.previous.len())
            .field("track_by", &self.track_by.is_some())
            .finish()
    }
}

/// Factory for [`IterableDiffer`].
#[derive(Clone, Default)]
pub struct IterableDifferFactory {
    track_by: Option<TrackByFn>,
}

impl IterableDifferFactory {
    /// Factory whose differs track items by `track_by(index, item)`.
    pub fn with_track_by(track_by: impl Fn(usize, &Value) -> Value + 'static) -> Self {
        Self {
            track_by: Some(Rc::new(track_by)),
        }
    }
}

impl DifferFactory for IterableDifferFactory {
    fn supports(&self, value: &Value) -> bool {
        matches!(value, Value::List(_))
    }

    fn create(&self) -> Box<dyn Differ> {
        Box::new(IterableDiffer::from_track_by(self.track_by.clone()))
    }
}
