#![forbid(unsafe_code)]

//! Key/value differ for maps and objects.

use std::rc::Rc;

use crate::differ::{CollectionChanges, Differ, DifferFactory};
use crate::error::DifferError;
use crate::value::{Props, Value, loose_identical};

/// One changed entry.
#[derive(Debug, Clone)]
pub struct KeyValueChangeRecord {
    /// Entry key.
    pub key: Rc<str>,
    /// Value before, `None` for additions.
    pub previous: Option<Value>,
    /// Value after, `None` for removals.
    pub current: Option<Value>,
}

/// Entry-level differences between two snapshots.
#[derive(Debug, Clone, Default)]
pub struct KeyValueChanges {
    /// New keys, in current order.
    pub additions: Vec<KeyValueChangeRecord>,
    /// Kept keys whose value is no longer loosely identical.
    pub changes: Vec<KeyValueChangeRecord>,
    /// Dropped keys, in previous order.
    pub removals: Vec<KeyValueChangeRecord>,
}

impl KeyValueChanges {
    /// Whether nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.changes.is_empty() && self.removals.is_empty()
    }
}

/// Diffs successive snapshots of a map or object.
#[derive(Debug, Default)]
pub struct KeyValueDiffer {
    previous: Props,
}

impl KeyValueDiffer {
    /// Differ with an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff `value` against the stored snapshot, returning key/value changes.
    pub fn diff_entries(&mut self, value: &Value) -> Result<Option<KeyValueChanges>, DifferError> {
        let current: Props = match value {
            Value::Null => Props::default(),
            Value::Map(props) | Value::Object(props) => props.borrow().clone(),
            other => return Err(DifferError::InvalidCollection(other.to_string())),
        };

        #[cfg(feature = "tracing")]
        let _span = tracing::trace_span!("key_value_diff", len = current.len()).entered();

        let mut changes = KeyValueChanges::default();
        for (key, item) in &current {
            match self.previous.get(key) {
                None => changes.additions.push(KeyValueChangeRecord {
                    key: Rc::clone(key),
                    previous: None,
                    current: Some(item.clone()),
                }),
                Some(before) if !loose_identical(before, item) => {
                    changes.changes.push(KeyValueChangeRecord {
                        key: Rc::clone(key),
                        previous: Some(before.clone()),
                        current: Some(item.clone()),
                    });
                }
                Some(_) => {}
            }
        }
        for (key, before) in &self.previous {
            if !current.contains_key(key) {
                changes.removals.push(KeyValueChangeRecord {
                    key: Rc::clone(key),
                    previous: Some(before.clone()),
                    current: None,
                });
            }
        }

        self.previous = current;
        Ok((!changes.is_empty()).then_some(changes))
    }
}

impl Differ for KeyValueDiffer {
    fn supports(&self, value: &Value) -> bool {
        matches!(value, Value::Map(_) | Value::Object(_))
    }

    fn diff(&mut self, value: &Value) -> Result<Option<CollectionChanges>, DifferError> {
        Ok(self.diff_entries(value)?.map(CollectionChanges::KeyValue))
    }
}

/// Factory for [`KeyValueDiffer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyValueDifferFactory;

impl DifferFactory for KeyValueDifferFactory {
    fn supports(&self, value: &Value) -> bool {
        matches!(value, Value::Map(_) | Value::Object(_))
    }

    fn create(&self) -> Box<dyn Differ> {
        Box::new(KeyValueDiffer::new())
    }
}
