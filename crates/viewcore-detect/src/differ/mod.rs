#![forbid(unsafe_code)]

//! Structural collection differs.
//!
//! A structural binding watches a collection's contents rather than its
//! identity. The detector picks a differ for the value the first time it is
//! observed, asking each registered [`DifferFactory`] in order whether it
//! [`supports`](DifferFactory::supports) the value, and keeps that differ
//! until the value stops being supported.
//!
//! - [`IterableDiffer`]: lists, with optional track-by keys.
//! - [`KeyValueDiffer`]: maps and objects.

mod iterable;
mod keyvalue;

use std::rc::Rc;

use crate::error::DifferError;
use crate::value::Value;

pub use iterable::{
    CollectionChangeRecord, IterableChanges, IterableDiffer, IterableDifferFactory, Operation,
    TrackByFn, apply_operations,
};
pub use keyvalue::{KeyValueChangeRecord, KeyValueChanges, KeyValueDiffer, KeyValueDifferFactory};

/// Changes reported by a structural binding.
#[derive(Debug, Clone)]
pub enum CollectionChanges {
    /// From an [`IterableDiffer`].
    Iterable(IterableChanges),
    /// From a [`KeyValueDiffer`].
    KeyValue(KeyValueChanges),
}

impl CollectionChanges {
    /// Iterable changes, if any.
    #[must_use]
    pub fn as_iterable(&self) -> Option<&IterableChanges> {
        match self {
            Self::Iterable(changes) => Some(changes),
            Self::KeyValue(_) => None,
        }
    }

    /// Key/value changes, if any.
    #[must_use]
    pub fn as_key_value(&self) -> Option<&KeyValueChanges> {
        match self {
            Self::KeyValue(changes) => Some(changes),
            Self::Iterable(_) => None,
        }
    }
}

/// A stateful differ comparing successive snapshots of one collection.
pub trait Differ {
    /// Whether this differ can keep diffing `value`.
    fn supports(&self, value: &Value) -> bool;

    /// Compare `value` with the previous snapshot and store it.
    ///
    /// `Ok(None)` means nothing changed. `Null` diffs as an empty collection.
    fn diff(&mut self, value: &Value) -> Result<Option<CollectionChanges>, DifferError>;
}

/// Creates differs.
pub trait DifferFactory {
    /// Whether differs from this factory support `value`.
    fn supports(&self, value: &Value) -> bool;

    /// A fresh differ with an empty snapshot.
    fn create(&self) -> Box<dyn Differ>;
}

/// Ordered differ factories.
#[derive(Clone)]
pub struct Differs {
    factories: Vec<Rc<dyn DifferFactory>>,
}

impl Default for Differs {
    /// Iterable then key/value differ.
    fn default() -> Self {
        Self::empty()
            .with(IterableDifferFactory::default())
            .with(KeyValueDifferFactory)
    }
}

impl Differs {
    /// No factories.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            factories: Vec::new(),
        }
    }

    /// Append `factory`.
    #[must_use]
    pub fn with(mut self, factory: impl DifferFactory + 'static) -> Self {
        self.factories.push(Rc::new(factory));
        self
    }

    /// Prepend `factory` so it is tried first.
    #[must_use]
    pub fn with_first(mut self, factory: impl DifferFactory + 'static) -> Self {
        self.factories.insert(0, Rc::new(factory));
        self
    }

    /// Number of factories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Whether no factory is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// First factory supporting `value`.
    pub fn find(&self, value: &Value) -> Result<Rc<dyn DifferFactory>, DifferError> {
        self.factories
            .iter()
            .find(|f| f.supports(value))
            .cloned()
            .ok_or_else(|| DifferError::NoDifferFound(value.to_string()))
    }
}

impl core::fmt::Debug for Differs {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Differs")
            .field("factories", &self.factories.len())
            .finish()
    }
}
