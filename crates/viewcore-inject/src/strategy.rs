#![forbid(unsafe_code)]

//! Proto-injector: immutable provider storage with two lookup strategies.
//!
//! Small provider sets (up to [`INLINE_THRESHOLD`]) keep their key ids in
//! inline storage and are searched by a short linear comparison chain.
//! Larger sets build a hashed id index. The choice is made once at
//! construction; both strategies answer [`ProtoInjector::slot_of`]
//! identically.

use std::rc::Rc;

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::key::KeyId;
use crate::provider::ResolvedProvider;

/// Largest provider count served by the inline strategy.
pub const INLINE_THRESHOLD: usize = 10;

/// Lookup strategy, fixed at construction.
#[derive(Debug, Clone)]
enum Lookup {
    /// Key ids in inline storage, scanned linearly.
    Inline(SmallVec<[KeyId; INLINE_THRESHOLD]>),
    /// Key id to slot index.
    Dynamic(AHashMap<KeyId, usize>),
}

/// Which strategy a proto-injector selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// Up to [`INLINE_THRESHOLD`] providers.
    Inline,
    /// More than [`INLINE_THRESHOLD`] providers.
    Dynamic,
}

/// Immutable, shareable provider storage for one injector configuration.
#[derive(Debug, Clone)]
pub struct ProtoInjector {
    providers: Rc<[ResolvedProvider]>,
    lookup: Lookup,
}

impl ProtoInjector {
    /// Build from resolved providers, selecting the lookup strategy.
    #[must_use]
    pub fn new(providers: impl Into<Rc<[ResolvedProvider]>>) -> Self {
        let providers: Rc<[ResolvedProvider]> = providers.into();
        let lookup = if providers.len() <= INLINE_THRESHOLD {
            Lookup::Inline(providers.iter().map(ResolvedProvider::key_id).collect())
        } else {
            let mut index = AHashMap::with_capacity(providers.len());
            for (slot, provider) in providers.iter().enumerate() {
                // First slot wins; resolve() already merged duplicates.
                index.entry(provider.key_id()).or_insert(slot);
            }
            Lookup::Dynamic(index)
        };
        Self { providers, lookup }
    }

    /// Selected strategy.
    #[must_use]
    pub fn strategy(&self) -> StrategyKind {
        match self.lookup {
            Lookup::Inline(_) => StrategyKind::Inline,
            Lookup::Dynamic(_) => StrategyKind::Dynamic,
        }
    }

    /// Slot index holding `id`, if provided here.
    #[inline]
    #[must_use]
    pub fn slot_of(&self, id: KeyId) -> Option<usize> {
        match &self.lookup {
            Lookup::Inline(ids) => ids.iter().position(|candidate| *candidate == id),
            Lookup::Dynamic(index) => index.get(&id).copied(),
        }
    }

    /// Provider at `slot`.
    #[inline]
    #[must_use]
    pub fn provider(&self, slot: usize) -> &ResolvedProvider {
        &self.providers[slot]
    }

    /// All providers in slot order.
    #[must_use]
    pub fn providers(&self) -> &[ResolvedProvider] {
        &self.providers
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether no providers are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
