#![forbid(unsafe_code)]

//! Key registry: dense integer identities for injection tokens.
//!
//! Every distinct [`Token`] is assigned a [`KeyId`] the first time it is
//! seen. Lookups inside injectors compare ids instead of hashing or comparing
//! tokens structurally.
//!
//! # Invariants
//!
//! 1. `id_for` is total: it never fails for any token.
//! 2. Equal tokens always yield the same id for the lifetime of the registry.
//! 3. Ids are allocated densely starting at 0; nothing is ever evicted.
//! 4. The injector self-token is always id [`INJECTOR_KEY_ID`].
//!
//! The registry is an explicit object rather than process-wide state. A root
//! injector owns one and shares it with its descendants; tests create
//! independent registries freely.

use core::fmt;
use std::cell::RefCell;

use ahash::AHashMap;

use crate::injector::Injector;
use crate::token::Token;

/// Dense integer identity of a token within one [`KeyRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(usize);

impl KeyId {
    /// Raw id value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Id reserved for the injector self-token in every registry.
pub const INJECTOR_KEY_ID: KeyId = KeyId(0);

/// A token paired with its registry id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Key {
    /// The token as declared.
    pub token: Token,
    /// Registry id of the token.
    pub id: KeyId,
}

impl Key {
    /// Display name of the underlying token.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.token.display_name()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token.display_name())
    }
}

#[derive(Default)]
struct Tables {
    ids: AHashMap<Token, KeyId>,
    tokens: Vec<Token>,
}

/// Token to id table.
pub struct KeyRegistry {
    tables: RefCell<Tables>,
}

impl KeyRegistry {
    /// Create a registry with the injector self-token pre-registered.
    #[must_use]
    pub fn new() -> Self {
        let registry = Self {
            tables: RefCell::new(Tables::default()),
        };
        let id = registry.id_for(&Token::of::<Injector>());
        debug_assert_eq!(id, INJECTOR_KEY_ID);
        registry
    }

    /// Id for `token`, allocating the next id on first sight.
    pub fn id_for(&self, token: &Token) -> KeyId {
        if let Some(id) = self.tables.borrow().ids.get(token) {
            return *id;
        }
        let mut tables = self.tables.borrow_mut();
        let id = KeyId(tables.tokens.len());
        tables.ids.insert(token.clone(), id);
        tables.tokens.push(token.clone());
        id
    }

    /// Resolve `token` into a [`Key`].
    pub fn key_for(&self, token: &Token) -> Key {
        Key {
            token: token.clone(),
            id: self.id_for(token),
        }
    }

    /// Reverse lookup, for diagnostics.
    #[must_use]
    pub fn token_for(&self, id: KeyId) -> Option<Token> {
        self.tables.borrow().tokens.get(id.0).cloned()
    }

    /// Number of tokens seen so far (including the self-token).
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.borrow().tokens.len()
    }

    /// Whether only the self-token is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }
}

impl Default for KeyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for KeyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRegistry")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::OpaqueToken;

    struct Engine;
    struct Car;

    #[test]
    fn self_token_is_reserved() {
        let registry = KeyRegistry::new();
        assert_eq!(registry.id_for(&Token::of::<Injector>()), INJECTOR_KEY_ID);
        assert!(registry.is_empty());
    }

    #[test]
    fn ids_are_stable_and_dense() {
        let registry = KeyRegistry::new();
        let engine = registry.id_for(&Token::of::<Engine>());
        let car = registry.id_for(&Token::of::<Car>());
        assert_eq!(engine.get(), 1);
        assert_eq!(car.get(), 2);
        assert_eq!(registry.id_for(&Token::of::<Engine>()), engine);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn equal_named_tokens_share_an_id() {
        let registry = KeyRegistry::new();
        let a = registry.id_for(&Token::named("config"));
        let b = registry.id_for(&Token::named(String::from("config")));
        assert_eq!(a, b);
    }

    #[test]
    fn opaque_tokens_get_distinct_ids() {
        let registry = KeyRegistry::new();
        let a = registry.id_for(&OpaqueToken::new("t").into());
        let b = registry.id_for(&OpaqueToken::new("t").into());
        assert_ne!(a, b);
    }

    #[test]
    fn reverse_lookup() {
        let registry = KeyRegistry::new();
        let id = registry.id_for(&Token::named("api"));
        assert_eq!(registry.token_for(id), Some(Token::named("api")));
        assert_eq!(registry.token_for(KeyId(99)), None);
    }

    #[test]
    fn registries_are_independent() {
        let a = KeyRegistry::new();
        let b = KeyRegistry::new();
        a.id_for(&Token::named("x"));
        let in_b = b.id_for(&Token::named("y"));
        assert_eq!(in_b.get(), 1);
    }
}
