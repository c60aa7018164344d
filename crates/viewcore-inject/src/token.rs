#![forbid(unsafe_code)]

//! Injection tokens.
//!
//! A [`Token`] names a dependency. Three flavours exist:
//!
//! - **Type tokens** ([`Token::of`]): keyed by [`TypeId`], displayed with the
//!   type name. The common case for class-like services.
//! - **Named tokens** ([`Token::named`]): keyed by string content. Two named
//!   tokens with the same text are the same token.
//! - **Opaque tokens** ([`OpaqueToken`]): keyed by allocation identity. Two
//!   opaque tokens created with the same description are still distinct.
//!
//! Tokens are cheap to clone and hash; the [`KeyRegistry`](crate::KeyRegistry)
//! maps them onto dense integer ids for slot lookups.

use core::any::TypeId;
use core::fmt;
use core::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global counter for opaque token identities.
static OPAQUE_TOKEN_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A symbolic token compared by identity rather than by description.
#[derive(Clone)]
pub struct OpaqueToken {
    id: u64,
    description: Rc<str>,
}

impl OpaqueToken {
    /// Create a new, unique opaque token.
    #[must_use]
    pub fn new(description: impl Into<Rc<str>>) -> Self {
        Self {
            id: OPAQUE_TOKEN_COUNTER.fetch_add(1, Ordering::Relaxed),
            description: description.into(),
        }
    }

    /// Human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl PartialEq for OpaqueToken {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for OpaqueToken {}

impl Hash for OpaqueToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for OpaqueToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpaqueToken({:?})", self.description)
    }
}

/// Identifier used to request a dependency from an injector.
#[derive(Clone)]
pub enum Token {
    /// A Rust type.
    Type {
        /// Identity of the type.
        id: TypeId,
        /// `core::any::type_name` of the type, for diagnostics.
        name: &'static str,
    },
    /// A string name, compared by content.
    Named(Rc<str>),
    /// A symbolic token, compared by identity.
    Opaque(OpaqueToken),
}

impl Token {
    /// Token for the type `T`.
    #[must_use]
    pub fn of<T: 'static + ?Sized>() -> Self {
        Self::Type {
            id: TypeId::of::<T>(),
            name: core::any::type_name::<T>(),
        }
    }

    /// Token for a string name.
    #[must_use]
    pub fn named(name: impl Into<Rc<str>>) -> Self {
        Self::Named(name.into())
    }

    /// Short display name: the last path segment for types, the text for
    /// named tokens, the description for opaque ones.
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            Self::Type { name, .. } => short_type_name(name).to_owned(),
            Self::Named(name) => name.to_string(),
            Self::Opaque(token) => token.description().to_owned(),
        }
    }
}

/// Strip module paths from a type name, keeping generic arguments readable.
fn short_type_name(name: &str) -> &str {
    let base = name.split('<').next().unwrap_or(name);
    match base.rfind("::") {
        Some(pos) => &name[pos + 2..],
        None => name,
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Type { id: a, .. }, Self::Type { id: b, .. }) => a == b,
            (Self::Named(a), Self::Named(b)) => a == b,
            (Self::Opaque(a), Self::Opaque(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Token {}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Self::Type { id, .. } => id.hash(state),
            Self::Named(name) => name.hash(state),
            Self::Opaque(token) => token.hash(state),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type { name, .. } => write!(f, "Token::Type({name})"),
            Self::Named(name) => write!(f, "Token::Named({name:?})"),
            Self::Opaque(token) => write!(f, "Token::{token:?}"),
        }
    }
}

impl From<OpaqueToken> for Token {
    fn from(token: OpaqueToken) -> Self {
        Self::Opaque(token)
    }
}

impl From<&OpaqueToken> for Token {
    fn from(token: &OpaqueToken) -> Self {
        Self::Opaque(token.clone())
    }
}

impl From<&str> for Token {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

impl From<&Token> for Token {
    fn from(token: &Token) -> Self {
        token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Engine;
    struct Wrapper<T>(T);

    #[test]
    fn type_tokens_compare_by_type() {
        assert_eq!(Token::of::<Engine>(), Token::of::<Engine>());
        assert_ne!(Token::of::<Engine>(), Token::of::<String>());
    }

    #[test]
    fn named_tokens_compare_by_content() {
        assert_eq!(Token::named("api"), Token::from("api"));
        assert_ne!(Token::named("api"), Token::named("apis"));
    }

    #[test]
    fn opaque_tokens_compare_by_identity() {
        let a = OpaqueToken::new("cfg");
        let b = OpaqueToken::new("cfg");
        assert_eq!(Token::from(&a), Token::from(&a));
        assert_ne!(Token::from(&a), Token::from(&b));
    }

    #[test]
    fn flavours_never_collide() {
        assert_ne!(Token::named("Engine"), Token::of::<Engine>());
    }

    #[test]
    fn display_name_strips_module_path() {
        assert_eq!(Token::of::<Engine>().display_name(), "Engine");
        assert!(
            Token::of::<Wrapper<Engine>>()
                .display_name()
                .starts_with("Wrapper<")
        );
        assert_eq!(Token::named("api").to_string(), "api");
        assert_eq!(Token::from(OpaqueToken::new("x")).to_string(), "x");
    }
}
