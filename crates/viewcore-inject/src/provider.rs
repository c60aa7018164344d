#![forbid(unsafe_code)]

//! Provider declarations and their resolution into flat, keyed providers.
//!
//! A provider maps a [`Token`] to a construction strategy:
//!
//! - [`Provider::use_value`]: a fixed instance.
//! - [`Provider::use_class`]: a type implementing [`Injectable`].
//! - [`Provider::use_factory`]: a closure over declared dependencies.
//! - [`Provider::use_existing`]: an alias for another token.
//!
//! [`class`] is shorthand for "provide `T` using `T` itself". Entries may be
//! nested arbitrarily through [`ProviderEntry::List`]; [`ProviderEntry::Empty`]
//! entries are skipped.
//!
//! # Resolution Rules
//!
//! 1. Output order is the first-declaration order of each token.
//! 2. Multi declarations for one token merge into a single multi provider
//!    whose factories keep declaration order.
//! 3. Regular redeclarations override: the last declaration wins.
//! 4. Mixing multi and regular declarations for one token is an error.
//! 5. A provider with zero or several strategies is an error.
//!
//! All errors are raised by [`resolve`], never deferred to instantiation.

use core::any::Any;
use core::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use smallvec::{SmallVec, smallvec};

use crate::error::{BoxError, InjectorError};
use crate::key::{Key, KeyId, KeyRegistry};
use crate::token::Token;

/// A built object held by an injector.
pub type Instance = Rc<dyn Any>;

/// Type-erased factory: receives resolved dependencies positionally.
pub type FactoryFn = Rc<dyn Fn(&Deps<'_>) -> Result<Instance, BoxError>>;

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

/// Where a dependency lookup starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LowerBound {
    /// Start at the requesting injector.
    #[default]
    Itself,
    /// Start at the requesting injector's parent.
    SkipSelf,
}

/// Where a dependency lookup stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpperBound {
    /// Walk up to the root, then delegate to any foreign parent.
    #[default]
    Root,
    /// Stop after the first injector marked as a host boundary.
    Host,
    /// Never leave the starting injector.
    SelfOnly,
}

/// A declared dependency of a factory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dependency {
    /// Requested token.
    pub token: Token,
    /// Resolve to `None` instead of failing when absent.
    pub optional: bool,
    /// Lookup start.
    pub lower: LowerBound,
    /// Lookup stop.
    pub upper: UpperBound,
}

impl Dependency {
    /// Required, unbounded dependency on `token`.
    #[must_use]
    pub fn on(token: impl Into<Token>) -> Self {
        Self {
            token: token.into(),
            optional: false,
            lower: LowerBound::Itself,
            upper: UpperBound::Root,
        }
    }

    /// Required, unbounded dependency on type `T`.
    #[must_use]
    pub fn of<T: 'static>() -> Self {
        Self::on(Token::of::<T>())
    }

    /// Mark optional.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Restrict to the requesting injector (`Self`).
    #[must_use]
    pub fn self_only(mut self) -> Self {
        self.upper = UpperBound::SelfOnly;
        self
    }

    /// Start at the parent (`SkipSelf`).
    #[must_use]
    pub fn skip_self(mut self) -> Self {
        self.lower = LowerBound::SkipSelf;
        self
    }

    /// Stop at the host boundary (`Host`).
    #[must_use]
    pub fn host(mut self) -> Self {
        self.upper = UpperBound::Host;
        self
    }

    fn resolve(&self, registry: &KeyRegistry) -> ResolvedDependency {
        ResolvedDependency {
            key: registry.key_for(&self.token),
            optional: self.optional,
            lower: self.lower,
            upper: self.upper,
        }
    }
}

/// A [`Dependency`] whose token has been keyed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedDependency {
    /// Keyed token.
    pub key: Key,
    /// Resolve to `None` instead of failing when absent.
    pub optional: bool,
    /// Lookup start.
    pub lower: LowerBound,
    /// Lookup stop.
    pub upper: UpperBound,
}

/// Resolved dependency values handed to a factory, in declaration order.
///
/// Missing optional dependencies are `None`.
pub struct Deps<'a> {
    values: &'a [Option<Instance>],
    dependencies: &'a [ResolvedDependency],
}

impl<'a> Deps<'a> {
    pub(crate) fn new(values: &'a [Option<Instance>], dependencies: &'a [ResolvedDependency]) -> Self {
        Self {
            values,
            dependencies,
        }
    }

    /// Number of declared dependencies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no dependencies were declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn token_name(&self, index: usize) -> String {
        self.dependencies
            .get(index)
            .map_or_else(|| format!("dependency #{index}"), |dep| dep.key.display_name())
    }

    /// Untyped instance at `index`, `None` for a missing optional dependency.
    pub fn optional_instance(&self, index: usize) -> Result<Option<Instance>, BoxError> {
        match self.values.get(index) {
            Some(value) => Ok(value.clone()),
            None => Err(format!(
                "factory requested dependency #{index} but only {} were declared",
                self.len()
            )
            .into()),
        }
    }

    /// Untyped instance at `index`.
    pub fn instance(&self, index: usize) -> Result<Instance, BoxError> {
        self.optional_instance(index)?.ok_or_else(|| {
            format!("optional dependency {} is absent", self.token_name(index)).into()
        })
    }

    /// Typed instance at `index`.
    pub fn get<T: 'static>(&self, index: usize) -> Result<Rc<T>, BoxError> {
        let instance = self.instance(index)?;
        downcast::<T>(instance, || self.token_name(index)).map_err(Into::into)
    }

    /// Typed instance at `index`, `None` for a missing optional dependency.
    pub fn optional<T: 'static>(&self, index: usize) -> Result<Option<Rc<T>>, BoxError> {
        match self.optional_instance(index)? {
            Some(instance) => Ok(Some(downcast::<T>(instance, || self.token_name(index))?)),
            None => Ok(None),
        }
    }

    /// Typed members of a multi-provider dependency at `index`.
    pub fn all<T: 'static>(&self, index: usize) -> Result<Vec<Rc<T>>, BoxError> {
        let instance = self.instance(index)?;
        downcast_all::<T>(&instance, || self.token_name(index)).map_err(Into::into)
    }
}

/// Downcast an instance, reporting the token on mismatch.
pub(crate) fn downcast<T: 'static>(
    instance: Instance,
    token: impl FnOnce() -> String,
) -> Result<Rc<T>, InjectorError> {
    instance
        .downcast::<T>()
        .map_err(|_| InjectorError::TypeMismatch {
            token: token(),
            expected: core::any::type_name::<T>(),
        })
}

/// Downcast every member of a multi-provider result.
pub(crate) fn downcast_all<T: 'static>(
    instance: &Instance,
    token: impl Fn() -> String,
) -> Result<Vec<Rc<T>>, InjectorError> {
    let members = instance
        .downcast_ref::<Vec<Instance>>()
        .ok_or_else(|| InjectorError::TypeMismatch {
            token: token(),
            expected: "multi provider",
        })?;
    members
        .iter()
        .map(|member| downcast::<T>(Rc::clone(member), &token))
        .collect()
}

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

/// Types that can be constructed by an injector.
///
/// ```
/// use std::rc::Rc;
/// use viewcore_inject::{BoxError, Dependency, Deps, Injectable};
///
/// struct Engine;
/// impl Injectable for Engine {
///     fn construct(_: &Deps<'_>) -> Result<Self, BoxError> {
///         Ok(Engine)
///     }
/// }
///
/// struct Car {
///     engine: Rc<Engine>,
/// }
/// impl Injectable for Car {
///     fn dependencies() -> Vec<Dependency> {
///         vec![Dependency::of::<Engine>()]
///     }
///     fn construct(deps: &Deps<'_>) -> Result<Self, BoxError> {
///         Ok(Car { engine: deps.get(0)? })
///     }
/// }
/// ```
pub trait Injectable: Sized + 'static {
    /// Constructor parameters, in the order `construct` reads them.
    fn dependencies() -> Vec<Dependency> {
        Vec::new()
    }

    /// Build an instance from resolved dependencies.
    fn construct(deps: &Deps<'_>) -> Result<Self, BoxError>;
}

#[derive(Clone)]
enum Strategy {
    Value(Instance),
    Class {
        dependencies: Vec<Dependency>,
        factory: FactoryFn,
    },
    Factory {
        dependencies: Vec<Dependency>,
        factory: FactoryFn,
    },
    Existing(Token),
}

impl Strategy {
    fn name(&self) -> &'static str {
        match self {
            Self::Value(_) => "use_value",
            Self::Class { .. } => "use_class",
            Self::Factory { .. } => "use_factory",
            Self::Existing(_) => "use_existing",
        }
    }
}

/// An explicit provider declaration.
#[derive(Clone)]
pub struct Provider {
    token: Token,
    strategies: SmallVec<[Strategy; 1]>,
    multi: bool,
}

/// Start a provider declaration for `token`.
#[must_use]
pub fn provide(token: impl Into<Token>) -> Provider {
    Provider {
        token: token.into(),
        strategies: SmallVec::new(),
        multi: false,
    }
}

/// Shorthand: provide `T` using `T` itself.
#[must_use]
pub fn class<T: Injectable>() -> Provider {
    provide(Token::of::<T>()).use_class::<T>()
}

impl Provider {
    /// Token being provided.
    #[must_use]
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Whether this is a multi-provider member.
    #[must_use]
    pub fn is_multi(&self) -> bool {
        self.multi
    }

    /// Provide a fixed value.
    #[must_use]
    pub fn use_value<T: 'static>(self, value: T) -> Self {
        self.use_instance(Rc::new(value))
    }

    /// Provide an already shared instance; every `get` returns this `Rc`.
    #[must_use]
    pub fn use_instance(mut self, instance: Instance) -> Self {
        self.strategies.push(Strategy::Value(instance));
        self
    }

    /// Provide by constructing `T`.
    #[must_use]
    pub fn use_class<T: Injectable>(mut self) -> Self {
        let factory: FactoryFn = Rc::new(|deps: &Deps<'_>| {
            T::construct(deps).map(|value| Rc::new(value) as Instance)
        });
        self.strategies.push(Strategy::Class {
            dependencies: T::dependencies(),
            factory,
        });
        self
    }

    /// Provide by calling `factory` with `dependencies` resolved.
    #[must_use]
    pub fn use_factory<T, F>(mut self, dependencies: Vec<Dependency>, factory: F) -> Self
    where
        T: 'static,
        F: Fn(&Deps<'_>) -> Result<T, BoxError> + 'static,
    {
        let factory: FactoryFn =
            Rc::new(move |deps: &Deps<'_>| factory(deps).map(|value| Rc::new(value) as Instance));
        self.strategies.push(Strategy::Factory {
            dependencies,
            factory,
        });
        self
    }

    /// Alias another token: resolves to the same instance as `existing`.
    #[must_use]
    pub fn use_existing(mut self, existing: impl Into<Token>) -> Self {
        self.strategies.push(Strategy::Existing(existing.into()));
        self
    }

    /// Mark as a multi-provider member.
    #[must_use]
    pub fn multi(mut self) -> Self {
        self.multi = true;
        self
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let strategies: Vec<_> = self.strategies.iter().map(Strategy::name).collect();
        f.debug_struct("Provider")
            .field("token", &self.token)
            .field("strategies", &strategies)
            .field("multi", &self.multi)
            .finish()
    }
}

/// A possibly nested provider list entry.
#[derive(Clone, Debug)]
pub enum ProviderEntry {
    /// A single declaration.
    Provider(Provider),
    /// A nested list, flattened in order.
    List(Vec<ProviderEntry>),
    /// Skipped.
    Empty,
}

impl From<Provider> for ProviderEntry {
    fn from(provider: Provider) -> Self {
        Self::Provider(provider)
    }
}

impl<E: Into<ProviderEntry>> From<Vec<E>> for ProviderEntry {
    fn from(entries: Vec<E>) -> Self {
        Self::List(entries.into_iter().map(Into::into).collect())
    }
}

impl<E: Into<ProviderEntry>> From<Option<E>> for ProviderEntry {
    fn from(entry: Option<E>) -> Self {
        entry.map_or(Self::Empty, Into::into)
    }
}

/// Build a `Vec<ProviderEntry>` from heterogeneous entries.
///
/// ```
/// use viewcore_inject::{provide, providers};
///
/// let list = providers![provide("a").use_value(1), None::<viewcore_inject::Provider>];
/// assert_eq!(list.len(), 2);
/// ```
#[macro_export]
macro_rules! providers {
    ($($entry:expr),* $(,)?) => {
        ::std::vec![$($crate::ProviderEntry::from($entry)),*]
    };
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// A factory with keyed dependencies.
#[derive(Clone)]
pub struct ResolvedFactory {
    /// Builds the instance.
    pub factory: FactoryFn,
    /// Dependencies passed positionally to `factory`.
    pub dependencies: Vec<ResolvedDependency>,
}

impl fmt::Debug for ResolvedFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedFactory")
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// A provider after flattening, keying and merging.
#[derive(Clone, Debug)]
pub struct ResolvedProvider {
    /// Provided key.
    pub key: Key,
    /// One factory, or several in declaration order for multi providers.
    pub factories: SmallVec<[ResolvedFactory; 1]>,
    /// Whether instantiation yields a `Vec<Instance>` of all factories.
    pub multi: bool,
}

impl ResolvedProvider {
    /// The key id this provider fills.
    #[inline]
    #[must_use]
    pub fn key_id(&self) -> KeyId {
        self.key.id
    }
}

fn flatten(entries: Vec<ProviderEntry>, out: &mut Vec<Provider>) {
    for entry in entries {
        match entry {
            ProviderEntry::Provider(provider) => out.push(provider),
            ProviderEntry::List(nested) => flatten(nested, out),
            ProviderEntry::Empty => {}
        }
    }
}

/// Resolve a single declaration without merging.
pub fn resolve_provider(
    registry: &KeyRegistry,
    provider: Provider,
) -> Result<ResolvedProvider, InjectorError> {
    let Provider {
        token,
        mut strategies,
        multi,
    } = provider;
    let strategy = match strategies.len() {
        1 => strategies.remove(0),
        0 => {
            return Err(InjectorError::InvalidProvider {
                token: token.display_name(),
                reason: "no use_value, use_class, use_factory or use_existing strategy",
            });
        }
        _ => {
            return Err(InjectorError::InvalidProvider {
                token: token.display_name(),
                reason: "more than one construction strategy",
            });
        }
    };

    let resolved = match strategy {
        Strategy::Value(instance) => ResolvedFactory {
            factory: Rc::new(move |_: &Deps<'_>| Ok::<Instance, BoxError>(Rc::clone(&instance))),
            dependencies: Vec::new(),
        },
        Strategy::Class {
            dependencies,
            factory,
        }
        | Strategy::Factory {
            dependencies,
            factory,
        } => ResolvedFactory {
            factory,
            dependencies: dependencies.iter().map(|d| d.resolve(registry)).collect(),
        },
        Strategy::Existing(existing) => ResolvedFactory {
            factory: Rc::new(|deps: &Deps<'_>| deps.instance(0)),
            dependencies: vec![Dependency::on(existing).resolve(registry)],
        },
    };

    Ok(ResolvedProvider {
        key: registry.key_for(&token),
        factories: smallvec![resolved],
        multi,
    })
}

/// Flatten, key and merge a nested provider list.
pub fn resolve(
    registry: &KeyRegistry,
    entries: Vec<ProviderEntry>,
) -> Result<Vec<ResolvedProvider>, InjectorError> {
    let mut flat = Vec::new();
    flatten(entries, &mut flat);

    let mut merged: IndexMap<KeyId, ResolvedProvider, ahash::RandomState> =
        IndexMap::with_capacity_and_hasher(flat.len(), ahash::RandomState::new());
    for provider in flat {
        let resolved = resolve_provider(registry, provider)?;
        match merged.get_mut(&resolved.key.id) {
            Some(existing) if existing.multi != resolved.multi => {
                return Err(InjectorError::MixedMultiProvider {
                    token: resolved.key.display_name(),
                });
            }
            Some(existing) if resolved.multi => {
                existing.factories.extend(resolved.factories);
            }
            Some(existing) => *existing = resolved,
            None => {
                merged.insert(resolved.key.id, resolved);
            }
        }
    }
    Ok(merged.into_values().collect())
}
