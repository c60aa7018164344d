#![forbid(unsafe_code)]

//! Hierarchical injector.
//!
//! An [`Injector`] pairs an immutable [`ProtoInjector`] with a lazily filled
//! slot table and an optional parent. Injectors form a tree: children see
//! their ancestors' providers, never the reverse.
//!
//! # Lookup
//!
//! 1. The injector self-token resolves to the injector handle.
//! 2. [`UpperBound::SelfOnly`] consults only the requesting injector.
//! 3. Otherwise the walk starts at the requesting injector (or its parent for
//!    [`LowerBound::SkipSelf`]) and moves up. The first injector that
//!    provides the key builds (or returns) the instance.
//! 4. [`UpperBound::Host`] stops after the first host-boundary injector.
//! 5. Reaching an [`ExternalInjector`] parent delegates the lookup to it.
//!
//! # Invariants
//!
//! 1. A slot is built at most once and then returned by reference identity
//!    on every later `get` (multi providers cache their `Vec` as one slot).
//! 2. Parents are never written through a child: an instance is cached in the
//!    injector that owns the provider.
//! 3. No `RefCell` borrow is held while user factories run, so factories may
//!    call back into any injector.
//! 4. Construction depth per injector is bounded by its slot count; deeper
//!    recursion is reported as a cyclic dependency.
//!
//! # Failure Modes
//!
//! Errors abort the whole call. Slots filled before the failure stay filled;
//! nothing is rolled back.

use core::fmt;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use smallvec::SmallVec;

use crate::error::InjectorError;
use crate::key::{INJECTOR_KEY_ID, Key, KeyRegistry};
use crate::provider::{
    Dependency, Deps, Instance, LowerBound, Provider, ProviderEntry, ResolvedDependency,
    ResolvedFactory, ResolvedProvider, UpperBound, downcast, downcast_all, resolve,
    resolve_provider,
};
use crate::strategy::{INLINE_THRESHOLD, ProtoInjector, StrategyKind};
use crate::token::Token;

/// An injector implementation outside this crate, usable as a parent.
///
/// Lookups that walk past the last native injector delegate here.
pub trait ExternalInjector {
    /// Resolve `token`, `Ok(None)` when this injector cannot provide it.
    fn get_optional(&self, token: &Token) -> Result<Option<Instance>, InjectorError>;

    /// Resolve `token`, failing with [`InjectorError::NoProvider`] when absent.
    fn get(&self, token: &Token) -> Result<Instance, InjectorError> {
        self.get_optional(token)?
            .ok_or_else(|| InjectorError::NoProvider {
                path: vec![token.display_name()],
            })
    }
}

#[derive(Clone)]
enum Parent {
    Native(Injector),
    External(Rc<dyn ExternalInjector>),
}

#[derive(Clone)]
enum Slot {
    Undefined,
    Built(Instance),
}

struct Inner {
    proto: ProtoInjector,
    parent: Option<Parent>,
    registry: Rc<KeyRegistry>,
    host: bool,
    slots: RefCell<SmallVec<[Slot; INLINE_THRESHOLD]>>,
    depth: Cell<usize>,
}

/// Hierarchical dependency injector. Cloning yields another handle to the
/// same injector.
#[derive(Clone)]
pub struct Injector {
    inner: Rc<Inner>,
}

/// Decrements the construction depth when an instantiation unwinds.
struct ConstructionGuard<'a> {
    depth: &'a Cell<usize>,
}

impl Drop for ConstructionGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get() - 1);
    }
}

impl Injector {
    fn with_parts(
        registry: Rc<KeyRegistry>,
        resolved: Vec<ResolvedProvider>,
        parent: Option<Parent>,
        host: bool,
    ) -> Self {
        let proto = ProtoInjector::new(resolved);
        let slots = core::iter::repeat_n(Slot::Undefined, proto.len()).collect();
        Self {
            inner: Rc::new(Inner {
                proto,
                parent,
                registry,
                host,
                slots: RefCell::new(slots),
                depth: Cell::new(0),
            }),
        }
    }

    // -- construction -------------------------------------------------------

    /// Resolve `providers` and create a root injector with a fresh registry.
    pub fn resolve_and_create(providers: Vec<ProviderEntry>) -> Result<Self, InjectorError> {
        Self::resolve_and_create_in(Rc::new(KeyRegistry::new()), providers)
    }

    /// Resolve `providers` and create a root injector over `registry`.
    pub fn resolve_and_create_in(
        registry: Rc<KeyRegistry>,
        providers: Vec<ProviderEntry>,
    ) -> Result<Self, InjectorError> {
        let resolved = resolve(&registry, providers)?;
        Ok(Self::from_resolved_providers(registry, resolved))
    }

    /// Create a root injector from already resolved providers.
    ///
    /// `resolved` must have been keyed by `registry`.
    #[must_use]
    pub fn from_resolved_providers(
        registry: Rc<KeyRegistry>,
        resolved: Vec<ResolvedProvider>,
    ) -> Self {
        Self::with_parts(registry, resolved, None, false)
    }

    /// Create a root injector whose lookups fall through to `parent`.
    pub fn resolve_and_create_with_external(
        parent: Rc<dyn ExternalInjector>,
        providers: Vec<ProviderEntry>,
    ) -> Result<Self, InjectorError> {
        let registry = Rc::new(KeyRegistry::new());
        let resolved = resolve(&registry, providers)?;
        Ok(Self::with_parts(
            registry,
            resolved,
            Some(Parent::External(parent)),
            false,
        ))
    }

    /// Resolve `providers` with this injector's registry.
    pub fn resolve(
        &self,
        providers: Vec<ProviderEntry>,
    ) -> Result<Vec<ResolvedProvider>, InjectorError> {
        resolve(&self.inner.registry, providers)
    }

    /// Create a child from providers resolved with this injector's registry.
    #[must_use]
    pub fn create_child_from_resolved(&self, resolved: Vec<ResolvedProvider>) -> Self {
        Self::with_parts(
            Rc::clone(&self.inner.registry),
            resolved,
            Some(Parent::Native(self.clone())),
            false,
        )
    }

    /// Resolve `providers` and create a child injector.
    pub fn resolve_and_create_child(
        &self,
        providers: Vec<ProviderEntry>,
    ) -> Result<Self, InjectorError> {
        let resolved = self.resolve(providers)?;
        Ok(self.create_child_from_resolved(resolved))
    }

    /// Resolve `providers` and create a child that is a host boundary:
    /// `Host`-bounded lookups starting below it stop after it.
    pub fn resolve_and_create_host_child(
        &self,
        providers: Vec<ProviderEntry>,
    ) -> Result<Self, InjectorError> {
        let resolved = self.resolve(providers)?;
        Ok(Self::with_parts(
            Rc::clone(&self.inner.registry),
            resolved,
            Some(Parent::Native(self.clone())),
            true,
        ))
    }

    // -- introspection ------------------------------------------------------

    /// Native parent, if any.
    #[must_use]
    pub fn parent(&self) -> Option<Injector> {
        match &self.inner.parent {
            Some(Parent::Native(parent)) => Some(parent.clone()),
            _ => None,
        }
    }

    /// Foreign parent, if any.
    #[must_use]
    pub fn external_parent(&self) -> Option<Rc<dyn ExternalInjector>> {
        match &self.inner.parent {
            Some(Parent::External(parent)) => Some(Rc::clone(parent)),
            _ => None,
        }
    }

    /// Registry shared by this injector tree.
    #[must_use]
    pub fn registry(&self) -> &Rc<KeyRegistry> {
        &self.inner.registry
    }

    /// Whether this injector is a host boundary.
    #[must_use]
    pub fn is_host(&self) -> bool {
        self.inner.host
    }

    /// Number of provider slots.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.inner.proto.len()
    }

    /// Storage strategy selected for this injector.
    #[must_use]
    pub fn strategy(&self) -> StrategyKind {
        self.inner.proto.strategy()
    }

    /// Whether the provider for `token` in this injector has been built.
    #[must_use]
    pub fn is_instantiated(&self, token: impl Into<Token>) -> bool {
        let id = self.inner.registry.id_for(&token.into());
        self.inner
            .proto
            .slot_of(id)
            .is_some_and(|slot| matches!(self.inner.slots.borrow()[slot], Slot::Built(_)))
    }

    /// Whether two handles refer to the same injector.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Diagnostic name listing the provided tokens.
    #[must_use]
    pub fn display_name(&self) -> String {
        let names: Vec<_> = self
            .inner
            .proto
            .providers()
            .iter()
            .map(|p| format!("\"{}\"", p.key.display_name()))
            .collect();
        format!("Injector(providers: [{}])", names.join(", "))
    }

    // -- queries ------------------------------------------------------------

    /// Resolve `token`, failing when no injector in the chain provides it.
    pub fn get(&self, token: impl Into<Token>) -> Result<Instance, InjectorError> {
        let token = token.into();
        self.get_optional(&token)?
            .ok_or_else(|| InjectorError::NoProvider {
                path: vec![token.display_name()],
            })
    }

    /// Resolve `token`, `Ok(None)` when no injector in the chain provides it.
    ///
    /// Errors other than "not found" (cycles, failing factories) still
    /// propagate.
    pub fn get_optional(&self, token: impl Into<Token>) -> Result<Option<Instance>, InjectorError> {
        let dependency = ResolvedDependency {
            key: self.inner.registry.key_for(&token.into()),
            optional: true,
            lower: LowerBound::Itself,
            upper: UpperBound::Root,
        };
        self.lookup(&dependency)
    }

    /// Resolve a dependency with explicit visibility bounds.
    ///
    /// Returns `Ok(None)` only for an absent optional dependency.
    pub fn get_with(&self, dependency: &Dependency) -> Result<Option<Instance>, InjectorError> {
        let resolved = ResolvedDependency {
            key: self.inner.registry.key_for(&dependency.token),
            optional: dependency.optional,
            lower: dependency.lower,
            upper: dependency.upper,
        };
        match self.lookup(&resolved)? {
            Some(instance) => Ok(Some(instance)),
            None if resolved.optional => Ok(None),
            None => Err(InjectorError::NoProvider {
                path: vec![resolved.key.display_name()],
            }),
        }
    }

    /// Resolve `token` and downcast to `T`.
    pub fn get_as<T: 'static>(&self, token: impl Into<Token>) -> Result<Rc<T>, InjectorError> {
        let token = token.into();
        let instance = self.get(&token)?;
        downcast::<T>(instance, || token.display_name())
    }

    /// Resolve the type token of `T`.
    pub fn get_type<T: 'static>(&self) -> Result<Rc<T>, InjectorError> {
        self.get_as::<T>(Token::of::<T>())
    }

    /// Resolve a multi provider and downcast every member to `T`.
    pub fn get_all<T: 'static>(&self, token: impl Into<Token>) -> Result<Vec<Rc<T>>, InjectorError> {
        let token = token.into();
        let instance = self.get(&token)?;
        downcast_all::<T>(&instance, || token.display_name())
    }

    /// Build `provider` with this injector's dependencies without caching it.
    pub fn resolve_and_instantiate(&self, provider: Provider) -> Result<Instance, InjectorError> {
        let resolved = resolve_provider(&self.inner.registry, provider)?;
        self.instantiate_resolved(&resolved)
    }

    /// Build a resolved provider without caching it in any slot.
    pub fn instantiate_resolved(
        &self,
        provider: &ResolvedProvider,
    ) -> Result<Instance, InjectorError> {
        self.instantiate(provider)
    }

    // -- internals ----------------------------------------------------------

    fn self_instance(&self) -> Instance {
        Rc::new(self.clone())
    }

    fn lookup(&self, dependency: &ResolvedDependency) -> Result<Option<Instance>, InjectorError> {
        if dependency.key.id == INJECTOR_KEY_ID {
            return Ok(match dependency.lower {
                LowerBound::Itself => Some(self.self_instance()),
                LowerBound::SkipSelf => self.parent().map(|p| p.self_instance()),
            });
        }

        if dependency.upper == UpperBound::SelfOnly {
            return match dependency.lower {
                LowerBound::Itself => self.get_own(&dependency.key),
                LowerBound::SkipSelf => Ok(None),
            };
        }

        let mut current: Option<&Injector> = match dependency.lower {
            LowerBound::Itself => Some(self),
            LowerBound::SkipSelf => match &self.inner.parent {
                Some(Parent::Native(parent)) => Some(parent),
                Some(Parent::External(external)) => {
                    return external.get_optional(&dependency.key.token);
                }
                None => None,
            },
        };

        while let Some(injector) = current {
            if let Some(instance) = injector.get_own(&dependency.key)? {
                return Ok(Some(instance));
            }
            if dependency.upper == UpperBound::Host && injector.inner.host {
                return Ok(None);
            }
            current = match &injector.inner.parent {
                Some(Parent::Native(parent)) => Some(parent),
                Some(Parent::External(external)) => {
                    return external.get_optional(&dependency.key.token);
                }
                None => None,
            };
        }
        Ok(None)
    }

    /// Look up `key` in this injector's own slots, building on first access.
    fn get_own(&self, key: &Key) -> Result<Option<Instance>, InjectorError> {
        let Some(slot) = self.inner.proto.slot_of(key.id) else {
            return Ok(None);
        };
        if let Slot::Built(instance) = &self.inner.slots.borrow()[slot] {
            return Ok(Some(Rc::clone(instance)));
        }

        let instance = self.instantiate(self.inner.proto.provider(slot))?;
        self.inner.slots.borrow_mut()[slot] = Slot::Built(Rc::clone(&instance));

        #[cfg(feature = "tracing")]
        tracing::trace!(token = %key, slot, "injector slot filled");

        Ok(Some(instance))
    }

    fn enter(&self, key: &Key) -> Result<ConstructionGuard<'_>, InjectorError> {
        let depth = self.inner.depth.get();
        if depth > self.slot_count() {
            return Err(InjectorError::CyclicDependency {
                injector: self.display_name(),
                path: vec![key.display_name()],
            });
        }
        self.inner.depth.set(depth + 1);
        Ok(ConstructionGuard {
            depth: &self.inner.depth,
        })
    }

    fn instantiate(&self, provider: &ResolvedProvider) -> Result<Instance, InjectorError> {
        let _guard = self.enter(&provider.key)?;

        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!(
            "injector_instantiate",
            token = %provider.key,
            multi = provider.multi,
            depth = self.inner.depth.get()
        )
        .entered();

        self.build(provider)
            .map_err(|err| err.add_key(provider.key.display_name()))
    }

    fn build(&self, provider: &ResolvedProvider) -> Result<Instance, InjectorError> {
        if provider.multi {
            let members = provider
                .factories
                .iter()
                .map(|factory| self.call_factory(&provider.key, factory))
                .collect::<Result<Vec<Instance>, _>>()?;
            return Ok(Rc::new(members) as Instance);
        }
        self.call_factory(&provider.key, &provider.factories[0])
    }

    fn call_factory(&self, key: &Key, factory: &ResolvedFactory) -> Result<Instance, InjectorError> {
        let mut values: SmallVec<[Option<Instance>; 4]> =
            SmallVec::with_capacity(factory.dependencies.len());
        for dependency in &factory.dependencies {
            let value = self.lookup(dependency)?;
            if value.is_none() && !dependency.optional {
                return Err(InjectorError::NoProvider {
                    path: vec![dependency.key.display_name()],
                });
            }
            values.push(value);
        }
        let deps = Deps::new(&values, &factory.dependencies);
        (factory.factory)(&deps).map_err(|source| InjectorError::Instantiation {
            token: key.display_name(),
            source,
        })
    }
}

impl fmt::Debug for Injector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Injector")
            .field("providers", &self.display_name())
            .field("strategy", &self.strategy())
            .field("host", &self.inner.host)
            .field("has_parent", &self.inner.parent.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::provider::{Injectable, class, provide};
    use crate::providers;

    struct Engine;

    impl Injectable for Engine {
        fn construct(_: &Deps<'_>) -> Result<Self, BoxError> {
            Ok(Engine)
        }
    }

    struct Car {
        engine: Rc<Engine>,
    }

    impl Injectable for Car {
        fn dependencies() -> Vec<Dependency> {
            vec![Dependency::of::<Engine>()]
        }

        fn construct(deps: &Deps<'_>) -> Result<Self, BoxError> {
            Ok(Car {
                engine: deps.get(0)?,
            })
        }
    }

    #[test]
    fn builds_with_dependencies() {
        let injector = Injector::resolve_and_create(providers![class::<Car>(), class::<Engine>()])
            .unwrap();
        let car = injector.get_type::<Car>().unwrap();
        let engine = injector.get_type::<Engine>().unwrap();
        assert!(Rc::ptr_eq(&car.engine, &engine));
    }

    #[test]
    fn caches_instances() {
        let injector = Injector::resolve_and_create(providers![class::<Engine>()]).unwrap();
        assert!(!injector.is_instantiated(Token::of::<Engine>()));
        let a = injector.get(Token::of::<Engine>()).unwrap();
        let b = injector.get(Token::of::<Engine>()).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert!(injector.is_instantiated(Token::of::<Engine>()));
    }

    #[test]
    fn resolves_itself() {
        let injector = Injector::resolve_and_create(providers![]).unwrap();
        let handle = injector.get_type::<Injector>().unwrap();
        assert!(handle.ptr_eq(&injector));
    }

    #[test]
    fn missing_token_reports_no_provider() {
        let injector = Injector::resolve_and_create(providers![]).unwrap();
        let err = injector.get("missing").unwrap_err();
        assert!(err.is_no_provider());
        assert!(injector.get_optional("missing").unwrap().is_none());
    }

    #[test]
    fn missing_transitive_dependency_names_path() {
        let injector = Injector::resolve_and_create(providers![class::<Car>()]).unwrap();
        let err = injector.get_type::<Car>().map(|_| ()).unwrap_err();
        assert_eq!(err.to_string(), "no provider for Engine! (Car -> Engine)");
    }

    #[test]
    fn optional_dependency_resolves_to_none() {
        let injector = Injector::resolve_and_create(providers![
            provide("label").use_factory(vec![Dependency::on("suffix").optional()], |deps| {
                let suffix = deps.optional::<&'static str>(0)?;
                Ok(format!("label{}", suffix.map_or("", |s| *s)))
            })
        ])
        .unwrap();
        assert_eq!(*injector.get_as::<String>("label").unwrap(), "label");
    }

    #[test]
    fn depth_counter_resets_between_calls() {
        let injector = Injector::resolve_and_create(providers![class::<Engine>()]).unwrap();
        for _ in 0..5 {
            injector
                .resolve_and_instantiate(class::<Engine>())
                .unwrap();
        }
        assert_eq!(injector.inner.depth.get(), 0);
    }
}
