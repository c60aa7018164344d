#![forbid(unsafe_code)]

//! Hierarchical dependency injection for viewcore.
//!
//! - [`Token`] / [`OpaqueToken`]: identifiers for dependencies.
//! - [`KeyRegistry`]: dense integer ids for tokens, shared by an injector tree.
//! - [`provide`], [`class`], [`providers!`]: provider declarations, resolved
//!   by [`resolve`] into flat [`ResolvedProvider`]s.
//! - [`Injector`]: lazily instantiating, caching, hierarchical lookup with
//!   `Self` / `SkipSelf` / `Host` visibility.
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use viewcore_inject::{BoxError, Dependency, Deps, Injectable, Injector, class, providers};
//!
//! struct Engine;
//! impl Injectable for Engine {
//!     fn construct(_: &Deps<'_>) -> Result<Self, BoxError> {
//!         Ok(Engine)
//!     }
//! }
//!
//! struct Car {
//!     engine: Rc<Engine>,
//! }
//! impl Injectable for Car {
//!     fn dependencies() -> Vec<Dependency> {
//!         vec![Dependency::of::<Engine>()]
//!     }
//!     fn construct(deps: &Deps<'_>) -> Result<Self, BoxError> {
//!         Ok(Car { engine: deps.get(0)? })
//!     }
//! }
//!
//! let injector = Injector::resolve_and_create(providers![class::<Car>(), class::<Engine>()])?;
//! let car = injector.get_type::<Car>()?;
//! assert!(Rc::ptr_eq(&car.engine, &injector.get_type::<Engine>()?));
//! # Ok::<(), viewcore_inject::InjectorError>(())
//! ```

pub mod error;
pub mod injector;
pub mod key;
pub mod provider;
pub mod strategy;
pub mod token;

pub use error::{BoxError, InjectorError};
pub use injector::{ExternalInjector, Injector};
pub use key::{INJECTOR_KEY_ID, Key, KeyId, KeyRegistry};
pub use provider::{
    Dependency, Deps, FactoryFn, Injectable, Instance, LowerBound, Provider, ProviderEntry,
    ResolvedDependency, ResolvedFactory, ResolvedProvider, UpperBound, class, provide, resolve,
    resolve_provider,
};
pub use strategy::{INLINE_THRESHOLD, ProtoInjector, StrategyKind};
pub use token::{OpaqueToken, Token};
