#![forbid(unsafe_code)]

//! Pipes: named, stateful value transformers applied inside bindings.
//!
//! A pipe record owns one [`Pipe`] instance for the lifetime of a hydration.
//! On every pass the detector asks the instance whether it still
//! [`supports`](Pipe::supports) the incoming value; if not, the instance is
//! destroyed and the [`PipeRegistry`] creates a replacement from the first
//! factory supporting the value.
//!
//! The transform result decides the change:
//!
//! | Result | Effect |
//! |--------|--------|
//! | [`Transformed::Value`] | changed when not loosely identical to the stored value |
//! | [`Transformed::Wrapped`] | changed unconditionally |
//! | [`Transformed::NoChange`] | unchanged, stored value kept |

use std::rc::Rc;

use ahash::AHashMap;

use crate::detector::ChangeDetectorRef;
use crate::error::{BoxError, ChangeDetectionError};
use crate::value::{Value, loose_identical};

/// Outcome of [`Pipe::transform`].
#[derive(Debug, Clone)]
pub enum Transformed {
    /// A result compared against the stored value.
    Value(Value),
    /// A result that counts as changed even when identical.
    Wrapped(Value),
    /// Keep the stored value.
    NoChange,
}

/// A stateful transformer owned by one pipe record.
pub trait Pipe {
    /// Whether this instance can keep transforming `value`.
    fn supports(&self, value: &Value) -> bool;

    /// Transform `value` with the evaluated pipe arguments.
    fn transform(&mut self, value: &Value, args: &[Value]) -> Result<Transformed, BoxError>;

    /// Called once when the instance is replaced or its detector dehydrates.
    fn on_destroy(&mut self) {}
}

/// Creates pipe instances.
pub trait PipeFactory {
    /// Whether instances from this factory support `value`.
    fn supports(&self, value: &Value) -> bool;

    /// New instance bound to the detector evaluating the record.
    fn create(&self, cd_ref: ChangeDetectorRef) -> Box<dyn Pipe>;
}

/// Pipe factories by name, tried in registration order.
#[derive(Clone, Default)]
pub struct PipeRegistry {
    pipes: AHashMap<Rc<str>, Vec<Rc<dyn PipeFactory>>>,
}

impl PipeRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `factory` to the candidates for `name`.
    pub fn register(&mut self, name: &str, factory: impl PipeFactory + 'static) -> &mut Self {
        self.pipes
            .entry(Rc::from(name))
            .or_default()
            .push(Rc::new(factory));
        self
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, name: &str, factory: impl PipeFactory + 'static) -> Self {
        self.register(name, factory);
        self
    }

    /// Whether any factory is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.pipes.contains_key(name)
    }

    /// Instance from the first factory for `name` supporting `value`.
    pub fn get(
        &self,
        name: &str,
        value: &Value,
        cd_ref: ChangeDetectorRef,
    ) -> Result<Box<dyn Pipe>, ChangeDetectionError> {
        self.pipes
            .get(name)
            .and_then(|factories| factories.iter().find(|f| f.supports(value)))
            .map(|factory| factory.create(cd_ref))
            .ok_or_else(|| ChangeDetectionError::PipeNotFound {
                name: name.to_string(),
                value: value.to_string(),
            })
    }
}

impl core::fmt::Debug for PipeRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut names: Vec<_> = self.pipes.keys().map(|k| &**k).collect();
        names.sort_unstable();
        f.debug_struct("PipeRegistry").field("pipes", &names).finish()
    }
}

// ---------------------------------------------------------------------------
// Function pipes
// ---------------------------------------------------------------------------

type TransformFn = dyn Fn(&Value, &[Value]) -> Result<Value, BoxError>;
type SupportsFn = dyn Fn(&Value) -> bool;

/// Factory for pure pipes backed by a function.
///
/// Each instance remembers its last input and arguments and answers
/// [`Transformed::NoChange`] while they stay loosely identical.
#[derive(Clone)]
pub struct FnPipeFactory {
    transform: Rc<TransformFn>,
    supports: Option<Rc<SupportsFn>>,
}

impl FnPipeFactory {
    /// Factory supporting every value.
    pub fn new(transform: impl Fn(&Value, &[Value]) -> Result<Value, BoxError> + 'static) -> Self {
        Self {
            transform: Rc::new(transform),
            supports: None,
        }
    }

    /// Restrict the supported values.
    #[must_use]
    pub fn supporting(mut self, supports: impl Fn(&Value) -> bool + 'static) -> Self {
        self.supports = Some(Rc::new(supports));
        self
    }
}

impl PipeFactory for FnPipeFactory {
    fn supports(&self, value: &Value) -> bool {
        self.supports.as_ref().is_none_or(|s| s(value))
    }

    fn create(&self, _cd_ref: ChangeDetectorRef) -> Box<dyn Pipe> {
        Box::new(FnPipe {
            factory: self.clone(),
            last: None,
        })
    }
}

struct FnPipe {
    factory: FnPipeFactory,
    last: Option<(Value, Vec<Value>)>,
}

impl Pipe for FnPipe {
    fn supports(&self, value: &Value) -> bool {
        self.factory.supports(value)
    }

    fn transform(&mut self, value: &Value, args: &[Value]) -> Result<Transformed, BoxError> {
        if let Some((last_value, last_args)) = &self.last {
            let same = loose_identical(last_value, value)
                && last_args.len() == args.len()
                && last_args.iter().zip(args).all(|(a, b)| loose_identical(a, b));
            if same {
                return Ok(Transformed::NoChange);
            }
        }
        let result = (self.factory.transform)(value, args)?;
        self.last = Some((value.clone(), args.to_vec()));
        Ok(Transformed::Value(result))
    }
}
