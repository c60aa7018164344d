#![forbid(unsafe_code)]

//! Lexical variable scopes consulted before the context.
//!
//! A template loop introduces variables (`item`, `index`) that shadow context
//! properties for reads through the implicit receiver. Scopes chain to a
//! parent; lookups walk outward.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;

use crate::value::Value;

/// A variable scope with an optional enclosing scope.
#[derive(Debug, Default)]
pub struct Locals {
    parent: Option<Rc<Locals>>,
    values: RefCell<AHashMap<Rc<str>, Value>>,
}

impl Locals {
    /// Empty scope enclosed by `parent`.
    #[must_use]
    pub fn new(parent: Option<Rc<Locals>>) -> Self {
        Self {
            parent,
            values: RefCell::new(AHashMap::new()),
        }
    }

    /// Scope holding `values`, enclosed by `parent`.
    pub fn with_values<K: Into<Rc<str>>>(
        parent: Option<Rc<Locals>>,
        values: impl IntoIterator<Item = (K, Value)>,
    ) -> Self {
        Self {
            parent,
            values: RefCell::new(values.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }

    /// Enclosing scope.
    #[must_use]
    pub fn parent(&self) -> Option<&Rc<Locals>> {
        self.parent.as_ref()
    }

    /// Whether `name` is bound in this scope or an enclosing one.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.borrow().contains_key(name)
            || self.parent.as_ref().is_some_and(|p| p.contains(name))
    }

    /// Value bound to `name`, searching outward.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.values.borrow().get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|p| p.get(name))
    }

    /// Rebind `name` in the nearest scope that declares it.
    ///
    /// Returns `false` when no scope declares `name`.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> bool {
        if let Some(slot) = self.values.borrow_mut().get_mut(name) {
            *slot = value.into();
            return true;
        }
        match &self.parent {
            Some(parent) => parent.set(name, value),
            None => false,
        }
    }

    /// Declare (or redeclare) `name` in this scope.
    pub fn define(&self, name: &str, value: impl Into<Value>) {
        self.values.borrow_mut().insert(Rc::from(name), value.into());
    }

    /// Drop every binding of this scope. Enclosing scopes are untouched.
    pub fn clear_values(&self) {
        self.values.borrow_mut().clear();
    }
}
