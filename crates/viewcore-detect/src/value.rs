#![forbid(unsafe_code)]

//! Dynamic values observed by change detection.
//!
//! Primitives (`Null`, `Bool`, `Number`, `Str`) compare by value. Reference
//! kinds (`List`, `Map`, `Object`, `Function`) are shared and compare by
//! pointer: mutating a list in place keeps it identical, which is what the
//! collection differs exist for.
//!
//! # Identity
//!
//! [`loose_identical`] is the comparison used everywhere a "did it change"
//! decision is made. It differs from plain equality in one place: `NaN` is
//! identical to `NaN`, so a binding that keeps producing `NaN` is stable.

use core::fmt;
use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::error::BoxError;

/// Insertion-ordered property storage for maps and objects.
pub type Props = IndexMap<Rc<str>, Value, ahash::RandomState>;

/// Native callable: receives the receiver (`Null` for plain calls) and the
/// evaluated arguments.
pub type NativeFn = dyn Fn(&Value, &[Value]) -> Result<Value, BoxError>;

/// A named, shared callable.
#[derive(Clone)]
pub struct Function {
    name: Rc<str>,
    call: Rc<NativeFn>,
}

impl Function {
    /// Wrap `call` under `name`.
    pub fn new(
        name: impl Into<Rc<str>>,
        call: impl Fn(&Value, &[Value]) -> Result<Value, BoxError> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            call: Rc::new(call),
        }
    }

    /// Diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke with `receiver` bound.
    pub fn call(&self, receiver: &Value, args: &[Value]) -> Result<Value, BoxError> {
        (self.call)(receiver, args)
    }

    /// Whether both handles share one callable.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.call, &other.call)
    }
}

/// A dynamic value.
#[derive(Clone, Default)]
pub enum Value {
    /// Absent value.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// IEEE double.
    Number(f64),
    /// Immutable string, compared by content.
    Str(Rc<str>),
    /// Shared mutable list.
    List(Rc<RefCell<Vec<Value>>>),
    /// Shared mutable string-keyed map (literal maps evaluate to this).
    Map(Rc<RefCell<Props>>),
    /// Shared mutable property bag; function-valued properties are methods.
    Object(Rc<RefCell<Props>>),
    /// Shared callable.
    Function(Function),
}

impl Value {
    /// A new list holding `items`.
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Self::List(Rc::new(RefCell::new(items.into_iter().collect())))
    }

    /// A new map holding `entries` in order.
    pub fn map<K: Into<Rc<str>>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Map(Rc::new(RefCell::new(collect_props(entries))))
    }

    /// A new object holding `properties` in order.
    pub fn object<K: Into<Rc<str>>>(properties: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Object(Rc::new(RefCell::new(collect_props(properties))))
    }

    /// A new function value.
    pub fn function(
        name: impl Into<Rc<str>>,
        call: impl Fn(&Value, &[Value]) -> Result<Value, BoxError> + 'static,
    ) -> Self {
        Self::Function(Function::new(name, call))
    }

    /// Kind name used in diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Object(_) => "object",
            Self::Function(_) => "function",
        }
    }

    /// Whether this is `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric content, if a number.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// String content, if a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Shared list storage, if a list.
    #[must_use]
    pub fn as_list(&self) -> Option<&Rc<RefCell<Vec<Value>>>> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Shared property storage, if a map or an object.
    #[must_use]
    pub fn as_props(&self) -> Option<&Rc<RefCell<Props>>> {
        match self {
            Self::Map(props) | Self::Object(props) => Some(props),
            _ => None,
        }
    }

    /// Truthiness: `Null`, `false`, `0`, `NaN` and `""` are false.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Property `name` of a map or object. `None` for other kinds.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<Value> {
        self.as_props()
            .map(|props| props.borrow().get(name).cloned().unwrap_or_default())
    }

    /// Set property `name` on a map or object. Returns `false` for other kinds.
    pub fn set_property(&self, name: &str, value: impl Into<Value>) -> bool {
        match self.as_props() {
            Some(props) => {
                props.borrow_mut().insert(Rc::from(name), value.into());
                true
            }
            None => false,
        }
    }

    /// Remove property `name` from a map or object.
    pub fn remove_property(&self, name: &str) -> Option<Value> {
        self.as_props()
            .and_then(|props| props.borrow_mut().shift_remove(name))
    }

    /// Interpolation text: `Null` renders empty, everything else as [`Display`].
    ///
    /// [`Display`]: fmt::Display
    #[must_use]
    pub fn stringify(&self) -> String {
        match self {
            Self::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// Strict equality used by `==`: like [`loose_identical`] but `NaN` is
    /// unequal to itself.
    #[must_use]
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a == b,
            _ => loose_identical(self, other),
        }
    }
}

fn collect_props<K: Into<Rc<str>>>(entries: impl IntoIterator<Item = (K, Value)>) -> Props {
    entries
        .into_iter()
        .map(|(key, value)| (key.into(), value))
        .collect()
}

/// Identity comparison used for dirty checking.
///
/// Primitives compare by value with `NaN` identical to `NaN`; shared kinds
/// compare by pointer.
#[must_use]
pub fn loose_identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y || (x.is_nan() && y.is_nan()),
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
        (Value::Map(x), Value::Map(y)) | (Value::Object(x), Value::Object(y)) => Rc::ptr_eq(x, y),
        (Value::Function(x), Value::Function(y)) => x.ptr_eq(y),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Identity keys
// ---------------------------------------------------------------------------

/// Hashable identity of a value, consistent with [`loose_identical`].
///
/// Used as the default track key by the iterable differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    /// `Null`.
    Null,
    /// A boolean.
    Bool(bool),
    /// Number bits, with every `NaN` and both zeros normalized.
    Number(u64),
    /// String content.
    Str(Rc<str>),
    /// Address of a shared value.
    Ptr(usize),
}

impl IdentityKey {
    /// Identity of `value`.
    #[must_use]
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) if n.is_nan() => Self::Number(f64::NAN.to_bits()),
            Value::Number(n) if *n == 0.0 => Self::Number(0.0_f64.to_bits()),
            Value::Number(n) => Self::Number(n.to_bits()),
            Value::Str(s) => Self::Str(Rc::clone(s)),
            Value::List(items) => Self::Ptr(Rc::as_ptr(items) as *const () as usize),
            Value::Map(props) | Value::Object(props) => {
                Self::Ptr(Rc::as_ptr(props) as *const () as usize)
            }
            Value::Function(f) => Self::Ptr(Rc::as_ptr(&f.call) as *const () as usize),
        }
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<Rc<str>> for Value {
    fn from(s: Rc<str>) -> Self {
        Self::Str(s)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Self::Function(f)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::list(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

fn write_number(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if n.is_nan() {
        f.write_str("NaN")
    } else if n.is_infinite() {
        f.write_str(if n > 0.0 { "Infinity" } else { "-Infinity" })
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        write!(f, "{}", n as i64)
    } else {
        write!(f, "{n}")
    }
}

/// Addresses of the lists and maps currently being written.
type Open = SmallVec<[*const (); 8]>;

fn write_value(f: &mut fmt::Formatter<'_>, value: &Value, open: &mut Open) -> fmt::Result {
    match value {
        Value::Null => f.write_str("null"),
        Value::Bool(b) => write!(f, "{b}"),
        Value::Number(n) => write_number(f, *n),
        Value::Str(s) => f.write_str(s),
        Value::List(items) => {
            let addr = Rc::as_ptr(items).cast::<()>();
            if open.contains(&addr) {
                return f.write_str("[...]");
            }
            open.push(addr);
            f.write_str("[")?;
            for (i, item) in items.borrow().iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_value(f, item, open)?;
            }
            open.pop();
            f.write_str("]")
        }
        Value::Map(props) | Value::Object(props) => {
            let addr = Rc::as_ptr(props).cast::<()>();
            if open.contains(&addr) {
                return f.write_str("{...}");
            }
            open.push(addr);
            f.write_str("{")?;
            for (i, (key, item)) in props.borrow().iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{key}: ")?;
                write_value(f, item, open)?;
            }
            open.pop();
            f.write_str("}")
        }
        Value::Function(func) => write!(f, "function {}", func.name),
    }
}

/// Self-containing lists and maps print `[...]` / `{...}` where they recur.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_value(f, self, &mut Open::new())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s:?}"),
            other => write!(f, "{other}"),
        }
    }
}
