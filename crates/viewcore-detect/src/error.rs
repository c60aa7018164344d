#![forbid(unsafe_code)]

//! Error taxonomy for compilation, detection and diffing.
//!
//! # Failure Modes
//!
//! | Failure | Raised by | Behavior |
//! |---------|-----------|----------|
//! | Interpolation with more than 9 expressions | `ProtoRecordBuilder::add` | [`CompileError::TooManyInterpolations`] |
//! | Interpolation with more strings than `expressions + 1` | `ProtoRecordBuilder::add` | [`CompileError::InterpolationStrings`] |
//! | Binding added to a group closed earlier | `ProtoRecordBuilder::add` | [`CompileError::NonContiguousGroup`] |
//! | Detection without a context | `detect_changes` | [`ChangeDetectionError::Dehydrated`] |
//! | Same detector re-entered while evaluating | any detector call | [`ChangeDetectionError::Reentrant`] |
//! | Binding changed during a check pass | `check_no_changes` | [`ChangeDetectionError::ExpressionChanged`] |
//! | Operator, read, call or pipe failed | `detect_changes` | [`ChangeDetectionError::Evaluation`] |
//! | No pipe factory supports the value | `detect_changes` | [`ChangeDetectionError::PipeNotFound`] |
//! | Collection differ rejected the value | `detect_changes` | [`ChangeDetectionError::Differ`] |
//!
//! Errors abort the pass. Previous values already stored during the pass
//! stay stored.

use core::fmt;

use crate::value::Value;

/// Boxed error returned by user functions and pipes.
pub type BoxError = Box<dyn std::error::Error + 'static>;

// ---------------------------------------------------------------------------
// Compile errors
// ---------------------------------------------------------------------------

/// Errors raised while compiling bindings into records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// An interpolation embeds more than nine expressions.
    TooManyInterpolations {
        /// Number of embedded expressions.
        count: usize,
    },
    /// An interpolation carries strings that no expression separates.
    InterpolationStrings {
        /// Number of literal strings.
        strings: usize,
        /// Number of embedded expressions.
        expressions: usize,
    },
    /// A binding targets a group whose records were already closed off by
    /// another group.
    NonContiguousGroup {
        /// The reopened group.
        group: String,
    },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyInterpolations { count } => write!(
                f,
                "Does not support more than 9 expressions (found {count})"
            ),
            Self::InterpolationStrings {
                strings,
                expressions,
            } => write!(
                f,
                "interpolation has {strings} strings for {expressions} expressions (at most {} allowed)",
                expressions + 1
            ),
            Self::NonContiguousGroup { group } => {
                write!(f, "records of group '{group}' must be contiguous")
            }
        }
    }
}

impl std::error::Error for CompileError {}

// ---------------------------------------------------------------------------
// Differ errors
// ---------------------------------------------------------------------------

/// Errors raised by collection differs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DifferError {
    /// The value is neither null nor a collection the differ understands.
    InvalidCollection(String),
    /// No registered differ factory supports the value.
    NoDifferFound(String),
}

impl fmt::Display for DifferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCollection(value) => {
                write!(f, "Error trying to diff '{value}': not a collection")
            }
            Self::NoDifferFound(value) => {
                write!(f, "Cannot find a differ supporting object '{value}'")
            }
        }
    }
}

impl std::error::Error for DifferError {}

// ---------------------------------------------------------------------------
// Evaluation errors
// ---------------------------------------------------------------------------

/// Failure of a single operator, read or call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalError {
    message: String,
}

impl EvalError {
    /// Error with `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Human-readable reason.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for EvalError {}

impl From<BoxError> for EvalError {
    fn from(err: BoxError) -> Self {
        Self::new(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Detection errors
// ---------------------------------------------------------------------------

/// Errors raised by change detectors.
#[derive(Debug)]
pub enum ChangeDetectionError {
    /// Detection ran on a detector with no context attached.
    Dehydrated {
        /// Detector id.
        detector: String,
    },
    /// The detector was re-entered while it was evaluating.
    Reentrant {
        /// Detector id.
        detector: String,
    },
    /// A binding produced a new value during `check_no_changes`.
    ExpressionChanged {
        /// Unparsed binding expression.
        expression: String,
        /// Source location, if the binding recorded one.
        location: Option<String>,
        /// Stored value, `None` when never evaluated.
        previous: Option<Value>,
        /// Freshly computed value.
        current: Value,
    },
    /// Evaluating a record failed.
    Evaluation {
        /// Unparsed binding expression.
        expression: String,
        /// Source location, if the binding recorded one.
        location: Option<String>,
        /// What went wrong.
        message: String,
    },
    /// No pipe named `name` supports the value.
    PipeNotFound {
        /// Pipe name.
        name: String,
        /// The unsupported value.
        value: String,
    },
    /// A collection differ failed.
    Differ(DifferError),
}

fn write_location(f: &mut fmt::Formatter<'_>, location: Option<&String>) -> fmt::Result {
    match location {
        Some(location) => write!(f, " in [{location}]"),
        None => Ok(()),
    }
}

impl fmt::Display for ChangeDetectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dehydrated { detector } => {
                write!(f, "detector '{detector}' is dehydrated: attach a context first")
            }
            Self::Reentrant { detector } => {
                write!(f, "detector '{detector}' was re-entered while evaluating")
            }
            Self::ExpressionChanged {
                expression,
                location,
                previous,
                current,
            } => {
                write!(f, "Expression '{expression}'")?;
                write_location(f, location.as_ref())?;
                write!(f, " has changed after it was checked. Previous value: '")?;
                match previous {
                    Some(previous) => write!(f, "{previous}")?,
                    None => f.write_str("<uninitialized>")?,
                }
                write!(f, "'. Current value: '{current}'")
            }
            Self::Evaluation {
                expression,
                location,
                message,
            } => {
                write!(f, "{message} in '{expression}'")?;
                write_location(f, location.as_ref())
            }
            Self::PipeNotFound { name, value } => {
                write!(f, "Cannot find '{name}' pipe supporting object '{value}'")
            }
            Self::Differ(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ChangeDetectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Differ(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DifferError> for ChangeDetectionError {
    fn from(err: DifferError) -> Self {
        Self::Differ(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolation_limit_message() {
        let err = CompileError::TooManyInterpolations { count: 10 };
        assert!(err.to_string().starts_with("Does not support more than 9 expressions"));
    }

    #[test]
    fn expression_changed_names_expression_and_location() {
        let err = ChangeDetectionError::ExpressionChanged {
            expression: "a.b".into(),
            location: Some("Cmp:12".into()),
            previous: Some(Value::from(1)),
            current: Value::from(2),
        };
        assert_eq!(
            err.to_string(),
            "Expression 'a.b' in [Cmp:12] has changed after it was checked. \
             Previous value: '1'. Current value: '2'"
        );
    }

    #[test]
    fn differ_error_is_the_source() {
        let err = ChangeDetectionError::from(DifferError::InvalidCollection("5".into()));
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("'5'"));
    }

    #[test]
    fn eval_error_from_boxed() {
        let boxed: BoxError = "boom".into();
        assert_eq!(EvalError::from(boxed).message(), "boom");
    }
}
