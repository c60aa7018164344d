#![forbid(unsafe_code)]

//! Injector error taxonomy.
//!
//! # Failure Modes
//!
//! | Failure | Raised by | Behavior |
//! |---------|-----------|----------|
//! | Provider without (or with several) strategies | `resolve` | [`InjectorError::InvalidProvider`] |
//! | Multi and regular providers for one token | `resolve` | [`InjectorError::MixedMultiProvider`] |
//! | Token found nowhere in the chain | `get` | [`InjectorError::NoProvider`]; `get_optional` returns `None` |
//! | Construction depth exceeds slot count | `get` | [`InjectorError::CyclicDependency`] |
//! | Factory returned an error | `get` | [`InjectorError::Instantiation`] wrapping the source |
//! | Instance is not of the requested type | typed getters | [`InjectorError::TypeMismatch`] |
//!
//! No error is retried. An aborted `get` leaves slots that were filled before
//! the failure filled.

use core::fmt;

/// Boxed error returned by user factories.
pub type BoxError = Box<dyn std::error::Error + 'static>;

/// Errors from provider resolution and dependency lookup.
#[derive(Debug)]
pub enum InjectorError {
    /// A provider declaration is malformed.
    InvalidProvider {
        /// Token the provider was declared for.
        token: String,
        /// What is wrong with it.
        reason: &'static str,
    },
    /// Multi and non-multi declarations target the same token.
    MixedMultiProvider {
        /// The token declared both ways.
        token: String,
    },
    /// No injector in the chain provides the token.
    NoProvider {
        /// Resolution path, outermost request first.
        path: Vec<String>,
    },
    /// Construction depth exceeded the injector's slot count.
    CyclicDependency {
        /// Display name of the injector that detected the cycle.
        injector: String,
        /// Resolution path, outermost request first.
        path: Vec<String>,
    },
    /// A factory failed.
    Instantiation {
        /// Token whose factory failed.
        token: String,
        /// The factory's error.
        source: BoxError,
    },
    /// A resolved instance is not of the requested type.
    TypeMismatch {
        /// Token that was resolved.
        token: String,
        /// Type the caller asked for.
        expected: &'static str,
    },
}

impl InjectorError {
    /// Prepend `token` to the resolution path of path-carrying errors.
    ///
    /// Called while unwinding through nested instantiations so the final
    /// message reads outermost request first.
    #[must_use]
    pub fn add_key(mut self, token: String) -> Self {
        match &mut self {
            Self::NoProvider { path } | Self::CyclicDependency { path, .. } => {
                path.insert(0, token);
            }
            _ => {}
        }
        self
    }

    /// Whether this error only means "not found".
    #[must_use]
    pub fn is_no_provider(&self) -> bool {
        matches!(self, Self::NoProvider { .. })
    }
}

fn write_path(f: &mut fmt::Formatter<'_>, path: &[String]) -> fmt::Result {
    if path.len() > 1 {
        write!(f, " ({})", path.join(" -> "))?;
    }
    Ok(())
}

impl fmt::Display for InjectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidProvider { token, reason } => {
                write!(f, "invalid provider for {token}: {reason}")
            }
            Self::MixedMultiProvider { token } => {
                write!(f, "cannot mix multi providers and regular providers for {token}")
            }
            Self::NoProvider { path } => {
                let last = path.last().map_or("<unknown>", String::as_str);
                write!(f, "no provider for {last}!")?;
                write_path(f, path)
            }
            Self::CyclicDependency { injector, path } => {
                write!(f, "cannot instantiate cyclic dependency in {injector}!")?;
                write_path(f, path)
            }
            Self::Instantiation { token, source } => {
                write!(f, "error during instantiation of {token}: {source}")
            }
            Self::TypeMismatch { token, expected } => {
                write!(f, "instance for {token} is not a {expected}")
            }
        }
    }
}

impl std::error::Error for InjectorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Instantiation { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_provider_message_includes_path() {
        let err = InjectorError::NoProvider {
            path: vec!["C".into()],
        }
        .add_key("B".into())
        .add_key("A".into());
        assert_eq!(err.to_string(), "no provider for C! (A -> B -> C)");
    }

    #[test]
    fn single_segment_path_has_no_suffix() {
        let err = InjectorError::NoProvider {
            path: vec!["A".into()],
        };
        assert_eq!(err.to_string(), "no provider for A!");
    }

    #[test]
    fn instantiation_exposes_source() {
        let err = InjectorError::Instantiation {
            token: "Engine".into(),
            source: "boom".into(),
        };
        assert_eq!(
            std::error::Error::source(&err).map(ToString::to_string),
            Some("boom".to_owned())
        );
        assert!(err.to_string().contains("Engine"));
    }

    #[test]
    fn add_key_ignores_other_variants() {
        let err = InjectorError::MixedMultiProvider { token: "X".into() }.add_key("Y".into());
        assert!(matches!(err, InjectorError::MixedMultiProvider { .. }));
    }
}
