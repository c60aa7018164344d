#![forbid(unsafe_code)]

//! Tracing subscriber setup.
//!
//! [`init`] installs a global `fmt` subscriber filtered by
//! [`LoggingConfig::filter`], writing JSON lines when [`LoggingConfig::json`]
//! is set. Spans emitted by the viewcore crates (`detect_changes`,
//! `instantiate`, `iterable_diff`, ...) need the `tracing` feature.

use core::fmt;

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Errors raised by [`init`].
#[derive(Debug)]
pub enum LoggingError {
    /// The filter directive does not parse.
    InvalidFilter {
        /// The directive.
        filter: String,
        /// Parser message.
        message: String,
    },
    /// A global subscriber is already installed.
    AlreadyInitialized(String),
}

impl fmt::Display for LoggingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidFilter { filter, message } => {
                write!(f, "invalid log filter '{filter}': {message}")
            }
            Self::AlreadyInitialized(message) => {
                write!(f, "tracing subscriber already installed: {message}")
            }
        }
    }
}

impl std::error::Error for LoggingError {}

/// Parse the filter directive of `config`.
pub fn filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(&config.filter).map_err(|err| LoggingError::InvalidFilter {
        filter: config.filter.clone(),
        message: err.to_string(),
    })
}

/// Install the global subscriber described by `config`.
pub fn init(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = filter(config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|err| LoggingError::AlreadyInitialized(err.to_string()))?;
    tracing::debug!(filter = %config.filter, json = config.json, "logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_parse() {
        let config = LoggingConfig {
            filter: "viewcore_detect=trace,warn".into(),
            json: false,
        };
        assert!(filter(&config).is_ok());
    }

    #[test]
    fn bad_filters_are_reported() {
        let config = LoggingConfig {
            filter: "viewcore=notalevel".into(),
            json: true,
        };
        let err = filter(&config).unwrap_err();
        assert!(err.to_string().starts_with("invalid log filter 'viewcore=notalevel'"));
    }

    #[test]
    fn second_init_fails() {
        let config = LoggingConfig::default();
        let _ = init(&config);
        assert!(matches!(
            init(&config),
            Err(LoggingError::AlreadyInitialized(_))
        ));
    }
}
