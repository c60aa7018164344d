#![forbid(unsafe_code)]

//! Engine configuration.
//!
//! Defaults come from [`EngineConfig::default`]; a TOML policy file may
//! override them (`policy-config` feature), and the environment overrides
//! both:
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `VIEWCORE_DEV_MODE` | `1`/`true`/`on` enables, `0`/`false`/`off` disables dev mode |
//! | `VIEWCORE_LOG` | replaces the log filter directive |
//!
//! ```toml
//! dev_mode = true
//!
//! [logging]
//! filter = "viewcore_detect=trace"
//! json = false
//! ```

use core::fmt;
use std::env;

/// Environment variable toggling dev mode.
pub const DEV_MODE_ENV: &str = "VIEWCORE_DEV_MODE";
/// Environment variable holding the log filter directive.
pub const LOG_ENV: &str = "VIEWCORE_LOG";

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "policy-config", derive(serde::Deserialize))]
#[cfg_attr(feature = "policy-config", serde(default, deny_unknown_fields))]
pub struct LoggingConfig {
    /// `tracing-subscriber` env-filter directive.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "warn".to_string(),
            json: false,
        }
    }
}

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "policy-config", derive(serde::Deserialize))]
#[cfg_attr(feature = "policy-config", serde(default, deny_unknown_fields))]
pub struct EngineConfig {
    /// Run `check_no_changes` after every tick.
    pub dev_mode: bool,
    /// Log output.
    pub logging: LoggingConfig,
}

/// Errors raised while loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// An environment variable holds an unrecognized value.
    InvalidEnv {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },
    /// Reading the policy file failed.
    #[cfg(feature = "policy-config")]
    Io(std::io::Error),
    /// The policy file is not valid TOML for [`EngineConfig`].
    #[cfg(feature = "policy-config")]
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnv { name, value } => {
                write!(f, "invalid value '{value}' for {name}")
            }
            #[cfg(feature = "policy-config")]
            Self::Io(err) => write!(f, "failed to read policy file: {err}"),
            #[cfg(feature = "policy-config")]
            Self::Parse(err) => write!(f, "invalid policy file: {err}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidEnv { .. } => None,
            #[cfg(feature = "policy-config")]
            Self::Io(err) => Some(err),
            #[cfg(feature = "policy-config")]
            Self::Parse(err) => Some(err),
        }
    }
}

impl EngineConfig {
    /// Defaults with the environment applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Parse a TOML policy; missing fields keep their defaults.
    #[cfg(feature = "policy-config")]
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        toml::from_str(source).map_err(ConfigError::Parse)
    }

    /// Load a TOML policy file and apply the environment on top.
    #[cfg(feature = "policy-config")]
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        let mut config = Self::from_toml_str(&source)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `VIEWCORE_DEV_MODE` and `VIEWCORE_LOG`.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        let dev_mode = env::var(DEV_MODE_ENV).ok();
        let log = env::var(LOG_ENV).ok();
        self.apply_overrides(dev_mode.as_deref(), log.as_deref())
    }

    fn apply_overrides(
        &mut self,
        dev_mode: Option<&str>,
        log: Option<&str>,
    ) -> Result<(), ConfigError> {
        if let Some(raw) = dev_mode {
            self.dev_mode = parse_flag(raw).ok_or_else(|| ConfigError::InvalidEnv {
                name: DEV_MODE_ENV,
                value: raw.to_string(),
            })?;
        }
        if let Some(filter) = log.map(str::trim).filter(|f| !f.is_empty()) {
            self.logging.filter = filter.to_string();
        }
        Ok(())
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" | "" => Some(false),
        _ => None,
    }
}
