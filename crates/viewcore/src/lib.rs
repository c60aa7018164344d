#![forbid(unsafe_code)]

//! viewcore public facade.
//!
//! Re-exports the injector ([`inject`]) and change detection ([`detect`])
//! crates, and adds engine-level pieces:
//!
//! - [`config`]: [`EngineConfig`] with TOML policy files and env overrides.
//! - [`lifecycle`]: [`LifeCycle`], the tick driver for a detector tree.
//! - `logging` (feature `logging`): tracing subscriber setup.
//!
//! # Feature Flags
//!
//! - `tracing`: spans in every viewcore crate.
//! - `logging`: `logging::init` on top of `tracing-subscriber`.
//! - `policy-config`: `EngineConfig::load` / `from_toml_str`.

pub mod config;
pub mod lifecycle;
#[cfg(feature = "logging")]
pub mod logging;

pub use viewcore_detect as detect;
pub use viewcore_inject as inject;

pub use config::{ConfigError, EngineConfig, LoggingConfig};
pub use lifecycle::{LifeCycle, TickError};

/// Common imports.
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::lifecycle::LifeCycle;
    pub use viewcore_detect::{
        Ast, BinaryOp, ChangeDetectionStrategy, ChangeDetector, ChangeDetectorRef,
        ChangeDispatcher, ChangeRecord, Locals, Memo, PipeRegistry, ProtoChangeDetector,
        ProtoRecordBuilder, Value,
    };
    pub use viewcore_inject::{
        Dependency, Injectable, Injector, InjectorError, OpaqueToken, Token, class, provide,
        providers,
    };
}
