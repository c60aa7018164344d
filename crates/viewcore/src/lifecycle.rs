#![forbid(unsafe_code)]

//! Tick driver for a detector tree.
//!
//! A tick runs `detect_changes` on the root detector and, in dev mode, a
//! `check_no_changes` pass right after it so bindings that keep changing
//! (a getter returning a fresh object each time, for instance) are caught.
//!
//! # Invariants
//!
//! 1. Ticks do not nest: a tick started from inside a tick fails with
//!    [`TickError::Recursive`] and leaves the running tick untouched.
//! 2. The guard is released even when a pass fails.

use core::fmt;
use std::cell::Cell;

use viewcore_detect::{ChangeDetectionError, ChangeDetector};

use crate::config::EngineConfig;

/// Errors raised by [`LifeCycle::tick`].
#[derive(Debug)]
pub enum TickError {
    /// `tick` was called while a tick was running.
    Recursive,
    /// A detection or stability pass failed.
    Detection(ChangeDetectionError),
}

impl fmt::Display for TickError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recursive => f.write_str("LifeCycle.tick is called recursively"),
            Self::Detection(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for TickError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Recursive => None,
            Self::Detection(err) => Some(err),
        }
    }
}

impl From<ChangeDetectionError> for TickError {
    fn from(err: ChangeDetectionError) -> Self {
        Self::Detection(err)
    }
}

/// Runs change detection over a root detector.
#[derive(Debug)]
pub struct LifeCycle {
    root: ChangeDetector,
    config: EngineConfig,
    ticking: Cell<bool>,
    ticks: Cell<u64>,
}

struct TickGuard<'a>(&'a Cell<bool>);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl LifeCycle {
    /// Driver for `root` with `config`.
    #[must_use]
    pub fn new(root: ChangeDetector, config: EngineConfig) -> Self {
        Self {
            root,
            config,
            ticking: Cell::new(false),
            ticks: Cell::new(0),
        }
    }

    /// Root detector.
    #[must_use]
    pub fn root(&self) -> &ChangeDetector {
        &self.root
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of completed ticks.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks.get()
    }

    /// Whether a tick is running.
    #[must_use]
    pub fn is_ticking(&self) -> bool {
        self.ticking.get()
    }

    /// Detect changes over the tree; in dev mode, verify it is stable.
    pub fn tick(&self) -> Result<(), TickError> {
        if self.ticking.replace(true) {
            return Err(TickError::Recursive);
        }
        let _guard = TickGuard(&self.ticking);

        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!(
            "tick",
            tick = self.ticks.get(),
            dev_mode = self.config.dev_mode
        )
        .entered();

        self.root.detect_changes()?;
        if self.config.dev_mode {
            self.root.check_no_changes()?;
        }
        self.ticks.set(self.ticks.get() + 1);
        Ok(())
    }
}
