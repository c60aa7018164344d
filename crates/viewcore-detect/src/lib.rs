#![forbid(unsafe_code)]

//! Change detection for view trees.
//!
//! Binding expressions are built as [`Ast`] values, compiled by a
//! [`ProtoRecordBuilder`] into flat record lists, and dirty-checked by a
//! [`ChangeDetector`] against a hydrated context. Changed bindings are
//! reported per group to a [`ChangeDispatcher`].
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use viewcore_detect::{Ast, ChangeRecord, Memo, ProtoChangeDetector, ProtoRecordBuilder, Value};
//!
//! let mut builder = ProtoRecordBuilder::new();
//! builder.add(&Ast::prop("name"), "name", "greeting")?;
//! let proto = ProtoChangeDetector::new("Greeting", builder.build());
//!
//! let log = Rc::new(RefCell::new(Vec::new()));
//! let sink = Rc::clone(&log);
//! let detector = proto.instantiate(Rc::new(move |_: &Memo, records: &[ChangeRecord]| {
//!     sink.borrow_mut().extend(records.iter().map(ToString::to_string));
//! }));
//!
//! let person = Value::object([("name", Value::from("misko"))]);
//! detector.hydrate(person.clone(), None)?;
//! detector.detect_changes()?;
//! person.set_property("name", "Misko");
//! detector.detect_changes()?;
//! assert_eq!(*log.borrow(), ["name=misko", "name=Misko"]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Modules
//!
//! - [`value`]: dynamic values and the identity rule.
//! - [`ast`], [`proto`]: expressions and their compiled form.
//! - [`detector`]: detectors, modes, dispatch.
//! - [`pipe`], [`differ`], [`memo`]: transformers, collection differs and
//!   pure-function memoizers.
//!
//! # Feature Flags
//!
//! - `tracing`: spans around detection passes and differ runs.

pub mod ast;
pub mod detector;
pub mod differ;
pub mod error;
mod eval;
pub mod locals;
pub mod memo;
pub mod pipe;
pub mod proto;
pub mod value;

pub use ast::{Ast, BinaryOp, UnaryOp};
pub use detector::{
    ChangeDetectionStrategy, ChangeDetector, ChangeDetectorRef, ChangeDispatcher, ChangeRecord,
    DetectionMode, ProtoChangeDetector,
};
pub use differ::{
    CollectionChanges, Differ, DifferFactory, Differs, IterableChanges, IterableDiffer,
    IterableDifferFactory, KeyValueChanges, KeyValueDiffer, KeyValueDifferFactory, Operation,
    apply_operations,
};
pub use error::{BoxError, ChangeDetectionError, CompileError, DifferError, EvalError};
pub use locals::Locals;
pub use memo::LooseIdentical;
pub use pipe::{FnPipeFactory, Pipe, PipeFactory, PipeRegistry, Transformed};
pub use proto::{MAX_INTERPOLATIONS, Memo, ProtoRecordBuilder, ProtoRecords};
pub use value::{Function, IdentityKey, Value, loose_identical};
