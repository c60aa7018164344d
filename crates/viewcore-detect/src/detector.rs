#![forbid(unsafe_code)]

//! Dirty-checking change detectors.
//!
//! A [`ProtoChangeDetector`] pairs compiled [`ProtoRecords`] with the pipe and
//! differ registries; [`instantiate`](ProtoChangeDetector::instantiate) turns
//! it into a live [`ChangeDetector`] reporting to a [`ChangeDispatcher`].
//!
//! # Modes
//!
//! | Mode | `detect_changes` | After a pass |
//! |------|------------------|--------------|
//! | [`DetectionMode::CheckAlways`] | evaluates | unchanged |
//! | [`DetectionMode::CheckOnce`] | evaluates | becomes `Checked` |
//! | [`DetectionMode::Checked`] | skipped with its subtree | - |
//! | [`DetectionMode::Detached`] | skipped with its subtree | - |
//!
//! [`ChangeDetector::mark_path_to_root_as_check_once`] promotes `Checked`
//! ancestors back to `CheckOnce` and stops at the first `Detached` one.
//!
//! # Invariants
//!
//! 1. Records are evaluated in list order; each dirty group is dispatched
//!    once, right after its last record, and clean groups are never
//!    dispatched.
//! 2. After `hydrate`, every binding is reported on the first pass, `Null`
//!    included.
//! 3. `NaN` compared with `NaN` is unchanged.
//! 4. No internal borrow is held while user code runs (functions, pipes,
//!    differ factories, the dispatcher).
//! 5. Pure records are recomputed only when an operand changed, except on
//!    the pass following an aborted one, which recomputes all of them.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | `Dehydrated` | detection with no context | pass aborted, nothing evaluated |
//! | `Reentrant` | the detector is re-entered from its own user code | inner call rejected |
//! | `Evaluation` | a read, operator, call or pipe failed | pass aborted, earlier stores kept |

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use crate::differ::{CollectionChanges, Differ, Differs};
use crate::error::{ChangeDetectionError, EvalError};
use crate::eval;
use crate::locals::Locals;
use crate::pipe::{Pipe, PipeRegistry, Transformed};
use crate::proto::{Memo, ProtoRecord, ProtoRecords, RecordKind};
use crate::value::{Value, loose_identical};

/// Detection state of one detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectionMode {
    /// Evaluate on every pass.
    CheckAlways,
    /// Evaluate on the next pass, then become [`Checked`](Self::Checked).
    CheckOnce,
    /// Skip until marked for check.
    Checked,
    /// Skip until reattached.
    Detached,
}

/// Mode a detector enters on hydration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ChangeDetectionStrategy {
    /// [`DetectionMode::CheckAlways`].
    #[default]
    Default,
    /// [`DetectionMode::CheckOnce`]: re-checked only when marked.
    OnPush,
}

impl ChangeDetectionStrategy {
    /// Mode set by `hydrate`.
    #[must_use]
    pub const fn initial_mode(self) -> DetectionMode {
        match self {
            Self::Default => DetectionMode::CheckAlways,
            Self::OnPush => DetectionMode::CheckOnce,
        }
    }
}

/// One changed binding, as reported to the dispatcher.
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    /// Memo of the binding.
    pub binding_memo: Memo,
    /// Stored value before the pass, `None` on the first pass after hydration.
    pub previous: Option<Value>,
    /// New value.
    pub current: Value,
    /// Collection changes of a structural binding.
    pub collection: Option<Rc<CollectionChanges>>,
}

impl core::fmt::Display for ChangeRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}={}", self.binding_memo, self.current)
    }
}

/// Receives the changed bindings of each dirty group.
pub trait ChangeDispatcher {
    /// Called once per dirty group per pass, records in binding order.
    fn on_record_change(&self, group: &Memo, records: &[ChangeRecord]);
}

impl<F> ChangeDispatcher for F
where
    F: Fn(&Memo, &[ChangeRecord]),
{
    fn on_record_change(&self, group: &Memo, records: &[ChangeRecord]) {
        self(group, records);
    }
}

// ---------------------------------------------------------------------------
// Proto detector
// ---------------------------------------------------------------------------

/// Shareable detector definition.
#[derive(Debug, Clone)]
pub struct ProtoChangeDetector {
    id: Rc<str>,
    records: ProtoRecords,
    strategy: ChangeDetectionStrategy,
    pipes: Rc<PipeRegistry>,
    differs: Rc<Differs>,
}

impl ProtoChangeDetector {
    /// Definition named `id` over `records`, with no pipes and the default
    /// differs.
    pub fn new(id: impl Into<Rc<str>>, records: ProtoRecords) -> Self {
        Self {
            id: id.into(),
            records,
            strategy: ChangeDetectionStrategy::Default,
            pipes: Rc::new(PipeRegistry::new()),
            differs: Rc::new(Differs::default()),
        }
    }

    /// Set the hydration strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: ChangeDetectionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the pipe registry.
    #[must_use]
    pub fn with_pipes(mut self, pipes: Rc<PipeRegistry>) -> Self {
        self.pipes = pipes;
        self
    }

    /// Set the differ factories.
    #[must_use]
    pub fn with_differs(mut self, differs: Rc<Differs>) -> Self {
        self.differs = differs;
        self
    }

    /// Detector id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Compiled records.
    #[must_use]
    pub fn records(&self) -> &ProtoRecords {
        &self.records
    }

    /// A dehydrated detector reporting to `dispatcher`.
    pub fn instantiate(&self, dispatcher: Rc<dyn ChangeDispatcher>) -> ChangeDetector {
        ChangeDetector {
            inner: Rc::new(Inner {
                id: Rc::clone(&self.id),
                records: self.records.shared(),
                dispatcher,
                pipes: Rc::clone(&self.pipes),
                differs: Rc::clone(&self.differs),
                strategy: self.strategy,
                mode: Cell::new(self.strategy.initial_mode()),
                evaluating: Cell::new(false),
                parent: RefCell::new(Weak::new()),
                children: RefCell::new(Vec::new()),
                state: RefCell::new(State::default()),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

#[derive(Default)]
struct State {
    context: Option<Value>,
    locals: Option<Rc<Locals>>,
    /// Stored value per record; `None` until first evaluated.
    values: Vec<Option<Value>>,
    pipes: Vec<Option<Box<dyn Pipe>>>,
    differs: Vec<Option<Box<dyn Differ>>>,
    /// The last detection pass aborted; operand change flags from it are lost.
    interrupted: bool,
}

struct Inner {
    id: Rc<str>,
    records: Rc<[ProtoRecord]>,
    dispatcher: Rc<dyn ChangeDispatcher>,
    pipes: Rc<PipeRegistry>,
    differs: Rc<Differs>,
    strategy: ChangeDetectionStrategy,
    mode: Cell<DetectionMode>,
    evaluating: Cell<bool>,
    parent: RefCell<Weak<Inner>>,
    children: RefCell<Vec<ChangeDetector>>,
    state: RefCell<State>,
}

fn mark_path_to_root(start: &Rc<Inner>) {
    let mut current = Some(Rc::clone(start));
    while let Some(node) = current {
        match node.mode.get() {
            DetectionMode::Detached => break,
            DetectionMode::Checked => node.mode.set(DetectionMode::CheckOnce),
            DetectionMode::CheckAlways | DetectionMode::CheckOnce => {}
        }
        current = node.parent.borrow().upgrade();
    }
}

fn read(
    record: &ProtoRecord,
    receiver: &Value,
    locals: Option<&Locals>,
    name: &str,
) -> Result<Value, EvalError> {
    if record.implicit_receiver {
        eval::read_implicit(receiver, locals, name)
    } else {
        eval::read_property(receiver, name)
    }
}

/// Clears the evaluating flag on drop.
struct EvaluatingGuard<'a> {
    flag: &'a Cell<bool>,
}

impl<'a> EvaluatingGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self { flag }
    }
}

impl Drop for EvaluatingGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

/// How a computed value is compared with the stored one.
#[derive(Clone, Copy)]
enum Verdict {
    /// Changed unless loosely identical.
    Compare,
    Changed,
    /// Store silently.
    Unchanged,
}

enum Step {
    /// Stored value still current.
    Skip,
    Computed {
        value: Value,
        verdict: Verdict,
        collection: Option<Rc<CollectionChanges>>,
    },
}

impl Step {
    fn compare(value: Value) -> Self {
        Self::Computed {
            value,
            verdict: Verdict::Compare,
            collection: None,
        }
    }
}

/// A live detector. Clones share the same detector.
#[derive(Clone)]
pub struct ChangeDetector {
    inner: Rc<Inner>,
}

impl ChangeDetector {
    /// Detector id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Current mode.
    #[must_use]
    pub fn mode(&self) -> DetectionMode {
        self.inner.mode.get()
    }

    /// Hydration strategy.
    #[must_use]
    pub fn strategy(&self) -> ChangeDetectionStrategy {
        self.inner.strategy
    }

    /// Weak handle for pipes and application code.
    #[must_use]
    pub fn change_detector_ref(&self) -> ChangeDetectorRef {
        ChangeDetectorRef {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Whether both handles point to the same detector.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // -- hydration ---------------------------------------------------------

    /// Attach `context` and `locals`, forgetting every stored value.
    ///
    /// A hydrated detector is dehydrated first. The mode is reset from the
    /// strategy.
    pub fn hydrate(
        &self,
        context: Value,
        locals: Option<Rc<Locals>>,
    ) -> Result<(), ChangeDetectionError> {
        self.ensure_idle()?;
        if self.hydrated() {
            self.dehydrate()?;
        }
        let n = self.inner.records.len();
        {
            let mut state = self.inner.state.borrow_mut();
            state.context = Some(context);
            state.locals = locals;
            state.values = vec![None; n];
            state.pipes = std::iter::repeat_with(|| None).take(n).collect();
            state.differs = std::iter::repeat_with(|| None).take(n).collect();
            state.interrupted = false;
        }
        self.inner.mode.set(self.inner.strategy.initial_mode());
        Ok(())
    }

    /// Destroy pipes and differs and detach the context.
    pub fn dehydrate(&self) -> Result<(), ChangeDetectionError> {
        self.ensure_idle()?;
        let pipes: Vec<Box<dyn Pipe>> = {
            let mut state = self.inner.state.borrow_mut();
            state.context = None;
            state.locals = None;
            state.values.clear();
            state.differs.clear();
            state.interrupted = false;
            state.pipes.drain(..).flatten().collect()
        };
        for mut pipe in pipes {
            pipe.on_destroy();
        }
        Ok(())
    }

    /// Whether a context is attached.
    #[must_use]
    pub fn hydrated(&self) -> bool {
        self.inner.state.borrow().context.is_some()
    }

    /// Attached context.
    #[must_use]
    pub fn context(&self) -> Option<Value> {
        self.inner.state.borrow().context.clone()
    }

    // -- tree --------------------------------------------------------------

    /// Append `child`; it is checked after this detector's records.
    pub fn add_child(&self, child: ChangeDetector) {
        *child.inner.parent.borrow_mut() = Rc::downgrade(&self.inner);
        self.inner.children.borrow_mut().push(child);
    }

    /// Remove `child`. Returns `false` when it is not a child.
    pub fn remove_child(&self, child: &ChangeDetector) -> bool {
        let mut children = self.inner.children.borrow_mut();
        match children.iter().position(|c| c.ptr_eq(child)) {
            Some(index) => {
                let removed = children.remove(index);
                *removed.inner.parent.borrow_mut() = Weak::new();
                true
            }
            None => false,
        }
    }

    /// Children in registration order.
    #[must_use]
    pub fn children(&self) -> Vec<ChangeDetector> {
        self.inner.children.borrow().clone()
    }

    /// Parent detector, if attached to one.
    #[must_use]
    pub fn parent(&self) -> Option<ChangeDetector> {
        self.inner
            .parent
            .borrow()
            .upgrade()
            .map(|inner| ChangeDetector { inner })
    }

    /// Promote `Checked` detectors from here to the root back to `CheckOnce`,
    /// stopping at a `Detached` one.
    pub fn mark_path_to_root_as_check_once(&self) {
        mark_path_to_root(&self.inner);
    }

    // -- detection ---------------------------------------------------------

    /// Evaluate records, dispatch dirty groups, then recurse into children.
    pub fn detect_changes(&self) -> Result<(), ChangeDetectionError> {
        self.run(false)
    }

    /// Re-evaluate without storing or dispatching; fail on the first changed
    /// binding.
    pub fn check_no_changes(&self) -> Result<(), ChangeDetectionError> {
        self.run(true)
    }

    fn run(&self, check: bool) -> Result<(), ChangeDetectionError> {
        if matches!(
            self.inner.mode.get(),
            DetectionMode::Checked | DetectionMode::Detached
        ) {
            return Ok(());
        }

        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!(
            "detect_changes",
            detector = %self.inner.id,
            check,
            records = self.inner.records.len()
        )
        .entered();

        self.run_records(check)?;
        let children = self.children();
        for child in &children {
            child.run(check)?;
        }
        if !check && self.inner.mode.get() == DetectionMode::CheckOnce {
            self.inner.mode.set(DetectionMode::Checked);
        }
        Ok(())
    }

    fn ensure_idle(&self) -> Result<(), ChangeDetectionError> {
        if self.inner.evaluating.get() {
            return Err(ChangeDetectionError::Reentrant {
                detector: self.inner.id.to_string(),
            });
        }
        Ok(())
    }

    fn run_records(&self, check: bool) -> Result<(), ChangeDetectionError> {
        self.ensure_idle()?;
        let (context, locals, interrupted) = {
            let state = self.inner.state.borrow();
            match &state.context {
                Some(context) => (context.clone(), state.locals.clone(), state.interrupted),
                None => {
                    return Err(ChangeDetectionError::Dehydrated {
                        detector: self.inner.id.to_string(),
                    });
                }
            }
        };
        let _guard = EvaluatingGuard::enter(&self.inner.evaluating);

        let result = self.run_pass(check, &context, locals.as_deref(), interrupted);
        if !check {
            self.inner.state.borrow_mut().interrupted = result.is_err();
        }
        result
    }

    /// One pass over the records. After an aborted pass some operands are
    /// stored without their pure dependents, so every pure record is
    /// recomputed once (`recompute_pure`).
    fn run_pass(
        &self,
        check: bool,
        context: &Value,
        locals: Option<&Locals>,
        recompute_pure: bool,
    ) -> Result<(), ChangeDetectionError> {
        let records = Rc::clone(&self.inner.records);
        let mut current: Vec<Value> = Vec::with_capacity(records.len());
        let mut changed = vec![false; records.len()];
        let mut pending: Vec<ChangeRecord> = Vec::new();

        for (index, record) in records.iter().enumerate() {
            let previous = self.stored(index);
            let fresh = previous.is_none()
                || recompute_pure
                || !record.kind.is_pure()
                || record.operands.iter().any(|&o| changed[o]);
            let step = if fresh {
                self.evaluate(index, record, context, locals, &current, check)?
            } else {
                Step::Skip
            };

            match step {
                Step::Skip => current.push(previous.unwrap_or_default()),
                Step::Computed {
                    value,
                    verdict,
                    collection,
                } => {
                    let is_change = match verdict {
                        Verdict::Changed => true,
                        Verdict::Unchanged => false,
                        Verdict::Compare => previous
                            .as_ref()
                            .is_none_or(|p| !loose_identical(p, &value)),
                    };
                    if is_change {
                        changed[index] = true;
                        if let Some(memo) = &record.binding_memo {
                            if check {
                                return Err(ChangeDetectionError::ExpressionChanged {
                                    expression: record.expression.to_string(),
                                    location: record.location.as_deref().map(str::to_string),
                                    previous,
                                    current: value,
                                });
                            }
                            pending.push(ChangeRecord {
                                binding_memo: Rc::clone(memo),
                                previous,
                                current: value.clone(),
                                collection,
                            });
                        }
                    }
                    if !check && (is_change || matches!(verdict, Verdict::Unchanged)) {
                        self.store(index, value.clone());
                    }
                    current.push(value);
                }
            }

            if record.last_in_group && !pending.is_empty() {
                let changes = std::mem::take(&mut pending);
                #[cfg(feature = "tracing")]
                tracing::trace!(
                    detector = %self.inner.id,
                    group = %record.group,
                    changes = changes.len(),
                    "dispatching group"
                );
                self.inner.dispatcher.on_record_change(&record.group, &changes);
            }
        }
        Ok(())
    }

    fn stored(&self, index: usize) -> Option<Value> {
        self.inner.state.borrow().values.get(index).cloned().flatten()
    }

    fn store(&self, index: usize, value: Value) {
        if let Some(slot) = self.inner.state.borrow_mut().values.get_mut(index) {
            *slot = Some(value);
        }
    }

    fn evaluate(
        &self,
        index: usize,
        record: &ProtoRecord,
        context: &Value,
        locals: Option<&Locals>,
        current: &[Value],
        check: bool,
    ) -> Result<Step, ChangeDetectionError> {
        let operands: SmallVec<[Value; 4]> =
            record.operands.iter().map(|&o| current[o].clone()).collect();
        let failed = |err: EvalError| ChangeDetectionError::Evaluation {
            expression: record.expression.to_string(),
            location: record.location.as_deref().map(str::to_string),
            message: err.message().to_string(),
        };

        let value = match &record.kind {
            RecordKind::Context => context.clone(),
            RecordKind::Const(value) => value.clone(),
            RecordKind::PropertyRead { name } => {
                read(record, &operands[0], locals, name).map_err(failed)?
            }
            RecordKind::SafePropertyRead { name } => {
                if operands[0].is_null() {
                    Value::Null
                } else {
                    read(record, &operands[0], locals, name).map_err(failed)?
                }
            }
            RecordKind::KeyedRead => eval::read_keyed(&operands[0], &operands[1]).map_err(failed)?,
            RecordKind::MethodCall { name, safe } => {
                let receiver = &operands[0];
                let args = &operands[1..];
                let local = record
                    .implicit_receiver
                    .then(|| locals.and_then(|l| l.get(name)))
                    .flatten();
                let result = match local {
                    Some(function) => eval::invoke(&function, &Value::Null, args),
                    None if *safe && receiver.is_null() => Ok(Value::Null),
                    None => eval::call_method(receiver, name, args),
                };
                result.map_err(failed)?
            }
            RecordKind::FunctionCall => {
                eval::invoke(&operands[0], &Value::Null, &operands[1..]).map_err(failed)?
            }
            RecordKind::Unary(op) => eval::unary(*op, &operands[0]).map_err(failed)?,
            RecordKind::Binary(op) => {
                eval::binary(*op, &operands[0], &operands[1]).map_err(failed)?
            }
            RecordKind::Conditional => eval::conditional(&operands[0], &operands[1], &operands[2]),
            RecordKind::LiteralArray => Value::list(operands.iter().cloned()),
            RecordKind::LiteralMap { keys } => eval::literal_map(keys, &operands),
            RecordKind::Interpolation { strings } => eval::interpolate(strings, &operands),
            RecordKind::Pipe { name } => {
                return self.apply_pipe(index, record, name, &operands, check);
            }
            RecordKind::CollectionWatch => {
                return self.watch_collection(index, operands[0].clone());
            }
        };
        Ok(Step::compare(value))
    }

    fn apply_pipe(
        &self,
        index: usize,
        record: &ProtoRecord,
        name: &str,
        operands: &[Value],
        check: bool,
    ) -> Result<Step, ChangeDetectionError> {
        let value = &operands[0];
        let existing = self
            .inner
            .state
            .borrow_mut()
            .pipes
            .get_mut(index)
            .and_then(Option::take);
        let mut pipe = match existing {
            Some(pipe) if pipe.supports(value) => pipe,
            stale => {
                if let Some(mut old) = stale {
                    old.on_destroy();
                }
                self.inner
                    .pipes
                    .get(name, value, self.change_detector_ref())?
            }
        };
        let result = pipe.transform(value, &operands[1..]);
        if let Some(slot) = self.inner.state.borrow_mut().pipes.get_mut(index) {
            *slot = Some(pipe);
        }

        let transformed = result.map_err(|err| ChangeDetectionError::Evaluation {
            expression: record.expression.to_string(),
            location: record.location.as_deref().map(str::to_string),
            message: err.to_string(),
        })?;
        Ok(match transformed {
            Transformed::Value(value) => Step::compare(value),
            Transformed::Wrapped(value) => Step::Computed {
                value,
                verdict: if check {
                    Verdict::Compare
                } else {
                    Verdict::Changed
                },
                collection: None,
            },
            Transformed::NoChange => Step::Skip,
        })
    }

    fn watch_collection(&self, index: usize, value: Value) -> Result<Step, ChangeDetectionError> {
        let existing = self
            .inner
            .state
            .borrow_mut()
            .differs
            .get_mut(index)
            .and_then(Option::take);
        let mut differ = match existing {
            Some(differ) if value.is_null() || differ.supports(&value) => Some(differ),
            _ if value.is_null() => None,
            _ => Some(self.inner.differs.find(&value)?.create()),
        };
        let result = match differ.as_mut() {
            Some(differ) => differ.diff(&value),
            None => Ok(None),
        };
        let has_differ = differ.is_some();
        if let Some(slot) = self.inner.state.borrow_mut().differs.get_mut(index) {
            *slot = differ;
        }

        let changes = result?;
        let first = self.stored(index).is_none();
        let verdict = if changes.is_some() || first {
            Verdict::Changed
        } else if has_differ {
            Verdict::Unchanged
        } else {
            Verdict::Compare
        };
        Ok(Step::Computed {
            value,
            verdict,
            collection: changes.map(Rc::new),
        })
    }
}

impl core::fmt::Debug for ChangeDetector {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChangeDetector")
            .field("id", &self.inner.id)
            .field("mode", &self.inner.mode.get())
            .field("hydrated", &self.hydrated())
            .field("children", &self.inner.children.borrow().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Detector ref
// ---------------------------------------------------------------------------

/// Weak handle to a detector, handed to pipes.
///
/// Every operation is a no-op once the detector is dropped.
#[derive(Clone)]
pub struct ChangeDetectorRef {
    inner: Weak<Inner>,
}

impl ChangeDetectorRef {
    /// A handle attached to no detector.
    #[must_use]
    pub fn detached() -> Self {
        Self { inner: Weak::new() }
    }

    /// The detector, while it is alive.
    #[must_use]
    pub fn detector(&self) -> Option<ChangeDetector> {
        self.inner.upgrade().map(|inner| ChangeDetector { inner })
    }

    /// Schedule the detector and its `Checked` ancestors for the next pass.
    pub fn mark_for_check(&self) {
        if let Some(inner) = self.inner.upgrade() {
            mark_path_to_root(&inner);
        }
    }

    /// Stop checking the detector and its subtree.
    pub fn detach(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.mode.set(DetectionMode::Detached);
        }
    }

    /// Resume checking on every pass and mark the path to the root.
    pub fn reattach(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.mode.set(DetectionMode::CheckAlways);
            mark_path_to_root(&inner);
        }
    }
}

impl core::fmt::Debug for ChangeDetectorRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.inner.upgrade() {
            Some(inner) => f.debug_tuple("ChangeDetectorRef").field(&inner.id).finish(),
            None => f.write_str("ChangeDetectorRef(<dropped>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Ast, BinaryOp};
    use crate::proto::ProtoRecordBuilder;

    type Log = Rc<RefCell<Vec<String>>>;

    fn detector(bindings: &[(&str, Ast)]) -> (ChangeDetector, Log) {
        let mut builder = ProtoRecordBuilder::new();
        for (memo, ast) in bindings {
            builder.add(ast, *memo, "g").unwrap();
        }
        let log: Log = Rc::default();
        let sink = Rc::clone(&log);
        let dispatcher = move |_: &Memo, records: &[ChangeRecord]| {
            sink.borrow_mut()
                .extend(records.iter().map(ToString::to_string));
        };
        let cd = ProtoChangeDetector::new("test", builder.build()).instantiate(Rc::new(dispatcher));
        (cd, log)
    }

    fn drain(log: &Log) -> Vec<String> {
        std::mem::take(&mut *log.borrow_mut())
    }

    // ── Evaluation ─────────────────────────────────────────────────────

    #[test]
    fn operators_and_interpolation() {
        let (cd, log) = detector(&[
            ("sum", Ast::binary(BinaryOp::Add, Ast::prop("a"), Ast::literal(1))),
            (
                "greeting",
                Ast::interpolation(["Hi ", "!"], vec![Ast::prop("name")]),
            ),
        ]);
        let ctx = Value::object([("a", Value::from(2)), ("name", Value::from("Ada"))]);
        cd.hydrate(ctx, None).unwrap();
        cd.detect_changes().unwrap();
        assert_eq!(drain(&log), ["sum=3", "greeting=Hi Ada!"]);
    }

    #[test]
    fn literal_arrays_keep_their_identity_while_operands_are_stable() {
        let (cd, log) = detector(&[("items", Ast::array(vec![Ast::prop("a")]))]);
        let ctx = Value::object([("a", Value::from(1))]);
        cd.hydrate(ctx.clone(), None).unwrap();
        cd.detect_changes().unwrap();
        cd.detect_changes().unwrap();
        assert_eq!(drain(&log), ["items=[1]"]);

        ctx.set_property("a", 2);
        cd.detect_changes().unwrap();
        assert_eq!(drain(&log), ["items=[2]"]);
    }

    #[test]
    fn safe_navigation_yields_null() {
        let (cd, log) = detector(&[
            ("name", Ast::prop("user").safe_dot("name")),
            ("upper", Ast::prop("user").safe_method("shout", vec![])),
        ]);
        cd.hydrate(Value::object([("user", Value::Null)]), None).unwrap();
        cd.detect_changes().unwrap();
        assert_eq!(drain(&log), ["name=null", "upper=null"]);
    }

    #[test]
    fn evaluation_errors_name_the_expression() {
        let (cd, _log) = detector(&[("b", Ast::prop("a").dot("b"))]);
        cd.hydrate(Value::object([("a", Value::Null)]), None).unwrap();
        let err = cd.detect_changes().unwrap_err();
        let ChangeDetectionError::Evaluation { expression, .. } = &err else {
            panic!("unexpected {err:?}");
        };
        assert_eq!(expression, "a.b");
    }

    // ── Hydration ──────────────────────────────────────────────────────

    #[test]
    fn detecting_while_dehydrated_fails() {
        let (cd, _log) = detector(&[("a", Ast::prop("a"))]);
        assert!(!cd.hydrated());
        assert!(matches!(
            cd.detect_changes(),
            Err(ChangeDetectionError::Dehydrated { .. })
        ));
        cd.hydrate(Value::object([("a", Value::Null)]), None).unwrap();
        cd.dehydrate().unwrap();
        assert!(matches!(
            cd.detect_changes(),
            Err(ChangeDetectionError::Dehydrated { .. })
        ));
    }

    #[test]
    fn rehydration_reports_everything_again() {
        let (cd, log) = detector(&[("a", Ast::prop("a"))]);
        let ctx = Value::object([("a", Value::from(1))]);
        cd.hydrate(ctx.clone(), None).unwrap();
        cd.detect_changes().unwrap();
        cd.hydrate(ctx, None).unwrap();
        cd.detect_changes().unwrap();
        assert_eq!(drain(&log), ["a=1", "a=1"]);
    }

    #[test]
    fn reentering_the_same_detector_is_rejected() {
        let slot: Rc<RefCell<Option<ChangeDetector>>> = Rc::default();
        let inner = Rc::clone(&slot);
        let poke = Value::function("poke", move |_, _| {
            match inner.borrow().as_ref().map(ChangeDetector::detect_changes) {
                Some(Err(err)) => Err(err.to_string().into()),
                _ => Ok(Value::Null),
            }
        });
        let (cd, _log) = detector(&[("p", Ast::ImplicitReceiver.method("poke", vec![]))]);
        *slot.borrow_mut() = Some(cd.clone());
        cd.hydrate(Value::object([("poke", poke)]), None).unwrap();

        let err = cd.detect_changes().unwrap_err();
        assert!(err.to_string().contains("re-entered"), "{err}");
        slot.borrow_mut().take();
    }

    // ── Modes ──────────────────────────────────────────────────────────

    #[test]
    fn detector_ref_detach_and_reattach() {
        let (cd, log) = detector(&[("a", Ast::prop("a"))]);
        let ctx = Value::object([("a", Value::from(1))]);
        cd.hydrate(ctx.clone(), None).unwrap();
        let cd_ref = cd.change_detector_ref();

        cd_ref.detach();
        cd.detect_changes().unwrap();
        assert!(drain(&log).is_empty());

        cd_ref.reattach();
        assert_eq!(cd.mode(), DetectionMode::CheckAlways);
        cd.detect_changes().unwrap();
        assert_eq!(drain(&log), ["a=1"]);
    }

    #[test]
    fn dropped_detector_refs_are_inert() {
        let (cd, _log) = detector(&[]);
        let cd_ref = cd.change_detector_ref();
        drop(cd);
        assert!(cd_ref.detector().is_none());
        cd_ref.mark_for_check();
        ChangeDetectorRef::detached().reattach();
    }

    #[test]
    fn children_are_tracked_with_their_parent() {
        let (parent, _) = detector(&[]);
        let (child, _) = detector(&[]);
        parent.add_child(child.clone());
        assert!(child.parent().is_some_and(|p| p.ptr_eq(&parent)));
        assert!(parent.remove_child(&child));
        assert!(child.parent().is_none());
        assert!(!parent.remove_child(&child));
    }
}
