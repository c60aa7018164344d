//! End-to-end detector behavior: dispatch, modes, hydration, pipes and
//! structural bindings.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use viewcore_detect::{
    Ast, BinaryOp, ChangeDetectionError, ChangeDetectionStrategy, ChangeDetector,
    ChangeDetectorRef, ChangeDispatcher, ChangeRecord, CompileError, DetectionMode, Locals, Memo,
    Pipe, PipeFactory, PipeRegistry, ProtoChangeDetector, ProtoRecordBuilder, Transformed, Value,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LoggingDispatcher {
    log: RefCell<Vec<String>>,
    groups: RefCell<Vec<String>>,
    records: RefCell<Vec<ChangeRecord>>,
}

impl LoggingDispatcher {
    fn take_log(&self) -> Vec<String> {
        std::mem::take(&mut *self.log.borrow_mut())
    }
}

impl ChangeDispatcher for LoggingDispatcher {
    fn on_record_change(&self, group: &Memo, records: &[ChangeRecord]) {
        self.groups.borrow_mut().push(group.to_string());
        self.log
            .borrow_mut()
            .extend(records.iter().map(ToString::to_string));
        self.records.borrow_mut().extend_from_slice(records);
    }
}

fn create(
    bindings: &[(&str, Ast)],
    strategy: ChangeDetectionStrategy,
    pipes: PipeRegistry,
) -> (ChangeDetector, Rc<LoggingDispatcher>) {
    let mut builder = ProtoRecordBuilder::new();
    for (memo, ast) in bindings {
        builder.add(ast, *memo, *memo).unwrap();
    }
    let dispatcher = Rc::new(LoggingDispatcher::default());
    let detector = ProtoChangeDetector::new("Cmp", builder.build())
        .with_strategy(strategy)
        .with_pipes(Rc::new(pipes))
        .instantiate(dispatcher.clone());
    (detector, dispatcher)
}

fn simple(memo: &str, ast: Ast) -> (ChangeDetector, Rc<LoggingDispatcher>) {
    create(
        &[(memo, ast)],
        ChangeDetectionStrategy::Default,
        PipeRegistry::new(),
    )
}

fn person(name: &str) -> Value {
    Value::object([("name", Value::from(name))])
}

// ── Dispatch ───────────────────────────────────────────────────────────

#[test]
fn reports_initial_value_then_nothing_then_the_mutation() {
    let (cd, dispatcher) = simple("name", Ast::prop("name"));
    let ctx = person("misko");
    cd.hydrate(ctx.clone(), None).unwrap();

    cd.detect_changes().unwrap();
    assert_eq!(dispatcher.take_log(), ["name=misko"]);

    cd.detect_changes().unwrap();
    assert!(dispatcher.take_log().is_empty());

    ctx.set_property("name", "Misko");
    cd.detect_changes().unwrap();
    assert_eq!(dispatcher.take_log(), ["name=Misko"]);
}

#[test]
fn null_counts_as_a_change_on_the_first_pass() {
    let (cd, dispatcher) = simple("a", Ast::prop("a"));
    cd.hydrate(Value::object([("a", Value::Null)]), None).unwrap();
    cd.detect_changes().unwrap();
    assert_eq!(dispatcher.take_log(), ["a=null"]);
    assert!(dispatcher.records.borrow()[0].previous.is_none());
}

#[test]
fn nan_is_stable_across_passes() {
    let (cd, dispatcher) = create(
        &[
            ("x", Ast::prop("x")),
            (
                "q",
                Ast::binary(BinaryOp::Div, Ast::prop("zero"), Ast::prop("zero")),
            ),
        ],
        ChangeDetectionStrategy::Default,
        PipeRegistry::new(),
    );
    let ctx = Value::object([("x", Value::Number(f64::NAN)), ("zero", Value::from(0))]);
    cd.hydrate(ctx.clone(), None).unwrap();
    cd.detect_changes().unwrap();
    assert_eq!(dispatcher.take_log(), ["x=NaN", "q=NaN"]);

    ctx.set_property("x", f64::NAN);
    cd.detect_changes().unwrap();
    assert!(dispatcher.take_log().is_empty());
}

#[test]
fn each_dirty_group_is_dispatched_once_in_order() {
    let mut builder = ProtoRecordBuilder::new();
    builder.add(&Ast::prop("a"), "a", "first").unwrap();
    builder.add(&Ast::prop("b"), "b", "first").unwrap();
    builder.add(&Ast::prop("c"), "c", "second").unwrap();
    let dispatcher = Rc::new(LoggingDispatcher::default());
    let cd = ProtoChangeDetector::new("Cmp", builder.build()).instantiate(dispatcher.clone());

    let ctx = Value::object([
        ("a", Value::from(1)),
        ("b", Value::from(2)),
        ("c", Value::from(3)),
    ]);
    cd.hydrate(ctx.clone(), None).unwrap();
    cd.detect_changes().unwrap();
    assert_eq!(*dispatcher.groups.borrow(), ["first", "second"]);
    assert_eq!(dispatcher.take_log(), ["a=1", "b=2", "c=3"]);

    ctx.set_property("c", 30);
    cd.detect_changes().unwrap();
    assert_eq!(*dispatcher.groups.borrow(), ["first", "second", "second"]);
    assert_eq!(dispatcher.take_log(), ["c=30"]);
}

#[test]
fn previous_values_are_reported() {
    let (cd, dispatcher) = simple("n", Ast::prop("n"));
    let ctx = Value::object([("n", Value::from(1))]);
    cd.hydrate(ctx.clone(), None).unwrap();
    cd.detect_changes().unwrap();
    ctx.set_property("n", 2);
    cd.detect_changes().unwrap();

    let records = dispatcher.records.borrow();
    assert_eq!(records[1].previous.as_ref().and_then(Value::as_number), Some(1.0));
    assert_eq!(records[1].current.as_number(), Some(2.0));
}

#[test]
fn dispatcher_may_call_back_into_the_detector() {
    let mut builder = ProtoRecordBuilder::new();
    builder.add(&Ast::prop("a"), "a", "g").unwrap();
    let target: Rc<RefCell<Option<ChangeDetectorRef>>> = Rc::default();
    let calls = Rc::new(Cell::new(0));
    let (t, c) = (Rc::clone(&target), Rc::clone(&calls));
    let cd = ProtoChangeDetector::new("Cmp", builder.build()).instantiate(Rc::new(
        move |_: &Memo, _: &[ChangeRecord]| {
            c.set(c.get() + 1);
            if let Some(cd_ref) = t.borrow().as_ref() {
                cd_ref.mark_for_check();
            }
        },
    ));
    *target.borrow_mut() = Some(cd.change_detector_ref());
    cd.hydrate(Value::object([("a", Value::from(1))]), None).unwrap();
    cd.detect_changes().unwrap();
    assert_eq!(calls.get(), 1);
}

// ── Compilation ────────────────────────────────────────────────────────

#[test]
fn ten_interpolated_expressions_do_not_compile() {
    let exprs = (0..10).map(|i| Ast::prop(format!("v{i}"))).collect();
    let mut builder = ProtoRecordBuilder::new();
    let err = builder
        .add(&Ast::interpolation(Vec::<&str>::new(), exprs), "text", "g")
        .unwrap_err();
    assert!(matches!(err, CompileError::TooManyInterpolations { count: 10 }));
    assert!(
        err.to_string()
            .contains("Does not support more than 9 expressions")
    );
}

// ── Modes ──────────────────────────────────────────────────────────────

#[test]
fn detached_and_checked_detectors_are_skipped() {
    let (cd, dispatcher) = simple("a", Ast::prop("a"));
    cd.hydrate(Value::object([("a", Value::from(1))]), None).unwrap();

    cd.change_detector_ref().detach();
    cd.detect_changes().unwrap();
    assert!(dispatcher.take_log().is_empty());
    assert_eq!(cd.mode(), DetectionMode::Detached);

    let (checked, dispatcher) = create(
        &[("a", Ast::prop("a"))],
        ChangeDetectionStrategy::OnPush,
        PipeRegistry::new(),
    );
    checked
        .hydrate(Value::object([("a", Value::from(1))]), None)
        .unwrap();
    checked.detect_changes().unwrap();
    assert_eq!(checked.mode(), DetectionMode::Checked);
    dispatcher.take_log();
    checked.detect_changes().unwrap();
    assert!(dispatcher.take_log().is_empty());
}

#[test]
fn on_push_runs_once_per_mark_for_check() {
    let (cd, dispatcher) = create(
        &[("a", Ast::prop("a"))],
        ChangeDetectionStrategy::OnPush,
        PipeRegistry::new(),
    );
    let ctx = Value::object([("a", Value::from(1))]);
    cd.hydrate(ctx.clone(), None).unwrap();
    assert_eq!(cd.mode(), DetectionMode::CheckOnce);

    cd.detect_changes().unwrap();
    assert_eq!(dispatcher.take_log(), ["a=1"]);

    ctx.set_property("a", 2);
    cd.detect_changes().unwrap();
    assert!(dispatcher.take_log().is_empty());

    cd.change_detector_ref().mark_for_check();
    cd.detect_changes().unwrap();
    assert_eq!(dispatcher.take_log(), ["a=2"]);
    assert_eq!(cd.mode(), DetectionMode::Checked);
}

#[test]
fn checked_parent_skips_its_children() {
    let (parent, _) = create(&[], ChangeDetectionStrategy::OnPush, PipeRegistry::new());
    let (child, dispatcher) = simple("a", Ast::prop("a"));
    parent.add_child(child.clone());
    parent.hydrate(Value::object::<&str>([]), None).unwrap();
    child
        .hydrate(Value::object([("a", Value::from(1))]), None)
        .unwrap();

    parent.detect_changes().unwrap();
    assert_eq!(dispatcher.take_log(), ["a=1"]);
    child.context().unwrap().set_property("a", 2);
    parent.detect_changes().unwrap();
    assert!(dispatcher.take_log().is_empty());

    child.mark_path_to_root_as_check_once();
    assert_eq!(parent.mode(), DetectionMode::CheckOnce);
    parent.detect_changes().unwrap();
    assert_eq!(dispatcher.take_log(), ["a=2"]);
}

#[test]
fn marking_the_path_stops_at_a_detached_ancestor() {
    let on_push = |bindings: &[(&str, Ast)]| {
        create(bindings, ChangeDetectionStrategy::OnPush, PipeRegistry::new()).0
    };
    let root = on_push(&[]);
    let middle = on_push(&[]);
    let leaf = on_push(&[]);
    root.add_child(middle.clone());
    middle.add_child(leaf.clone());
    for cd in [&root, &middle, &leaf] {
        cd.hydrate(Value::object::<&str>([]), None).unwrap();
    }
    root.detect_changes().unwrap();
    assert!(
        [&root, &middle, &leaf]
            .iter()
            .all(|cd| cd.mode() == DetectionMode::Checked)
    );

    middle.change_detector_ref().detach();
    leaf.mark_path_to_root_as_check_once();
    assert_eq!(leaf.mode(), DetectionMode::CheckOnce);
    assert_eq!(middle.mode(), DetectionMode::Detached);
    assert_eq!(root.mode(), DetectionMode::Checked);
}

#[test]
fn children_are_checked_in_registration_order() {
    let order = Rc::new(RefCell::new(Vec::new()));
    let make = |name: &'static str| {
        let mut builder = ProtoRecordBuilder::new();
        builder.add(&Ast::prop("v"), name, name).unwrap();
        let sink = Rc::clone(&order);
        let cd = ProtoChangeDetector::new(name, builder.build()).instantiate(Rc::new(
            move |group: &Memo, _: &[ChangeRecord]| sink.borrow_mut().push(group.to_string()),
        ));
        cd.hydrate(Value::object([("v", Value::from(1))]), None)
            .unwrap();
        cd
    };
    let root = make("root");
    let first = make("first");
    let second = make("second");
    root.add_child(first);
    root.add_child(second.clone());
    second.add_child(make("nested"));
    root.detect_changes().unwrap();
    assert_eq!(*order.borrow(), ["root", "first", "second", "nested"]);
}

// ── Dev-mode checks ────────────────────────────────────────────────────

#[test]
fn check_no_changes_names_the_unstable_expression() {
    let mut builder = ProtoRecordBuilder::new();
    builder
        .add_with_location(&Ast::prop("a").dot("b"), "ab", "g", "Cmp:12")
        .unwrap();
    let dispatcher = Rc::new(LoggingDispatcher::default());
    let cd = ProtoChangeDetector::new("Cmp", builder.build()).instantiate(dispatcher.clone());
    let inner = Value::object([("b", Value::from(1))]);
    cd.hydrate(Value::object([("a", inner.clone())]), None)
        .unwrap();
    cd.detect_changes().unwrap();
    cd.check_no_changes().unwrap();

    inner.set_property("b", 2);
    let err = cd.check_no_changes().unwrap_err();
    assert_eq!(
        err.to_string(),
        "Expression 'a.b' in [Cmp:12] has changed after it was checked. \
         Previous value: '1'. Current value: '2'"
    );
    dispatcher.take_log();

    // Checking neither stores nor dispatches.
    cd.detect_changes().unwrap();
    assert_eq!(dispatcher.take_log(), ["ab=2"]);
}

#[test]
fn detecting_a_dehydrated_detector_is_an_error() {
    let (cd, _) = simple("a", Ast::prop("a"));
    let err = cd.detect_changes().unwrap_err();
    assert!(matches!(err, ChangeDetectionError::Dehydrated { ref detector } if detector == "Cmp"));
}

#[test]
fn errors_abort_without_rolling_back_earlier_records() {
    let (cd, dispatcher) = create(
        &[("ok", Ast::prop("ok")), ("bad", Ast::prop("missing").dot("x"))],
        ChangeDetectionStrategy::Default,
        PipeRegistry::new(),
    );
    let ctx = Value::object([("ok", Value::from(1)), ("missing", Value::Null)]);
    cd.hydrate(ctx.clone(), None).unwrap();
    assert!(matches!(
        cd.detect_changes(),
        Err(ChangeDetectionError::Evaluation { .. })
    ));
    assert_eq!(dispatcher.take_log(), ["ok=1"]);

    ctx.set_property("missing", Value::object([("x", Value::from(5))]));
    cd.detect_changes().unwrap();
    assert_eq!(dispatcher.take_log(), ["bad=5"]);
}

#[test]
fn pure_bindings_recover_after_an_aborted_pass() {
    let (cd, dispatcher) = simple(
        "sum",
        Ast::binary(BinaryOp::Add, Ast::prop("a"), Ast::prop("b").dot("c")),
    );
    let ctx = Value::object([
        ("a", Value::from(1)),
        ("b", Value::object([("c", Value::from(1))])),
    ]);
    cd.hydrate(ctx.clone(), None).unwrap();
    cd.detect_changes().unwrap();
    assert_eq!(dispatcher.take_log(), ["sum=2"]);

    // `a` is stored before `b.c` fails.
    ctx.set_property("a", 5);
    ctx.set_property("b", Value::Null);
    assert!(matches!(
        cd.detect_changes(),
        Err(ChangeDetectionError::Evaluation { .. })
    ));
    assert!(dispatcher.take_log().is_empty());

    ctx.set_property("b", Value::object([("c", Value::from(1))]));
    cd.check_no_changes().unwrap_err();
    cd.detect_changes().unwrap();
    cd.detect_changes().unwrap();
    assert_eq!(dispatcher.take_log(), ["sum=6"]);
    cd.check_no_changes().unwrap();
}

// ── Locals ─────────────────────────────────────────────────────────────

#[test]
fn locals_shadow_the_context() {
    let (cd, dispatcher) = create(
        &[
            ("item", Ast::prop("item")),
            ("title", Ast::prop("title")),
            (
                "label",
                Ast::ImplicitReceiver.method("describe", vec![Ast::prop("item")]),
            ),
        ],
        ChangeDetectionStrategy::Default,
        PipeRegistry::new(),
    );
    let outer = Rc::new(Locals::with_values(
        None,
        [(
            "describe",
            Value::function("describe", |_, args| {
                Ok(Value::from(format!("#{}", args[0])))
            }),
        )],
    ));
    let locals = Rc::new(Locals::with_values(
        Some(outer),
        [("item", Value::from("local"))],
    ));
    let ctx = Value::object([("item", Value::from("ctx")), ("title", Value::from("T"))]);
    cd.hydrate(ctx, Some(Rc::clone(&locals))).unwrap();
    cd.detect_changes().unwrap();
    assert_eq!(dispatcher.take_log(), ["item=local", "title=T", "label=#local"]);

    locals.set("item", "next");
    cd.detect_changes().unwrap();
    assert_eq!(dispatcher.take_log(), ["item=next", "label=#next"]);
}

// ── Pipes ──────────────────────────────────────────────────────────────

struct Tracked {
    created: Rc<Cell<usize>>,
    destroyed: Rc<Cell<usize>>,
    kind: &'static str,
}

struct TrackedPipe {
    destroyed: Rc<Cell<usize>>,
    kind: &'static str,
}

impl Pipe for TrackedPipe {
    fn supports(&self, value: &Value) -> bool {
        value.type_name() == self.kind
    }

    fn transform(&mut self, value: &Value, _args: &[Value]) -> Result<Transformed, viewcore_detect::BoxError> {
        Ok(Transformed::Value(Value::from(format!("{}:{value}", self.kind))))
    }

    fn on_destroy(&mut self) {
        self.destroyed.set(self.destroyed.get() + 1);
    }
}

impl PipeFactory for Tracked {
    fn supports(&self, value: &Value) -> bool {
        value.type_name() == self.kind
    }

    fn create(&self, _cd_ref: ChangeDetectorRef) -> Box<dyn Pipe> {
        self.created.set(self.created.get() + 1);
        Box::new(TrackedPipe {
            destroyed: Rc::clone(&self.destroyed),
            kind: self.kind,
        })
    }
}

#[test]
fn pipes_are_replaced_when_unsupported_and_destroyed_on_dehydrate() {
    let created = Rc::new(Cell::new(0));
    let destroyed = Rc::new(Cell::new(0));
    let factory = |kind| Tracked {
        created: Rc::clone(&created),
        destroyed: Rc::clone(&destroyed),
        kind,
    };
    let pipes = PipeRegistry::new()
        .with("show", factory("number"))
        .with("show", factory("string"));
    let (cd, dispatcher) = create(
        &[("v", Ast::prop("v").pipe("show", vec![]))],
        ChangeDetectionStrategy::Default,
        pipes,
    );
    let ctx = Value::object([("v", Value::from(1))]);
    cd.hydrate(ctx.clone(), None).unwrap();
    cd.detect_changes().unwrap();
    cd.detect_changes().unwrap();
    assert_eq!(created.get(), 1);

    ctx.set_property("v", "x");
    cd.detect_changes().unwrap();
    assert_eq!((created.get(), destroyed.get()), (2, 1));
    assert_eq!(dispatcher.take_log(), ["v=number:1", "v=string:x"]);

    cd.dehydrate().unwrap();
    assert_eq!(destroyed.get(), 2);
    assert!(!cd.hydrated());
}

#[test]
fn unknown_pipes_fail_detection() {
    let (cd, _) = simple("v", Ast::prop("v").pipe("nope", vec![]));
    cd.hydrate(Value::object([("v", Value::from(1))]), None)
        .unwrap();
    assert!(matches!(
        cd.detect_changes(),
        Err(ChangeDetectionError::PipeNotFound { ref name, .. }) if name == "nope"
    ));
}

struct Always;

impl Pipe for Always {
    fn supports(&self, _: &Value) -> bool {
        true
    }

    fn transform(&mut self, value: &Value, _: &[Value]) -> Result<Transformed, viewcore_detect::BoxError> {
        Ok(Transformed::Wrapped(value.clone()))
    }
}

impl PipeFactory for Always {
    fn supports(&self, _: &Value) -> bool {
        true
    }

    fn create(&self, _: ChangeDetectorRef) -> Box<dyn Pipe> {
        Box::new(Always)
    }
}

/// Holds its first input back: answers `NoChange` once, then passes values
/// through.
#[derive(Default)]
struct Deferred {
    primed: bool,
}

impl Pipe for Deferred {
    fn supports(&self, _: &Value) -> bool {
        true
    }

    fn transform(&mut self, value: &Value, _: &[Value]) -> Result<Transformed, viewcore_detect::BoxError> {
        if std::mem::replace(&mut self.primed, true) {
            Ok(Transformed::Value(value.clone()))
        } else {
            Ok(Transformed::NoChange)
        }
    }
}

struct DeferredFactory;

impl PipeFactory for DeferredFactory {
    fn supports(&self, _: &Value) -> bool {
        true
    }

    fn create(&self, _: ChangeDetectorRef) -> Box<dyn Pipe> {
        Box::new(Deferred::default())
    }
}

#[test]
fn pure_records_over_a_held_back_pipe_catch_up() {
    let (cd, dispatcher) = create(
        &[(
            "r",
            Ast::binary(
                BinaryOp::Add,
                Ast::prop("v").pipe("deferred", vec![]),
                Ast::literal("!"),
            ),
        )],
        ChangeDetectionStrategy::Default,
        PipeRegistry::new().with("deferred", DeferredFactory),
    );
    let ctx = Value::object([("v", Value::from("x"))]);
    cd.hydrate(ctx.clone(), None).unwrap();
    cd.detect_changes().unwrap();
    assert_eq!(dispatcher.take_log(), ["r=!"]);

    cd.detect_changes().unwrap();
    cd.detect_changes().unwrap();
    assert_eq!(dispatcher.take_log(), ["r=x!"]);

    ctx.set_property("v", "y");
    cd.detect_changes().unwrap();
    assert_eq!(dispatcher.take_log(), ["r=y!"]);
}

#[test]
fn wrapped_results_force_a_change_but_pass_the_stability_check() {
    let (cd, dispatcher) = create(
        &[("v", Ast::prop("v").pipe("always", vec![]))],
        ChangeDetectionStrategy::Default,
        PipeRegistry::new().with("always", Always),
    );
    cd.hydrate(Value::object([("v", Value::from(7))]), None)
        .unwrap();
    cd.detect_changes().unwrap();
    cd.detect_changes().unwrap();
    assert_eq!(dispatcher.take_log(), ["v=7", "v=7"]);
    cd.check_no_changes().unwrap();
}

// ── Structural bindings ────────────────────────────────────────────────

#[test]
fn structural_bindings_report_collection_changes() {
    let mut builder = ProtoRecordBuilder::new();
    builder
        .add_structural(&Ast::prop("items"), "items", "g")
        .unwrap();
    let dispatcher = Rc::new(LoggingDispatcher::default());
    let cd = ProtoChangeDetector::new("List", builder.build()).instantiate(dispatcher.clone());
    let items = Value::list([Value::from("a"), Value::from("b")]);
    cd.hydrate(Value::object([("items", items.clone())]), None)
        .unwrap();

    cd.detect_changes().unwrap();
    cd.detect_changes().unwrap();
    assert_eq!(dispatcher.records.borrow().len(), 1);

    items.as_list().unwrap().borrow_mut().remove(0);
    cd.detect_changes().unwrap();
    let records = dispatcher.records.borrow();
    assert_eq!(records.len(), 2);
    let changes = records[1]
        .collection
        .as_ref()
        .and_then(|c| c.as_iterable())
        .expect("iterable changes");
    assert_eq!(changes.removals.len(), 1);
    assert_eq!(changes.removals[0].item.as_str(), Some("a"));
}

#[test]
fn structural_bindings_over_scalars_fail() {
    let mut builder = ProtoRecordBuilder::new();
    builder.add_structural(&Ast::prop("v"), "v", "g").unwrap();
    let cd = ProtoChangeDetector::new("List", builder.build())
        .instantiate(Rc::new(LoggingDispatcher::default()));
    cd.hydrate(Value::object([("v", Value::from(3))]), None)
        .unwrap();
    assert!(matches!(
        cd.detect_changes(),
        Err(ChangeDetectionError::Differ(_))
    ));
}
