#![no_main]

//! Compiles arbitrary side-effect-free bindings and runs them through a
//! detector. A pass that succeeds must be followed by a clean stability check.

use std::rc::Rc;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use viewcore_detect::{
    Ast, BinaryOp, ChangeRecord, Memo, ProtoChangeDetector, ProtoRecordBuilder, Value,
};

const FIELDS: [&str; 4] = ["a", "b", "items", "missing"];

#[derive(Debug, Arbitrary)]
enum Expr {
    Field(u8),
    Number(i16),
    Text(bool),
    Null,
    Dot(Box<Expr>, u8),
    SafeDot(Box<Expr>, u8),
    Index(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(u8, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Array(Vec<Expr>),
    Interpolation(Vec<Expr>),
}

const OPS: [BinaryOp; 13] = [
    BinaryOp::Add,
    BinaryOp::Sub,
    BinaryOp::Mul,
    BinaryOp::Div,
    BinaryOp::Rem,
    BinaryOp::Eq,
    BinaryOp::Ne,
    BinaryOp::Lt,
    BinaryOp::Le,
    BinaryOp::Gt,
    BinaryOp::Ge,
    BinaryOp::And,
    BinaryOp::Or,
];

fn field(index: u8) -> &'static str {
    FIELDS[usize::from(index) % FIELDS.len()]
}

fn lower(expr: &Expr, depth: usize) -> Ast {
    if depth > 12 {
        return Ast::literal(Value::Null);
    }
    let sub = |e: &Expr| lower(e, depth + 1);
    match expr {
        Expr::Field(i) => Ast::prop(field(*i)),
        Expr::Number(n) => Ast::literal(f64::from(*n)),
        Expr::Text(upper) => Ast::literal(if *upper { "X" } else { "x" }),
        Expr::Null => Ast::literal(Value::Null),
        Expr::Dot(receiver, i) => sub(receiver).dot(field(*i)),
        Expr::SafeDot(receiver, i) => sub(receiver).safe_dot(field(*i)),
        Expr::Index(receiver, key) => sub(receiver).index(sub(key)),
        Expr::Not(operand) => Ast::not(sub(operand)),
        Expr::Neg(operand) => Ast::neg(sub(operand)),
        Expr::Binary(op, left, right) => {
            Ast::binary(OPS[usize::from(*op) % OPS.len()], sub(left), sub(right))
        }
        Expr::Conditional(condition, yes, no) => {
            Ast::conditional(sub(condition), sub(yes), sub(no))
        }
        Expr::Array(items) => Ast::array(items.iter().take(8).map(sub).collect()),
        Expr::Interpolation(parts) => {
            Ast::interpolation(["<", ">"], parts.iter().take(12).map(sub).collect())
        }
    }
}

fn context() -> Value {
    Value::object([
        ("a", Value::from(1)),
        ("b", Value::object([("a", Value::from("nested"))])),
        ("items", Value::list([Value::from(2), Value::Null])),
    ])
}

fuzz_target!(|bindings: Vec<Expr>| {
    let mut builder = ProtoRecordBuilder::new();
    for (i, expr) in bindings.iter().take(8).enumerate() {
        if builder
            .add(&lower(expr, 0), format!("b{i}"), format!("g{}", i % 3))
            .is_err()
        {
            return;
        }
    }
    let detector = ProtoChangeDetector::new("Fuzz", builder.build())
        .instantiate(Rc::new(|_: &Memo, _: &[ChangeRecord]| {}));
    if detector.hydrate(context(), None).is_err() {
        return;
    }
    for _ in 0..2 {
        if detector.detect_changes().is_err() {
            return;
        }
        if let Err(err) = detector.check_no_changes() {
            panic!("stable bindings reported a change: {err}");
        }
    }
});
