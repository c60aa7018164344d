#![forbid(unsafe_code)]

//! Record computations over already evaluated operands.
//!
//! Pure operators never fail on `Null` operands of `&&`, `||`, `==`, `!=`,
//! `!` and `?:`; arithmetic and ordering require numbers (or strings for `+`
//! and ordering).

use std::rc::Rc;

use crate::ast::{BinaryOp, UnaryOp};
use crate::error::EvalError;
use crate::locals::Locals;
use crate::value::{Props, Value};

/// `receiver.name`
pub(crate) fn read_property(receiver: &Value, name: &str) -> Result<Value, EvalError> {
    match receiver {
        Value::Map(props) | Value::Object(props) => {
            Ok(props.borrow().get(name).cloned().unwrap_or_default())
        }
        Value::List(items) if name == "length" => Ok(Value::from(items.borrow().len())),
        Value::Str(s) if name == "length" => Ok(Value::from(s.chars().count())),
        Value::Null => Err(EvalError::new(format!(
            "Cannot read property '{name}' of null"
        ))),
        other => Err(EvalError::new(format!(
            "Cannot read property '{name}' of {}",
            other.type_name()
        ))),
    }
}

/// Implicit-receiver read: locals shadow the context.
pub(crate) fn read_implicit(
    context: &Value,
    locals: Option<&Locals>,
    name: &str,
) -> Result<Value, EvalError> {
    if let Some(value) = locals.and_then(|l| l.get(name)) {
        return Ok(value);
    }
    read_property(context, name)
}

/// `receiver[key]`
pub(crate) fn read_keyed(receiver: &Value, key: &Value) -> Result<Value, EvalError> {
    match (receiver, key) {
        (Value::List(items), Value::Number(n)) => {
            let items = items.borrow();
            if n.fract() == 0.0 && *n >= 0.0 && (*n as usize) < items.len() {
                Ok(items[*n as usize].clone())
            } else {
                Ok(Value::Null)
            }
        }
        (Value::Map(_) | Value::Object(_), key) => read_property(receiver, &key.stringify()),
        (Value::Null, _) => Err(EvalError::new(format!("Cannot read key '{key}' of null"))),
        (other, _) => Err(EvalError::new(format!(
            "Cannot index {} with '{key}'",
            other.type_name()
        ))),
    }
}

/// Invoke `callee` bound to `receiver`.
pub(crate) fn invoke(callee: &Value, receiver: &Value, args: &[Value]) -> Result<Value, EvalError> {
    match callee {
        Value::Function(function) => function.call(receiver, args).map_err(EvalError::from),
        other => Err(EvalError::new(format!("{} is not a function", other.type_name()))),
    }
}

/// `receiver.name(args)`
pub(crate) fn call_method(receiver: &Value, name: &str, args: &[Value]) -> Result<Value, EvalError> {
    let method = match receiver {
        Value::Map(props) | Value::Object(props) => props.borrow().get(name).cloned(),
        _ => None,
    };
    match method {
        Some(method @ Value::Function(_)) => invoke(&method, receiver, args),
        _ => Err(EvalError::new(format!(
            "Method '{name}' not found on {}",
            receiver.type_name()
        ))),
    }
}

pub(crate) fn unary(op: UnaryOp, operand: &Value) -> Result<Value, EvalError> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!operand.is_truthy())),
        UnaryOp::Neg => match operand {
            Value::Number(n) => Ok(Value::Number(-n)),
            other => Err(EvalError::new(format!("Cannot negate {}", other.type_name()))),
        },
    }
}

fn type_error(op: BinaryOp, left: &Value, right: &Value) -> EvalError {
    EvalError::new(format!(
        "Cannot apply '{}' to {} and {}",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

pub(crate) fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    match op {
        BinaryOp::And => Ok(if left.is_truthy() { right.clone() } else { left.clone() }),
        BinaryOp::Or => Ok(if left.is_truthy() { left.clone() } else { right.clone() }),
        BinaryOp::Eq => Ok(Value::Bool(left.strict_equals(right))),
        BinaryOp::Ne => Ok(Value::Bool(!left.strict_equals(right))),
        BinaryOp::Add => match (left, right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::Str(_), _) | (_, Value::Str(_)) => {
                let mut joined = left.stringify();
                joined.push_str(&right.stringify());
                Ok(Value::Str(Rc::from(joined)))
            }
            _ => Err(type_error(op, left, right)),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => match (left, right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(match op {
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                _ => a % b,
            })),
            _ => Err(type_error(op, left, right)),
        },
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (left, right) {
                (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                _ => return Err(type_error(op, left, right)),
            };
            Ok(Value::Bool(ordering.is_some_and(|o| match op {
                BinaryOp::Lt => o.is_lt(),
                BinaryOp::Le => o.is_le(),
                BinaryOp::Gt => o.is_gt(),
                _ => o.is_ge(),
            })))
        }
    }
}

pub(crate) fn conditional(condition: &Value, yes: &Value, no: &Value) -> Value {
    if condition.is_truthy() {
        yes.clone()
    } else {
        no.clone()
    }
}

pub(crate) fn literal_map(keys: &[Rc<str>], values: &[Value]) -> Value {
    let props: Props = keys
        .iter()
        .cloned()
        .zip(values.iter().cloned())
        .collect();
    Value::Map(Rc::new(std::cell::RefCell::new(props)))
}

pub(crate) fn interpolate(strings: &[Rc<str>], values: &[Value]) -> Value {
    let mut out = String::new();
    for (i, string) in strings.iter().enumerate() {
        out.push_str(string);
        if let Some(value) = values.get(i) {
            out.push_str(&value.stringify());
        }
    }
    Value::Str(Rc::from(out))
}
