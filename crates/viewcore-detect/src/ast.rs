#![forbid(unsafe_code)]

//! Binding expression trees.
//!
//! Expressions are built with the constructors below; there is no text
//! parser. [`Display`](core::fmt::Display) unparses a tree for diagnostics.
//!
//! ```
//! use viewcore_detect::ast::{Ast, BinaryOp};
//!
//! let total = Ast::binary(BinaryOp::Add, Ast::prop("a"), Ast::prop("b").dot("c"));
//! assert_eq!(total.to_string(), "a + b.c");
//! ```

use core::fmt;
use std::rc::Rc;

use crate::value::Value;

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `!x`
    Not,
    /// `-x`
    Neg,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// `a && b`; both sides are evaluated.
    And,
    /// `a || b`; both sides are evaluated.
    Or,
}

impl BinaryOp {
    /// Source symbol.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

/// A binding expression.
#[derive(Debug, Clone)]
pub enum Ast {
    /// The context object (the `this` of a template).
    ImplicitReceiver,
    /// A constant.
    Literal(Value),
    /// `receiver.name`; reads through the implicit receiver consult locals first.
    PropertyRead { receiver: Box<Ast>, name: Rc<str> },
    /// `receiver?.name`: `null` when the receiver is `null`.
    SafePropertyRead { receiver: Box<Ast>, name: Rc<str> },
    /// `receiver[key]`
    KeyedRead { receiver: Box<Ast>, key: Box<Ast> },
    /// `receiver.name(args)`
    MethodCall {
        receiver: Box<Ast>,
        name: Rc<str>,
        args: Vec<Ast>,
    },
    /// `receiver?.name(args)`: `null` when the receiver is `null`.
    SafeMethodCall {
        receiver: Box<Ast>,
        name: Rc<str>,
        args: Vec<Ast>,
    },
    /// `target(args)` where `target` evaluates to a function.
    FunctionCall { target: Box<Ast>, args: Vec<Ast> },
    /// Prefix operator.
    Unary { op: UnaryOp, operand: Box<Ast> },
    /// Infix operator.
    Binary {
        op: BinaryOp,
        left: Box<Ast>,
        right: Box<Ast>,
    },
    /// `condition ? yes : no`; both branches are evaluated.
    Conditional {
        condition: Box<Ast>,
        yes: Box<Ast>,
        no: Box<Ast>,
    },
    /// `[a, b]`
    LiteralArray(Vec<Ast>),
    /// `{k: v}`
    LiteralMap(Vec<(Rc<str>, Ast)>),
    /// `exp | name:arg1:arg2`
    Pipe {
        exp: Box<Ast>,
        name: Rc<str>,
        args: Vec<Ast>,
    },
    /// `s0{{e0}}s1{{e1}}s2`: `strings` has at most one more entry than
    /// `expressions`; missing trailing strings are empty.
    Interpolation {
        strings: Vec<Rc<str>>,
        expressions: Vec<Ast>,
    },
}

impl Ast {
    /// Property `name` of the implicit receiver.
    pub fn prop(name: impl Into<Rc<str>>) -> Self {
        Self::PropertyRead {
            receiver: Box::new(Self::ImplicitReceiver),
            name: name.into(),
        }
    }

    /// A constant.
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// `self.name`
    #[must_use]
    pub fn dot(self, name: impl Into<Rc<str>>) -> Self {
        Self::PropertyRead {
            receiver: Box::new(self),
            name: name.into(),
        }
    }

    /// `self?.name`
    #[must_use]
    pub fn safe_dot(self, name: impl Into<Rc<str>>) -> Self {
        Self::SafePropertyRead {
            receiver: Box::new(self),
            name: name.into(),
        }
    }

    /// `self[key]`
    #[must_use]
    pub fn index(self, key: Ast) -> Self {
        Self::KeyedRead {
            receiver: Box::new(self),
            key: Box::new(key),
        }
    }

    /// `self.name(args)`
    #[must_use]
    pub fn method(self, name: impl Into<Rc<str>>, args: Vec<Ast>) -> Self {
        Self::MethodCall {
            receiver: Box::new(self),
            name: name.into(),
            args,
        }
    }

    /// `self?.name(args)`
    #[must_use]
    pub fn safe_method(self, name: impl Into<Rc<str>>, args: Vec<Ast>) -> Self {
        Self::SafeMethodCall {
            receiver: Box::new(self),
            name: name.into(),
            args,
        }
    }

    /// `self(args)`
    #[must_use]
    pub fn call(self, args: Vec<Ast>) -> Self {
        Self::FunctionCall {
            target: Box::new(self),
            args,
        }
    }

    /// `self | name:args`
    #[must_use]
    pub fn pipe(self, name: impl Into<Rc<str>>, args: Vec<Ast>) -> Self {
        Self::Pipe {
            exp: Box::new(self),
            name: name.into(),
            args,
        }
    }

    /// `!operand`
    pub fn not(operand: Ast) -> Self {
        Self::Unary {
            op: UnaryOp::Not,
            operand: Box::new(operand),
        }
    }

    /// `-operand`
    pub fn neg(operand: Ast) -> Self {
        Self::Unary {
            op: UnaryOp::Neg,
            operand: Box::new(operand),
        }
    }

    /// `left op right`
    pub fn binary(op: BinaryOp, left: Ast, right: Ast) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// `condition ? yes : no`
    pub fn conditional(condition: Ast, yes: Ast, no: Ast) -> Self {
        Self::Conditional {
            condition: Box::new(condition),
            yes: Box::new(yes),
            no: Box::new(no),
        }
    }

    /// `[items]`
    pub fn array(items: Vec<Ast>) -> Self {
        Self::LiteralArray(items)
    }

    /// `{entries}`
    pub fn map<K: Into<Rc<str>>>(entries: impl IntoIterator<Item = (K, Ast)>) -> Self {
        Self::LiteralMap(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Interpolation of `expressions` between `strings`.
    ///
    /// `strings` is padded with empty strings (or truncated) to
    /// `expressions.len() + 1` entries.
    pub fn interpolation<S: Into<Rc<str>>>(
        strings: impl IntoIterator<Item = S>,
        expressions: Vec<Ast>,
    ) -> Self {
        let mut strings: Vec<Rc<str>> = strings.into_iter().map(Into::into).collect();
        strings.resize(expressions.len() + 1, Rc::from(""));
        Self::Interpolation {
            strings,
            expressions,
        }
    }

    /// Whether this node is the implicit receiver.
    #[must_use]
    pub fn is_implicit_receiver(&self) -> bool {
        matches!(self, Self::ImplicitReceiver)
    }
}

// ---------------------------------------------------------------------------
// Unparsing
// ---------------------------------------------------------------------------

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Ast]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

fn write_receiver(f: &mut fmt::Formatter<'_>, receiver: &Ast, sep: &str) -> fmt::Result {
    if receiver.is_implicit_receiver() {
        Ok(())
    } else {
        write!(f, "{receiver}{sep}")
    }
}

impl fmt::Display for Ast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ImplicitReceiver => Ok(()),
            Self::Literal(Value::Str(s)) => write!(f, "'{s}'"),
            Self::Literal(value) => write!(f, "{value}"),
            Self::PropertyRead { receiver, name } => {
                write_receiver(f, receiver, ".")?;
                f.write_str(name)
            }
            Self::SafePropertyRead { receiver, name } => {
                write_receiver(f, receiver, "?.")?;
                f.write_str(name)
            }
            Self::KeyedRead { receiver, key } => write!(f, "{receiver}[{key}]"),
            Self::MethodCall {
                receiver,
                name,
                args,
            } => {
                write_receiver(f, receiver, ".")?;
                write!(f, "{name}(")?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Self::SafeMethodCall {
                receiver,
                name,
                args,
            } => {
                write_receiver(f, receiver, "?.")?;
                write!(f, "{name}(")?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Self::FunctionCall { target, args } => {
                write!(f, "{target}(")?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Self::Unary { op, operand } => match op {
                UnaryOp::Not => write!(f, "!{operand}"),
                UnaryOp::Neg => write!(f, "-{operand}"),
            },
            Self::Binary { op, left, right } => write!(f, "{left} {} {right}", op.symbol()),
            Self::Conditional { condition, yes, no } => write!(f, "{condition} ? {yes} : {no}"),
            Self::LiteralArray(items) => {
                f.write_str("[")?;
                write_list(f, items)?;
                f.write_str("]")
            }
            Self::LiteralMap(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
            Self::Pipe { exp, name, args } => {
                write!(f, "({exp} | {name}")?;
                for arg in args {
                    write!(f, ":{arg}")?;
                }
                f.write_str(")")
            }
            Self::Interpolation {
                strings,
                expressions,
            } => {
                for (i, string) in strings.iter().enumerate() {
                    f.write_str(string)?;
                    if let Some(exp) = expressions.get(i) {
                        write!(f, "{{{{{exp}}}}}")?;
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unparses_reads_and_calls() {
        let ast = Ast::prop("user").safe_dot("address").dot("city");
        assert_eq!(ast.to_string(), "user?.address.city");

        let call = Ast::prop("items").method("slice", vec![Ast::literal(1), Ast::prop("n")]);
        assert_eq!(call.to_string(), "items.slice(1, n)");

        let keyed = Ast::prop("rows").index(Ast::literal("id"));
        assert_eq!(keyed.to_string(), "rows['id']");
    }

    #[test]
    fn unparses_operators_and_literals() {
        let cond = Ast::conditional(
            Ast::not(Ast::prop("done")),
            Ast::array(vec![Ast::literal(1)]),
            Ast::map([("k", Ast::literal(true))]),
        );
        assert_eq!(cond.to_string(), "!done ? [1] : {k: true}");
    }

    #[test]
    fn unparses_pipes_and_interpolations() {
        let piped = Ast::prop("date").pipe("format", vec![Ast::literal("short")]);
        assert_eq!(piped.to_string(), "(date | format:'short')");

        let interp = Ast::interpolation(["Hello ", "!"], vec![Ast::prop("name")]);
        assert_eq!(interp.to_string(), "Hello {{name}}!");
    }

    #[test]
    fn interpolation_pads_strings() {
        let Ast::Interpolation { strings, .. } =
            Ast::interpolation(Vec::<&str>::new(), vec![Ast::prop("a"), Ast::prop("b")])
        else {
            unreachable!();
        };
        assert_eq!(strings.len(), 3);
    }
}
