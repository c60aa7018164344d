#![forbid(unsafe_code)]

//! Protocol compiler: binding expressions to flat record lists.
//!
//! Every sub-expression becomes one [`ProtoRecord`] in an arena. Operands are
//! indices of earlier records, so the list is topologically sorted by
//! construction and a detector can evaluate it front to back.
//!
//! # Invariants
//!
//! 1. `record.operands[k] < index(record)` for every record.
//! 2. Only the last record of a binding carries its binding memo.
//! 3. Records of one group are contiguous; `last_in_group` marks the end.
//! 4. A failed `add` leaves the list and the open group as they were
//!    before the call.
//! 5. An interpolation may carry fewer strings than `expressions + 1`
//!    (missing ones are empty) but never more.
//!
//! # Example
//!
//! ```
//! use viewcore_detect::ast::Ast;
//! use viewcore_detect::proto::ProtoRecordBuilder;
//!
//! let mut builder = ProtoRecordBuilder::new();
//! builder.add(&Ast::prop("name"), "name", "g0")?;
//! let records = builder.build();
//! assert_eq!(records.len(), 2); // context + property read
//! # Ok::<(), viewcore_detect::CompileError>(())
//! ```

use std::rc::Rc;

use ahash::AHashSet;
use smallvec::SmallVec;

use crate::ast::{Ast, BinaryOp, UnaryOp};
use crate::error::CompileError;
use crate::value::Value;

/// Largest number of expressions an interpolation may embed.
pub const MAX_INTERPOLATIONS: usize = 9;

/// Identifies a binding or a binding group to the dispatcher.
pub type Memo = Rc<str>;

/// What a record computes from its operands.
#[derive(Debug, Clone)]
pub enum RecordKind {
    /// The hydrated context.
    Context,
    /// A constant.
    Const(Value),
    /// `operands[0].name`
    PropertyRead { name: Rc<str> },
    /// `operands[0]?.name`
    SafePropertyRead { name: Rc<str> },
    /// `operands[0][operands[1]]`
    KeyedRead,
    /// `operands[0].name(operands[1..])`
    MethodCall { name: Rc<str>, safe: bool },
    /// `operands[0](operands[1..])`
    FunctionCall,
    /// Prefix operator over `operands[0]`.
    Unary(UnaryOp),
    /// Infix operator over `operands[0]` and `operands[1]`.
    Binary(BinaryOp),
    /// `operands[0] ? operands[1] : operands[2]`
    Conditional,
    /// A fresh list of the operands.
    LiteralArray,
    /// A fresh map pairing `keys` with the operands.
    LiteralMap { keys: Rc<[Rc<str>]> },
    /// `strings` interleaved with the stringified operands.
    Interpolation { strings: Rc<[Rc<str>]> },
    /// Pipe `name` applied to `operands[0]` with `operands[1..]` as arguments.
    Pipe { name: Rc<str> },
    /// Structural watch over the collection in `operands[0]`.
    CollectionWatch,
}

impl RecordKind {
    /// Whether the record is a pure function of its operands.
    ///
    /// Pure records are recomputed only when an operand changed in the
    /// current pass (or on the first pass after hydration). Everything else
    /// reads live state and is recomputed on every pass.
    #[must_use]
    pub fn is_pure(&self) -> bool {
        matches!(
            self,
            Self::Const(_)
                | Self::Unary(_)
                | Self::Binary(_)
                | Self::Conditional
                | Self::LiteralArray
                | Self::LiteralMap { .. }
                | Self::Interpolation { .. }
        )
    }
}

/// One compiled step of a binding.
#[derive(Debug, Clone)]
pub struct ProtoRecord {
    /// Computation.
    pub kind: RecordKind,
    /// Indices of earlier records feeding this one.
    pub operands: SmallVec<[usize; 4]>,
    /// Whether a read or call targets the implicit receiver (locals first).
    pub implicit_receiver: bool,
    /// Binding memo, set on the last record of a binding only.
    pub binding_memo: Option<Memo>,
    /// Group the binding belongs to.
    pub group: Memo,
    /// Unparsed binding expression.
    pub expression: Rc<str>,
    /// Source location of the binding, for diagnostics.
    pub location: Option<Rc<str>>,
    /// Whether this is the last record of its group.
    pub last_in_group: bool,
}

impl ProtoRecord {
    /// Whether this record ends a binding and is reported to the dispatcher.
    #[must_use]
    pub fn is_binding(&self) -> bool {
        self.binding_memo.is_some()
    }
}

/// An immutable, shareable compiled record list.
#[derive(Debug, Clone)]
pub struct ProtoRecords {
    records: Rc<[ProtoRecord]>,
}

impl ProtoRecords {
    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether there are no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ProtoRecord> {
        self.records.get(index)
    }

    /// Records in evaluation order.
    pub fn iter(&self) -> impl Iterator<Item = &ProtoRecord> {
        self.records.iter()
    }

    /// Binding records in order.
    pub fn bindings(&self) -> impl Iterator<Item = &ProtoRecord> {
        self.records.iter().filter(|r| r.is_binding())
    }

    /// Distinct groups in order.
    #[must_use]
    pub fn groups(&self) -> Vec<Memo> {
        self.records
            .iter()
            .filter(|r| r.last_in_group)
            .map(|r| Rc::clone(&r.group))
            .collect()
    }

    pub(crate) fn shared(&self) -> Rc<[ProtoRecord]> {
        Rc::clone(&self.records)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

struct Binding {
    group: Memo,
    expression: Rc<str>,
    location: Option<Rc<str>>,
}

/// Appends compiled bindings in order.
#[derive(Debug, Default)]
pub struct ProtoRecordBuilder {
    records: Vec<ProtoRecord>,
    current_group: Option<Memo>,
    closed_groups: AHashSet<Memo>,
}

impl ProtoRecordBuilder {
    /// Empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records appended so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing was appended yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Compile `ast` as binding `memo` of `group`.
    pub fn add(
        &mut self,
        ast: &Ast,
        memo: impl Into<Memo>,
        group: impl Into<Memo>,
    ) -> Result<(), CompileError> {
        self.append(ast, memo.into(), group.into(), None, false)
    }

    /// Like [`add`](Self::add), recording `location` for diagnostics.
    pub fn add_with_location(
        &mut self,
        ast: &Ast,
        memo: impl Into<Memo>,
        group: impl Into<Memo>,
        location: impl Into<Rc<str>>,
    ) -> Result<(), CompileError> {
        self.append(ast, memo.into(), group.into(), Some(location.into()), false)
    }

    /// Compile `ast` and watch its value structurally with a collection differ.
    pub fn add_structural(
        &mut self,
        ast: &Ast,
        memo: impl Into<Memo>,
        group: impl Into<Memo>,
    ) -> Result<(), CompileError> {
        self.append(ast, memo.into(), group.into(), None, true)
    }

    /// Freeze the list.
    #[must_use]
    pub fn build(mut self) -> ProtoRecords {
        let len = self.records.len();
        for i in 0..len {
            let last = i + 1 == len || self.records[i + 1].group != self.records[i].group;
            self.records[i].last_in_group = last;
        }
        ProtoRecords {
            records: self.records.into(),
        }
    }

    fn append(
        &mut self,
        ast: &Ast,
        memo: Memo,
        group: Memo,
        location: Option<Rc<str>>,
        structural: bool,
    ) -> Result<(), CompileError> {
        self.check_group(&group)?;
        let binding = Binding {
            group,
            expression: Rc::from(ast.to_string()),
            location,
        };
        let start = self.records.len();
        let result = match self.compile(ast, &binding) {
            Ok(root) if structural => {
                Ok(self.push(RecordKind::CollectionWatch, [root], false, &binding))
            }
            other => other,
        };
        match result {
            Ok(root) => {
                self.records[root].binding_memo = Some(memo);
                self.enter_group(&binding.group);
                Ok(())
            }
            Err(err) => {
                self.records.truncate(start);
                Err(err)
            }
        }
    }

    fn check_group(&self, group: &Memo) -> Result<(), CompileError> {
        if self.current_group.as_ref() != Some(group) && self.closed_groups.contains(group) {
            return Err(CompileError::NonContiguousGroup {
                group: group.to_string(),
            });
        }
        Ok(())
    }

    /// Called only once the binding's records are in place.
    fn enter_group(&mut self, group: &Memo) {
        if self.current_group.as_ref() == Some(group) {
            return;
        }
        if let Some(previous) = self.current_group.replace(Rc::clone(group)) {
            self.closed_groups.insert(previous);
        }
    }

    fn push(
        &mut self,
        kind: RecordKind,
        operands: impl IntoIterator<Item = usize>,
        implicit_receiver: bool,
        binding: &Binding,
    ) -> usize {
        self.records.push(ProtoRecord {
            kind,
            operands: operands.into_iter().collect(),
            implicit_receiver,
            binding_memo: None,
            group: Rc::clone(&binding.group),
            expression: Rc::clone(&binding.expression),
            location: binding.location.clone(),
            last_in_group: false,
        });
        self.records.len() - 1
    }

    fn compile_all(&mut self, asts: &[Ast], binding: &Binding) -> Result<Vec<usize>, CompileError> {
        asts.iter().map(|ast| self.compile(ast, binding)).collect()
    }

    fn compile_call(
        &mut self,
        head: &Ast,
        args: &[Ast],
        binding: &Binding,
    ) -> Result<SmallVec<[usize; 4]>, CompileError> {
        let mut operands = SmallVec::with_capacity(args.len() + 1);
        operands.push(self.compile(head, binding)?);
        for arg in args {
            operands.push(self.compile(arg, binding)?);
        }
        Ok(operands)
    }

    fn compile(&mut self, ast: &Ast, binding: &Binding) -> Result<usize, CompileError> {
        let index = match ast {
            Ast::ImplicitReceiver => self.push(RecordKind::Context, [], false, binding),
            Ast::Literal(value) => self.push(RecordKind::Const(value.clone()), [], false, binding),
            Ast::PropertyRead { receiver, name } => {
                let r = self.compile(receiver, binding)?;
                let kind = RecordKind::PropertyRead {
                    name: Rc::clone(name),
                };
                self.push(kind, [r], receiver.is_implicit_receiver(), binding)
            }
            Ast::SafePropertyRead { receiver, name } => {
                let r = self.compile(receiver, binding)?;
                let kind = RecordKind::SafePropertyRead {
                    name: Rc::clone(name),
                };
                self.push(kind, [r], receiver.is_implicit_receiver(), binding)
            }
            Ast::KeyedRead { receiver, key } => {
                let r = self.compile(receiver, binding)?;
                let k = self.compile(key, binding)?;
                self.push(RecordKind::KeyedRead, [r, k], false, binding)
            }
            Ast::MethodCall {
                receiver,
                name,
                args,
            }
            | Ast::SafeMethodCall {
                receiver,
                name,
                args,
            } => {
                let operands = self.compile_call(receiver, args, binding)?;
                let kind = RecordKind::MethodCall {
                    name: Rc::clone(name),
                    safe: matches!(ast, Ast::SafeMethodCall { .. }),
                };
                self.push(kind, operands, receiver.is_implicit_receiver(), binding)
            }
            Ast::FunctionCall { target, args } => {
                let operands = self.compile_call(target, args, binding)?;
                self.push(RecordKind::FunctionCall, operands, false, binding)
            }
            Ast::Unary { op, operand } => {
                let o = self.compile(operand, binding)?;
                self.push(RecordKind::Unary(*op), [o], false, binding)
            }
            Ast::Binary { op, left, right } => {
                let l = self.compile(left, binding)?;
                let r = self.compile(right, binding)?;
                self.push(RecordKind::Binary(*op), [l, r], false, binding)
            }
            Ast::Conditional { condition, yes, no } => {
                let c = self.compile(condition, binding)?;
                let y = self.compile(yes, binding)?;
                let n = self.compile(no, binding)?;
                self.push(RecordKind::Conditional, [c, y, n], false, binding)
            }
            Ast::LiteralArray(items) => {
                let operands = self.compile_all(items, binding)?;
                self.push(RecordKind::LiteralArray, operands, false, binding)
            }
            Ast::LiteralMap(entries) => {
                let mut operands = Vec::with_capacity(entries.len());
                for (_, value) in entries {
                    operands.push(self.compile(value, binding)?);
                }
                let keys = entries.iter().map(|(k, _)| Rc::clone(k)).collect();
                self.push(RecordKind::LiteralMap { keys }, operands, false, binding)
            }
            Ast::Pipe { exp, name, args } => {
                let operands = self.compile_call(exp, args, binding)?;
                let kind = RecordKind::Pipe {
                    name: Rc::clone(name),
                };
                self.push(kind, operands, false, binding)
            }
            Ast::Interpolation {
                strings,
                expressions,
            } => {
                if expressions.len() > MAX_INTERPOLATIONS {
                    return Err(CompileError::TooManyInterpolations {
                        count: expressions.len(),
                    });
                }
                if strings.len() > expressions.len() + 1 {
                    return Err(CompileError::InterpolationStrings {
                        strings: strings.len(),
                        expressions: expressions.len(),
                    });
                }
                let operands = self.compile_all(expressions, binding)?;
                let mut strings = strings.clone();
                strings.resize(expressions.len() + 1, Rc::from(""));
                let kind = RecordKind::Interpolation {
                    strings: strings.into(),
                };
                self.push(kind, operands, false, binding)
            }
        };
        Ok(index)
    }
}
