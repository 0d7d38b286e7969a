//! Typed expression tree.
//!
//! The resolver lowers [`crate::CallNode`] trees into this IR; the
//! differentiation and linearization passes rewrite it; the interpreter
//! evaluates it. Operator calls reference the operator repository by
//! [`OpId`] rather than holding closures, which keeps the tree cheap to
//! clone and trivially comparable in tests.

use crate::Val;

/// Index of an overload in the operator repository.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct OpId(pub u32);

/// Index of a linearization-introduced (or block-introduced) local.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Slot(pub u32);

/// A typed expression. `Rand` and first-reads of `Hoist` are the only
/// side-effecting forms; the linearizer must never duplicate them.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Const(Val),
    /// The declared time variable of the enclosing delegate.
    Time,
    /// Loop index of the generation context.
    LoopIndex,
    /// Parent loop index of the generation context.
    ParentIndex,
    /// Read of a block/linearizer local.
    Local(Slot),
    /// Uniform draw from the context's random stream.
    Rand { lo: Box<Expr>, hi: Box<Expr> },
    /// Sample-once read: first evaluation stores under `key`, later
    /// evaluations return the stored value.
    Hoist { key: String, inner: Box<Expr> },
    /// Clear `key` from the hoist cache, then sample and re-store.
    Resample { key: String, inner: Box<Expr> },
    Call { op: OpId, args: Vec<Expr> },
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        els: Box<Expr>,
    },
    /// Statements followed by a final value.
    Block { stmts: Vec<Stmt>, value: Box<Expr> },
}

/// A statement inside a block.
#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    /// Bind a local.
    Let(Slot, Expr),
    /// Overwrite a previously bound local (emitted by the linearizer when
    /// lowering value-position conditionals).
    Assign(Slot, Expr),
    /// Statement-position conditional; branches are statement lists.
    If {
        cond: Expr,
        then: Vec<Stmt>,
        els: Vec<Stmt>,
    },
}

impl Expr {
    pub fn boxed(self) -> Box<Expr> {
        Box::new(self)
    }

    /// Number of locals referenced anywhere in this tree, i.e. one past the
    /// highest slot index. Used to size interpreter frames.
    pub fn slot_count(&self) -> u32 {
        fn max_slot(e: &Expr, m: &mut u32) {
            match e {
                Expr::Local(Slot(s)) => *m = (*m).max(s + 1),
                Expr::Rand { lo, hi } => {
                    max_slot(lo, m);
                    max_slot(hi, m);
                }
                Expr::Hoist { inner, .. } | Expr::Resample { inner, .. } => max_slot(inner, m),
                Expr::Call { args, .. } => args.iter().for_each(|a| max_slot(a, m)),
                Expr::If { cond, then, els } => {
                    max_slot(cond, m);
                    max_slot(then, m);
                    max_slot(els, m);
                }
                Expr::Block { stmts, value } => {
                    stmts.iter().for_each(|s| max_slot_stmt(s, m));
                    max_slot(value, m);
                }
                Expr::Const(_) | Expr::Time | Expr::LoopIndex | Expr::ParentIndex => {}
            }
        }
        fn max_slot_stmt(s: &Stmt, m: &mut u32) {
            match s {
                Stmt::Let(Slot(i), e) | Stmt::Assign(Slot(i), e) => {
                    *m = (*m).max(i + 1);
                    max_slot(e, m);
                }
                Stmt::If { cond, then, els } => {
                    max_slot(cond, m);
                    then.iter().for_each(|s| max_slot_stmt(s, m));
                    els.iter().for_each(|s| max_slot_stmt(s, m));
                }
            }
        }
        let mut m = 0;
        max_slot(self, &mut m);
        m
    }
}
