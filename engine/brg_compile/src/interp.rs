//! Interpreter over the typed expression tree.
//!
//! This is the delegate backend: a small tree-walker over values, with a
//! locals frame sized from the expression's slot count. It evaluates both
//! linearized and unlinearized trees, which is what lets the linearization
//! equivalence tests compare the two forms directly.

use smallvec::SmallVec;

use brg_ir::{Expr, Stmt, Val};
use brg_ops::OpTable;
use brg_rt::GenCtx;

/// Evaluate an expression against a generation context.
pub fn run(ops: &OpTable, e: &Expr, gcx: &mut GenCtx) -> Val {
    let mut locals = vec![Val::Num(0.0); e.slot_count() as usize];
    eval(ops, e, gcx, &mut locals)
}

fn eval(ops: &OpTable, e: &Expr, gcx: &mut GenCtx, locals: &mut Vec<Val>) -> Val {
    match e {
        Expr::Const(v) => *v,
        Expr::Time => Val::Num(gcx.t),
        Expr::LoopIndex => Val::Num(gcx.i as f32),
        Expr::ParentIndex => Val::Num(gcx.pi as f32),
        Expr::Local(slot) => locals
            .get(slot.0 as usize)
            .copied()
            .unwrap_or(Val::Num(0.0)),
        Expr::Rand { lo, hi } => {
            let lo = eval(ops, lo, gcx, locals).num();
            let hi = eval(ops, hi, gcx, locals).num();
            Val::Num(gcx.rng.uniform(lo, hi))
        }
        Expr::Hoist { key, inner } => {
            if let Some(v) = gcx.hoisted(key) {
                return v;
            }
            let v = eval(ops, inner, gcx, locals);
            gcx.hoist(key, v);
            v
        }
        Expr::Resample { key, inner } => {
            gcx.clear_hoisted(key);
            let v = eval(ops, inner, gcx, locals);
            gcx.hoist(key, v);
            v
        }
        Expr::Call { op, args } => {
            let mut argv: SmallVec<[Val; 4]> = SmallVec::with_capacity(args.len());
            for arg in args {
                argv.push(eval(ops, arg, gcx, locals));
            }
            (ops.def(*op).eval)(&argv)
        }
        Expr::If { cond, then, els } => {
            if eval(ops, cond, gcx, locals).boolean() {
                eval(ops, then, gcx, locals)
            } else {
                eval(ops, els, gcx, locals)
            }
        }
        Expr::Block { stmts, value } => {
            exec_stmts(ops, stmts, gcx, locals);
            eval(ops, value, gcx, locals)
        }
    }
}

fn exec_stmts(ops: &OpTable, stmts: &[Stmt], gcx: &mut GenCtx, locals: &mut Vec<Val>) {
    for stmt in stmts {
        match stmt {
            Stmt::Let(slot, e) | Stmt::Assign(slot, e) => {
                let v = eval(ops, e, gcx, locals);
                let idx = slot.0 as usize;
                if idx >= locals.len() {
                    locals.resize(idx + 1, Val::Num(0.0));
                }
                locals[idx] = v;
            }
            Stmt::If { cond, then, els } => {
                if eval(ops, cond, gcx, locals).boolean() {
                    exec_stmts(ops, then, gcx, locals);
                } else {
                    exec_stmts(ops, els, gcx, locals);
                }
            }
        }
    }
}
