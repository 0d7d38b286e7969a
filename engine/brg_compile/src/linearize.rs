//! Linearization: flatten nested block and conditional sub-expressions
//! into a top-level statement sequence.
//!
//! After this pass, call arguments and branch conditions are block-free;
//! blocks survive only at the top level, inside statement-position
//! conditional branches, and inside hoist bodies (where the sub-program is
//! deliberately evaluated conditionally). When any argument of a call has
//! to be hoisted, *every* non-atomic sibling is hoisted with it, in order,
//! so evaluation order is exactly that of the unlinearized tree and no
//! side-effecting sub-expression runs more or fewer times than before.

use brg_ir::{Expr, Slot, Stmt};

/// Linearize an expression tree.
pub fn linearize(e: &Expr) -> Expr {
    let mut lz = Linearizer {
        counter: e.slot_count(),
    };
    lz.visit(e)
}

struct Linearizer {
    /// Next fresh slot; starts above every slot the resolver allocated.
    counter: u32,
}

enum Flat {
    /// Linearized with no statement prefix.
    Plain(Expr),
    /// Statement prefix plus a block-free value.
    Seq(Vec<Stmt>, Expr),
}

impl Linearizer {
    fn fresh(&mut self) -> Slot {
        let s = Slot(self.counter);
        self.counter += 1;
        s
    }

    fn visit(&mut self, e: &Expr) -> Expr {
        match self.flatten(e) {
            Flat::Plain(e) => e,
            Flat::Seq(stmts, value) => Expr::Block {
                stmts,
                value: value.boxed(),
            },
        }
    }

    /// An expression with no evaluation-order hazards: hoisting a sibling
    /// past it cannot change observable behavior.
    fn is_atom(e: &Expr) -> bool {
        matches!(
            e,
            Expr::Const(_) | Expr::Time | Expr::LoopIndex | Expr::ParentIndex | Expr::Local(_)
        )
    }

    fn flatten(&mut self, e: &Expr) -> Flat {
        match e {
            Expr::Const(_)
            | Expr::Time
            | Expr::LoopIndex
            | Expr::ParentIndex
            | Expr::Local(_) => Flat::Plain(e.clone()),

            Expr::Rand { lo, hi } => {
                self.combine(&[lo.as_ref(), hi.as_ref()], |args| Expr::Rand {
                    lo: args[0].clone().boxed(),
                    hi: args[1].clone().boxed(),
                })
            }

            // The hoist body only runs when the key is missing, so its
            // statements must stay nested rather than be hoisted into the
            // unconditional prefix.
            Expr::Hoist { key, inner } => Flat::Plain(Expr::Hoist {
                key: key.clone(),
                inner: self.visit(inner).boxed(),
            }),
            Expr::Resample { key, inner } => Flat::Plain(Expr::Resample {
                key: key.clone(),
                inner: self.visit(inner).boxed(),
            }),

            Expr::Call { op, args } => {
                let refs: Vec<&Expr> = args.iter().collect();
                let op = *op;
                self.combine(&refs, move |args| Expr::Call {
                    op,
                    args: args.to_vec(),
                })
            }

            Expr::If { cond, then, els } => self.conditional(cond, then, els),

            Expr::Block { stmts, value } => {
                let mut out = Vec::with_capacity(stmts.len());
                for stmt in stmts {
                    self.flatten_stmt(stmt, &mut out);
                }
                match self.flatten(value) {
                    Flat::Plain(v) => Flat::Seq(out, v),
                    Flat::Seq(mut inner, v) => {
                        out.append(&mut inner);
                        Flat::Seq(out, v)
                    }
                }
            }
        }
    }

    fn flatten_stmt(&mut self, stmt: &Stmt, out: &mut Vec<Stmt>) {
        match stmt {
            Stmt::Let(slot, e) => match self.flatten(e) {
                Flat::Plain(e) => out.push(Stmt::Let(*slot, e)),
                Flat::Seq(mut stmts, v) => {
                    out.append(&mut stmts);
                    out.push(Stmt::Let(*slot, v));
                }
            },
            Stmt::Assign(slot, e) => match self.flatten(e) {
                Flat::Plain(e) => out.push(Stmt::Assign(*slot, e)),
                Flat::Seq(mut stmts, v) => {
                    out.append(&mut stmts);
                    out.push(Stmt::Assign(*slot, v));
                }
            },
            Stmt::If { cond, then, els } => {
                let cond = match self.flatten(cond) {
                    Flat::Plain(c) => c,
                    Flat::Seq(mut stmts, c) => {
                        out.append(&mut stmts);
                        c
                    }
                };
                let mut then_out = Vec::with_capacity(then.len());
                for s in then {
                    self.flatten_stmt(s, &mut then_out);
                }
                let mut els_out = Vec::with_capacity(els.len());
                for s in els {
                    self.flatten_stmt(s, &mut els_out);
                }
                out.push(Stmt::If {
                    cond,
                    then: then_out,
                    els: els_out,
                });
            }
        }
    }

    /// Linearize each piece; if any carries a statement prefix, hoist every
    /// non-atomic piece to a temporary in evaluation order and rebuild the
    /// combined expression over the temporaries.
    fn combine(&mut self, pieces: &[&Expr], rebuild: impl FnOnce(&[Expr]) -> Expr) -> Flat {
        let flats: Vec<Flat> = pieces.iter().map(|p| self.flatten(p)).collect();
        if flats.iter().all(|f| matches!(f, Flat::Plain(_))) {
            let args: Vec<Expr> = flats
                .into_iter()
                .map(|f| match f {
                    Flat::Plain(e) => e,
                    Flat::Seq(..) => unreachable_expr(),
                })
                .collect();
            return Flat::Plain(rebuild(&args));
        }
        let mut stmts = Vec::new();
        let mut args = Vec::with_capacity(flats.len());
        for flat in flats {
            match flat {
                Flat::Plain(e) if Self::is_atom(&e) => args.push(e),
                Flat::Plain(e) => {
                    let tmp = self.fresh();
                    stmts.push(Stmt::Let(tmp, e));
                    args.push(Expr::Local(tmp));
                }
                Flat::Seq(mut prefix, v) => {
                    stmts.append(&mut prefix);
                    let tmp = self.fresh();
                    stmts.push(Stmt::Let(tmp, v));
                    args.push(Expr::Local(tmp));
                }
            }
        }
        Flat::Seq(stmts, rebuild(&args))
    }

    /// Value-position conditional. When a branch carries statements it
    /// would be incorrect to evaluate both branches and select; instead a
    /// temporary is declared outside a statement-position conditional and
    /// written inside each branch.
    fn conditional(&mut self, cond: &Expr, then: &Expr, els: &Expr) -> Flat {
        let (mut stmts, cond) = match self.flatten(cond) {
            Flat::Plain(c) => (Vec::new(), c),
            Flat::Seq(stmts, c) => (stmts, c),
        };
        let then_flat = self.flatten(then);
        let els_flat = self.flatten(els);
        match (then_flat, els_flat) {
            (Flat::Plain(t), Flat::Plain(f)) => {
                if stmts.is_empty() {
                    Flat::Plain(Expr::If {
                        cond: cond.boxed(),
                        then: t.boxed(),
                        els: f.boxed(),
                    })
                } else {
                    Flat::Seq(
                        stmts,
                        Expr::If {
                            cond: cond.boxed(),
                            then: t.boxed(),
                            els: f.boxed(),
                        },
                    )
                }
            }
            (then_flat, els_flat) => {
                let dst = self.fresh();
                stmts.push(Stmt::If {
                    cond,
                    then: branch_writes(then_flat, dst),
                    els: branch_writes(els_flat, dst),
                });
                Flat::Seq(stmts, Expr::Local(dst))
            }
        }
    }
}

fn branch_writes(flat: Flat, dst: Slot) -> Vec<Stmt> {
    match flat {
        Flat::Plain(e) => vec![Stmt::Assign(dst, e)],
        Flat::Seq(mut stmts, v) => {
            stmts.push(Stmt::Assign(dst, v));
            stmts
        }
    }
}

/// `combine` checked all pieces were `Plain` before this path.
fn unreachable_expr() -> Expr {
    Expr::Const(brg_ir::Val::Num(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use brg_ir::Val;
    use brg_ops::build_op_table;
    use brg_ops::OpTable;
    use brg_parse::parse_expr_text;
    use brg_rt::{GenCtx, RngStream};

    use crate::{run, Resolver};

    fn compile(src: &str) -> (OpTable, Expr) {
        let table = build_op_table();
        let node = parse_expr_text(src).unwrap();
        let (e, _) = Resolver::new(&table, 1.0).resolve(&node).unwrap();
        (table, e)
    }

    /// No block survives in a value position (call args, branch conditions,
    /// or the values of statements).
    fn assert_value_positions_flat(e: &Expr) {
        fn check(e: &Expr, in_value_position: bool) {
            match e {
                Expr::Block { stmts, value } => {
                    assert!(!in_value_position, "block survived in value position");
                    for s in stmts {
                        check_stmt(s);
                    }
                    check(value, true);
                }
                Expr::Call { args, .. } => args.iter().for_each(|a| check(a, true)),
                Expr::If { cond, then, els } => {
                    check(cond, true);
                    check(then, true);
                    check(els, true);
                }
                Expr::Rand { lo, hi } => {
                    check(lo, true);
                    check(hi, true);
                }
                // Hoist bodies are conditional sub-programs; nesting stays.
                Expr::Hoist { inner, .. } | Expr::Resample { inner, .. } => check(inner, false),
                _ => {}
            }
        }
        fn check_stmt(s: &Stmt) {
            match s {
                Stmt::Let(_, e) | Stmt::Assign(_, e) => check(e, true),
                Stmt::If { cond, then, els } => {
                    check(cond, true);
                    then.iter().for_each(check_stmt);
                    els.iter().for_each(check_stmt);
                }
            }
        }
        check(e, false);
    }

    fn both_forms(src: &str, seed: u64) -> (Val, Val) {
        let (table, e) = compile(src);
        let lin = linearize(&e);
        assert_value_positions_flat(&lin);
        let mut g1 = GenCtx::new(RngStream::from_seed(seed));
        let mut g2 = GenCtx::new(RngStream::from_seed(seed));
        (run(&table, &e, &mut g1), run(&table, &lin, &mut g2))
    }

    #[test]
    fn test_plain_expression_unchanged() {
        let (_, e) = compile("add(1, mul(2, t))");
        assert_eq!(linearize(&e), e);
    }

    #[test]
    fn test_block_in_call_argument_is_hoisted() {
        let (a, b) = both_forms("mul(2, block(x = 3, add(x, 1)))", 5);
        assert_eq!(a, Val::Num(8.0));
        assert_eq!(a, b);
    }

    #[test]
    fn test_equivalence_under_fixed_seed() {
        for seed in [0, 1, 99] {
            let (a, b) = both_forms(
                "add(block(x = rand(0, 1), mul(x, 10)), if(lt(rand(0, 1), 0.5), 1, 2))",
                seed,
            );
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_side_effect_evaluated_exactly_once() {
        // x - x over a random draw is identically zero iff the draw is
        // evaluated once and reused.
        let (a, b) = both_forms("sub(block(x = rand(0, 1), x), block(y = 0, mul(1, 1)))", 7);
        let _ = b;
        let (c, d) = both_forms("block(x = rand(0, 1), sub(x, x))", 7);
        assert_eq!(c, Val::Num(0.0));
        assert_eq!(d, Val::Num(0.0));
        assert_eq!(a, b);
    }

    #[test]
    fn test_rand_draw_count_preserved() {
        // After evaluating both forms from identical streams, the streams
        // must be in identical states: same number of draws consumed.
        let (table, e) = compile("add(block(x = rand(0, 1), x), rand(0, 1))");
        let lin = linearize(&e);
        let mut g1 = GenCtx::new(RngStream::from_seed(21));
        let mut g2 = GenCtx::new(RngStream::from_seed(21));
        let a = run(&table, &e, &mut g1);
        let b = run(&table, &lin, &mut g2);
        assert_eq!(a, b);
        assert_eq!(g1.rng.next_u32(), g2.rng.next_u32());
    }

    #[test]
    fn test_value_conditional_with_block_branches() {
        let src = "if(lt(t, 5), block(x = mul(t, 2), add(x, 1)), block(y = mul(t, 3), y))";
        let (table, e) = compile(src);
        let lin = linearize(&e);
        assert_value_positions_flat(&lin);
        for t in [0.0, 4.9, 5.0, 9.0] {
            let mut g1 = GenCtx::new(RngStream::from_seed(1));
            let mut g2 = GenCtx::new(RngStream::from_seed(1));
            g1.t = t;
            g2.t = t;
            assert_eq!(run(&table, &e, &mut g1), run(&table, &lin, &mut g2));
        }
    }

    #[test]
    fn test_untaken_branch_not_evaluated_after_linearization() {
        // The else branch draws; when the condition holds, the draw must
        // not happen in either form.
        let src = "if(lt(1, 2), 5, block(x = rand(0, 1), x))";
        let (table, e) = compile(src);
        let lin = linearize(&e);
        let mut g = GenCtx::new(RngStream::from_seed(31));
        let mut probe = g.clone();
        assert_eq!(run(&table, &lin, &mut g), Val::Num(5.0));
        assert_eq!(g.rng.next_u32(), probe.rng.next_u32());
        let _ = e;
    }

    #[test]
    fn test_hoist_body_stays_conditional() {
        // A hoisted sample-once body containing a block must only draw on
        // first evaluation, linearized or not.
        let src = "once(k, block(x = rand(0, 1), mul(x, 100)))";
        let (table, e) = compile(src);
        let lin = linearize(&e);
        let mut g = GenCtx::new(RngStream::from_seed(41));
        let first = run(&table, &lin, &mut g);
        let mut probe = g.clone();
        let second = run(&table, &lin, &mut g);
        assert_eq!(first, second);
        // No draw on the second evaluation.
        assert_eq!(g.rng.next_u32(), probe.rng.next_u32());
        let _ = e;
    }
}
