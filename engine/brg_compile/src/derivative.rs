//! Symbolic differentiation with respect to the time variable.
//!
//! Operators dispatch to their declared derivative rule; an operator
//! without one is a compile error, never a numeric approximation. Block
//! bindings contribute to a derivative environment so that later reads of
//! a local differentiate to the derivative of its binding.

use rustc_hash::FxHashMap;

use brg_ir::{Expr, Slot, Stmt, Val};
use brg_ops::OpTable;

use crate::CompileError;

/// Differentiate `e` with respect to [`Expr::Time`].
pub fn differentiate(ops: &OpTable, e: &Expr) -> Result<Expr, CompileError> {
    let mut env: FxHashMap<Slot, Expr> = FxHashMap::default();
    deriv(ops, e, &mut env)
}

fn zero() -> Expr {
    Expr::Const(Val::Num(0.0))
}

fn deriv(
    ops: &OpTable,
    e: &Expr,
    env: &mut FxHashMap<Slot, Expr>,
) -> Result<Expr, CompileError> {
    match e {
        Expr::Time => Ok(Expr::Const(Val::Num(1.0))),
        Expr::Const(_) | Expr::LoopIndex | Expr::ParentIndex => Ok(zero()),
        // A sampled value is constant for the rest of its context's
        // lifetime.
        Expr::Hoist { .. } => Ok(zero()),
        Expr::Local(slot) => Ok(env.get(slot).cloned().unwrap_or_else(zero)),
        Expr::Rand { .. } => Err(CompileError::NonDifferentiable {
            op: "rand".to_owned(),
        }),
        Expr::Resample { .. } => Err(CompileError::NonDifferentiable {
            op: "resample".to_owned(),
        }),
        Expr::Call { op, args } => {
            let def = ops.def(*op);
            let Some(rule) = def.deriv else {
                return Err(CompileError::NonDifferentiable {
                    op: def.name.to_owned(),
                });
            };
            let mut dargs = Vec::with_capacity(args.len());
            for arg in args {
                dargs.push(deriv(ops, arg, env)?);
            }
            Ok(rule(ops, args, &dargs))
        }
        Expr::If { cond, then, els } => Ok(Expr::If {
            // The branch condition itself is not differentiated.
            cond: cond.clone(),
            then: deriv(ops, then, env)?.boxed(),
            els: deriv(ops, els, env)?.boxed(),
        }),
        Expr::Block { stmts, value } => {
            // Keep the original bindings; record each binding's derivative
            // for later local reads.
            let mut out = Vec::with_capacity(stmts.len());
            for stmt in stmts {
                match stmt {
                    Stmt::Let(slot, binding) | Stmt::Assign(slot, binding) => {
                        let d = deriv(ops, binding, env)?;
                        env.insert(*slot, d);
                        out.push(stmt.clone());
                    }
                    Stmt::If { .. } => out.push(stmt.clone()),
                }
            }
            Ok(Expr::Block {
                stmts: out,
                value: deriv(ops, value, env)?.boxed(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brg_ir::Ty;
    use brg_ops::build_op_table;
    use brg_parse::parse_expr_text;
    use brg_rt::{GenCtx, RngStream};

    use crate::{run, Resolver};

    fn compile(src: &str) -> (OpTable, Expr) {
        let table = build_op_table();
        let node = parse_expr_text(src).unwrap();
        let (e, _) = Resolver::new(&table, 1.0).resolve(&node).unwrap();
        (table, e)
    }

    fn eval_at(table: &OpTable, e: &Expr, t: f32) -> f32 {
        let mut gcx = GenCtx::new(RngStream::from_seed(0));
        gcx.t = t;
        run(table, e, &mut gcx).num()
    }

    #[test]
    fn test_constant_derivative_is_exactly_zero() {
        let (table, e) = compile("add(3, mul(4, 5))");
        let d = differentiate(&table, &e).unwrap();
        for t in [0.0, 1.0, 17.5] {
            assert_eq!(eval_at(&table, &d, t), 0.0);
        }
    }

    #[test]
    fn test_time_derivative_is_one() {
        let (table, e) = compile("t");
        let d = differentiate(&table, &e).unwrap();
        assert_eq!(eval_at(&table, &d, 5.0), 1.0);
    }

    #[test]
    fn test_sin_chain_rule() {
        // d/dt sin(3t) = 3cos(3t)
        let (table, e) = compile("sin(mul(3, t))");
        let d = differentiate(&table, &e).unwrap();
        for t in [0.0, 0.5, 2.0] {
            let expected = 3.0 * (3.0_f32 * t).cos();
            assert!((eval_at(&table, &d, t) - expected).abs() < 1e-4);
        }
    }

    #[test]
    fn test_cos_rule_has_negative_sign() {
        // d/dt cos(t) = -sin(t)
        let (table, e) = compile("cos(t)");
        let d = differentiate(&table, &e).unwrap();
        let t = 1.2_f32;
        assert!((eval_at(&table, &d, t) + t.sin()).abs() < 1e-5);
    }

    #[test]
    fn test_product_rule() {
        // d/dt (t * sin(t)) = sin(t) + t cos(t)
        let (table, e) = compile("mul(t, sin(t))");
        let d = differentiate(&table, &e).unwrap();
        let t = 0.7_f32;
        let expected = t.sin() + t * t.cos();
        assert!((eval_at(&table, &d, t) - expected).abs() < 1e-5);
    }

    #[test]
    fn test_polynomial_power_rule() {
        // d/dt t^3 = 3t^2
        let (table, e) = compile("pow(t, 3)");
        let d = differentiate(&table, &e).unwrap();
        let t = 2.0_f32;
        assert!((eval_at(&table, &d, t) - 12.0).abs() < 1e-4);
    }

    #[test]
    fn test_quotient_rule() {
        // d/dt (1 / (t + 1)) = -1 / (t + 1)^2
        let (table, e) = compile("div(1, add(t, 1))");
        let d = differentiate(&table, &e).unwrap();
        let t = 1.0_f32;
        assert!((eval_at(&table, &d, t) + 0.25).abs() < 1e-5);
    }

    #[test]
    fn test_block_binding_derivative_flows_to_reads() {
        // x = t^2; d/dt (x + t) = 2t + 1
        let (table, e) = compile("block(x = mul(t, t), add(x, t))");
        let d = differentiate(&table, &e).unwrap();
        let t = 3.0_f32;
        assert!((eval_at(&table, &d, t) - 7.0).abs() < 1e-4);
    }

    #[test]
    fn test_min_differentiates_through_active_branch() {
        // d/dt min(t, 10 - t): slope +1 below the crossover, -1 above.
        let (table, e) = compile("min(t, sub(10, t))");
        let d = differentiate(&table, &e).unwrap();
        assert!((eval_at(&table, &d, 2.0) - 1.0).abs() < 1e-5);
        assert!((eval_at(&table, &d, 8.0) + 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_vec2_derivative_types() {
        let (table, e) = compile("polar(t, mul(90, t))");
        let d = differentiate(&table, &e).unwrap();
        let mut gcx = GenCtx::new(RngStream::from_seed(0));
        gcx.t = 0.0;
        let v = run(&table, &d, &mut gcx);
        assert_eq!(v.ty(), Ty::Vec2);
        // At t=0: d/dt (t*(cos 90t, sin 90t)) = (1, 0).
        let v = v.vec2();
        assert!((v.x - 1.0).abs() < 1e-4);
        assert!(v.y.abs() < 1e-4);
    }

    #[test]
    fn test_missing_rule_is_an_error_not_an_approximation() {
        let (table, e) = compile("atan2(t, 1)");
        let err = differentiate(&table, &e).unwrap_err();
        assert!(matches!(
            err,
            CompileError::NonDifferentiable { ref op } if op == "atan2"
        ));
    }

    #[test]
    fn test_rand_is_not_differentiable() {
        let (table, e) = compile("rand(0, t)");
        assert!(matches!(
            differentiate(&table, &e).unwrap_err(),
            CompileError::NonDifferentiable { .. }
        ));
    }
}
