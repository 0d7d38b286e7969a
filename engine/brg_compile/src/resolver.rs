//! Bottom-up type resolution: [`CallNode`] → typed [`Expr`].
//!
//! Arguments resolve first, then the call itself resolves against the
//! operator repository; implicit casts from the resolution's conversion
//! plan are wrapped around arguments in place. A handful of special forms
//! (`t`, `i`, `rand`, `once`, `if`, `block`, `dl`) lower directly to IR
//! nodes instead of table operators.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use brg_ir::{CallKind, CallNode, Expr, Slot, Span, Stmt, Ty, Val};
use brg_ops::{OpError, OpTable};

use crate::CompileError;

pub struct Resolver<'t> {
    ops: &'t OpTable,
    /// Difficulty multiplier, read at resolve time by the `dl` form.
    difficulty: f32,
    scopes: Vec<FxHashMap<String, (Slot, Ty)>>,
    next_slot: u32,
}

impl<'t> Resolver<'t> {
    pub fn new(ops: &'t OpTable, difficulty: f32) -> Self {
        Resolver {
            ops,
            difficulty,
            scopes: Vec::new(),
            next_slot: 0,
        }
    }

    /// Resolve a call-tree into a typed expression and its type.
    pub fn resolve(&mut self, node: &CallNode) -> Result<(Expr, Ty), CompileError> {
        match &node.kind {
            CallKind::Num(x) => Ok((Expr::Const(Val::Num(*x)), Ty::Num)),
            CallKind::Bool(b) => Ok((Expr::Const(Val::Bool(*b)), Ty::Bool)),
            CallKind::VecLit(comps) => self.vec_lit(comps, node.span),
            CallKind::Rv2Lit(comps) => self.rv2_lit(comps, node.span),
            CallKind::Call { name, args } => self.call(name, args, node.span),
        }
    }

    fn vec_lit(&mut self, comps: &[CallNode], _span: Span) -> Result<(Expr, Ty), CompileError> {
        let mut parts = Vec::with_capacity(comps.len());
        for comp in comps {
            parts.push(self.numeric(comp)?);
        }
        let (name, sig, ty): (&str, &[Ty], Ty) = if comps.len() == 2 {
            ("pxy", &[Ty::Num, Ty::Num], Ty::Vec2)
        } else {
            ("pxyz", &[Ty::Num, Ty::Num, Ty::Num], Ty::Vec3)
        };
        Ok((self.ops.call(name, sig, parts), ty))
    }

    fn rv2_lit(&mut self, comps: &[CallNode], _span: Span) -> Result<(Expr, Ty), CompileError> {
        let mut parts = Vec::with_capacity(5);
        for comp in comps {
            parts.push(self.numeric(comp)?);
        }
        let sig = [Ty::Num; 5];
        Ok((self.ops.call("rv2", &sig, parts), Ty::Rv2))
    }

    /// Resolve and require (or convert to) a numeric expression.
    fn numeric(&mut self, node: &CallNode) -> Result<Expr, CompileError> {
        let (e, ty) = self.resolve(node)?;
        self.coerce(e, ty, Ty::Num, node.span)
    }

    /// Wrap in an implicit conversion, or fail with a type mismatch.
    pub(crate) fn coerce(
        &self,
        e: Expr,
        from: Ty,
        to: Ty,
        span: Span,
    ) -> Result<Expr, CompileError> {
        if from == to {
            return Ok(e);
        }
        match self.ops.conversion(from, to) {
            Some(op) => Ok(Expr::Call { op, args: vec![e] }),
            None => Err(CompileError::TypeMismatch {
                expected: to,
                found: from,
                span,
            }),
        }
    }

    fn call(&mut self, name: &str, args: &[CallNode], span: Span) -> Result<(Expr, Ty), CompileError> {
        // Scope lookup shadows operators, innermost first.
        if args.is_empty() {
            for scope in self.scopes.iter().rev() {
                if let Some((slot, ty)) = scope.get(name) {
                    return Ok((Expr::Local(*slot), *ty));
                }
            }
        }
        match (name, args.len()) {
            ("t" | "time", 0) => return Ok((Expr::Time, Ty::Num)),
            ("i", 0) => return Ok((Expr::LoopIndex, Ty::Num)),
            ("p-idx", 0) => return Ok((Expr::ParentIndex, Ty::Num)),
            ("dl", 0) => return Ok((Expr::Const(Val::Num(self.difficulty)), Ty::Num)),
            ("rand", 2) => {
                let lo = self.numeric(&args[0])?;
                let hi = self.numeric(&args[1])?;
                return Ok((
                    Expr::Rand {
                        lo: lo.boxed(),
                        hi: hi.boxed(),
                    },
                    Ty::Num,
                ));
            }
            ("once", 2) | ("resample", 2) => return self.hoist(name, args, span),
            ("if", 3) => return self.conditional(args, span),
            ("block", _) if !args.is_empty() => return self.block(args, span),
            _ => {}
        }
        self.table_call(name, args, span)
    }

    fn hoist(&mut self, name: &str, args: &[CallNode], _span: Span) -> Result<(Expr, Ty), CompileError> {
        let key = match &args[0].kind {
            CallKind::Call { name, args } if args.is_empty() => name.clone(),
            _ => return Err(CompileError::BadHoistKey { span: args[0].span }),
        };
        let (inner, ty) = self.resolve(&args[1])?;
        let inner = inner.boxed();
        let e = if name == "once" {
            Expr::Hoist { key, inner }
        } else {
            Expr::Resample { key, inner }
        };
        Ok((e, ty))
    }

    fn conditional(&mut self, args: &[CallNode], span: Span) -> Result<(Expr, Ty), CompileError> {
        let (cond, cond_ty) = self.resolve(&args[0])?;
        if cond_ty != Ty::Bool {
            return Err(CompileError::TypeMismatch {
                expected: Ty::Bool,
                found: cond_ty,
                span: args[0].span,
            });
        }
        let (then, then_ty) = self.resolve(&args[1])?;
        let (els, els_ty) = self.resolve(&args[2])?;
        let (then, els, ty) = if then_ty == els_ty {
            (then, els, then_ty)
        } else if let Ok(converted) = self.coerce(els.clone(), els_ty, then_ty, args[2].span) {
            (then, converted, then_ty)
        } else if let Ok(converted) = self.coerce(then.clone(), then_ty, els_ty, args[1].span) {
            (converted, els, els_ty)
        } else {
            return Err(CompileError::BranchMismatch {
                then: then_ty,
                els: els_ty,
                span,
            });
        };
        Ok((
            Expr::If {
                cond: cond.boxed(),
                then: then.boxed(),
                els: els.boxed(),
            },
            ty,
        ))
    }

    /// `block(x = e1, y = e2, value)`: bindings then a final value.
    fn block(&mut self, args: &[CallNode], span: Span) -> Result<(Expr, Ty), CompileError> {
        let (value_node, bindings) = match args.split_last() {
            Some(split) => split,
            None => return Err(CompileError::BadBlockBinding { span }),
        };
        self.scopes.push(FxHashMap::default());
        let result = (|| {
            let mut stmts = Vec::with_capacity(bindings.len());
            for binding in bindings {
                let Some(key) = binding.key.clone() else {
                    return Err(CompileError::BadBlockBinding { span: binding.span });
                };
                let (e, ty) = self.resolve(binding)?;
                let slot = Slot(self.next_slot);
                self.next_slot += 1;
                stmts.push(Stmt::Let(slot, e));
                // Guaranteed non-empty: we pushed in `block`.
                if let Some(scope) = self.scopes.last_mut() {
                    scope.insert(key, (slot, ty));
                }
            }
            let (value, ty) = self.resolve(value_node)?;
            Ok((
                Expr::Block {
                    stmts,
                    value: value.boxed(),
                },
                ty,
            ))
        })();
        self.scopes.pop();
        result
    }

    fn table_call(
        &mut self,
        name: &str,
        args: &[CallNode],
        span: Span,
    ) -> Result<(Expr, Ty), CompileError> {
        let ordered = self.reorder_named(name, args, span)?;
        let mut exprs = Vec::with_capacity(ordered.len());
        let mut types: SmallVec<[Ty; 4]> = SmallVec::with_capacity(ordered.len());
        for node in &ordered {
            let (e, ty) = self.resolve(node)?;
            exprs.push(e);
            types.push(ty);
        }
        let resolution = self
            .ops
            .resolve(name, &types)
            .map_err(|err| CompileError::Resolve { err, span })?;
        for (e, cast) in exprs.iter_mut().zip(&resolution.casts) {
            if let Some(conv) = cast {
                let inner = std::mem::replace(e, Expr::Time);
                *e = Expr::Call {
                    op: *conv,
                    args: vec![inner],
                };
            }
        }
        let ret = self.ops.def(resolution.op).ret;
        Ok((
            Expr::Call {
                op: resolution.op,
                args: exprs,
            },
            ret,
        ))
    }

    /// Rebind `key = value` arguments positionally against the first
    /// candidate overload whose declared parameter names cover the keys.
    fn reorder_named(
        &self,
        name: &str,
        args: &[CallNode],
        span: Span,
    ) -> Result<Vec<CallNode>, CompileError> {
        if args.iter().all(|a| a.key.is_none()) {
            return Ok(args.to_vec());
        }
        'cands: for &id in self.ops.candidates(name) {
            let def = self.ops.def(id);
            if def.params.len() != args.len() {
                continue;
            }
            let mut ordered: Vec<Option<CallNode>> = vec![None; args.len()];
            let mut unkeyed = Vec::new();
            for arg in args {
                match &arg.key {
                    Some(key) => {
                        let Some(pos) = def.param_names.iter().position(|p| p == key) else {
                            continue 'cands;
                        };
                        ordered[pos] = Some(arg.clone());
                    }
                    None => unkeyed.push(arg.clone()),
                }
            }
            let mut unkeyed = unkeyed.into_iter();
            for slot in &mut ordered {
                if slot.is_none() {
                    *slot = unkeyed.next();
                }
            }
            if ordered.iter().all(Option::is_some) {
                return Ok(ordered.into_iter().flatten().collect());
            }
        }
        let key = args
            .iter()
            .find_map(|a| a.key.clone())
            .unwrap_or_default();
        Err(CompileError::Resolve {
            err: OpError::UnknownNamedArg {
                name: name.to_owned(),
                key,
            },
            span,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brg_ops::build_op_table;
    use brg_parse::parse_expr_text;

    fn resolve(src: &str) -> Result<(Expr, Ty), CompileError> {
        let node = parse_expr_text(src).map_err(CompileError::from)?;
        Resolver::new(&build_op_table(), 1.0).resolve(&node)
    }

    #[test]
    fn test_literal_types() {
        assert_eq!(resolve("2").unwrap().1, Ty::Num);
        assert_eq!(resolve("true").unwrap().1, Ty::Bool);
        assert_eq!(resolve("[1, 2]").unwrap().1, Ty::Vec2);
        assert_eq!(resolve("[1, 2, 3]").unwrap().1, Ty::Vec3);
        assert_eq!(resolve("[[0, 0, 1, 0, 30]]").unwrap().1, Ty::Rv2);
    }

    #[test]
    fn test_special_forms() {
        assert!(matches!(resolve("t").unwrap().0, Expr::Time));
        assert!(matches!(resolve("i").unwrap().0, Expr::LoopIndex));
        assert!(matches!(resolve("rand(0, 1)").unwrap().0, Expr::Rand { .. }));
        assert!(matches!(
            resolve("once(speed, rand(1, 2))").unwrap().0,
            Expr::Hoist { .. }
        ));
    }

    #[test]
    fn test_unknown_operator_error() {
        let err = resolve("warble(1)").unwrap_err();
        assert!(matches!(
            err,
            CompileError::Resolve {
                err: OpError::Unknown { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_block_scopes_and_slots() {
        let (e, ty) = resolve("block(x = rand(0, 1), add(x, x))").unwrap();
        assert_eq!(ty, Ty::Num);
        let Expr::Block { stmts, .. } = e else {
            panic!("expected a block");
        };
        assert_eq!(stmts.len(), 1);
    }

    #[test]
    fn test_block_requires_bindings() {
        let err = resolve("block(rand(0, 1), 2)").unwrap_err();
        assert!(matches!(err, CompileError::BadBlockBinding { .. }));
    }

    #[test]
    fn test_if_requires_bool_condition() {
        let err = resolve("if(1, 2, 3)").unwrap_err();
        assert!(matches!(
            err,
            CompileError::TypeMismatch {
                expected: Ty::Bool,
                ..
            }
        ));
    }

    #[test]
    fn test_if_branch_conversion() {
        // Bool else-branch widens to num to match the then-branch.
        let (_, ty) = resolve("if(lt(1, 2), 5, true)").unwrap();
        assert_eq!(ty, Ty::Num);
    }

    #[test]
    fn test_named_args_rebind() {
        let (a, _) = resolve("polar(theta = 90, r = 2)").unwrap();
        let (b, _) = resolve("polar(2, 90)").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unknown_named_arg() {
        let err = resolve("polar(radius = 2, theta = 90)").unwrap_err();
        assert!(matches!(
            err,
            CompileError::Resolve {
                err: OpError::UnknownNamedArg { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_difficulty_read_at_resolve_time() {
        let node = parse_expr_text("mul(2, dl)").unwrap();
        let table = build_op_table();
        let (e, _) = Resolver::new(&table, 3.0).resolve(&node).unwrap();
        let Expr::Call { args, .. } = e else {
            panic!("expected a call");
        };
        assert_eq!(args[1], Expr::Const(Val::Num(3.0)));
    }
}
