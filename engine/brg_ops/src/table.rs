//! The registration table and overload selection.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use brg_ir::{Expr, OpId, Ty, Val};

/// Builds the symbolic derivative of a call from its arguments and their
/// derivatives. Rules are written per-overload, so each rule knows the
/// concrete types it needs when it looks helper operators back up.
pub type DerivFn = fn(&OpTable, args: &[Expr], dargs: &[Expr]) -> Expr;

/// One registered overload.
pub struct OpDef {
    /// Canonical name. Aliases map to the same [`OpId`].
    pub name: &'static str,
    pub params: &'static [Ty],
    /// Declared parameter names, used to rebind `key = value` arguments.
    pub param_names: &'static [&'static str],
    pub ret: Ty,
    /// Higher wins when several candidates survive a selection stage.
    pub priority: i32,
    pub eval: fn(&[Val]) -> Val,
    /// Symbolic derivative with respect to the time variable; absent means
    /// differentiating through this operator is a compile error.
    pub deriv: Option<DerivFn>,
}

/// A successful overload resolution: the chosen overload plus a per-argument
/// conversion plan (`None` = use as-is).
#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
    pub op: OpId,
    pub casts: SmallVec<[Option<OpId>; 4]>,
}

/// Resolution failure, span-free; the compiler attaches source context.
#[derive(Clone, Debug, PartialEq)]
pub enum OpError {
    Unknown {
        name: String,
    },
    NoOverload {
        name: String,
        args: Vec<Ty>,
    },
    Ambiguous {
        name: String,
        priority: i32,
    },
    UnknownNamedArg {
        name: String,
        key: String,
    },
}

impl OpError {
    pub fn message(&self) -> String {
        match self {
            OpError::Unknown { name } => format!("unknown operator `{name}`"),
            OpError::NoOverload { name, args } => {
                let tys: Vec<&str> = args.iter().map(|t| t.name()).collect();
                format!(
                    "no overload of `{name}` accepts ({})",
                    tys.join(", ")
                )
            }
            OpError::Ambiguous { name, priority } => {
                format!("ambiguous call to `{name}`: multiple candidates at priority {priority}")
            }
            OpError::UnknownNamedArg { name, key } => {
                format!("`{name}` has no parameter named `{key}`")
            }
        }
    }
}

/// The operator repository. Built once at engine startup; immutable while
/// compilation runs against it.
pub struct OpTable {
    defs: Vec<OpDef>,
    names: FxHashMap<&'static str, SmallVec<[OpId; 4]>>,
}

impl OpTable {
    pub fn new() -> Self {
        OpTable {
            defs: Vec::new(),
            names: FxHashMap::default(),
        }
    }

    /// Register an overload under its canonical name plus aliases.
    pub fn register(&mut self, def: OpDef, aliases: &[&'static str]) -> OpId {
        let id = OpId(u32::try_from(self.defs.len()).unwrap_or(u32::MAX));
        self.names.entry(def.name).or_default().push(id);
        for alias in aliases {
            self.names.entry(alias).or_default().push(id);
        }
        self.defs.push(def);
        id
    }

    #[inline]
    pub fn def(&self, id: OpId) -> &OpDef {
        &self.defs[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// All overloads registered under a name or alias.
    pub fn candidates(&self, name: &str) -> &[OpId] {
        self.names.get(name).map_or(&[], |v| v.as_slice())
    }

    /// Exact name + signature lookup. Used by derivative rules and the
    /// conversion table, where the signature is known statically.
    pub fn lookup_exact(&self, name: &str, params: &[Ty]) -> Option<OpId> {
        self.candidates(name)
            .iter()
            .copied()
            .find(|id| self.def(*id).params == params)
    }

    /// Build a call expression against an exactly-known overload.
    ///
    /// Derivative rules only reference builtins, so a miss here is a
    /// table-construction bug; it degrades to a zero constant, which the
    /// derivative correctness tests would immediately expose.
    pub fn call(&self, name: &str, sig: &[Ty], args: Vec<Expr>) -> Expr {
        match self.lookup_exact(name, sig) {
            Some(op) => Expr::Call { op, args },
            None => Expr::Const(Val::Num(0.0)),
        }
    }

    /// The implicit conversion from `from` to `to`, if the bounded set
    /// declares one.
    pub fn conversion(&self, from: Ty, to: Ty) -> Option<OpId> {
        let (name, sig): (&str, &[Ty]) = match (from, to) {
            (Ty::Bool, Ty::Num) => ("b2n", &[Ty::Bool]),
            (Ty::Vec2, Ty::Vec3) => ("v2-widen", &[Ty::Vec2]),
            (Ty::Rv2, Ty::Vec2) => ("rv2-resolve", &[Ty::Rv2]),
            _ => return None,
        };
        self.lookup_exact(name, sig)
    }

    /// Resolve `name` against argument types, trying exact matches before
    /// implicit conversions, breaking ties by priority.
    pub fn resolve(&self, name: &str, args: &[Ty]) -> Result<Resolution, OpError> {
        let candidates = self.candidates(name);
        if candidates.is_empty() {
            return Err(OpError::Unknown {
                name: name.to_owned(),
            });
        }

        let exact: Vec<OpId> = candidates
            .iter()
            .copied()
            .filter(|id| self.def(*id).params == args)
            .collect();
        if !exact.is_empty() {
            return self.pick(name, exact.into_iter().map(|id| (id, SmallVec::new())));
        }

        let mut converted: Vec<(OpId, SmallVec<[Option<OpId>; 4]>)> = Vec::new();
        'cands: for &id in candidates {
            let def = self.def(id);
            if def.params.len() != args.len() {
                continue;
            }
            let mut casts = SmallVec::new();
            for (have, want) in args.iter().zip(def.params) {
                if have == want {
                    casts.push(None);
                } else if let Some(conv) = self.conversion(*have, *want) {
                    casts.push(Some(conv));
                } else {
                    continue 'cands;
                }
            }
            converted.push((id, casts));
        }
        if converted.is_empty() {
            return Err(OpError::NoOverload {
                name: name.to_owned(),
                args: args.to_vec(),
            });
        }
        self.pick(name, converted.into_iter())
    }

    fn pick(
        &self,
        name: &str,
        candidates: impl Iterator<Item = (OpId, SmallVec<[Option<OpId>; 4]>)>,
    ) -> Result<Resolution, OpError> {
        let mut best: Option<(i32, Resolution)> = None;
        let mut tied = false;
        for (id, casts) in candidates {
            let priority = self.def(id).priority;
            match &best {
                Some((p, _)) if *p > priority => {}
                Some((p, _)) if *p == priority => tied = true,
                _ => {
                    best = Some((priority, Resolution { op: id, casts }));
                    tied = false;
                }
            }
        }
        match best {
            Some((priority, _)) if tied => Err(OpError::Ambiguous {
                name: name.to_owned(),
                priority,
            }),
            Some((_, res)) => Ok(res),
            None => Err(OpError::Unknown {
                name: name.to_owned(),
            }),
        }
    }
}

impl Default for OpTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_op_table;

    fn dummy(_: &[Val]) -> Val {
        Val::Num(0.0)
    }

    #[test]
    fn test_exact_beats_converted() {
        let t = build_op_table();
        // `add(num, num)` resolves with no casts.
        let r = t.resolve("add", &[Ty::Num, Ty::Num]).unwrap();
        assert!(r.casts.iter().all(Option::is_none));
    }

    #[test]
    fn test_alias_resolves_to_same_overload() {
        let t = build_op_table();
        let a = t.resolve("add", &[Ty::Num, Ty::Num]).unwrap();
        let b = t.resolve("sum", &[Ty::Num, Ty::Num]).unwrap();
        assert_eq!(a.op, b.op);
    }

    #[test]
    fn test_bool_widens_through_conversion() {
        let t = build_op_table();
        let r = t.resolve("add", &[Ty::Bool, Ty::Num]).unwrap();
        assert!(r.casts[0].is_some());
        assert!(r.casts[1].is_none());
        let conv = t.def(r.casts[0].unwrap());
        assert_eq!(conv.name, "b2n");
    }

    #[test]
    fn test_rv2_falls_through_to_vec2() {
        let t = build_op_table();
        let r = t.resolve("add", &[Ty::Rv2, Ty::Vec2]).unwrap();
        assert_eq!(t.def(r.casts[0].unwrap()).name, "rv2-resolve");
    }

    #[test]
    fn test_unknown_operator() {
        let t = build_op_table();
        assert!(matches!(
            t.resolve("no-such-op", &[Ty::Num]),
            Err(OpError::Unknown { .. })
        ));
    }

    #[test]
    fn test_no_overload_reports_arg_types() {
        let t = build_op_table();
        let err = t.resolve("sin", &[Ty::Vec2]).unwrap_err();
        assert!(matches!(err, OpError::NoOverload { ref args, .. } if args == &[Ty::Vec2]));
    }

    #[test]
    fn test_priority_breaks_overlap() {
        let mut t = OpTable::new();
        t.register(
            OpDef {
                name: "clash",
                params: &[Ty::Num],
                param_names: &["x"],
                ret: Ty::Num,
                priority: 1,
                eval: dummy,
                deriv: None,
            },
            &[],
        );
        let winner = t.register(
            OpDef {
                name: "clash",
                params: &[Ty::Num],
                param_names: &["x"],
                ret: Ty::Num,
                priority: 5,
                eval: dummy,
                deriv: None,
            },
            &[],
        );
        let r = t.resolve("clash", &[Ty::Num]).unwrap();
        assert_eq!(r.op, winner);
    }

    #[test]
    fn test_priority_tie_is_ambiguous() {
        let mut t = OpTable::new();
        for _ in 0..2 {
            t.register(
                OpDef {
                    name: "clash",
                    params: &[Ty::Num],
                    param_names: &["x"],
                    ret: Ty::Num,
                    priority: 3,
                    eval: dummy,
                    deriv: None,
                },
                &[],
            );
        }
        assert!(matches!(
            t.resolve("clash", &[Ty::Num]),
            Err(OpError::Ambiguous { priority: 3, .. })
        ));
    }
}
