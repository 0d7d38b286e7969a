//! The built-in operator set and its derivative rules.
//!
//! Derivative rules build symbolic trees by looking helper operators back
//! up in the table with statically known signatures; a rule for an overload
//! therefore encodes the chain/product/quotient rule for that overload's
//! types. Operators without a rule (comparisons, `atan2`, `floor`'s
//! non-differentiable cousins) simply leave `deriv` as `None`, which the
//! differentiation pass reports as a compile error.

use glam::Vec2;

use brg_ir::{Expr, Rv2, Ty, Val};

use crate::{DerivFn, OpDef, OpTable};

const DEG: f32 = std::f32::consts::PI / 180.0;

const N1: &[Ty] = &[Ty::Num];
const N2: &[Ty] = &[Ty::Num, Ty::Num];
const N3: &[Ty] = &[Ty::Num, Ty::Num, Ty::Num];
const N5: &[Ty] = &[Ty::Num, Ty::Num, Ty::Num, Ty::Num, Ty::Num];
const V1: &[Ty] = &[Ty::Vec2];
const V2: &[Ty] = &[Ty::Vec2, Ty::Vec2];
const SV: &[Ty] = &[Ty::Num, Ty::Vec2];
const B1: &[Ty] = &[Ty::Bool];
const B2: &[Ty] = &[Ty::Bool, Ty::Bool];
const R1: &[Ty] = &[Ty::Rv2];
const R2: &[Ty] = &[Ty::Rv2, Ty::Rv2];
const SR: &[Ty] = &[Ty::Num, Ty::Rv2];

// === eval fns ===

fn ev_add_nn(a: &[Val]) -> Val { Val::Num(a[0].num() + a[1].num()) }
fn ev_sub_nn(a: &[Val]) -> Val { Val::Num(a[0].num() - a[1].num()) }
fn ev_mul_nn(a: &[Val]) -> Val { Val::Num(a[0].num() * a[1].num()) }
fn ev_div_nn(a: &[Val]) -> Val { Val::Num(a[0].num() / a[1].num()) }
fn ev_neg_n(a: &[Val]) -> Val { Val::Num(-a[0].num()) }
fn ev_min_nn(a: &[Val]) -> Val { Val::Num(a[0].num().min(a[1].num())) }
fn ev_max_nn(a: &[Val]) -> Val { Val::Num(a[0].num().max(a[1].num())) }
fn ev_floor_n(a: &[Val]) -> Val { Val::Num(a[0].num().floor()) }
fn ev_pow_nn(a: &[Val]) -> Val { Val::Num(a[0].num().powf(a[1].num())) }
fn ev_ln_n(a: &[Val]) -> Val { Val::Num(a[0].num().ln()) }
fn ev_sin_n(a: &[Val]) -> Val { Val::Num(a[0].num().sin()) }
fn ev_cos_n(a: &[Val]) -> Val { Val::Num(a[0].num().cos()) }
fn ev_sindeg_n(a: &[Val]) -> Val { Val::Num((a[0].num() * DEG).sin()) }
fn ev_cosdeg_n(a: &[Val]) -> Val { Val::Num((a[0].num() * DEG).cos()) }
fn ev_atan2_nn(a: &[Val]) -> Val { Val::Num(a[0].num().atan2(a[1].num()).to_degrees()) }
fn ev_lerp_nnn(a: &[Val]) -> Val {
    let (x, y, s) = (a[0].num(), a[1].num(), a[2].num());
    Val::Num(x + (y - x) * s)
}
fn ev_eiosine_n(a: &[Val]) -> Val {
    let x = a[0].num();
    Val::Num(0.5 - 0.5 * (std::f32::consts::PI * x).cos())
}
fn ev_eosine_n(a: &[Val]) -> Val {
    let x = a[0].num();
    Val::Num((std::f32::consts::FRAC_PI_2 * x).sin())
}
fn ev_smoothstep_n(a: &[Val]) -> Val {
    let x = a[0].num();
    Val::Num(x * x * (3.0 - 2.0 * x))
}

fn ev_lt_nn(a: &[Val]) -> Val { Val::Bool(a[0].num() < a[1].num()) }
fn ev_gt_nn(a: &[Val]) -> Val { Val::Bool(a[0].num() > a[1].num()) }
fn ev_eq_nn(a: &[Val]) -> Val { Val::Bool((a[0].num() - a[1].num()).abs() < f32::EPSILON) }
fn ev_and_bb(a: &[Val]) -> Val { Val::Bool(a[0].boolean() && a[1].boolean()) }
fn ev_or_bb(a: &[Val]) -> Val { Val::Bool(a[0].boolean() || a[1].boolean()) }
fn ev_not_b(a: &[Val]) -> Val { Val::Bool(!a[0].boolean()) }

fn ev_pxy_nn(a: &[Val]) -> Val { Val::Vec2(Vec2::new(a[0].num(), a[1].num())) }
fn ev_px_v(a: &[Val]) -> Val { Val::Num(a[0].vec2().x) }
fn ev_py_v(a: &[Val]) -> Val { Val::Num(a[0].vec2().y) }
fn ev_pxyz_nnn(a: &[Val]) -> Val {
    Val::Vec3(glam::Vec3::new(a[0].num(), a[1].num(), a[2].num()))
}
fn ev_add_vv(a: &[Val]) -> Val { Val::Vec2(a[0].vec2() + a[1].vec2()) }
fn ev_sub_vv(a: &[Val]) -> Val { Val::Vec2(a[0].vec2() - a[1].vec2()) }
fn ev_smul_sv(a: &[Val]) -> Val { Val::Vec2(a[1].vec2() * a[0].num()) }
fn ev_polar_nn(a: &[Val]) -> Val {
    let (r, th) = (a[0].num(), a[1].num() * DEG);
    Val::Vec2(Vec2::new(r * th.cos(), r * th.sin()))
}
fn ev_rotate_nv(a: &[Val]) -> Val {
    let rad = a[0].num() * DEG;
    let (s, c) = rad.sin_cos();
    let v = a[1].vec2();
    Val::Vec2(Vec2::new(c * v.x - s * v.y, s * v.x + c * v.y))
}

fn ev_rv2_n5(a: &[Val]) -> Val {
    Val::Rv2(Rv2::new(a[0].num(), a[1].num(), a[2].num(), a[3].num(), a[4].num()))
}
fn ev_add_rr(a: &[Val]) -> Val { Val::Rv2(a[0].rv2() + a[1].rv2()) }
fn ev_rotate_nr(a: &[Val]) -> Val { Val::Rv2(a[1].rv2().rotate(a[0].num())) }
fn ev_rv2_resolve_r(a: &[Val]) -> Val { Val::Vec2(a[0].rv2().resolve()) }

fn ev_b2n_b(a: &[Val]) -> Val { Val::Num(f32::from(u8::from(a[0].boolean()))) }
fn ev_v2_widen_v(a: &[Val]) -> Val { Val::Vec3(a[0].vec2().extend(0.0)) }

// === derivative rules ===

fn num(x: f32) -> Expr {
    Expr::Const(Val::Num(x))
}

fn d_add_nn(t: &OpTable, _a: &[Expr], d: &[Expr]) -> Expr {
    t.call("add", N2, vec![d[0].clone(), d[1].clone()])
}

fn d_sub_nn(t: &OpTable, _a: &[Expr], d: &[Expr]) -> Expr {
    t.call("sub", N2, vec![d[0].clone(), d[1].clone()])
}

fn d_mul_nn(t: &OpTable, a: &[Expr], d: &[Expr]) -> Expr {
    t.call(
        "add",
        N2,
        vec![
            t.call("mul", N2, vec![d[0].clone(), a[1].clone()]),
            t.call("mul", N2, vec![a[0].clone(), d[1].clone()]),
        ],
    )
}

fn d_div_nn(t: &OpTable, a: &[Expr], d: &[Expr]) -> Expr {
    t.call(
        "div",
        N2,
        vec![
            t.call(
                "sub",
                N2,
                vec![
                    t.call("mul", N2, vec![d[0].clone(), a[1].clone()]),
                    t.call("mul", N2, vec![a[0].clone(), d[1].clone()]),
                ],
            ),
            t.call("mul", N2, vec![a[1].clone(), a[1].clone()]),
        ],
    )
}

fn d_neg_n(t: &OpTable, _a: &[Expr], d: &[Expr]) -> Expr {
    t.call("neg", N1, vec![d[0].clone()])
}

fn d_sin_n(t: &OpTable, a: &[Expr], d: &[Expr]) -> Expr {
    t.call(
        "mul",
        N2,
        vec![d[0].clone(), t.call("cos", N1, vec![a[0].clone()])],
    )
}

fn d_cos_n(t: &OpTable, a: &[Expr], d: &[Expr]) -> Expr {
    t.call(
        "neg",
        N1,
        vec![t.call(
            "mul",
            N2,
            vec![d[0].clone(), t.call("sin", N1, vec![a[0].clone()])],
        )],
    )
}

fn d_sindeg_n(t: &OpTable, a: &[Expr], d: &[Expr]) -> Expr {
    t.call(
        "mul",
        N2,
        vec![
            t.call("mul", N2, vec![num(DEG), d[0].clone()]),
            t.call("cosdeg", N1, vec![a[0].clone()]),
        ],
    )
}

fn d_cosdeg_n(t: &OpTable, a: &[Expr], d: &[Expr]) -> Expr {
    t.call(
        "neg",
        N1,
        vec![t.call(
            "mul",
            N2,
            vec![
                t.call("mul", N2, vec![num(DEG), d[0].clone()]),
                t.call("sindeg", N1, vec![a[0].clone()]),
            ],
        )],
    )
}

fn d_floor_n(_t: &OpTable, _a: &[Expr], _d: &[Expr]) -> Expr {
    num(0.0)
}

fn d_min_nn(t: &OpTable, a: &[Expr], d: &[Expr]) -> Expr {
    Expr::If {
        cond: t.call("lt", N2, vec![a[0].clone(), a[1].clone()]).boxed(),
        then: d[0].clone().boxed(),
        els: d[1].clone().boxed(),
    }
}

fn d_max_nn(t: &OpTable, a: &[Expr], d: &[Expr]) -> Expr {
    Expr::If {
        cond: t.call("gt", N2, vec![a[0].clone(), a[1].clone()]).boxed(),
        then: d[0].clone().boxed(),
        els: d[1].clone().boxed(),
    }
}

fn d_pow_nn(t: &OpTable, a: &[Expr], d: &[Expr]) -> Expr {
    // x^c with constant exponent: c * x^(c-1) * dx.
    if let Expr::Const(Val::Num(c)) = a[1] {
        return t.call(
            "mul",
            N2,
            vec![
                t.call(
                    "mul",
                    N2,
                    vec![num(c), t.call("pow", N2, vec![a[0].clone(), num(c - 1.0)])],
                ),
                d[0].clone(),
            ],
        );
    }
    // General case: y^z * (dz*ln(y) + z*dy/y).
    t.call(
        "mul",
        N2,
        vec![
            t.call("pow", N2, vec![a[0].clone(), a[1].clone()]),
            t.call(
                "add",
                N2,
                vec![
                    t.call(
                        "mul",
                        N2,
                        vec![d[1].clone(), t.call("ln", N1, vec![a[0].clone()])],
                    ),
                    t.call(
                        "div",
                        N2,
                        vec![
                            t.call("mul", N2, vec![a[1].clone(), d[0].clone()]),
                            a[0].clone(),
                        ],
                    ),
                ],
            ),
        ],
    )
}

fn d_lerp_nnn(t: &OpTable, a: &[Expr], d: &[Expr]) -> Expr {
    // d(x + (y-x)s) = dx + (dy-dx)s + (y-x)ds
    t.call(
        "add",
        N2,
        vec![
            d[0].clone(),
            t.call(
                "add",
                N2,
                vec![
                    t.call(
                        "mul",
                        N2,
                        vec![
                            t.call("sub", N2, vec![d[1].clone(), d[0].clone()]),
                            a[2].clone(),
                        ],
                    ),
                    t.call(
                        "mul",
                        N2,
                        vec![
                            t.call("sub", N2, vec![a[1].clone(), a[0].clone()]),
                            d[2].clone(),
                        ],
                    ),
                ],
            ),
        ],
    )
}

fn d_eiosine_n(t: &OpTable, a: &[Expr], d: &[Expr]) -> Expr {
    // d(0.5 - 0.5cos(pi x)) = 0.5pi sin(pi x) dx
    let pi = std::f32::consts::PI;
    t.call(
        "mul",
        N2,
        vec![
            t.call(
                "mul",
                N2,
                vec![
                    num(0.5 * pi),
                    t.call(
                        "sin",
                        N1,
                        vec![t.call("mul", N2, vec![num(pi), a[0].clone()])],
                    ),
                ],
            ),
            d[0].clone(),
        ],
    )
}

fn d_eosine_n(t: &OpTable, a: &[Expr], d: &[Expr]) -> Expr {
    // d(sin(pi/2 x)) = pi/2 cos(pi/2 x) dx
    let h = std::f32::consts::FRAC_PI_2;
    t.call(
        "mul",
        N2,
        vec![
            t.call(
                "mul",
                N2,
                vec![
                    num(h),
                    t.call("cos", N1, vec![t.call("mul", N2, vec![num(h), a[0].clone()])]),
                ],
            ),
            d[0].clone(),
        ],
    )
}

fn d_smoothstep_n(t: &OpTable, a: &[Expr], d: &[Expr]) -> Expr {
    // d(3x^2 - 2x^3) = (6x - 6x^2) dx
    t.call(
        "mul",
        N2,
        vec![
            t.call(
                "sub",
                N2,
                vec![
                    t.call("mul", N2, vec![num(6.0), a[0].clone()]),
                    t.call(
                        "mul",
                        N2,
                        vec![num(6.0), t.call("mul", N2, vec![a[0].clone(), a[0].clone()])],
                    ),
                ],
            ),
            d[0].clone(),
        ],
    )
}

fn d_pxy_nn(t: &OpTable, _a: &[Expr], d: &[Expr]) -> Expr {
    t.call("pxy", N2, vec![d[0].clone(), d[1].clone()])
}

fn d_add_vv(t: &OpTable, _a: &[Expr], d: &[Expr]) -> Expr {
    t.call("add", V2, vec![d[0].clone(), d[1].clone()])
}

fn d_sub_vv(t: &OpTable, _a: &[Expr], d: &[Expr]) -> Expr {
    t.call("sub", V2, vec![d[0].clone(), d[1].clone()])
}

fn d_smul_sv(t: &OpTable, a: &[Expr], d: &[Expr]) -> Expr {
    t.call(
        "add",
        V2,
        vec![
            t.call("smul", SV, vec![d[0].clone(), a[1].clone()]),
            t.call("smul", SV, vec![a[0].clone(), d[1].clone()]),
        ],
    )
}

fn d_polar_nn(t: &OpTable, a: &[Expr], d: &[Expr]) -> Expr {
    // polar(r, th) = r * (cosdeg th, sindeg th)
    // d = dr*(cosdeg th, sindeg th) + r*DEG*dth*(-sindeg th, cosdeg th)
    let dir = t.call(
        "pxy",
        N2,
        vec![
            t.call("cosdeg", N1, vec![a[1].clone()]),
            t.call("sindeg", N1, vec![a[1].clone()]),
        ],
    );
    let normal = t.call(
        "pxy",
        N2,
        vec![
            t.call(
                "neg",
                N1,
                vec![t.call("sindeg", N1, vec![a[1].clone()])],
            ),
            t.call("cosdeg", N1, vec![a[1].clone()]),
        ],
    );
    t.call(
        "add",
        V2,
        vec![
            t.call("smul", SV, vec![d[0].clone(), dir]),
            t.call(
                "smul",
                SV,
                vec![
                    t.call(
                        "mul",
                        N2,
                        vec![t.call("mul", N2, vec![num(DEG), a[0].clone()]), d[1].clone()],
                    ),
                    normal,
                ],
            ),
        ],
    )
}

// === registration ===

struct Reg<'t> {
    t: &'t mut OpTable,
}

impl Reg<'_> {
    #[allow(clippy::too_many_arguments)]
    fn op(
        &mut self,
        name: &'static str,
        params: &'static [Ty],
        param_names: &'static [&'static str],
        ret: Ty,
        eval: fn(&[Val]) -> Val,
        deriv: Option<DerivFn>,
        aliases: &[&'static str],
    ) {
        self.t.register(
            OpDef {
                name,
                params,
                param_names,
                ret,
                priority: 0,
                eval,
                deriv,
            },
            aliases,
        );
    }
}

/// Build the full built-in operator repository.
pub fn build_op_table() -> OpTable {
    let mut table = OpTable::new();
    let mut r = Reg { t: &mut table };

    // Arithmetic.
    r.op("add", N2, &["a", "b"], Ty::Num, ev_add_nn, Some(d_add_nn), &["sum"]);
    r.op("sub", N2, &["a", "b"], Ty::Num, ev_sub_nn, Some(d_sub_nn), &["minus"]);
    r.op("mul", N2, &["a", "b"], Ty::Num, ev_mul_nn, Some(d_mul_nn), &["times"]);
    r.op("div", N2, &["a", "b"], Ty::Num, ev_div_nn, Some(d_div_nn), &[]);
    r.op("neg", N1, &["x"], Ty::Num, ev_neg_n, Some(d_neg_n), &[]);
    r.op("min", N2, &["a", "b"], Ty::Num, ev_min_nn, Some(d_min_nn), &[]);
    r.op("max", N2, &["a", "b"], Ty::Num, ev_max_nn, Some(d_max_nn), &[]);
    r.op("floor", N1, &["x"], Ty::Num, ev_floor_n, Some(d_floor_n), &[]);
    r.op("pow", N2, &["x", "exp"], Ty::Num, ev_pow_nn, Some(d_pow_nn), &[]);
    r.op("ln", N1, &["x"], Ty::Num, ev_ln_n, None, &[]);

    // Trigonometry. Angles for the -deg family are in degrees, matching the
    // surface language; bare sin/cos are radians.
    r.op("sin", N1, &["x"], Ty::Num, ev_sin_n, Some(d_sin_n), &[]);
    r.op("cos", N1, &["x"], Ty::Num, ev_cos_n, Some(d_cos_n), &[]);
    r.op("sindeg", N1, &["x"], Ty::Num, ev_sindeg_n, Some(d_sindeg_n), &[]);
    r.op("cosdeg", N1, &["x"], Ty::Num, ev_cosdeg_n, Some(d_cosdeg_n), &[]);
    r.op("atan2", N2, &["y", "x"], Ty::Num, ev_atan2_nn, None, &[]);

    // Easing.
    r.op("lerp", N3, &["a", "b", "s"], Ty::Num, ev_lerp_nnn, Some(d_lerp_nnn), &[]);
    r.op("eiosine", N1, &["x"], Ty::Num, ev_eiosine_n, Some(d_eiosine_n), &[]);
    r.op("eosine", N1, &["x"], Ty::Num, ev_eosine_n, Some(d_eosine_n), &[]);
    r.op("smoothstep", N1, &["x"], Ty::Num, ev_smoothstep_n, Some(d_smoothstep_n), &[]);

    // Comparison and logic.
    r.op("lt", N2, &["a", "b"], Ty::Bool, ev_lt_nn, None, &[]);
    r.op("gt", N2, &["a", "b"], Ty::Bool, ev_gt_nn, None, &[]);
    r.op("eq", N2, &["a", "b"], Ty::Bool, ev_eq_nn, None, &[]);
    r.op("and", B2, &["a", "b"], Ty::Bool, ev_and_bb, None, &[]);
    r.op("or", B2, &["a", "b"], Ty::Bool, ev_or_bb, None, &[]);
    r.op("not", B1, &["x"], Ty::Bool, ev_not_b, None, &[]);

    // Vectors.
    r.op("pxy", N2, &["x", "y"], Ty::Vec2, ev_pxy_nn, Some(d_pxy_nn), &[]);
    r.op("px", V1, &["v"], Ty::Num, ev_px_v, None, &[]);
    r.op("py", V1, &["v"], Ty::Num, ev_py_v, None, &[]);
    r.op("pxyz", N3, &["x", "y", "z"], Ty::Vec3, ev_pxyz_nnn, None, &[]);
    r.op("add", V2, &["a", "b"], Ty::Vec2, ev_add_vv, Some(d_add_vv), &["sum"]);
    r.op("sub", V2, &["a", "b"], Ty::Vec2, ev_sub_vv, Some(d_sub_vv), &["minus"]);
    r.op("smul", SV, &["s", "v"], Ty::Vec2, ev_smul_sv, Some(d_smul_sv), &[]);
    r.op("polar", N2, &["r", "theta"], Ty::Vec2, ev_polar_nn, Some(d_polar_nn), &[]);
    r.op("rotate", SV, &["theta", "v"], Ty::Vec2, ev_rotate_nv, None, &[]);

    // Rotational offsets.
    r.op("rv2", N5, &["nx", "ny", "rx", "ry", "angle"], Ty::Rv2, ev_rv2_n5, None, &[]);
    r.op("add", R2, &["a", "b"], Ty::Rv2, ev_add_rr, None, &["sum"]);
    r.op("rotate", SR, &["theta", "rv"], Ty::Rv2, ev_rotate_nr, None, &[]);
    r.op("rv2-resolve", R1, &["rv"], Ty::Vec2, ev_rv2_resolve_r, None, &[]);

    // Implicit conversions (also callable directly).
    r.op("b2n", B1, &["b"], Ty::Num, ev_b2n_b, None, &[]);
    r.op("v2-widen", V1, &["v"], Ty::Vec3, ev_v2_widen_v, None, &[]);

    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_well_formed() {
        let t = build_op_table();
        assert!(!t.is_empty());
        // Every conversion the resolver may request is present.
        assert!(t.conversion(Ty::Bool, Ty::Num).is_some());
        assert!(t.conversion(Ty::Vec2, Ty::Vec3).is_some());
        assert!(t.conversion(Ty::Rv2, Ty::Vec2).is_some());
        assert!(t.conversion(Ty::Num, Ty::Vec2).is_none());
    }

    #[test]
    fn test_polar_eval() {
        let t = build_op_table();
        let id = t.lookup_exact("polar", N2).unwrap();
        let v = (t.def(id).eval)(&[Val::Num(2.0), Val::Num(90.0)]);
        let v = v.vec2();
        assert!(v.x.abs() < 1e-6);
        assert!((v.y - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_param_names_cover_params() {
        let t = build_op_table();
        for id in 0..t.len() {
            let def = t.def(brg_ir::OpId(u32::try_from(id).unwrap()));
            assert_eq!(
                def.params.len(),
                def.param_names.len(),
                "arity/name mismatch on `{}`",
                def.name
            );
        }
    }
}
