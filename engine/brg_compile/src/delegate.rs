//! Compiled delegate shapes.
//!
//! A [`Compiled`] is the cached unit: a linearized expression plus the
//! operator table it was resolved against. Typed views ([`Gcxf<T>`]) and
//! the velocity-step shape are thin wrappers sharing the same `Rc`, so a
//! cache hit hands back a referentially identical delegate.

use std::marker::PhantomData;
use std::rc::Rc;

use glam::{Vec2, Vec3};

use brg_ir::{Expr, Rv2, Ty, Val};
use brg_ops::OpTable;
use brg_rt::GenCtx;

use crate::interp;

/// A compiled, linearized expression program.
pub struct Compiled {
    pub expr: Expr,
    pub ty: Ty,
    pub(crate) ops: Rc<OpTable>,
}

impl Compiled {
    pub fn eval(&self, gcx: &mut GenCtx) -> Val {
        interp::run(&self.ops, &self.expr, gcx)
    }
}

/// Extraction of a typed result from a runtime value.
pub trait FromVal: Sized {
    const TY: Ty;
    fn from_val(v: Val) -> Self;
}

impl FromVal for f32 {
    const TY: Ty = Ty::Num;
    fn from_val(v: Val) -> Self {
        v.num()
    }
}

impl FromVal for Vec2 {
    const TY: Ty = Ty::Vec2;
    fn from_val(v: Val) -> Self {
        v.vec2()
    }
}

impl FromVal for Vec3 {
    const TY: Ty = Ty::Vec3;
    fn from_val(v: Val) -> Self {
        v.vec3()
    }
}

impl FromVal for bool {
    const TY: Ty = Ty::Bool;
    fn from_val(v: Val) -> Self {
        v.boolean()
    }
}

impl FromVal for Rv2 {
    const TY: Ty = Ty::Rv2;
    fn from_val(v: Val) -> Self {
        v.rv2()
    }
}

/// A typed function of the generation context: the only shapes the
/// executor is allowed to invoke (plus [`VelocityStep`]).
pub struct Gcxf<T> {
    inner: Rc<Compiled>,
    _marker: PhantomData<T>,
}

impl<T: FromVal> Gcxf<T> {
    pub(crate) fn new(inner: Rc<Compiled>) -> Self {
        Gcxf {
            inner,
            _marker: PhantomData,
        }
    }

    pub fn call(&self, gcx: &mut GenCtx) -> T {
        T::from_val(self.inner.eval(gcx))
    }

    /// Referential identity with another delegate (the caching contract).
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Clone for Gcxf<T> {
    fn clone(&self) -> Self {
        Gcxf {
            inner: Rc::clone(&self.inner),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Gcxf<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gcxf").field("ty", &self.inner.ty).finish_non_exhaustive()
    }
}

/// Movement state advanced by a [`VelocityStep`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MoveState {
    pub pos: Vec2,
    /// Seconds since this mover started.
    pub t: f32,
}

impl MoveState {
    pub fn at(pos: Vec2) -> Self {
        MoveState { pos, t: 0.0 }
    }
}

/// Velocity-step delegate: given prior state and a dt, advance the state.
/// Built by symbolically differentiating a position expression, so the
/// integrated path follows the authored curve's velocity exactly.
#[derive(Clone)]
pub struct VelocityStep {
    vel: Rc<Compiled>,
}

impl VelocityStep {
    pub(crate) fn new(vel: Rc<Compiled>) -> Self {
        VelocityStep { vel }
    }

    pub fn step(&self, state: &mut MoveState, gcx: &mut GenCtx, dt: f32) {
        gcx.t = state.t;
        let v = self.vel.eval(gcx).vec2();
        state.pos += v * dt;
        state.t += dt;
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.vel, &other.vel)
    }
}

impl std::fmt::Debug for VelocityStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VelocityStep").finish_non_exhaustive()
    }
}
