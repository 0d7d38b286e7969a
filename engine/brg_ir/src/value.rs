//! Runtime values.

use glam::{Vec2, Vec3};
use std::fmt;

use crate::Ty;

/// Rotational offset: a nonrotational xy offset, a rotational xy offset,
/// and an angle in degrees. Resolves to a plain `Vec2` by rotating the
/// rotational part by the angle and summing.
#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct Rv2 {
    pub nx: f32,
    pub ny: f32,
    pub rx: f32,
    pub ry: f32,
    /// Degrees.
    pub angle: f32,
}

impl Rv2 {
    pub const ZERO: Rv2 = Rv2 {
        nx: 0.0,
        ny: 0.0,
        rx: 0.0,
        ry: 0.0,
        angle: 0.0,
    };

    pub const fn new(nx: f32, ny: f32, rx: f32, ry: f32, angle: f32) -> Self {
        Rv2 { nx, ny, rx, ry, angle }
    }

    /// Collapse to a flat 2-vector.
    pub fn resolve(self) -> Vec2 {
        let rad = self.angle.to_radians();
        let (s, c) = rad.sin_cos();
        Vec2::new(
            self.nx + c * self.rx - s * self.ry,
            self.ny + s * self.rx + c * self.ry,
        )
    }

    /// Add an angle in degrees, leaving the offsets untouched.
    #[must_use]
    pub fn rotate(self, degrees: f32) -> Rv2 {
        Rv2 {
            angle: self.angle + degrees,
            ..self
        }
    }
}

impl std::ops::Add for Rv2 {
    type Output = Rv2;
    fn add(self, o: Rv2) -> Rv2 {
        Rv2 {
            nx: self.nx + o.nx,
            ny: self.ny + o.ny,
            rx: self.rx + o.rx,
            ry: self.ry + o.ry,
            angle: self.angle + o.angle,
        }
    }
}

/// A dynamically tagged runtime value.
///
/// The resolver guarantees delegates are type-correct before execution, so
/// the coercion accessors here only ever see the tag they expect; the
/// fallbacks exist to keep the interpreter total.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Val {
    Num(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Bool(bool),
    Rv2(Rv2),
}

impl Val {
    pub fn ty(&self) -> Ty {
        match self {
            Val::Num(_) => Ty::Num,
            Val::Vec2(_) => Ty::Vec2,
            Val::Vec3(_) => Ty::Vec3,
            Val::Bool(_) => Ty::Bool,
            Val::Rv2(_) => Ty::Rv2,
        }
    }

    #[inline]
    pub fn num(&self) -> f32 {
        match self {
            Val::Num(x) => *x,
            Val::Bool(b) => f32::from(u8::from(*b)),
            _ => 0.0,
        }
    }

    #[inline]
    pub fn vec2(&self) -> Vec2 {
        match self {
            Val::Vec2(v) => *v,
            Val::Rv2(r) => r.resolve(),
            _ => Vec2::ZERO,
        }
    }

    #[inline]
    pub fn vec3(&self) -> Vec3 {
        match self {
            Val::Vec3(v) => *v,
            Val::Vec2(v) => v.extend(0.0),
            _ => Vec3::ZERO,
        }
    }

    #[inline]
    pub fn boolean(&self) -> bool {
        match self {
            Val::Bool(b) => *b,
            Val::Num(x) => *x != 0.0,
            _ => false,
        }
    }

    #[inline]
    pub fn rv2(&self) -> Rv2 {
        match self {
            Val::Rv2(r) => *r,
            _ => Rv2::ZERO,
        }
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Num(x) => write!(f, "{x}"),
            Val::Vec2(v) => write!(f, "[{}, {}]", v.x, v.y),
            Val::Vec3(v) => write!(f, "[{}, {}, {}]", v.x, v.y, v.z),
            Val::Bool(b) => write!(f, "{b}"),
            Val::Rv2(r) => write!(f, "[[{}, {}, {}, {}, {}]]", r.nx, r.ny, r.rx, r.ry, r.angle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rv2_resolve_plain_offset() {
        let r = Rv2::new(1.0, 2.0, 0.0, 0.0, 90.0);
        let v = r.resolve();
        assert!((v.x - 1.0).abs() < 1e-6);
        assert!((v.y - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_rv2_resolve_rotates_rotational_part() {
        // rx=1 rotated by 90 degrees lands on +y.
        let r = Rv2::new(0.0, 0.0, 1.0, 0.0, 90.0);
        let v = r.resolve();
        assert!(v.x.abs() < 1e-6);
        assert!((v.y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_bool_widens_to_num() {
        assert_eq!(Val::Bool(true).num(), 1.0);
        assert_eq!(Val::Bool(false).num(), 0.0);
    }
}
