//! Type tags for pattern-language values.

use std::fmt;

/// The closed set of value types the operator repository deals in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Ty {
    /// Scalar number.
    Num,
    /// 2-vector (positions, velocities).
    Vec2,
    /// 3-vector.
    Vec3,
    /// Boolean.
    Bool,
    /// Rotational offset: nonrotational xy + rotational xy + angle.
    Rv2,
}

impl Ty {
    /// Short lowercase name used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            Ty::Num => "num",
            Ty::Vec2 => "vec2",
            Ty::Vec3 => "vec3",
            Ty::Bool => "bool",
            Ty::Rv2 => "rv2",
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
