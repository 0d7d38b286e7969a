//! Operator repository: a registration table of typed numeric/vector
//! functions, resolved by name (or alias) + argument types.
//!
//! Overload selection is: exact-arity exact-type match first; failing that,
//! a bounded set of implicit conversions is applied per argument
//! (bool → num as 0/1, vec2 → vec3 zero-z widen, rv2 → vec2 fallthrough
//! projection). Whenever more than one candidate survives a stage, the one
//! with the highest declared priority wins; a tie at the top is an
//! ambiguity error, never an arbitrary pick.

mod builtins;
mod table;

pub use builtins::build_op_table;
pub use table::{DerivFn, OpDef, OpError, OpTable, Resolution};
