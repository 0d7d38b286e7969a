//! Shared IR types for the Barrage pattern engine.
//!
//! Everything downstream of the lexer speaks these types: source spans,
//! untyped call-trees produced by the parser, type tags, runtime values,
//! and the typed expression tree the compiler lowers call-trees into.

mod call;
mod expr;
mod span;
mod ty;
mod value;

pub use call::{CallKind, CallNode};
pub use expr::{Expr, OpId, Slot, Stmt};
pub use span::Span;
pub use ty::Ty;
pub use value::{Rv2, Val};
