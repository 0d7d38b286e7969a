//! Compiler for the Barrage pattern language.
//!
//! Untyped call-trees are resolved bottom-up against the operator
//! repository into a typed expression tree, two transformation passes run
//! over that tree (symbolic differentiation for velocity-from-position
//! delegates, linearization to flatten nested block/conditional
//! sub-expressions), and the result is wrapped in an interpreter-backed
//! delegate. Delegates are cached by normalized source text: compiling the
//! same text twice returns the same shared instance without re-parsing.

mod cache;
mod delegate;
mod derivative;
mod error;
mod interp;
mod linearize;
mod resolver;

pub use cache::{normalize_source, Compiler};
pub use delegate::{Compiled, FromVal, Gcxf, MoveState, VelocityStep};
pub use derivative::differentiate;
pub use error::CompileError;
pub use interp::run;
pub use linearize::linearize;
pub use resolver::Resolver;
