//! Diagnostics for script compilation and engine lifecycle warnings.
//!
//! Error codes are partitioned by pipeline stage:
//! - `E1xxx`: parse errors (syntax, macros)
//! - `E2xxx`: resolution errors (unknown operators, overloads)
//! - `E3xxx`: transformation errors (differentiation, linearization)
//! - `E4xxx`: runtime and lifecycle diagnostics

mod diagnostic;
mod error_code;

pub use diagnostic::{Diagnostic, Label, Severity};
pub use error_code::ErrorCode;
