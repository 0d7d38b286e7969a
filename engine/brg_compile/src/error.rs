//! Compile error types.

use thiserror::Error;

use brg_diagnostic::{Diagnostic, ErrorCode};
use brg_ir::{Span, Ty};
use brg_ops::OpError;
use brg_parse::ParseError;

/// Any failure between source text and a finished delegate. Fatal to the
/// compile unit only; the engine keeps running other patterns.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("{}", .err.message())]
    Resolve { err: OpError, span: Span },

    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: Ty,
        found: Ty,
        span: Span,
    },

    #[error("branches of `if` have incompatible types {then} and {els}")]
    BranchMismatch { then: Ty, els: Ty, span: Span },

    #[error("hoist key must be a bare name")]
    BadHoistKey { span: Span },

    #[error("`block` arguments before the final value must be `name = expr` bindings")]
    BadBlockBinding { span: Span },

    #[error("operator `{op}` has no derivative rule")]
    NonDifferentiable { op: String },

    #[error("delegate must produce {expected}, but the expression produces {found}")]
    WrongReturnType { expected: Ty, found: Ty },
}

impl CompileError {
    /// The span of the offending sub-expression, when one is known.
    pub fn span(&self) -> Option<Span> {
        match self {
            CompileError::Parse(e) => Some(e.span),
            CompileError::Resolve { span, .. }
            | CompileError::TypeMismatch { span, .. }
            | CompileError::BranchMismatch { span, .. }
            | CompileError::BadHoistKey { span }
            | CompileError::BadBlockBinding { span } => Some(*span),
            CompileError::NonDifferentiable { .. } | CompileError::WrongReturnType { .. } => None,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            CompileError::Parse(e) => e.code(),
            CompileError::Resolve { err, .. } => match err {
                OpError::Unknown { .. } => ErrorCode::E2001,
                OpError::NoOverload { .. } => ErrorCode::E2002,
                OpError::Ambiguous { .. } => ErrorCode::E2003,
                OpError::UnknownNamedArg { .. } => ErrorCode::E2004,
            },
            CompileError::TypeMismatch { .. }
            | CompileError::BranchMismatch { .. }
            | CompileError::BadHoistKey { .. }
            | CompileError::BadBlockBinding { .. }
            | CompileError::WrongReturnType { .. } => ErrorCode::E2002,
            CompileError::NonDifferentiable { .. } => ErrorCode::E3001,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        let d = Diagnostic::error(self.code(), self.to_string());
        match self.span() {
            Some(span) => d.with_label(span, "in this sub-expression"),
            None => d,
        }
    }
}
