//! Structured error codes.

use std::fmt;

/// Stable, searchable error codes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Unexpected token / malformed syntax.
    E1001,
    /// Unresolved macro or macro parameter name.
    E1002,
    /// Macro arity mismatch or illegal partial invocation.
    E1003,
    /// Unclosed delimiter.
    E1004,
    /// Unknown operator name.
    E2001,
    /// No overload matches the given arity/types.
    E2002,
    /// Ambiguous overload (priority tie).
    E2003,
    /// Unknown named argument.
    E2004,
    /// Operator has no derivative rule where one is required.
    E3001,
    /// Runtime pattern step fault.
    E4001,
    /// Pool lifecycle misuse (release of a non-active instance).
    E4002,
    /// Non-droppable coroutines survived a forced shutdown.
    E4003,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::E1001 => "E1001",
            ErrorCode::E1002 => "E1002",
            ErrorCode::E1003 => "E1003",
            ErrorCode::E1004 => "E1004",
            ErrorCode::E2001 => "E2001",
            ErrorCode::E2002 => "E2002",
            ErrorCode::E2003 => "E2003",
            ErrorCode::E2004 => "E2004",
            ErrorCode::E3001 => "E3001",
            ErrorCode::E4001 => "E4001",
            ErrorCode::E4002 => "E4002",
            ErrorCode::E4003 => "E4003",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
