//! Parse error types.

use std::fmt;

use brg_diagnostic::{Diagnostic, ErrorCode};
use brg_ir::Span;

/// A parse error with the span of the minimal failing fragment.
#[derive(Clone, Debug, PartialEq)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ParseErrorKind {
    /// A character the lexer could not handle.
    Lex { text: String },
    /// Wrong token at this position.
    Unexpected {
        found: String,
        expected: &'static str,
    },
    /// Ran out of input.
    UnexpectedEof { expected: &'static str },
    /// `$name` with no macro of that name in scope.
    UnknownMacro { name: String },
    /// `%x` or `$%x` referencing a parameter the macro does not declare.
    UnknownMacroParam { macro_name: String, param: String },
    /// Wrong number of macro arguments after defaults are applied.
    MacroArity {
        name: String,
        required: usize,
        provided: usize,
    },
    /// A `!$` placeholder survived to the parser.
    StrayPlaceholder,
    /// A partially applied macro reached the output unfilled.
    PartialUnfilled {
        name: String,
        required: usize,
        provided: usize,
    },
    /// Macro bodies kept invoking macros past the recursion cap.
    ExpansionTooDeep,
    /// Reinvocation target was not a partial macro application.
    ReinvokeNotPartial { macro_name: String, param: String },
    /// Vector literal with a length other than 2 or 3 (or 5 for `[[..]]`).
    VectorArity { len: usize },
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, span: Span) -> Self {
        ParseError { kind, span }
    }

    pub fn message(&self) -> String {
        match &self.kind {
            ParseErrorKind::Lex { text } => {
                format!("the character `{text}` could not be handled")
            }
            ParseErrorKind::Unexpected { found, expected } => {
                format!("expected {expected}, found `{found}`")
            }
            ParseErrorKind::UnexpectedEof { expected } => {
                format!("unexpected end of script, expected {expected}")
            }
            ParseErrorKind::UnknownMacro { name } => {
                format!("no macro exists with name `{name}`")
            }
            ParseErrorKind::UnknownMacroParam { macro_name, param } => {
                format!("macro `{macro_name}` has no parameter `%{param}`")
            }
            ParseErrorKind::MacroArity {
                name,
                required,
                provided,
            } => {
                format!("macro `{name}` requires {required} arguments ({provided} provided)")
            }
            ParseErrorKind::StrayPlaceholder => {
                "found an unbound macro placeholder (!$) in the output".to_owned()
            }
            ParseErrorKind::PartialUnfilled {
                name,
                required,
                provided,
            } => {
                format!(
                    "macro `{name}` was partially invoked with {provided} realized arguments ({required} required)"
                )
            }
            ParseErrorKind::ExpansionTooDeep => "macro expansion exceeded the depth limit".to_owned(),
            ParseErrorKind::ReinvokeNotPartial { macro_name, param } => {
                format!(
                    "macro argument `{macro_name}.%{param}` must be a partial macro invocation"
                )
            }
            ParseErrorKind::VectorArity { len } => {
                format!("vector literals take 2 or 3 components, found {len}")
            }
        }
    }

    pub fn code(&self) -> ErrorCode {
        match &self.kind {
            ParseErrorKind::Lex { .. }
            | ParseErrorKind::Unexpected { .. }
            | ParseErrorKind::UnexpectedEof { .. }
            | ParseErrorKind::VectorArity { .. } => ErrorCode::E1001,
            ParseErrorKind::UnknownMacro { .. }
            | ParseErrorKind::UnknownMacroParam { .. } => ErrorCode::E1002,
            ParseErrorKind::MacroArity { .. }
            | ParseErrorKind::StrayPlaceholder
            | ParseErrorKind::PartialUnfilled { .. }
            | ParseErrorKind::ExpansionTooDeep
            | ParseErrorKind::ReinvokeNotPartial { .. } => ErrorCode::E1003,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::error(self.code(), self.message()).with_label(self.span, "here")
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.message(), self.span)
    }
}

impl std::error::Error for ParseError {}
