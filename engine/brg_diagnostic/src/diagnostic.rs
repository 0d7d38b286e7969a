//! Diagnostic construction and plain-text rendering.

use std::fmt;

use brg_ir::Span;

use crate::ErrorCode;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A labeled source location.
#[derive(Clone, Debug, PartialEq)]
pub struct Label {
    pub span: Span,
    pub message: String,
}

/// A renderable diagnostic: code, message, primary labeled span, notes.
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: ErrorCode,
    pub message: String,
    pub primary: Option<Label>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            code,
            message: message.into(),
            primary: None,
            notes: Vec::new(),
        }
    }

    pub fn warning(code: ErrorCode, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            code,
            message: message.into(),
            primary: None,
            notes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_label(mut self, span: Span, message: impl Into<String>) -> Self {
        self.primary = Some(Label {
            span,
            message: message.into(),
        });
        self
    }

    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Render against the source, quoting the labeled sub-expression text.
    pub fn render(&self, src: &str) -> String {
        let mut out = format!("{self}");
        if let Some(label) = &self.primary {
            let quoted = label.span.slice(src);
            if !quoted.is_empty() {
                out.push_str(&format!("\n  --> `{}`: {}", quoted, label.message));
            } else {
                out.push_str(&format!("\n  --> {}", label.message));
            }
        }
        for note in &self.notes {
            out.push_str(&format!("\n  note: {note}"));
        }
        out
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sev = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{sev}[{}]: {}", self.code, self.message)
    }
}
