//! Untyped call-trees: the parser's output, the resolver's input.

use smallvec::SmallVec;

use crate::Span;

/// One node of the untyped tree. Immutable once built; discarded after the
/// resolver has produced a typed expression from it.
#[derive(Clone, Debug, PartialEq)]
pub struct CallNode {
    pub kind: CallKind,
    /// Set when the argument was written as `name = expr`.
    pub key: Option<String>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CallKind {
    /// Numeric literal.
    Num(f32),
    /// Boolean literal.
    Bool(bool),
    /// `[x, y]` or `[x, y, z]`.
    VecLit(Box<SmallVec<[CallNode; 3]>>),
    /// `[[nx, ny, rx, ry, angle]]`.
    Rv2Lit(Box<SmallVec<[CallNode; 5]>>),
    /// Named call; a bare identifier is a zero-argument call.
    Call {
        name: String,
        args: Vec<CallNode>,
    },
}

impl CallNode {
    pub fn num(x: f32, span: Span) -> Self {
        CallNode { kind: CallKind::Num(x), key: None, span }
    }

    pub fn boolean(b: bool, span: Span) -> Self {
        CallNode { kind: CallKind::Bool(b), key: None, span }
    }

    pub fn call(name: impl Into<String>, args: Vec<CallNode>, span: Span) -> Self {
        CallNode {
            kind: CallKind::Call { name: name.into(), args },
            key: None,
            span,
        }
    }

    /// Bare identifier (zero-argument call).
    pub fn ident(name: impl Into<String>, span: Span) -> Self {
        Self::call(name, Vec::new(), span)
    }

    #[must_use]
    pub fn keyed(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// The call name, if this node is a call.
    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            CallKind::Call { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Literal number, if this node is one.
    pub fn as_num(&self) -> Option<f32> {
        match self.kind {
            CallKind::Num(x) => Some(x),
            _ => None,
        }
    }
}
