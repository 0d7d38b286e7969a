//! Structural output of the parser.

use brg_ir::{CallNode, Span};

/// A parsed script: an implicit root pattern holding phases in order.
#[derive(Clone, Debug, PartialEq)]
pub struct ScriptAst {
    pub phases: Vec<PhaseDecl>,
}

/// `phase <timeout> <props...>` followed by action blocks.
#[derive(Clone, Debug, PartialEq)]
pub struct PhaseDecl {
    /// Timeout in seconds; zero means no timeout.
    pub timeout: CallNode,
    pub props: Vec<PropDecl>,
    pub blocks: Vec<BlockDecl>,
    pub span: Span,
}

/// One `<name args...>` property group on a phase header.
#[derive(Clone, Debug, PartialEq)]
pub struct PropDecl {
    pub name: String,
    pub args: Vec<CallNode>,
    pub span: Span,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlockKind {
    /// `action block <wait>`: actions run in sequence.
    Sync,
    /// `action async <wait>`: actions run interleaved with waits,
    /// concurrently with sibling async blocks.
    Async,
}

/// An action list under a phase.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockDecl {
    pub kind: BlockKind,
    /// Delay in seconds before the block starts.
    pub wait: CallNode,
    pub actions: Vec<CallNode>,
    pub span: Span,
}
