//! Parser for the Barrage pattern language.
//!
//! Pipeline: lex → macro expansion (textual, over the token stream) →
//! structural parse into a [`ScriptAst`] of phases, properties, and action
//! blocks, with all argument positions held as untyped [`brg_ir::CallNode`]
//! trees for the resolver.
//!
//! The surface language is word-oriented: newlines separate statements but
//! carry no other meaning, so the §-example one-liner
//! `phase 0 <hp 1000> action block 0 fire-straight(speed=2)` and its
//! multi-line layout parse identically.

mod ast;
mod error;
mod macros;
mod parser;

pub use ast::{BlockDecl, BlockKind, PhaseDecl, PropDecl, ScriptAst};
pub use error::{ParseError, ParseErrorKind};
pub use parser::{parse_expr_text, parse_script};
