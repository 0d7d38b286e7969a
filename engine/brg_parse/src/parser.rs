//! Structural parser: expanded tokens → [`ScriptAst`] / [`CallNode`] trees.

use smallvec::SmallVec;

use brg_ir::{CallKind, CallNode, Span};
use brg_lexer::{lex, Token, TokenKind};

use crate::macros::expand;
use crate::{BlockDecl, BlockKind, ParseError, ParseErrorKind, PhaseDecl, PropDecl, ScriptAst};

/// Parse a full script into phases with properties and action blocks.
pub fn parse_script(src: &str) -> Result<ScriptAst, ParseError> {
    let mut p = Parser::from_source(src)?;
    p.script()
}

/// Parse a single expression (used for standalone delegate compilation).
pub fn parse_expr_text(src: &str) -> Result<CallNode, ParseError> {
    let mut p = Parser::from_source(src)?;
    p.skip_newlines();
    let expr = p.expr()?;
    p.skip_newlines();
    if let Some(t) = p.peek() {
        return Err(ParseError::new(
            ParseErrorKind::Unexpected {
                found: t.text.clone(),
                expected: "end of expression",
            },
            t.span,
        ));
    }
    Ok(expr)
}

struct Parser {
    toks: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn from_source(src: &str) -> Result<Self, ParseError> {
        let raw = lex(src)
            .map_err(|e| ParseError::new(ParseErrorKind::Lex { text: e.text }, e.span))?;
        Ok(Parser {
            toks: expand(raw)?,
            pos: 0,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.toks.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn last_span(&self) -> Span {
        self.toks.last().map_or(Span::DUMMY, |t| t.span)
    }

    fn skip_newlines(&mut self) {
        while self.peek().is_some_and(|t| t.kind == TokenKind::Newline) {
            self.pos += 1;
        }
    }

    fn at_ident(&self, text: &str) -> bool {
        self.peek()
            .is_some_and(|t| t.kind == TokenKind::Ident && t.text == text)
    }

    fn expect(&mut self, kind: TokenKind, expected: &'static str) -> Result<Token, ParseError> {
        match self.next() {
            Some(t) if t.kind == kind => Ok(t),
            Some(t) => Err(ParseError::new(
                ParseErrorKind::Unexpected {
                    found: t.text.clone(),
                    expected,
                },
                t.span,
            )),
            None => Err(ParseError::new(
                ParseErrorKind::UnexpectedEof { expected },
                self.last_span(),
            )),
        }
    }

    /// `script := (phase-decl)*`; statements before any `phase` header form
    /// an implicit zero-timeout phase, so action-only snippets stay legal.
    fn script(&mut self) -> Result<ScriptAst, ParseError> {
        let mut phases = Vec::new();
        self.skip_newlines();
        if self.peek().is_some() && !self.at_ident("phase") {
            phases.push(self.phase_body(CallNode::num(0.0, Span::DUMMY), Span::DUMMY)?);
        }
        while self.peek().is_some() {
            let header = self.expect(TokenKind::Ident, "`phase`")?;
            if header.text != "phase" {
                return Err(ParseError::new(
                    ParseErrorKind::Unexpected {
                        found: header.text,
                        expected: "`phase`",
                    },
                    header.span,
                ));
            }
            self.skip_newlines();
            let timeout = self.expr()?;
            phases.push(self.phase_body(timeout, header.span)?);
        }
        Ok(ScriptAst { phases })
    }

    /// Properties and blocks up to the next `phase` header or EOF.
    fn phase_body(&mut self, timeout: CallNode, start: Span) -> Result<PhaseDecl, ParseError> {
        let mut props = Vec::new();
        let mut blocks: Vec<BlockDecl> = Vec::new();
        let mut span = start.merge(timeout.span);
        loop {
            self.skip_newlines();
            let Some(tok) = self.peek() else { break };
            match tok.kind {
                TokenKind::LAngle => {
                    let prop = self.prop()?;
                    span = span.merge(prop.span);
                    props.push(prop);
                }
                TokenKind::Ident if tok.text == "phase" => break,
                TokenKind::Ident if tok.text == "action" => {
                    let block = self.block_header()?;
                    span = span.merge(block.span);
                    blocks.push(block);
                }
                _ => {
                    let action = self.action_call()?;
                    span = span.merge(action.span);
                    if blocks.is_empty() {
                        // A bare action with no `action` header runs as an
                        // immediate sync block.
                        blocks.push(BlockDecl {
                            kind: BlockKind::Sync,
                            wait: CallNode::num(0.0, action.span),
                            actions: Vec::new(),
                            span: action.span,
                        });
                    }
                    // The loop above guarantees a block exists here.
                    if let Some(last) = blocks.last_mut() {
                        last.span = last.span.merge(action.span);
                        last.actions.push(action);
                    }
                }
            }
        }
        Ok(PhaseDecl {
            timeout,
            props,
            blocks,
            span,
        })
    }

    /// `<name args...>`
    fn prop(&mut self) -> Result<PropDecl, ParseError> {
        let open = self.expect(TokenKind::LAngle, "`<`")?;
        let name = self.expect(TokenKind::Ident, "a property name")?;
        let mut args = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek() {
                Some(t) if t.kind == TokenKind::RAngle => break,
                Some(_) => args.push(self.expr()?),
                None => {
                    return Err(ParseError::new(
                        ParseErrorKind::UnexpectedEof { expected: "`>` to close the property" },
                        self.last_span(),
                    ))
                }
            }
        }
        let close = self.expect(TokenKind::RAngle, "`>`")?;
        Ok(PropDecl {
            name: name.text,
            args,
            span: open.span.merge(close.span),
        })
    }

    /// `action block <wait>` or `action async <wait>`
    fn block_header(&mut self) -> Result<BlockDecl, ParseError> {
        let action = self.expect(TokenKind::Ident, "`action`")?;
        let kind_tok = self.expect(TokenKind::Ident, "`block` or `async`")?;
        let kind = match kind_tok.text.as_str() {
            "block" => BlockKind::Sync,
            "async" => BlockKind::Async,
            _ => {
                return Err(ParseError::new(
                    ParseErrorKind::Unexpected {
                        found: kind_tok.text,
                        expected: "`block` or `async`",
                    },
                    kind_tok.span,
                ))
            }
        };
        self.skip_newlines();
        let wait = self.expr()?;
        let span = action.span.merge(wait.span);
        Ok(BlockDecl {
            kind,
            wait,
            actions: Vec::new(),
            span,
        })
    }

    /// An action line is a call; literals are not actions.
    fn action_call(&mut self) -> Result<CallNode, ParseError> {
        let expr = self.expr()?;
        match expr.kind {
            CallKind::Call { .. } => Ok(expr),
            _ => Err(ParseError::new(
                ParseErrorKind::Unexpected {
                    found: "a literal".to_owned(),
                    expected: "an action call",
                },
                expr.span,
            )),
        }
    }

    /// `expr := number | bool | vector | rv2 | call`
    fn expr(&mut self) -> Result<CallNode, ParseError> {
        let Some(tok) = self.peek().cloned() else {
            return Err(ParseError::new(
                ParseErrorKind::UnexpectedEof { expected: "an expression" },
                self.last_span(),
            ));
        };
        match tok.kind {
            TokenKind::Number => {
                self.next();
                // The lexer's regex guarantees this parses.
                let value = tok.text.parse::<f32>().unwrap_or(0.0);
                Ok(CallNode::num(value, tok.span))
            }
            TokenKind::True => {
                self.next();
                Ok(CallNode::boolean(true, tok.span))
            }
            TokenKind::False => {
                self.next();
                Ok(CallNode::boolean(false, tok.span))
            }
            TokenKind::LBracket => self.vector(),
            TokenKind::Ident => self.call(),
            _ => Err(ParseError::new(
                ParseErrorKind::Unexpected {
                    found: tok.text,
                    expected: "an expression",
                },
                tok.span,
            )),
        }
    }

    /// `[x, y]`, `[x, y, z]`, or `[[nx, ny, rx, ry, angle]]`.
    fn vector(&mut self) -> Result<CallNode, ParseError> {
        let open = self.expect(TokenKind::LBracket, "`[`")?;
        if self.peek().is_some_and(|t| t.kind == TokenKind::LBracket) {
            self.next();
            let comps = self.comma_exprs(TokenKind::RBracket)?;
            self.expect(TokenKind::RBracket, "`]`")?;
            let close = self.expect(TokenKind::RBracket, "`]]`")?;
            let span = open.span.merge(close.span);
            if comps.len() != 5 {
                return Err(ParseError::new(
                    ParseErrorKind::VectorArity { len: comps.len() },
                    span,
                ));
            }
            return Ok(CallNode {
                kind: CallKind::Rv2Lit(Box::new(SmallVec::from_vec(comps))),
                key: None,
                span,
            });
        }
        let comps = self.comma_exprs(TokenKind::RBracket)?;
        let close = self.expect(TokenKind::RBracket, "`]`")?;
        let span = open.span.merge(close.span);
        if comps.len() != 2 && comps.len() != 3 {
            return Err(ParseError::new(
                ParseErrorKind::VectorArity { len: comps.len() },
                span,
            ));
        }
        Ok(CallNode {
            kind: CallKind::VecLit(Box::new(SmallVec::from_vec(comps))),
            key: None,
            span,
        })
    }

    /// `name`, `name(args)`, args admitting `key = expr`.
    fn call(&mut self) -> Result<CallNode, ParseError> {
        let name = self.expect(TokenKind::Ident, "a call name")?;
        let mut span = name.span;
        let mut args = Vec::new();
        if self.peek().is_some_and(|t| t.kind == TokenKind::LParen) {
            self.next();
            loop {
                self.skip_newlines();
                if self.peek().is_some_and(|t| t.kind == TokenKind::RParen) {
                    break;
                }
                args.push(self.arg()?);
                self.skip_newlines();
                if self.peek().is_some_and(|t| t.kind == TokenKind::Comma) {
                    self.next();
                }
            }
            let close = self.expect(TokenKind::RParen, "`)`")?;
            span = span.merge(close.span);
        }
        Ok(CallNode::call(name.text, args, span))
    }

    /// One argument: `expr` or `key = expr`.
    fn arg(&mut self) -> Result<CallNode, ParseError> {
        if self.peek().is_some_and(|t| t.kind == TokenKind::Ident)
            && self
                .toks
                .get(self.pos + 1)
                .is_some_and(|t| t.kind == TokenKind::Eq)
        {
            let key = self.expect(TokenKind::Ident, "an argument name")?;
            self.expect(TokenKind::Eq, "`=`")?;
            let value = self.expr()?;
            return Ok(value.keyed(key.text));
        }
        self.expr()
    }

    fn comma_exprs(&mut self, terminator: TokenKind) -> Result<Vec<CallNode>, ParseError> {
        let mut out = Vec::new();
        loop {
            self.skip_newlines();
            if self.peek().is_some_and(|t| t.kind == terminator) {
                break;
            }
            out.push(self.expr()?);
            self.skip_newlines();
            if self.peek().is_some_and(|t| t.kind == TokenKind::Comma) {
                self.next();
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_example_scenario_shape() {
        let ast = parse_script("phase 0 <hp 1000> action block 0 fire-straight(speed=2)").unwrap();
        assert_eq!(ast.phases.len(), 1);
        let phase = &ast.phases[0];
        assert_eq!(phase.timeout.as_num(), Some(0.0));
        assert_eq!(phase.props.len(), 1);
        assert_eq!(phase.props[0].name, "hp");
        assert_eq!(phase.props[0].args[0].as_num(), Some(1000.0));
        assert_eq!(phase.blocks.len(), 1);
        assert_eq!(phase.blocks[0].kind, BlockKind::Sync);
        assert_eq!(phase.blocks[0].actions.len(), 1);
        let action = &phase.blocks[0].actions[0];
        assert_eq!(action.name(), Some("fire-straight"));
    }

    #[test]
    fn test_layout_insensitive() {
        // Identical structure whether written on one line or spread out;
        // only spans differ.
        fn shape(ast: &ScriptAst) -> Vec<(String, usize, usize)> {
            ast.phases
                .iter()
                .map(|p| {
                    let name = p.props.first().map(|pr| pr.name.clone()).unwrap_or_default();
                    (name, p.blocks.len(), p.blocks.iter().map(|b| b.actions.len()).sum())
                })
                .collect()
        }
        let one_line = parse_script("phase 0 <hp 1000> action block 0 fire-straight(speed=2)").unwrap();
        let multi_line = parse_script(
            "phase 0\n  <hp 1000>\n  action block 0\n    fire-straight(speed=2)\n",
        )
        .unwrap();
        assert_eq!(shape(&one_line), shape(&multi_line));
    }

    #[test]
    fn test_named_arg_key() {
        let ast = parse_script("fire-straight(speed=2, angle=45)").unwrap();
        let action = &ast.phases[0].blocks[0].actions[0];
        let CallKind::Call { args, .. } = &action.kind else {
            panic!("expected a call");
        };
        assert_eq!(args[0].key.as_deref(), Some("speed"));
        assert_eq!(args[1].key.as_deref(), Some("angle"));
    }

    #[test]
    fn test_vector_literals() {
        let node = parse_expr_text("[1, 2]").unwrap();
        assert!(matches!(node.kind, CallKind::VecLit(ref v) if v.len() == 2));
        let node = parse_expr_text("[[0, 1, 2, 0, 30]]").unwrap();
        assert!(matches!(node.kind, CallKind::Rv2Lit(ref v) if v.len() == 5));
    }

    #[test]
    fn test_vector_arity_error() {
        let err = parse_expr_text("[1, 2, 3, 4]").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::VectorArity { len: 4 }));
    }

    #[test]
    fn test_async_blocks_group_actions() {
        let ast = parse_script(
            "phase 30 action async 0 fire-straight(speed=1) wait(10) fire-straight(speed=2) \
             action async 1 fire-straight(speed=3)",
        )
        .unwrap();
        let phase = &ast.phases[0];
        assert_eq!(phase.blocks.len(), 2);
        assert_eq!(phase.blocks[0].kind, BlockKind::Async);
        assert_eq!(phase.blocks[0].actions.len(), 3);
        assert_eq!(phase.blocks[1].actions.len(), 1);
    }

    #[test]
    fn test_macro_feeds_parser() {
        let ast = parse_script(
            "!{ volley(s) fire-straight(speed=%s) fire-straight(speed=%s) !} phase 0 $volley(2)",
        )
        .unwrap();
        assert_eq!(ast.phases[0].blocks[0].actions.len(), 2);
    }

    #[test]
    fn test_error_quotes_offender() {
        let err = parse_script("phase 0 $missing(1)").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::UnknownMacro { ref name } if name == "missing"));
    }
}
