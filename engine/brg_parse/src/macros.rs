//! Textual macro expansion over the token stream.
//!
//! Macros are defined with `!{ name(prm, prm2 default...) body !}` or the
//! single-line form `!!{ name body`, invoked with `$name(args...)`, and
//! reference their parameters as `%prm`. An invocation whose argument is
//! the placeholder `!$` produces a partial application; a macro body can
//! finish a partial received as a parameter with `$%prm(remaining...)`.
//!
//! Expansion happens before any call-tree construction, so the parser only
//! ever sees plain tokens. Spliced tokens take the span of the invocation
//! site; preserving body-internal spans would misattribute errors to the
//! definition rather than the use.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use brg_ir::Span;
use brg_lexer::{Token, TokenKind};

use crate::{ParseError, ParseErrorKind};

/// Invocation-depth cap. Pattern scripts use shallow helper macros; blowing
/// past this means a self-invoking definition.
const MAX_DEPTH: usize = 64;

#[derive(Clone, Debug)]
enum Seg {
    Tok(Token),
    Partial(Partial),
}

#[derive(Clone, Debug)]
struct Partial {
    def: Rc<MacroDef>,
    /// One entry per macro parameter; placeholder entries are exactly
    /// `[Tok(!$)]`.
    args: Vec<Vec<Seg>>,
    span: Span,
}

impl Partial {
    fn placeholder_count(&self) -> usize {
        self.args.iter().filter(|a| is_placeholder(a)).count()
    }

    fn realized_count(&self) -> usize {
        self.args.len() - self.placeholder_count()
    }
}

#[derive(Debug)]
struct MacroDef {
    name: String,
    params: Vec<Param>,
    body: Vec<Token>,
}

#[derive(Debug)]
struct Param {
    name: String,
    default: Option<Vec<Token>>,
}

fn is_placeholder(arg: &[Seg]) -> bool {
    matches!(arg, [Seg::Tok(t)] if t.kind == TokenKind::MacroPlaceholder)
}

/// Expand all macro definitions and invocations, returning a plain token
/// stream for the structural parser.
pub(crate) fn expand(tokens: Vec<Token>) -> Result<Vec<Token>, ParseError> {
    let mut exp = Expander {
        table: FxHashMap::default(),
    };
    let segs = exp.scan(&tokens, 0)?;
    flatten(segs)
}

struct Cursor<'t> {
    toks: &'t [Token],
    pos: usize,
}

impl<'t> Cursor<'t> {
    fn peek(&self) -> Option<&'t Token> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> Option<&'t Token> {
        let t = self.toks.get(self.pos);
        self.pos += t.is_some() as usize;
        t
    }

    fn last_span(&self) -> Span {
        self.toks.last().map_or(Span::DUMMY, |t| t.span)
    }

    fn expect(&mut self, kind: TokenKind, expected: &'static str) -> Result<&'t Token, ParseError> {
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
}

struct Expander {
    table: FxHashMap<String, Rc<MacroDef>>,
}

impl Expander {
    /// Scan a top-level token run: collect definitions, expand invocations,
    /// pass everything else through.
    fn scan(&mut self, toks: &[Token], depth: usize) -> Result<Vec<Seg>, ParseError> {
        let mut cur = Cursor { toks, pos: 0 };
        let mut out = Vec::new();
        while let Some(tok) = cur.peek() {
            match tok.kind {
                TokenKind::MacroOpen => {
                    cur.next();
                    self.parse_def(&mut cur)?;
                }
                TokenKind::MacroOlOpen => {
                    cur.next();
                    self.parse_ol_def(&mut cur)?;
                }
                TokenKind::MacroInvoke => {
                    cur.next();
                    out.extend(self.invoke_at(&mut cur, depth)?);
                }
                _ => {
                    out.push(Seg::Tok(tok.clone()));
                    cur.next();
                }
            }
        }
        Ok(out)
    }

    /// `!{ name(prm, prm2 default...) body !}`; the open token is consumed.
    fn parse_def(&mut self, cur: &mut Cursor<'_>) -> Result<(), ParseError> {
        let name = cur.expect(TokenKind::Ident, "a macro name")?.text.clone();
        cur.expect(TokenKind::LParen, "macro parameters")?;
        let groups = split_args(cur)?;
        let mut params = Vec::new();
        for group in groups {
            let Some((head, rest)) = group.split_first() else {
                continue;
            };
            if head.kind != TokenKind::Ident {
                return Err(ParseError::new(
                    ParseErrorKind::Unexpected {
                        found: head.text.clone(),
                        expected: "a macro parameter name",
                    },
                    head.span,
                ));
            }
            params.push(Param {
                name: head.text.clone(),
                default: if rest.is_empty() {
                    None
                } else {
                    Some(rest.to_vec())
                },
            });
        }
        let mut body = Vec::new();
        loop {
            match cur.next() {
                Some(t) if t.kind == TokenKind::MacroClose => break,
                Some(t) => body.push(t.clone()),
                None => {
                    return Err(ParseError::new(
                        ParseErrorKind::UnexpectedEof { expected: "!} to close the macro" },
                        cur.last_span(),
                    ))
                }
            }
        }
        self.table
            .insert(name.clone(), Rc::new(MacroDef { name, params, body }));
        Ok(())
    }

    /// `!!{ name body` up to end of line; no parameters.
    fn parse_ol_def(&mut self, cur: &mut Cursor<'_>) -> Result<(), ParseError> {
        let name = cur.expect(TokenKind::Ident, "a macro name")?.text.clone();
        let mut body = Vec::new();
        while let Some(t) = cur.peek() {
            if t.kind == TokenKind::Newline {
                break;
            }
            body.push(t.clone());
            cur.next();
        }
        self.table.insert(
            name.clone(),
            Rc::new(MacroDef {
                name,
                params: Vec::new(),
                body,
            }),
        );
        Ok(())
    }

    /// Invocation at the top level; the `$` is consumed.
    fn invoke_at(&mut self, cur: &mut Cursor<'_>, depth: usize) -> Result<Vec<Seg>, ParseError> {
        let name_tok = cur.expect(TokenKind::Ident, "a macro name after `$`")?;
        let (name, span) = (name_tok.text.clone(), name_tok.span);
        let def = self
            .table
            .get(&name)
            .cloned()
            .ok_or_else(|| ParseError::new(ParseErrorKind::UnknownMacro { name: name.clone() }, span))?;
        let mut args = Vec::new();
        if cur.peek().is_some_and(|t| t.kind == TokenKind::LParen) {
            cur.next();
            for group in split_args(cur)? {
                args.push(self.scan(&group, depth + 1)?);
            }
        }
        self.invoke(&def, args, span, depth)
    }

    /// Apply defaults, detect partial application, substitute the body.
    fn invoke(
        &self,
        def: &Rc<MacroDef>,
        mut args: Vec<Vec<Seg>>,
        span: Span,
        depth: usize,
    ) -> Result<Vec<Seg>, ParseError> {
        if depth > MAX_DEPTH {
            return Err(ParseError::new(ParseErrorKind::ExpansionTooDeep, span));
        }
        if args.len() != def.params.len() {
            for param in def.params.iter().skip(args.len()) {
                match &param.default {
                    Some(toks) => {
                        let segs = toks.iter().cloned().map(Seg::Tok).collect();
                        args.push(segs);
                    }
                    None => {
                        return Err(ParseError::new(
                            ParseErrorKind::MacroArity {
                                name: def.name.clone(),
                                required: def.params.len(),
                                provided: args.len(),
                            },
                            span,
                        ))
                    }
                }
            }
            if args.len() != def.params.len() {
                return Err(ParseError::new(
                    ParseErrorKind::MacroArity {
                        name: def.name.clone(),
                        required: def.params.len(),
                        provided: args.len(),
                    },
                    span,
                ));
            }
        }
        if args.iter().any(|a| is_placeholder(a)) {
            return Ok(vec![Seg::Partial(Partial {
                def: Rc::clone(def),
                args,
                span,
            })]);
        }
        let mut env = FxHashMap::default();
        for (param, arg) in def.params.iter().zip(&args) {
            env.insert(param.name.clone(), arg.clone());
        }
        self.substitute(&def.body, &env, def, span, depth)
    }

    /// Walk a macro body, splicing parameters and expanding nested
    /// invocations. Every emitted token takes the invocation-site span.
    fn substitute(
        &self,
        body: &[Token],
        env: &FxHashMap<String, Vec<Seg>>,
        def: &MacroDef,
        span: Span,
        depth: usize,
    ) -> Result<Vec<Seg>, ParseError> {
        let mut cur = Cursor { toks: body, pos: 0 };
        let mut out = Vec::new();
        while let Some(tok) = cur.peek() {
            match tok.kind {
                TokenKind::MacroVar => {
                    cur.next();
                    let p = cur.expect(TokenKind::Ident, "a macro parameter name after `%`")?;
                    let arg = env.get(&p.text).ok_or_else(|| {
                        ParseError::new(
                            ParseErrorKind::UnknownMacroParam {
                                macro_name: def.name.clone(),
                                param: p.text.clone(),
                            },
                            span,
                        )
                    })?;
                    out.extend(arg.iter().cloned().map(|s| respan(s, span)));
                }
                TokenKind::MacroReinvoke => {
                    cur.next();
                    let p = cur.expect(TokenKind::Ident, "a macro parameter name after `$%`")?;
                    let param = p.text.clone();
                    cur.expect(TokenKind::LParen, "arguments for the reinvocation")?;
                    let groups = split_args(&mut cur)?;
                    let mut filled = Vec::new();
                    for group in groups {
                        filled.push(self.substitute(&group, env, def, span, depth + 1)?);
                    }
                    let arg = env.get(&param).ok_or_else(|| {
                        ParseError::new(
                            ParseErrorKind::UnknownMacroParam {
                                macro_name: def.name.clone(),
                                param: param.clone(),
                            },
                            span,
                        )
                    })?;
                    let [Seg::Partial(part)] = arg.as_slice() else {
                        return Err(ParseError::new(
                            ParseErrorKind::ReinvokeNotPartial {
                                macro_name: def.name.clone(),
                                param,
                            },
                            span,
                        ));
                    };
                    out.extend(self.fill_partial(part, filled, span, depth)?);
                }
                TokenKind::MacroInvoke => {
                    cur.next();
                    let name_tok = cur.expect(TokenKind::Ident, "a macro name after `$`")?;
                    let inner = self.table.get(&name_tok.text).cloned().ok_or_else(|| {
                        ParseError::new(
                            ParseErrorKind::UnknownMacro {
                                name: name_tok.text.clone(),
                            },
                            span,
                        )
                    })?;
                    let mut args = Vec::new();
                    if cur.peek().is_some_and(|t| t.kind == TokenKind::LParen) {
                        cur.next();
                        for group in split_args(&mut cur)? {
                            args.push(self.substitute(&group, env, def, span, depth + 1)?);
                        }
                    }
                    out.extend(self.invoke(&inner, args, span, depth + 1)?);
                }
                _ => {
                    out.push(respan(Seg::Tok(tok.clone()), span));
                    cur.next();
                }
            }
        }
        Ok(out)
    }

    /// Replace a partial's placeholders, left to right, with new arguments;
    /// invoke if none remain.
    fn fill_partial(
        &self,
        part: &Partial,
        mut fresh: Vec<Vec<Seg>>,
        span: Span,
        depth: usize,
    ) -> Result<Vec<Seg>, ParseError> {
        if fresh.len() > part.placeholder_count() {
            return Err(ParseError::new(
                ParseErrorKind::PartialUnfilled {
                    name: part.def.name.clone(),
                    required: part.placeholder_count(),
                    provided: fresh.len(),
                },
                span,
            ));
        }
        let mut fresh_iter = fresh.drain(..);
        let mut args = Vec::with_capacity(part.args.len());
        for arg in &part.args {
            if is_placeholder(arg) {
                match fresh_iter.next() {
                    Some(next) => args.push(next),
                    None => args.push(arg.clone()),
                }
            } else {
                args.push(arg.clone());
            }
        }
        if args.iter().any(|a| is_placeholder(a)) {
            return Ok(vec![Seg::Partial(Partial {
                def: Rc::clone(&part.def),
                args,
                span,
            })]);
        }
        self.invoke(&part.def, args, span, depth + 1)
    }
}

fn respan(seg: Seg, span: Span) -> Seg {
    match seg {
        Seg::Tok(mut t) => {
            t.span = span;
            Seg::Tok(t)
        }
        Seg::Partial(p) => Seg::Partial(p),
    }
}

/// Collect comma-separated argument groups up to the matching `)`.
/// The opening paren is already consumed; nesting is respected.
fn split_args(cur: &mut Cursor<'_>) -> Result<Vec<Vec<Token>>, ParseError> {
    let mut groups: Vec<Vec<Token>> = Vec::new();
    let mut current: Vec<Token> = Vec::new();
    let mut depth = 0usize;
    loop {
        let Some(tok) = cur.next() else {
            return Err(ParseError::new(
                ParseErrorKind::UnexpectedEof { expected: ") to close the argument list" },
                cur.last_span(),
            ));
        };
        match tok.kind {
            TokenKind::RParen if depth == 0 => {
                if !current.is_empty() || !groups.is_empty() {
                    groups.push(current);
                }
                return Ok(groups);
            }
            TokenKind::Comma if depth == 0 => {
                groups.push(std::mem::take(&mut current));
            }
            TokenKind::LParen | TokenKind::LBracket => {
                depth += 1;
                current.push(tok.clone());
            }
            TokenKind::RParen | TokenKind::RBracket => {
                depth = depth.saturating_sub(1);
                current.push(tok.clone());
            }
            TokenKind::Newline => {
                // Newlines inside argument lists are insignificant.
            }
            _ => current.push(tok.clone()),
        }
    }
}

/// Turn the expanded segment list back into tokens, rejecting anything a
/// macro failed to resolve.
fn flatten(segs: Vec<Seg>) -> Result<Vec<Token>, ParseError> {
    let mut out = Vec::with_capacity(segs.len());
    for seg in segs {
        match seg {
            Seg::Tok(t) if t.kind == TokenKind::MacroPlaceholder => {
                return Err(ParseError::new(ParseErrorKind::StrayPlaceholder, t.span));
            }
            Seg::Tok(t) if t.kind == TokenKind::MacroVar => {
                return Err(ParseError::new(
                    ParseErrorKind::Unexpected {
                        found: "%".to_owned(),
                        expected: "macro parameters to appear inside a macro body",
                    },
                    t.span,
                ));
            }
            Seg::Tok(t) => out.push(t),
            Seg::Partial(p) => {
                return Err(ParseError::new(
                    ParseErrorKind::PartialUnfilled {
                        name: p.def.name.clone(),
                        required: p.def.params.len(),
                        provided: p.realized_count(),
                    },
                    p.span,
                ));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use brg_lexer::lex;

    fn expand_text(src: &str) -> Result<String, ParseError> {
        let toks = expand(lex(src).map_err(|e| {
            ParseError::new(ParseErrorKind::Lex { text: e.text }, e.span)
        })?)?;
        Ok(toks
            .into_iter()
            .filter(|t| t.kind != TokenKind::Newline)
            .map(|t| t.text)
            .collect::<Vec<_>>()
            .join(" "))
    }

    #[test]
    fn test_simple_substitution() {
        let out = expand_text("!{ twice(x) sum(%x, %x) !} $twice(3)").unwrap();
        assert_eq!(out, "sum ( 3 , 3 )");
    }

    #[test]
    fn test_default_argument() {
        let out = expand_text("!{ shot(speed, angle 90) fire(%speed, %angle) !} $shot(2)").unwrap();
        assert_eq!(out, "fire ( 2 , 90 )");
    }

    #[test]
    fn test_one_line_macro() {
        let out = expand_text("!!{ base fire-straight(speed=1)\n$base").unwrap();
        assert_eq!(out, "fire-straight ( speed = 1 )");
    }

    #[test]
    fn test_macro_invoking_macro() {
        let out =
            expand_text("!{ a(x) sum(%x, 1) !} !{ b(y) $a(%y) !} $b(5)").unwrap();
        assert_eq!(out, "sum ( 5 , 1 )");
    }

    #[test]
    fn test_partial_application_reinvoke() {
        let src = "\
            !{ shoot(speed, angle) fire(%speed, %angle) !} \
            !{ spray(gun) $%gun(45) !} \
            $spray($shoot(2, !$))";
        let out = expand_text(src).unwrap();
        assert_eq!(out, "fire ( 2 , 45 )");
    }

    #[test]
    fn test_unknown_macro_is_error() {
        let err = expand_text("$nope(1)").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::UnknownMacro { ref name } if name == "nope"));
    }

    #[test]
    fn test_unknown_param_is_error() {
        let err = expand_text("!{ m(x) %y !} $m(1)").unwrap_err();
        assert!(
            matches!(err.kind, ParseErrorKind::UnknownMacroParam { ref param, .. } if param == "y")
        );
    }

    #[test]
    fn test_arity_mismatch_is_error() {
        let err = expand_text("!{ m(x, y) %x !} $m(1)").unwrap_err();
        assert!(matches!(
            err.kind,
            ParseErrorKind::MacroArity { required: 2, provided: 1, .. }
        ));
    }

    #[test]
    fn test_unfilled_partial_is_error() {
        let err = expand_text("!{ m(x) %x !} $m(!$)").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::PartialUnfilled { .. }));
    }

    #[test]
    fn test_self_recursion_hits_depth_cap() {
        let err = expand_text("!{ m(x) $m(%x) !} $m(1)").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::ExpansionTooDeep));
    }
}
