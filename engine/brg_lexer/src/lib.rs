//! Lexer for the Barrage pattern language, built on logos.
//!
//! The language is line-oriented, so newlines are real tokens; all other
//! whitespace is skipped. `#` comments run to end of line. Identifiers may
//! contain `-` (`fire-straight`), which is why there are no infix operators
//! at the token level: arithmetic is spelled as calls.

use logos::Logos;

use brg_ir::Span;

/// Raw token produced by logos, before text is attached.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r]+")]
#[logos(skip r"#[^\n]*")]
pub enum TokenKind {
    #[token("\n")]
    Newline,

    #[regex(r"-?(\d+\.?\d*|\.\d+)")]
    Number,

    #[token("true")]
    True,
    #[token("false")]
    False,

    // Identifiers allow interior dashes: `fire-straight`, `rv2-resolve`.
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*(-[A-Za-z0-9_]+)*")]
    Ident,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("<")]
    LAngle,
    #[token(">")]
    RAngle,
    #[token(",")]
    Comma,
    #[token("=")]
    Eq,

    // Macro syntax.
    #[token("!{")]
    MacroOpen,
    #[token("!}")]
    MacroClose,
    #[token("!!{")]
    MacroOlOpen,
    #[token("!$")]
    MacroPlaceholder,
    #[token("$%")]
    MacroReinvoke,
    #[token("$")]
    MacroInvoke,
    #[token("%")]
    MacroVar,
}

impl TokenKind {
    /// Display name for error messages.
    pub fn display_name(self) -> &'static str {
        match self {
            TokenKind::Newline => "newline",
            TokenKind::Number => "number",
            TokenKind::True | TokenKind::False => "boolean",
            TokenKind::Ident => "identifier",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::LAngle => "<",
            TokenKind::RAngle => ">",
            TokenKind::Comma => ",",
            TokenKind::Eq => "=",
            TokenKind::MacroOpen => "!{",
            TokenKind::MacroClose => "!}",
            TokenKind::MacroOlOpen => "!!{",
            TokenKind::MacroPlaceholder => "!$",
            TokenKind::MacroReinvoke => "$%",
            TokenKind::MacroInvoke => "$",
            TokenKind::MacroVar => "%",
        }
    }
}

/// A token with its source text and span.
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub span: Span,
}

/// A character the lexer could not assign to any token.
#[derive(Clone, Debug, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub text: String,
}

/// Tokenize a script. Returns every token or the first unlexable fragment.
pub fn lex(src: &str) -> Result<Vec<Token>, LexError> {
    let mut out = Vec::new();
    let mut lexer = TokenKind::lexer(src);
    while let Some(res) = lexer.next() {
        let span = Span::from_range(lexer.span());
        match res {
            Ok(kind) => out.push(Token {
                kind,
                text: lexer.slice().to_owned(),
                span,
            }),
            Err(()) => {
                return Err(LexError {
                    span,
                    text: lexer.slice().to_owned(),
                })
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(src: &str) -> Vec<TokenKind> {
        lex(src).into_iter().flatten().map(|t| t.kind).collect()
    }

    #[test]
    fn test_phase_header() {
        assert_eq!(
            kinds("phase 0 <hp 1000>"),
            vec![
                TokenKind::Ident,
                TokenKind::Number,
                TokenKind::LAngle,
                TokenKind::Ident,
                TokenKind::Number,
                TokenKind::RAngle,
            ]
        );
    }

    #[test]
    fn test_dashed_ident_is_one_token() {
        let toks = lex("fire-straight(speed=2)").unwrap();
        assert_eq!(toks[0].kind, TokenKind::Ident);
        assert_eq!(toks[0].text, "fire-straight");
    }

    #[test]
    fn test_negative_number() {
        let toks = lex("-3.5").unwrap();
        assert_eq!(toks[0].kind, TokenKind::Number);
        assert_eq!(toks[0].text, "-3.5");
    }

    #[test]
    fn test_comment_skipped_newline_kept() {
        assert_eq!(
            kinds("a # comment\nb"),
            vec![TokenKind::Ident, TokenKind::Newline, TokenKind::Ident]
        );
    }

    #[test]
    fn test_macro_sigils() {
        assert_eq!(
            kinds("!{ m(x) %x !} $m(1) !$ $%p(2)"),
            vec![
                TokenKind::MacroOpen,
                TokenKind::Ident,
                TokenKind::LParen,
                TokenKind::Ident,
                TokenKind::RParen,
                TokenKind::MacroVar,
                TokenKind::Ident,
                TokenKind::MacroClose,
                TokenKind::MacroInvoke,
                TokenKind::Ident,
                TokenKind::LParen,
                TokenKind::Number,
                TokenKind::RParen,
                TokenKind::MacroPlaceholder,
                TokenKind::MacroReinvoke,
                TokenKind::Ident,
                TokenKind::LParen,
                TokenKind::Number,
                TokenKind::RParen,
            ]
        );
    }

    #[test]
    fn test_unlexable_character() {
        let err = lex("a ; b").unwrap_err();
        assert_eq!(err.text, ";");
    }
}
