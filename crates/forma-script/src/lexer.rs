//! Lexical analysis for the configuration language.
//!
//! Tokenization uses logos. The language is indentation-sensitive, but no
//! INDENT/DEDENT tokens are synthesized here: every [`Lexeme`] carries its
//! line and column, and the parser derives statement boundaries and block
//! structure from those positions (expressions spanning several lines are
//! joined implicitly inside brackets).

use logos::Logos;

use crate::span::Span;

/// A token from the configuration language.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"#[^\n]*")]
pub enum Token {
    // === Keywords ===
    #[token("def")]
    Def,
    #[token("return")]
    Return,
    #[token("if")]
    If,
    #[token("elif")]
    Elif,
    #[token("else")]
    Else,
    #[token("for")]
    For,
    #[token("in")]
    In,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("pass")]
    Pass,
    #[token("load")]
    Load,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,
    #[token("None")]
    NoneLit,
    #[token("True")]
    True,
    #[token("False")]
    False,

    // === Operators ===
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("//")]
    SlashSlash,
    #[token("%")]
    Percent,
    #[token("==")]
    EqEq,
    #[token("!=")]
    BangEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    LtEq,
    #[token(">")]
    Gt,
    #[token(">=")]
    GtEq,
    #[token("=")]
    Eq,
    #[token("+=")]
    PlusEq,
    #[token("-=")]
    MinusEq,
    #[token("*=")]
    StarEq,
    #[token("/=")]
    SlashEq,
    #[token("//=")]
    SlashSlashEq,
    #[token("%=")]
    PercentEq,

    // === Delimiters ===
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,

    // === Literals ===
    /// Integer literal, decimal or hex.
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    #[regex(r"0[xX][0-9a-fA-F]+", |lex| i64::from_str_radix(&lex.slice()[2..], 16).ok())]
    Int(i64),

    /// Float literal (e.g. 3.14, 1.0e-8).
    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    /// String literal, single or double quoted, with escapes.
    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| unescape(strip_quotes(lex.slice(), 1)))]
    #[regex(r#"'([^'\\\n]|\\.)*'"#, |lex| unescape(strip_quotes(lex.slice(), 1)))]
    Str(String),

    /// Bytes literal, `b"..."` or `b'...'`.
    #[regex(r#"b"([^"\\\n]|\\.)*""#, |lex| unescape_bytes(strip_quotes(lex.slice(), 2)))]
    #[regex(r#"b'([^'\\\n]|\\.)*'"#, |lex| unescape_bytes(strip_quotes(lex.slice(), 2)))]
    Bytes(Vec<u8>),

    /// Identifier.
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

/// Strip `prefix` leading bytes (quote or `b` + quote) and one trailing quote.
fn strip_quotes(slice: &str, prefix: usize) -> &str {
    &slice[prefix..slice.len() - 1]
}

/// Process backslash escapes. Returns `None` on an unknown escape, which
/// logos reports as a lexing error over the literal.
fn unescape(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            '\\' => out.push('\\'),
            '"' => out.push('"'),
            '\'' => out.push('\''),
            'x' => {
                let hi = chars.next()?;
                let lo = chars.next()?;
                let code = u8::from_str_radix(&format!("{hi}{lo}"), 16).ok()?;
                out.push(code as char);
            }
            _ => return None,
        }
    }
    Some(out)
}

/// Like [`unescape`], but produces raw bytes: `\xNN` is the byte value,
/// never a code point re-encoded as UTF-8.
fn unescape_bytes(raw: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next()? {
            'n' => out.push(b'\n'),
            't' => out.push(b'\t'),
            'r' => out.push(b'\r'),
            '0' => out.push(0),
            '\\' => out.push(b'\\'),
            '"' => out.push(b'"'),
            '\'' => out.push(b'\''),
            'x' => {
                let hi = chars.next()?;
                let lo = chars.next()?;
                out.push(u8::from_str_radix(&format!("{hi}{lo}"), 16).ok()?);
            }
            _ => return None,
        }
    }
    Some(out)
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Def => write!(f, "def"),
            Token::Return => write!(f, "return"),
            Token::If => write!(f, "if"),
            Token::Elif => write!(f, "elif"),
            Token::Else => write!(f, "else"),
            Token::For => write!(f, "for"),
            Token::In => write!(f, "in"),
            Token::Break => write!(f, "break"),
            Token::Continue => write!(f, "continue"),
            Token::Pass => write!(f, "pass"),
            Token::Load => write!(f, "load"),
            Token::And => write!(f, "and"),
            Token::Or => write!(f, "or"),
            Token::Not => write!(f, "not"),
            Token::NoneLit => write!(f, "None"),
            Token::True => write!(f, "True"),
            Token::False => write!(f, "False"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::SlashSlash => write!(f, "//"),
            Token::Percent => write!(f, "%"),
            Token::EqEq => write!(f, "=="),
            Token::BangEq => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::LtEq => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::GtEq => write!(f, ">="),
            Token::Eq => write!(f, "="),
            Token::PlusEq => write!(f, "+="),
            Token::MinusEq => write!(f, "-="),
            Token::StarEq => write!(f, "*="),
            Token::SlashEq => write!(f, "/="),
            Token::SlashSlashEq => write!(f, "//="),
            Token::PercentEq => write!(f, "%="),
            Token::Comma => write!(f, ","),
            Token::Colon => write!(f, ":"),
            Token::Dot => write!(f, "."),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::Int(n) => write!(f, "{n}"),
            Token::Float(x) => write!(f, "{x}"),
            Token::Str(s) => write!(f, "{s:?}"),
            Token::Bytes(_) => write!(f, "b\"...\""),
            Token::Ident(name) => write!(f, "{name}"),
        }
    }
}

/// A token with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Lexeme {
    pub token: Token,
    pub span: Span,
    /// 1-based line of the first byte.
    pub line: u32,
    /// 1-based column of the first byte.
    pub col: u32,
}

/// Failure to tokenize a region of source text.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Tokenize a module, annotating every token with line/column.
pub fn lex(source: &str) -> Result<Vec<Lexeme>, LexError> {
    let mut line_starts = vec![0u32];
    for (idx, ch) in source.char_indices() {
        if ch == '\n' {
            line_starts.push((idx + 1) as u32);
        }
    }

    let mut lexemes = Vec::new();
    let mut lexer = Token::lexer(source);
    while let Some(result) = lexer.next() {
        let range = lexer.span();
        let span = Span::new(range.start as u32, range.end as u32);
        let token = result.map_err(|()| LexError {
            span,
            message: format!("unrecognized token {:?}", lexer.slice()),
        })?;
        let line_idx = match line_starts.binary_search(&span.start) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        lexemes.push(Lexeme {
            token,
            span,
            line: (line_idx + 1) as u32,
            col: span.start - line_starts[line_idx] + 1,
        });
    }
    Ok(lexemes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        lex(source).unwrap().into_iter().map(|l| l.token).collect()
    }

    #[test]
    fn test_keywords_and_idents() {
        assert_eq!(
            tokens("def main for x in xs"),
            vec![
                Token::Def,
                Token::Ident("main".to_string()),
                Token::For,
                Token::Ident("x".to_string()),
                Token::In,
                Token::Ident("xs".to_string()),
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            tokens("42 3.14 1e3 0xff"),
            vec![
                Token::Int(42),
                Token::Float(3.14),
                Token::Float(1e3),
                Token::Int(255),
            ]
        );
    }

    #[test]
    fn test_strings() {
        assert_eq!(
            tokens(r#""hello" 'it' "a\nb""#),
            vec![
                Token::Str("hello".to_string()),
                Token::Str("it".to_string()),
                Token::Str("a\nb".to_string()),
            ]
        );
    }

    #[test]
    fn test_bytes_literal() {
        assert_eq!(
            tokens(r#"b"ab" b'\x01' b"\xff""#),
            vec![
                Token::Bytes(b"ab".to_vec()),
                Token::Bytes(vec![1]),
                Token::Bytes(vec![0xff]),
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            tokens("+ - * / // % == != <= >= += //="),
            vec![
                Token::Plus,
                Token::Minus,
                Token::Star,
                Token::Slash,
                Token::SlashSlash,
                Token::Percent,
                Token::EqEq,
                Token::BangEq,
                Token::LtEq,
                Token::GtEq,
                Token::PlusEq,
                Token::SlashSlashEq,
            ]
        );
    }

    #[test]
    fn test_comments_skipped() {
        assert_eq!(
            tokens("x = 1  # trailing\n# full line\ny = 2"),
            vec![
                Token::Ident("x".to_string()),
                Token::Eq,
                Token::Int(1),
                Token::Ident("y".to_string()),
                Token::Eq,
                Token::Int(2),
            ]
        );
    }

    #[test]
    fn test_line_and_column() {
        let lexemes = lex("a = 1\n    b = 2\n").unwrap();
        assert_eq!(lexemes[0].line, 1);
        assert_eq!(lexemes[0].col, 1);
        let b = &lexemes[3];
        assert_eq!(b.token, Token::Ident("b".to_string()));
        assert_eq!(b.line, 2);
        assert_eq!(b.col, 5);
    }

    #[test]
    fn test_unrecognized_token() {
        let err = lex("x = @").unwrap_err();
        assert!(err.message.contains('@'));
    }

    #[test]
    fn test_keyword_prefix_ident() {
        assert_eq!(
            tokens("formation loader"),
            vec![
                Token::Ident("formation".to_string()),
                Token::Ident("loader".to_string()),
            ]
        );
    }
}
