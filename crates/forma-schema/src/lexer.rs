//! Lexer for schema (`.proto`) files.

use logos::Logos;

/// Token of the schema language. Keywords (`message`, `enum`, `repeated`,
/// ...) are contextual and lexed as identifiers.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"/\*([^*]|\*[^/])*\*/")]
pub enum Token {
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(";")]
    Semicolon,
    #[token("=")]
    Eq,
    #[token(",")]
    Comma,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(".")]
    Dot,
    #[token("-")]
    Minus,
    #[token(":")]
    Colon,

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    #[regex(r"0[xX][0-9a-fA-F]+", |lex| i64::from_str_radix(&lex.slice()[2..], 16).ok())]
    Int(i64),

    #[regex(r"[0-9]+\.[0-9]*([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| strip_str(lex.slice()))]
    #[regex(r#"'([^'\\\n]|\\.)*'"#, |lex| strip_str(lex.slice()))]
    Str(String),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

fn strip_str(slice: &str) -> Option<String> {
    let raw = &slice[1..slice.len() - 1];
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
            '\\' => out.push('\\'),
            '"' => out.push('"'),
            '\'' => out.push('\''),
            '/' => out.push('/'),
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Some(out)
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::Semicolon => write!(f, ";"),
            Token::Eq => write!(f, "="),
            Token::Comma => write!(f, ","),
            Token::Lt => write!(f, "<"),
            Token::Gt => write!(f, ">"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Dot => write!(f, "."),
            Token::Minus => write!(f, "-"),
            Token::Colon => write!(f, ":"),
            Token::Int(n) => write!(f, "{n}"),
            Token::Float(x) => write!(f, "{x}"),
            Token::Str(s) => write!(f, "{s:?}"),
            Token::Ident(name) => write!(f, "{name}"),
        }
    }
}

/// A token plus its 1-based line/column, for error messages.
#[derive(Debug, Clone, PartialEq)]
pub struct Lexeme {
    pub token: Token,
    pub line: u32,
    pub col: u32,
}

/// Tokenize a schema file. Returns `(line, col, message)` on failure.
pub fn lex(source: &str) -> std::result::Result<Vec<Lexeme>, (u32, u32, String)> {
    let mut line_starts = vec![0u32];
    for (idx, ch) in source.char_indices() {
        if ch == '\n' {
            line_starts.push((idx + 1) as u32);
        }
    }
    let line_col = |offset: u32| {
        let idx = match line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        ((idx + 1) as u32, offset - line_starts[idx] + 1)
    };

    let mut lexemes = Vec::new();
    let mut lexer = Token::lexer(source);
    while let Some(result) = lexer.next() {
        let start = lexer.span().start as u32;
        let (line, col) = line_col(start);
        let token = result.map_err(|()| {
            (
                line,
                col,
                format!("unrecognized token {:?}", lexer.slice()),
            )
        })?;
        lexemes.push(Lexeme { token, line, col });
    }
    Ok(lexemes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_tokens() {
        let lexemes = lex("message Hello { string name = 1; }").unwrap();
        let tokens: Vec<Token> = lexemes.into_iter().map(|l| l.token).collect();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("message".to_string()),
                Token::Ident("Hello".to_string()),
                Token::LBrace,
                Token::Ident("string".to_string()),
                Token::Ident("name".to_string()),
                Token::Eq,
                Token::Int(1),
                Token::Semicolon,
                Token::RBrace,
            ]
        );
    }

    #[test]
    fn test_comments_and_strings() {
        let lexemes = lex("// line\nsyntax = \"proto3\"; /* block */ import 'a.proto';").unwrap();
        let tokens: Vec<Token> = lexemes.into_iter().map(|l| l.token).collect();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("syntax".to_string()),
                Token::Eq,
                Token::Str("proto3".to_string()),
                Token::Semicolon,
                Token::Ident("import".to_string()),
                Token::Str("a.proto".to_string()),
                Token::Semicolon,
            ]
        );
    }

    #[test]
    fn test_positions() {
        let lexemes = lex("a\n  b").unwrap();
        assert_eq!((lexemes[0].line, lexemes[0].col), (1, 1));
        assert_eq!((lexemes[1].line, lexemes[1].col), (2, 3));
    }
}
