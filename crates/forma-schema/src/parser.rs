//! Recursive descent parser for schema files.
//!
//! Produces a raw, unresolved file AST; type-name resolution happens when
//! the registry ingests the file. The grammar is the proto3 subset the
//! compiler needs: `syntax`, `package`, `import`, `option` (skipped),
//! nested `message`, `enum`, scalar/named/map fields, `oneof` (members are
//! flattened to optional fields), and `reserved` (skipped).

use crate::error::{Result, SchemaError};
use crate::lexer::{self, Lexeme, Token};

/// Unresolved schema file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawFile {
    pub syntax: Option<String>,
    pub package: Option<String>,
    pub imports: Vec<String>,
    pub messages: Vec<RawMessage>,
    pub enums: Vec<RawEnum>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawMessage {
    pub name: String,
    pub fields: Vec<RawField>,
    pub messages: Vec<RawMessage>,
    pub enums: Vec<RawEnum>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawField {
    pub name: String,
    pub number: u32,
    pub label: RawLabel,
    pub field_type: RawType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawLabel {
    Singular,
    Optional,
    Repeated,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawType {
    /// Possibly dotted type name; a leading `.` marks it fully qualified.
    Named(String),
    Map {
        key: String,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawEnum {
    pub name: String,
    pub values: Vec<(String, i32)>,
}

/// Parse a schema file. `file` is the root-relative path, used in errors.
pub fn parse_file(source: &str, file: &str) -> Result<RawFile> {
    let lexemes = lexer::lex(source).map_err(|(line, col, message)| SchemaError::Parse {
        file: file.to_string(),
        line,
        col,
        message,
    })?;
    Parser {
        lexemes: &lexemes,
        pos: 0,
        file,
    }
    .parse_file()
}

struct Parser<'a> {
    lexemes: &'a [Lexeme],
    pos: usize,
    file: &'a str,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.lexemes.get(self.pos).map(|l| &l.token)
    }

    fn advance(&mut self) -> Option<&Token> {
        let lexeme = self.lexemes.get(self.pos)?;
        self.pos += 1;
        Some(&lexeme.token)
    }

    fn error(&self, message: impl Into<String>) -> SchemaError {
        let (line, col) = self
            .lexemes
            .get(self.pos.min(self.lexemes.len().saturating_sub(1)))
            .map(|l| (l.line, l.col))
            .unwrap_or((1, 1));
        SchemaError::Parse {
            file: self.file.to_string(),
            line,
            col,
            message: message.into(),
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.peek() {
            Some(t) if std::mem::discriminant(t) == std::mem::discriminant(expected) => {
                self.advance();
                Ok(())
            }
            Some(t) => Err(self.error(format!("expected `{expected}`, found `{t}`"))),
            None => Err(self.error(format!("expected `{expected}`, found end of file"))),
        }
    }

    fn expect_ident(&mut self, context: &str) -> Result<String> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            Some(t) => Err(self.error(format!("expected identifier {context}, found `{t}`"))),
            None => Err(self.error(format!("expected identifier {context}, found end of file"))),
        }
    }

    fn expect_string(&mut self, context: &str) -> Result<String> {
        match self.peek() {
            Some(Token::Str(s)) => {
                let s = s.clone();
                self.advance();
                Ok(s)
            }
            Some(t) => Err(self.error(format!("expected string {context}, found `{t}`"))),
            None => Err(self.error(format!("expected string {context}, found end of file"))),
        }
    }

    fn parse_file(mut self) -> Result<RawFile> {
        let mut raw = RawFile::default();
        while let Some(token) = self.peek() {
            match token {
                Token::Semicolon => {
                    self.advance();
                }
                Token::Ident(word) => match word.as_str() {
                    "syntax" => {
                        self.advance();
                        self.expect(&Token::Eq)?;
                        let value = self.expect_string("after `syntax =`")?;
                        if value != "proto3" && value != "proto2" {
                            return Err(self.error(format!("unsupported syntax {value:?}")));
                        }
                        raw.syntax = Some(value);
                        self.expect(&Token::Semicolon)?;
                    }
                    "package" => {
                        self.advance();
                        let name = self.parse_dotted_name("after `package`")?;
                        raw.package = Some(name);
                        self.expect(&Token::Semicolon)?;
                    }
                    "import" => {
                        self.advance();
                        if let Some(Token::Ident(modifier)) = self.peek() {
                            if modifier == "public" || modifier == "weak" {
                                self.advance();
                            }
                        }
                        let path = self.expect_string("after `import`")?;
                        raw.imports.push(path);
                        self.expect(&Token::Semicolon)?;
                    }
                    "option" => {
                        self.advance();
                        self.skip_option()?;
                    }
                    "message" => {
                        self.advance();
                        raw.messages.push(self.parse_message()?);
                    }
                    "enum" => {
                        self.advance();
                        raw.enums.push(self.parse_enum()?);
                    }
                    other => {
                        return Err(
                            self.error(format!("unexpected `{other}` at file scope"))
                        );
                    }
                },
                other => {
                    return Err(self.error(format!("unexpected `{other}` at file scope")));
                }
            }
        }
        Ok(raw)
    }

    fn parse_message(&mut self) -> Result<RawMessage> {
        let name = self.expect_ident("after `message`")?;
        self.expect(&Token::LBrace)?;
        let mut message = RawMessage {
            name,
            ..RawMessage::default()
        };

        loop {
            match self.peek() {
                Some(Token::RBrace) => {
                    self.advance();
                    return Ok(message);
                }
                Some(Token::Semicolon) => {
                    self.advance();
                }
                Some(Token::Ident(word)) => match word.as_str() {
                    "message" => {
                        self.advance();
                        message.messages.push(self.parse_message()?);
                    }
                    "enum" => {
                        self.advance();
                        message.enums.push(self.parse_enum()?);
                    }
                    "option" => {
                        self.advance();
                        self.skip_option()?;
                    }
                    "reserved" => {
                        self.advance();
                        self.skip_until_semicolon();
                    }
                    "oneof" => {
                        self.advance();
                        self.parse_oneof(&mut message)?;
                    }
                    "map" => {
                        self.advance();
                        message.fields.push(self.parse_map_field()?);
                    }
                    "repeated" => {
                        self.advance();
                        message.fields.push(self.parse_field(RawLabel::Repeated)?);
                    }
                    "optional" => {
                        self.advance();
                        message.fields.push(self.parse_field(RawLabel::Optional)?);
                    }
                    _ => {
                        message.fields.push(self.parse_field(RawLabel::Singular)?);
                    }
                },
                Some(Token::Dot) => {
                    // Fully qualified type name starting a field.
                    message.fields.push(self.parse_field(RawLabel::Singular)?);
                }
                Some(other) => {
                    return Err(self.error(format!("unexpected `{other}` in message body")));
                }
                None => return Err(self.error("unterminated message body")),
            }
        }
    }

    /// Members of a `oneof` become optional fields of the enclosing
    /// message. Exclusivity is not modeled.
    fn parse_oneof(&mut self, message: &mut RawMessage) -> Result<()> {
        let _name = self.expect_ident("after `oneof`")?;
        self.expect(&Token::LBrace)?;
        loop {
            match self.peek() {
                Some(Token::RBrace) => {
                    self.advance();
                    return Ok(());
                }
                Some(Token::Semicolon) => {
                    self.advance();
                }
                Some(Token::Ident(word)) if word == "option" => {
                    self.advance();
                    self.skip_option()?;
                }
                Some(_) => {
                    message.fields.push(self.parse_field(RawLabel::Optional)?);
                }
                None => return Err(self.error("unterminated oneof body")),
            }
        }
    }

    /// `type name = number [options];` with the label already consumed.
    fn parse_field(&mut self, label: RawLabel) -> Result<RawField> {
        let type_name = self.parse_dotted_name("as field type")?;
        let name = self.expect_ident("as field name")?;
        self.expect(&Token::Eq)?;
        let number = self.parse_field_number()?;
        self.skip_field_options()?;
        self.expect(&Token::Semicolon)?;
        Ok(RawField {
            name,
            number,
            label,
            field_type: RawType::Named(type_name),
        })
    }

    /// `map<key, value> name = number;` with `map` already consumed.
    fn parse_map_field(&mut self) -> Result<RawField> {
        self.expect(&Token::Lt)?;
        let key = self.expect_ident("as map key type")?;
        self.expect(&Token::Comma)?;
        let value = self.parse_dotted_name("as map value type")?;
        self.expect(&Token::Gt)?;
        let name = self.expect_ident("as field name")?;
        self.expect(&Token::Eq)?;
        let number = self.parse_field_number()?;
        self.skip_field_options()?;
        self.expect(&Token::Semicolon)?;
        Ok(RawField {
            name,
            number,
            label: RawLabel::Singular,
            field_type: RawType::Map { key, value },
        })
    }

    fn parse_enum(&mut self) -> Result<RawEnum> {
        let name = self.expect_ident("after `enum`")?;
        self.expect(&Token::LBrace)?;
        let mut raw = RawEnum {
            name,
            ..RawEnum::default()
        };
        loop {
            match self.peek() {
                Some(Token::RBrace) => {
                    self.advance();
                    return Ok(raw);
                }
                Some(Token::Semicolon) => {
                    self.advance();
                }
                Some(Token::Ident(word)) if word == "option" => {
                    self.advance();
                    self.skip_option()?;
                }
                Some(Token::Ident(word)) if word == "reserved" => {
                    self.advance();
                    self.skip_until_semicolon();
                }
                Some(Token::Ident(_)) => {
                    let symbol = self.expect_ident("as enum value name")?;
                    self.expect(&Token::Eq)?;
                    let negative = matches!(self.peek(), Some(Token::Minus));
                    if negative {
                        self.advance();
                    }
                    let number = match self.advance() {
                        Some(Token::Int(n)) => *n,
                        _ => return Err(self.error("expected enum value number")),
                    };
                    let number = if negative { -number } else { number };
                    let number = i32::try_from(number)
                        .map_err(|_| self.error("enum value out of range"))?;
                    self.skip_field_options()?;
                    self.expect(&Token::Semicolon)?;
                    raw.values.push((symbol, number));
                }
                Some(other) => {
                    return Err(self.error(format!("unexpected `{other}` in enum body")));
                }
                None => return Err(self.error("unterminated enum body")),
            }
        }
    }

    /// `[a.b.]Name`, optionally rooted with a leading dot.
    fn parse_dotted_name(&mut self, context: &str) -> Result<String> {
        let mut name = String::new();
        if matches!(self.peek(), Some(Token::Dot)) {
            self.advance();
            name.push('.');
        }
        name.push_str(&self.expect_ident(context)?);
        while matches!(self.peek(), Some(Token::Dot)) {
            self.advance();
            name.push('.');
            name.push_str(&self.expect_ident(context)?);
        }
        Ok(name)
    }

    fn parse_field_number(&mut self) -> Result<u32> {
        match self.advance() {
            Some(Token::Int(n)) if *n > 0 && *n <= 536_870_911 => Ok(*n as u32),
            Some(Token::Int(n)) => {
                let n = *n;
                Err(self.error(format!("field number {n} out of range")))
            }
            _ => Err(self.error("expected field number")),
        }
    }

    /// Skip an `option ...;` statement, tolerating aggregate `{ ... }`
    /// values and parenthesized custom option names.
    fn skip_option(&mut self) -> Result<()> {
        let mut depth = 0usize;
        loop {
            match self.advance() {
                Some(Token::LBrace) | Some(Token::LParen) | Some(Token::LBracket) => depth += 1,
                Some(Token::RBrace) | Some(Token::RParen) | Some(Token::RBracket) => {
                    depth = depth.saturating_sub(1);
                }
                Some(Token::Semicolon) if depth == 0 => return Ok(()),
                Some(_) => {}
                None => return Err(self.error("unterminated option")),
            }
        }
    }

    /// Skip `[deprecated = true, ...]` field options.
    fn skip_field_options(&mut self) -> Result<()> {
        if !matches!(self.peek(), Some(Token::LBracket)) {
            return Ok(());
        }
        let mut depth = 0usize;
        loop {
            match self.advance() {
                Some(Token::LBracket) => depth += 1,
                Some(Token::RBracket) => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Some(_) => {}
                None => return Err(self.error("unterminated field options")),
            }
        }
    }

    fn skip_until_semicolon(&mut self) {
        while let Some(token) = self.advance() {
            if matches!(token, Token::Semicolon) {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_message() {
        let raw = parse_file(
            "syntax = \"proto3\";\nmessage Hello { string name = 1; }",
            "hello.proto",
        )
        .unwrap();
        assert_eq!(raw.syntax.as_deref(), Some("proto3"));
        assert_eq!(raw.messages.len(), 1);
        let hello = &raw.messages[0];
        assert_eq!(hello.name, "Hello");
        assert_eq!(hello.fields.len(), 1);
        assert_eq!(hello.fields[0].name, "name");
        assert_eq!(hello.fields[0].number, 1);
        assert_eq!(hello.fields[0].label, RawLabel::Singular);
        assert_eq!(
            hello.fields[0].field_type,
            RawType::Named("string".to_string())
        );
    }

    #[test]
    fn test_package_and_imports() {
        let raw = parse_file(
            "syntax = \"proto3\";\npackage a.b;\nimport \"x.proto\";\nimport public \"y.proto\";",
            "t.proto",
        )
        .unwrap();
        assert_eq!(raw.package.as_deref(), Some("a.b"));
        assert_eq!(raw.imports, vec!["x.proto", "y.proto"]);
    }

    #[test]
    fn test_nested_and_labels() {
        let source = "\
syntax = \"proto3\";
message Outer {
    message Inner {
        int32 n = 1;
    }
    Inner single = 1;
    repeated string tags = 2;
    optional bool flag = 3;
    map<string, Inner> index = 4;
}
";
        let raw = parse_file(source, "t.proto").unwrap();
        let outer = &raw.messages[0];
        assert_eq!(outer.messages.len(), 1);
        assert_eq!(outer.fields.len(), 4);
        assert_eq!(outer.fields[1].label, RawLabel::Repeated);
        assert_eq!(outer.fields[2].label, RawLabel::Optional);
        assert_eq!(
            outer.fields[3].field_type,
            RawType::Map {
                key: "string".to_string(),
                value: "Inner".to_string(),
            }
        );
    }

    #[test]
    fn test_enum_and_options() {
        let source = "\
syntax = \"proto3\";
option java_package = \"com.example\";
enum Color {
    option allow_alias = true;
    COLOR_UNSPECIFIED = 0;
    RED = 1;
    CRIMSON = 1;
}
message Paint {
    Color color = 1 [deprecated = true];
}
";
        let raw = parse_file(source, "t.proto").unwrap();
        assert_eq!(raw.enums.len(), 1);
        assert_eq!(
            raw.enums[0].values,
            vec![
                ("COLOR_UNSPECIFIED".to_string(), 0),
                ("RED".to_string(), 1),
                ("CRIMSON".to_string(), 1),
            ]
        );
        assert_eq!(raw.messages[0].fields.len(), 1);
    }

    #[test]
    fn test_oneof_flattened() {
        let source = "\
message Either {
    oneof kind {
        string text = 1;
        int64 number = 2;
    }
}
";
        let raw = parse_file(source, "t.proto").unwrap();
        let fields = &raw.messages[0].fields;
        assert_eq!(fields.len(), 2);
        assert!(fields.iter().all(|f| f.label == RawLabel::Optional));
    }

    #[test]
    fn test_parse_error_has_position() {
        let err = parse_file("message {", "bad.proto").unwrap_err();
        let rendered = err.to_string();
        assert!(rendered.contains("bad.proto:1:9"), "got: {rendered}");
    }

    #[test]
    fn test_field_number_range() {
        let err = parse_file("message M { int32 a = 0; }", "t.proto").unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }
}
