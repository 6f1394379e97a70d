//! Hand-written recursive descent parser for the configuration language.
//!
//! Layout is column-driven: no INDENT/DEDENT tokens exist; suites are
//! delimited by the column of their first statement, and expressions join
//! across lines only inside brackets.

mod error;
pub(crate) mod expr;
mod stmt;
mod stream;

pub use error::{ParseError, ParseErrorKind};
pub use stream::TokenStream;

use crate::ast::Module;
use crate::lexer;

/// Parse a module from source text.
pub fn parse(source: &str) -> Result<Module, ParseError> {
    let lexemes = lexer::lex(source).map_err(|e| ParseError::invalid_syntax(e.message, e.span))?;
    let mut stream = TokenStream::new(&lexemes);
    stmt::parse_module(&mut stream)
}
