//! Statement and block parsing.
//!
//! Blocks are recognized by column: a suite's first token fixes the block
//! column, every following statement must start at exactly that column, and
//! any shallower token ends the suite.

use std::rc::Rc;

use super::expr::{expr_to_target, parse_expr, parse_expr_list, parse_loop_target};
use super::{ParseError, TokenStream};
use crate::ast::{BinOp, FnDef, Module, Param, Stmt, StmtKind};
use crate::lexer::Token;

/// Parse a whole module.
pub fn parse_module(stream: &mut TokenStream) -> Result<Module, ParseError> {
    let mut stmts = Vec::new();
    let Some(base_col) = stream.peek_col() else {
        return Ok(Module { stmts });
    };
    while !stream.at_end() {
        let Some(col) = stream.peek_col() else { break };
        if col != base_col {
            return Err(ParseError::indentation(
                "unexpected indentation at top level",
                stream.current_span(),
            ));
        }
        stmts.push(parse_statement(stream, col, true)?);
        ensure_line_break(stream)?;
    }
    Ok(Module { stmts })
}

/// A statement must be followed by a line break (or EOF) unless a bracket
/// is still open.
fn ensure_line_break(stream: &mut TokenStream) -> Result<(), ParseError> {
    if stream.starts_new_line() {
        Ok(())
    } else {
        Err(ParseError::unexpected_token(
            stream.peek(),
            "after statement; expected end of line",
            stream.current_span(),
        ))
    }
}

fn parse_statement(
    stream: &mut TokenStream,
    col: u32,
    top_level: bool,
) -> Result<Stmt, ParseError> {
    match stream.peek() {
        Some(Token::Def) => {
            if !top_level {
                return Err(ParseError::invalid_syntax(
                    "`def` is only allowed at the top level",
                    stream.current_span(),
                ));
            }
            parse_def(stream, col)
        }
        Some(Token::Load) => {
            if !top_level {
                return Err(ParseError::invalid_syntax(
                    "`load` is only allowed at the top level",
                    stream.current_span(),
                ));
            }
            parse_load(stream)
        }
        Some(Token::If) => parse_if(stream, col),
        Some(Token::For) => parse_for(stream, col),
        _ => parse_simple(stream),
    }
}

fn parse_def(stream: &mut TokenStream, col: u32) -> Result<Stmt, ParseError> {
    let start = stream.current_span();
    stream.expect(Token::Def)?;
    let name = stream.expect_ident("after `def`")?;
    stream.expect(Token::LParen)?;

    let mut params: Vec<Param> = Vec::new();
    let mut seen_default = false;
    while !matches!(stream.peek(), Some(Token::RParen)) {
        let pname = stream.expect_ident("in parameter list")?;
        if params.iter().any(|p| p.name == pname) {
            return Err(ParseError::invalid_syntax(
                format!("duplicate parameter `{pname}`"),
                stream.last_span(),
            ));
        }
        let default = if matches!(stream.peek(), Some(Token::Eq)) {
            stream.advance();
            seen_default = true;
            Some(parse_expr(stream)?)
        } else {
            if seen_default {
                return Err(ParseError::invalid_syntax(
                    "parameter without default follows parameter with default",
                    stream.current_span(),
                ));
            }
            None
        };
        params.push(Param {
            name: pname,
            default,
        });
        if matches!(stream.peek(), Some(Token::Comma)) {
            stream.advance();
        } else {
            break;
        }
    }
    stream.expect(Token::RParen)?;
    stream.expect(Token::Colon)?;
    let body = parse_suite(stream, col)?;
    let span = start.merge(stream.last_span());
    Ok(Stmt {
        kind: StmtKind::Def(Rc::new(FnDef {
            name,
            params,
            body,
            span,
        })),
        span,
    })
}

fn parse_if(stream: &mut TokenStream, col: u32) -> Result<Stmt, ParseError> {
    let start = stream.current_span();
    stream.expect(Token::If)?;
    let cond = parse_expr(stream)?;
    stream.expect(Token::Colon)?;
    let body = parse_suite(stream, col)?;
    let mut branches = vec![(cond, body)];
    let mut orelse = Vec::new();

    loop {
        let at_col = stream.peek_col() == Some(col) && stream.starts_new_line();
        match stream.peek() {
            Some(Token::Elif) if at_col => {
                stream.advance();
                let cond = parse_expr(stream)?;
                stream.expect(Token::Colon)?;
                let body = parse_suite(stream, col)?;
                branches.push((cond, body));
            }
            Some(Token::Else) if at_col => {
                stream.advance();
                stream.expect(Token::Colon)?;
                orelse = parse_suite(stream, col)?;
                break;
            }
            _ => break,
        }
    }

    let span = start.merge(stream.last_span());
    Ok(Stmt {
        kind: StmtKind::If { branches, orelse },
        span,
    })
}

fn parse_for(stream: &mut TokenStream, col: u32) -> Result<Stmt, ParseError> {
    let start = stream.current_span();
    stream.expect(Token::For)?;
    let target = parse_loop_target(stream)?;
    stream.expect(Token::In)?;
    let iter = parse_expr(stream)?;
    stream.expect(Token::Colon)?;
    let body = parse_suite(stream, col)?;
    let span = start.merge(stream.last_span());
    Ok(Stmt {
        kind: StmtKind::For { target, iter, body },
        span,
    })
}

/// Parse the suite after a `:`. Either a single simple statement on the
/// same line, or an indented block of statements.
fn parse_suite(stream: &mut TokenStream, parent_col: u32) -> Result<Vec<Stmt>, ParseError> {
    if !stream.starts_new_line() {
        let stmt = parse_simple(stream)?;
        ensure_line_break(stream)?;
        return Ok(vec![stmt]);
    }

    let Some(block_col) = stream.peek_col() else {
        return Err(ParseError::indentation(
            "expected an indented block, found end of input",
            stream.current_span(),
        ));
    };
    if block_col <= parent_col {
        return Err(ParseError::indentation(
            "expected an indented block",
            stream.current_span(),
        ));
    }

    let mut stmts = Vec::new();
    loop {
        match stream.peek_col() {
            None => break,
            Some(col) if col < block_col => break,
            Some(col) if col > block_col => {
                return Err(ParseError::indentation(
                    "unexpected indentation",
                    stream.current_span(),
                ));
            }
            Some(col) => {
                stmts.push(parse_statement(stream, col, false)?);
                ensure_line_break(stream)?;
            }
        }
    }
    Ok(stmts)
}

/// Simple (single-line) statements.
fn parse_simple(stream: &mut TokenStream) -> Result<Stmt, ParseError> {
    let start = stream.current_span();
    match stream.peek() {
        Some(Token::Return) => {
            stream.advance();
            let value = if stream.at_end() || stream.starts_new_line() {
                None
            } else {
                Some(parse_expr_list(stream)?)
            };
            Ok(Stmt {
                kind: StmtKind::Return(value),
                span: start.merge(stream.last_span()),
            })
        }
        Some(Token::Break) => {
            stream.advance();
            Ok(Stmt {
                kind: StmtKind::Break,
                span: start,
            })
        }
        Some(Token::Continue) => {
            stream.advance();
            Ok(Stmt {
                kind: StmtKind::Continue,
                span: start,
            })
        }
        Some(Token::Pass) => {
            stream.advance();
            Ok(Stmt {
                kind: StmtKind::Pass,
                span: start,
            })
        }
        _ => parse_assign_or_expr(stream),
    }
}

/// Assignment, augmented assignment, or bare expression.
fn parse_assign_or_expr(stream: &mut TokenStream) -> Result<Stmt, ParseError> {
    let start = stream.current_span();
    let first = parse_expr(stream)?;

    // Unparenthesized tuple target: `a, b = ...`
    if matches!(stream.peek(), Some(Token::Comma)) && !stream.starts_new_line() {
        let mut targets = vec![expr_to_target(first)?];
        while matches!(stream.peek(), Some(Token::Comma)) {
            stream.advance();
            if matches!(stream.peek(), Some(Token::Eq)) {
                break;
            }
            targets.push(expr_to_target(parse_expr(stream)?)?);
        }
        stream.expect(Token::Eq)?;
        let value = parse_expr_list(stream)?;
        return Ok(Stmt {
            kind: StmtKind::Assign {
                target: crate::ast::Target::Tuple(targets),
                value,
            },
            span: start.merge(stream.last_span()),
        });
    }

    let aug = match stream.peek() {
        Some(Token::PlusEq) => Some(BinOp::Add),
        Some(Token::MinusEq) => Some(BinOp::Sub),
        Some(Token::StarEq) => Some(BinOp::Mul),
        Some(Token::SlashEq) => Some(BinOp::Div),
        Some(Token::SlashSlashEq) => Some(BinOp::FloorDiv),
        Some(Token::PercentEq) => Some(BinOp::Mod),
        _ => None,
    };
    if let Some(op) = aug {
        if stream.starts_new_line() {
            return Ok(Stmt {
                kind: StmtKind::Expr(first),
                span: start.merge(stream.last_span()),
            });
        }
        stream.advance();
        let value = parse_expr_list(stream)?;
        return Ok(Stmt {
            kind: StmtKind::AugAssign {
                target: expr_to_target(first)?,
                op,
                value,
            },
            span: start.merge(stream.last_span()),
        });
    }

    if matches!(stream.peek(), Some(Token::Eq)) && !stream.starts_new_line() {
        stream.advance();
        let value = parse_expr_list(stream)?;
        return Ok(Stmt {
            kind: StmtKind::Assign {
                target: expr_to_target(first)?,
                value,
            },
            span: start.merge(stream.last_span()),
        });
    }

    Ok(Stmt {
        kind: StmtKind::Expr(first),
        span: start.merge(stream.last_span()),
    })
}

/// `load("module", "sym", local="exported")`.
fn parse_load(stream: &mut TokenStream) -> Result<Stmt, ParseError> {
    let start = stream.current_span();
    stream.expect(Token::Load)?;
    stream.expect(Token::LParen)?;

    let module = match stream.peek() {
        Some(Token::Str(s)) => {
            let s = s.clone();
            stream.advance();
            s
        }
        other => {
            return Err(ParseError::unexpected_token(
                other,
                "as load() module name; expected a string literal",
                stream.current_span(),
            ));
        }
    };

    let mut symbols = Vec::new();
    while matches!(stream.peek(), Some(Token::Comma)) {
        stream.advance();
        if matches!(stream.peek(), Some(Token::RParen)) {
            break;
        }
        match stream.peek() {
            Some(Token::Str(name)) => {
                let name = name.clone();
                stream.advance();
                check_load_symbol(&name, stream)?;
                symbols.push((name.clone(), name));
            }
            Some(Token::Ident(_)) => {
                let local = stream.expect_ident("in load()")?;
                stream.expect(Token::Eq)?;
                let remote = match stream.peek() {
                    Some(Token::Str(s)) => {
                        let s = s.clone();
                        stream.advance();
                        s
                    }
                    other => {
                        return Err(ParseError::unexpected_token(
                            other,
                            "as load() symbol; expected a string literal",
                            stream.current_span(),
                        ));
                    }
                };
                check_load_symbol(&remote, stream)?;
                symbols.push((local, remote));
            }
            other => {
                return Err(ParseError::unexpected_token(
                    other,
                    "in load() symbol list",
                    stream.current_span(),
                ));
            }
        }
    }
    stream.expect(Token::RParen)?;

    if symbols.is_empty() {
        return Err(ParseError::invalid_syntax(
            "load() requires at least one symbol",
            start,
        ));
    }

    Ok(Stmt {
        kind: StmtKind::Load { module, symbols },
        span: start.merge(stream.last_span()),
    })
}

fn check_load_symbol(name: &str, stream: &TokenStream) -> Result<(), ParseError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .enumerate()
            .all(|(i, c)| c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit()));
    if valid {
        Ok(())
    } else {
        Err(ParseError::invalid_syntax(
            format!("load() symbol `{name}` is not a valid identifier"),
            stream.last_span(),
        ))
    }
}
