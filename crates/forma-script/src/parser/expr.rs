//! Expression parsing: precedence climbing with a postfix loop.

use super::{ParseError, TokenStream};
use crate::ast::{Arg, BinOp, Expr, ExprKind, Target, UnaryOp};
use crate::lexer::Token;

/// Operator associativity. Comparisons are non-associative: chaining them
/// is a parse error rather than a silently different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Assoc {
    Left,
    NonAssoc,
}

/// Binary operator metadata: (precedence, associativity, op).
/// Higher precedence binds tighter.
fn binary_op_info(token: &Token) -> Option<(u8, Assoc, BinOp)> {
    match token {
        Token::Or => Some((10, Assoc::Left, BinOp::Or)),
        Token::And => Some((20, Assoc::Left, BinOp::And)),
        Token::EqEq => Some((30, Assoc::NonAssoc, BinOp::Eq)),
        Token::BangEq => Some((30, Assoc::NonAssoc, BinOp::Ne)),
        Token::Lt => Some((30, Assoc::NonAssoc, BinOp::Lt)),
        Token::LtEq => Some((30, Assoc::NonAssoc, BinOp::Le)),
        Token::Gt => Some((30, Assoc::NonAssoc, BinOp::Gt)),
        Token::GtEq => Some((30, Assoc::NonAssoc, BinOp::Ge)),
        Token::In => Some((30, Assoc::NonAssoc, BinOp::In)),
        Token::Plus => Some((40, Assoc::Left, BinOp::Add)),
        Token::Minus => Some((40, Assoc::Left, BinOp::Sub)),
        Token::Star => Some((50, Assoc::Left, BinOp::Mul)),
        Token::Slash => Some((50, Assoc::Left, BinOp::Div)),
        Token::SlashSlash => Some((50, Assoc::Left, BinOp::FloorDiv)),
        Token::Percent => Some((50, Assoc::Left, BinOp::Mod)),
        _ => None,
    }
}

/// `not` binds looser than comparisons but tighter than `and`/`or`, so its
/// operand is parsed at the comparison precedence level.
const NOT_OPERAND_PREC: u8 = 30;

/// Parse a full expression, including conditional (`a if c else b`) form.
pub fn parse_expr(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let expr = parse_pratt(stream, 0)?;
    if matches!(stream.peek(), Some(Token::If)) && !stream.starts_new_line() {
        stream.advance();
        let cond = parse_pratt(stream, 0)?;
        stream.expect(Token::Else)?;
        let orelse = parse_expr(stream)?;
        let span = expr.span.merge(orelse.span);
        return Ok(Expr::new(
            ExprKind::Conditional {
                cond: Box::new(cond),
                then: Box::new(expr),
                orelse: Box::new(orelse),
            },
            span,
        ));
    }
    Ok(expr)
}

/// Parse an expression, folding a bare comma-separated sequence into a
/// tuple (`return a, b` / `x, y = ...` right-hand sides).
pub fn parse_expr_list(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let first = parse_expr(stream)?;
    if !matches!(stream.peek(), Some(Token::Comma)) {
        return Ok(first);
    }
    let mut items = vec![first];
    while matches!(stream.peek(), Some(Token::Comma)) {
        stream.advance();
        if stream.at_end() || stream.starts_new_line() {
            break;
        }
        items.push(parse_expr(stream)?);
    }
    let span = items[0].span.merge(items[items.len() - 1].span);
    Ok(Expr::new(ExprKind::Tuple(items), span))
}

/// Precedence climbing over binary operators.
fn parse_pratt(stream: &mut TokenStream, min_prec: u8) -> Result<Expr, ParseError> {
    let mut left = parse_prefix(stream)?;

    loop {
        if stream.starts_new_line() {
            break;
        }
        // `not in` is the only two-token operator.
        let info = match stream.peek() {
            Some(Token::Not) if matches!(stream.peek_nth(1), Some(Token::In)) => {
                Some((30, Assoc::NonAssoc, BinOp::NotIn))
            }
            Some(token) => binary_op_info(token),
            None => None,
        };
        let Some((prec, assoc, op)) = info else { break };
        if prec < min_prec {
            break;
        }

        stream.advance();
        if op == BinOp::NotIn {
            stream.advance(); // the `in` of `not in`
        }

        let right = parse_pratt(stream, prec + 1)?;
        let span = left.span.merge(right.span);
        left = Expr::new(
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            span,
        );

        if assoc == Assoc::NonAssoc {
            let chained = match stream.peek() {
                Some(Token::Not) if matches!(stream.peek_nth(1), Some(Token::In)) => true,
                Some(token) => matches!(binary_op_info(token), Some((30, Assoc::NonAssoc, _))),
                None => false,
            };
            if chained && !stream.starts_new_line() {
                return Err(ParseError::invalid_syntax(
                    "comparison operators cannot be chained",
                    stream.current_span(),
                ));
            }
        }
    }

    Ok(left)
}

/// Prefix expressions: unary operators, then postfix.
fn parse_prefix(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    match stream.peek() {
        Some(Token::Minus) => {
            let start = stream.current_span();
            stream.advance();
            let operand = parse_prefix(stream)?;
            let span = start.merge(operand.span);
            Ok(Expr::new(
                ExprKind::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                },
                span,
            ))
        }
        Some(Token::Not) => {
            let start = stream.current_span();
            stream.advance();
            let operand = parse_pratt(stream, NOT_OPERAND_PREC)?;
            let span = start.merge(operand.span);
            Ok(Expr::new(
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                span,
            ))
        }
        _ => parse_postfix(stream),
    }
}

/// Postfix expressions: attribute access, calls, indexing.
fn parse_postfix(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let mut expr = parse_atom(stream)?;

    loop {
        if stream.starts_new_line() {
            break;
        }
        match stream.peek() {
            Some(Token::Dot) => {
                stream.advance();
                let name = stream.expect_ident("after `.`")?;
                let span = expr.span.merge(stream.last_span());
                expr = Expr::new(
                    ExprKind::Attr {
                        object: Box::new(expr),
                        name,
                    },
                    span,
                );
            }
            Some(Token::LParen) => {
                let args = parse_call_args(stream)?;
                let span = expr.span.merge(stream.last_span());
                expr = Expr::new(
                    ExprKind::Call {
                        func: Box::new(expr),
                        args,
                    },
                    span,
                );
            }
            Some(Token::LBracket) => {
                stream.advance();
                let index = parse_expr(stream)?;
                stream.expect(Token::RBracket)?;
                let span = expr.span.merge(stream.last_span());
                expr = Expr::new(
                    ExprKind::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    },
                    span,
                );
            }
            _ => break,
        }
    }

    Ok(expr)
}

/// Parse `(arg, ..., name=value, ...)` including the parentheses.
/// Keyword arguments must follow positional ones.
fn parse_call_args(stream: &mut TokenStream) -> Result<Vec<Arg>, ParseError> {
    stream.expect(Token::LParen)?;
    let mut args = Vec::new();
    let mut seen_keyword = false;
    while !matches!(stream.peek(), Some(Token::RParen)) {
        let is_keyword = matches!(stream.peek(), Some(Token::Ident(_)))
            && matches!(stream.peek_nth(1), Some(Token::Eq));
        if is_keyword {
            let name = stream.expect_ident("in keyword argument")?;
            stream.expect(Token::Eq)?;
            let value = parse_expr(stream)?;
            args.push(Arg::Keyword(name, value));
            seen_keyword = true;
        } else {
            if seen_keyword {
                return Err(ParseError::invalid_syntax(
                    "positional argument after keyword argument",
                    stream.current_span(),
                ));
            }
            args.push(Arg::Positional(parse_expr(stream)?));
        }
        if matches!(stream.peek(), Some(Token::Comma)) {
            stream.advance();
        } else {
            break;
        }
    }
    stream.expect(Token::RParen)?;
    Ok(args)
}

/// Atoms: literals, names, parenthesized expressions and tuples, list and
/// dict displays, comprehensions.
fn parse_atom(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let span = stream.current_span();
    let kind = match stream.peek() {
        Some(Token::NoneLit) => {
            stream.advance();
            ExprKind::NoneLit
        }
        Some(Token::True) => {
            stream.advance();
            ExprKind::Bool(true)
        }
        Some(Token::False) => {
            stream.advance();
            ExprKind::Bool(false)
        }
        Some(Token::Int(n)) => {
            let n = *n;
            stream.advance();
            ExprKind::Int(n)
        }
        Some(Token::Float(x)) => {
            let x = *x;
            stream.advance();
            ExprKind::Float(x)
        }
        Some(Token::Str(s)) => {
            let s: std::rc::Rc<str> = s.as_str().into();
            stream.advance();
            ExprKind::Str(s)
        }
        Some(Token::Bytes(b)) => {
            let b: std::rc::Rc<[u8]> = b.as_slice().into();
            stream.advance();
            ExprKind::Bytes(b)
        }
        Some(Token::Ident(name)) => {
            let name = name.clone();
            stream.advance();
            ExprKind::Name(name)
        }
        Some(Token::LParen) => return parse_paren(stream),
        Some(Token::LBracket) => return parse_list_display(stream),
        Some(Token::LBrace) => return parse_dict_display(stream),
        other => {
            return Err(ParseError::unexpected_token(
                other,
                "in expression",
                span,
            ));
        }
    };
    Ok(Expr::new(kind, span.merge(stream.last_span())))
}

/// `(expr)`, `()`, or a parenthesized tuple `(a, b)`.
fn parse_paren(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let start = stream.current_span();
    stream.expect(Token::LParen)?;
    if matches!(stream.peek(), Some(Token::RParen)) {
        stream.advance();
        return Ok(Expr::new(ExprKind::Tuple(Vec::new()), start.merge(stream.last_span())));
    }
    let first = parse_expr(stream)?;
    if matches!(stream.peek(), Some(Token::Comma)) {
        let mut items = vec![first];
        while matches!(stream.peek(), Some(Token::Comma)) {
            stream.advance();
            if matches!(stream.peek(), Some(Token::RParen)) {
                break;
            }
            items.push(parse_expr(stream)?);
        }
        stream.expect(Token::RParen)?;
        return Ok(Expr::new(ExprKind::Tuple(items), start.merge(stream.last_span())));
    }
    stream.expect(Token::RParen)?;
    Ok(first)
}

/// `[a, b]`, `[]`, or `[expr for target in iter if cond]`.
fn parse_list_display(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let start = stream.current_span();
    stream.expect(Token::LBracket)?;
    if matches!(stream.peek(), Some(Token::RBracket)) {
        stream.advance();
        return Ok(Expr::new(ExprKind::List(Vec::new()), start.merge(stream.last_span())));
    }
    let first = parse_expr(stream)?;
    if matches!(stream.peek(), Some(Token::For)) {
        let (target, iter, cond) = parse_comp_clause(stream)?;
        stream.expect(Token::RBracket)?;
        return Ok(Expr::new(
            ExprKind::ListComp {
                expr: Box::new(first),
                target,
                iter: Box::new(iter),
                cond,
            },
            start.merge(stream.last_span()),
        ));
    }
    let mut items = vec![first];
    while matches!(stream.peek(), Some(Token::Comma)) {
        stream.advance();
        if matches!(stream.peek(), Some(Token::RBracket)) {
            break;
        }
        items.push(parse_expr(stream)?);
    }
    stream.expect(Token::RBracket)?;
    Ok(Expr::new(ExprKind::List(items), start.merge(stream.last_span())))
}

/// `{k: v, ...}`, `{}`, or `{k: v for target in iter if cond}`.
fn parse_dict_display(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let start = stream.current_span();
    stream.expect(Token::LBrace)?;
    if matches!(stream.peek(), Some(Token::RBrace)) {
        stream.advance();
        return Ok(Expr::new(ExprKind::Dict(Vec::new()), start.merge(stream.last_span())));
    }
    let key = parse_expr(stream)?;
    stream.expect(Token::Colon)?;
    let value = parse_expr(stream)?;
    if matches!(stream.peek(), Some(Token::For)) {
        let (target, iter, cond) = parse_comp_clause(stream)?;
        stream.expect(Token::RBrace)?;
        return Ok(Expr::new(
            ExprKind::DictComp {
                key: Box::new(key),
                value: Box::new(value),
                target,
                iter: Box::new(iter),
                cond,
            },
            start.merge(stream.last_span()),
        ));
    }
    let mut entries = vec![(key, value)];
    while matches!(stream.peek(), Some(Token::Comma)) {
        stream.advance();
        if matches!(stream.peek(), Some(Token::RBrace)) {
            break;
        }
        let key = parse_expr(stream)?;
        stream.expect(Token::Colon)?;
        let value = parse_expr(stream)?;
        entries.push((key, value));
    }
    stream.expect(Token::RBrace)?;
    Ok(Expr::new(ExprKind::Dict(entries), start.merge(stream.last_span())))
}

/// `for target in iter [if cond]` inside a comprehension.
fn parse_comp_clause(
    stream: &mut TokenStream,
) -> Result<(Target, Expr, Option<Box<Expr>>), ParseError> {
    stream.expect(Token::For)?;
    let target = parse_loop_target(stream)?;
    stream.expect(Token::In)?;
    let iter = parse_pratt(stream, 0)?;
    let cond = if matches!(stream.peek(), Some(Token::If)) {
        stream.advance();
        Some(Box::new(parse_pratt(stream, 0)?))
    } else {
        None
    };
    Ok((target, iter, cond))
}

/// Loop targets sit before an `in` keyword, so they are parsed at postfix
/// level (never consuming `in` as a binary operator), then converted.
pub fn parse_loop_target(stream: &mut TokenStream) -> Result<Target, ParseError> {
    let first = parse_postfix(stream)?;
    if !matches!(stream.peek(), Some(Token::Comma)) {
        return expr_to_target(first);
    }
    let mut targets = vec![expr_to_target(first)?];
    while matches!(stream.peek(), Some(Token::Comma)) {
        stream.advance();
        if matches!(stream.peek(), Some(Token::In)) {
            break;
        }
        targets.push(expr_to_target(parse_postfix(stream)?)?);
    }
    Ok(Target::Tuple(targets))
}

/// Reinterpret an expression as an assignment target.
pub fn expr_to_target(expr: Expr) -> Result<Target, ParseError> {
    match expr.kind {
        ExprKind::Name(name) => Ok(Target::Name(name)),
        ExprKind::Attr { object, name } => Ok(Target::Attr(object, name)),
        ExprKind::Index { object, index } => Ok(Target::Index(object, index)),
        ExprKind::Tuple(items) => {
            let targets = items
                .into_iter()
                .map(expr_to_target)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Target::Tuple(targets))
        }
        _ => Err(ParseError::invalid_syntax(
            "invalid assignment target",
            expr.span,
        )),
    }
}
