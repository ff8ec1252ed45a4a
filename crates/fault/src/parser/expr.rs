//! Expression parsing: precedence climbing over binary operators, then
//! prefix operators, postfix chains and atoms.

use super::{ParseError, Token, TokenStream};
use crate::ir::{BinaryOp, Expr, ExprKind, UnaryOp};

fn binary_op(token: &Token) -> Option<BinaryOp> {
    let op = match token {
        Token::PipePipe => BinaryOp::Or,
        Token::AmpAmp => BinaryOp::And,
        Token::EqEq => BinaryOp::Eq,
        Token::BangEq => BinaryOp::Ne,
        Token::Lt => BinaryOp::Lt,
        Token::LtEq => BinaryOp::Le,
        Token::Gt => BinaryOp::Gt,
        Token::GtEq => BinaryOp::Ge,
        Token::Pipe => BinaryOp::BitOr,
        Token::Caret => BinaryOp::BitXor,
        Token::Amp => BinaryOp::BitAnd,
        Token::Shl => BinaryOp::Shl,
        Token::Shr => BinaryOp::Shr,
        Token::Plus => BinaryOp::Add,
        Token::Minus => BinaryOp::Sub,
        Token::Star => BinaryOp::Mul,
        Token::Slash => BinaryOp::Div,
        Token::Percent => BinaryOp::Rem,
        _ => return None,
    };
    Some(op)
}

pub(crate) fn parse_expr(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    parse_binary(stream, 0)
}

/// All binary operators are left-associative.
fn parse_binary(stream: &mut TokenStream, min_prec: u8) -> Result<Expr, ParseError> {
    let mut left = parse_prefix(stream)?;

    while let Some(op) = stream.peek().and_then(binary_op) {
        let prec = op.precedence();
        if prec < min_prec {
            break;
        }
        stream.advance();
        let right = parse_binary(stream, prec + 1)?;
        let span = left.span.join(right.span);
        left = Expr::new(
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            span,
        );
    }

    Ok(left)
}

fn parse_prefix(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let start = stream.current_span();
    let op = match stream.peek() {
        Some(Token::Minus) => UnaryOp::Neg,
        Some(Token::Bang) => UnaryOp::Not,
        Some(Token::Tilde) => UnaryOp::BitNot,
        _ => return parse_postfix(stream),
    };
    stream.advance();
    let operand = parse_prefix(stream)?;
    let span = start.join(operand.span);
    Ok(Expr::new(
        ExprKind::Unary {
            op,
            operand: Box::new(operand),
        },
        span,
    ))
}

fn parse_postfix(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let mut expr = parse_atom(stream)?;

    loop {
        match stream.peek() {
            Some(Token::Dot) => {
                stream.advance();
                let (field, field_span) = stream.expect_ident("field name after `.`")?;
                let span = expr.span.join(field_span);
                expr = Expr::new(
                    ExprKind::Attribute {
                        object: Box::new(expr),
                        field,
                    },
                    span,
                );
            }
            Some(Token::LParen) => {
                let args = parse_call_args(stream)?;
                let span = stream.span_from(expr.span);
                expr = Expr::new(
                    ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                    span,
                );
            }
            Some(Token::LBracket) => {
                stream.advance();
                let index = parse_expr(stream)?;
                stream.expect(Token::RBracket)?;
                let span = stream.span_from(expr.span);
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

/// Parses `( expr, ... )` including the parentheses.
pub(crate) fn parse_call_args(stream: &mut TokenStream) -> Result<Vec<Expr>, ParseError> {
    stream.expect(Token::LParen)?;
    let args = parse_comma_list(stream, &Token::RParen)?;
    stream.expect(Token::RParen)?;
    Ok(args)
}

fn parse_comma_list(stream: &mut TokenStream, close: &Token) -> Result<Vec<Expr>, ParseError> {
    let mut items = Vec::new();
    while !stream.check(close) {
        items.push(parse_expr(stream)?);
        if !stream.eat(&Token::Comma) {
            break;
        }
    }
    Ok(items)
}

fn parse_atom(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let start = stream.current_span();
    let kind = match stream.peek() {
        Some(Token::Int(value)) => {
            stream.advance();
            ExprKind::Int(value.clone())
        }
        Some(Token::Str(s)) => {
            stream.advance();
            ExprKind::Str(s.clone())
        }
        Some(Token::True) => {
            stream.advance();
            ExprKind::Bool(true)
        }
        Some(Token::False) => {
            stream.advance();
            ExprKind::Bool(false)
        }
        Some(Token::Ident(name)) => {
            stream.advance();
            ExprKind::Ident(name.clone())
        }
        Some(Token::LBracket) => {
            stream.advance();
            let items = parse_comma_list(stream, &Token::RBracket)?;
            stream.expect(Token::RBracket)?;
            ExprKind::List(items)
        }
        Some(Token::LParen) => {
            stream.advance();
            if stream.eat(&Token::RParen) {
                ExprKind::Tuple(Vec::new())
            } else {
                let first = parse_expr(stream)?;
                if stream.eat(&Token::RParen) {
                    // Parenthesised expression keeps its inner node.
                    return Ok(Expr::new(first.kind, stream.span_from(start)));
                }
                stream.expect(Token::Comma)?;
                let mut items = vec![first];
                items.extend(parse_comma_list(stream, &Token::RParen)?);
                stream.expect(Token::RParen)?;
                ExprKind::Tuple(items)
            }
        }
        _ => return Err(stream.error_here("expression")),
    };
    Ok(Expr::new(kind, stream.span_from(start)))
}

#[cfg(test)]
mod tests {
    use crate::ir::{BinaryOp, ExprKind, UnaryOp};
    use crate::parser::parse_expr;

    #[test]
    fn test_left_associative() {
        let expr = parse_expr("a - b - c").unwrap();
        assert_eq!(expr.to_string(), "a - b - c");
        match expr.kind {
            ExprKind::Binary { left, .. } => {
                assert!(matches!(left.kind, ExprKind::Binary { op: BinaryOp::Sub, .. }))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parenthesised_roundtrip() {
        let expr = parse_expr("(a + b) * c").unwrap();
        assert_eq!(expr.to_string(), "(a + b) * c");
    }

    #[test]
    fn test_postfix_chain() {
        let expr = parse_expr("dut.eval()").unwrap();
        match expr.kind {
            ExprKind::Call { callee, args } => {
                assert!(args.is_empty());
                assert!(matches!(callee.kind, ExprKind::Attribute { ref field, .. } if field == "eval"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unary_and_index() {
        let expr = parse_expr("~x[3]").unwrap();
        assert!(matches!(expr.kind, ExprKind::Unary { op: UnaryOp::BitNot, .. }));
        assert_eq!(expr.to_string(), "~x[3]");
    }

    #[test]
    fn test_tuple_and_list() {
        assert_eq!(parse_expr("(1, 2)").unwrap().to_string(), "(1, 2)");
        assert_eq!(parse_expr("(1,)").unwrap().to_string(), "(1,)");
        assert_eq!(parse_expr("[1, 2, 3]").unwrap().to_string(), "[1, 2, 3]");
    }
}
