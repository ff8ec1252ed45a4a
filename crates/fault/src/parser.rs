use crate::ir::{Definition, Expr, ExprKind, Marker, Param, Span, Stmt, StmtKind};
use miette::Diagnostic;
use std::ops::Range;
use thiserror::Error;

mod expr;
pub mod lexer;

pub use lexer::Token;

#[derive(Error, Diagnostic, Debug, Clone, PartialEq)]
#[error("{message}")]
#[diagnostic(code(fault::parse))]
pub struct ParseError {
    pub message: String,
    #[label("here")]
    pub span: Span,
}

impl ParseError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }

    fn expected(expected: &str, found: Option<&Token>, span: Span) -> Self {
        match found {
            Some(token) => Self::new(format!("expected {expected}, found {token}"), span),
            None => Self::new(format!("expected {expected}, found end of input"), span),
        }
    }
}

/// Token cursor for the recursive-descent parser.
pub(crate) struct TokenStream<'src> {
    tokens: &'src [(Token, Range<usize>)],
    pos: usize,
    source_len: usize,
}

impl<'src> TokenStream<'src> {
    fn new(tokens: &'src [(Token, Range<usize>)], source_len: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            source_len,
        }
    }

    pub(crate) fn peek(&self) -> Option<&'src Token> {
        self.tokens.get(self.pos).map(|(tok, _)| tok)
    }

    pub(crate) fn advance(&mut self) -> Option<&'src Token> {
        let token = self.tokens.get(self.pos).map(|(tok, _)| tok);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    pub(crate) fn check(&self, expected: &Token) -> bool {
        matches!(self.peek(), Some(t) if std::mem::discriminant(t) == std::mem::discriminant(expected))
    }

    /// Consumes `expected` if it is the next token.
    pub(crate) fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn expect(&mut self, expected: Token) -> Result<Span, ParseError> {
        let span = self.current_span();
        if self.eat(&expected) {
            Ok(span)
        } else {
            Err(ParseError::expected(
                &expected.to_string(),
                self.peek(),
                span,
            ))
        }
    }

    pub(crate) fn expect_ident(&mut self, what: &str) -> Result<(String, Span), ParseError> {
        let span = self.current_span();
        match self.peek() {
            Some(Token::Ident(name)) => {
                self.pos += 1;
                Ok((name.clone(), span))
            }
            other => Err(ParseError::expected(what, other, span)),
        }
    }

    pub(crate) fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    pub(crate) fn current_span(&self) -> Span {
        match self.tokens.get(self.pos) {
            Some((_, range)) => Span::new(range.start, range.end),
            None => Span::new(self.source_len, self.source_len),
        }
    }

    /// Span from the token at `start` up to the last consumed token.
    pub(crate) fn span_from(&self, start: Span) -> Span {
        match self.pos.checked_sub(1).and_then(|i| self.tokens.get(i)) {
            Some((_, range)) => Span::new(start.start, range.end.max(start.start)),
            None => start,
        }
    }

    pub(crate) fn error_here(&self, expected: &str) -> ParseError {
        ParseError::expected(expected, self.peek(), self.current_span())
    }
}

fn tokenize(source: &str) -> Result<Vec<(Token, Range<usize>)>, ParseError> {
    lexer::lex(source)
        .map_err(|range| ParseError::new("unrecognized input", Span::new(range.start, range.end)))
}

/// Parses exactly one test-function definition.
pub fn parse_definition(source: &str) -> Result<Definition, ParseError> {
    let tokens = tokenize(source)?;
    let mut stream = TokenStream::new(&tokens, source.len());
    let def = parse_item(&mut stream)?;
    if !stream.at_end() {
        return Err(stream.error_here("end of input"));
    }
    Ok(def)
}

/// Parses every definition in `source`, in order of appearance.
pub fn parse_module(source: &str) -> Result<Vec<Definition>, ParseError> {
    let tokens = tokenize(source)?;
    let mut stream = TokenStream::new(&tokens, source.len());
    let mut defs = Vec::new();
    while !stream.at_end() {
        defs.push(parse_item(&mut stream)?);
    }
    Ok(defs)
}

/// Parses a standalone expression, e.g. an annotation supplied on its own.
pub fn parse_expr(source: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(source)?;
    let mut stream = TokenStream::new(&tokens, source.len());
    let expr = expr::parse_expr(&mut stream)?;
    if !stream.at_end() {
        return Err(stream.error_here("end of expression"));
    }
    Ok(expr)
}

fn parse_item(stream: &mut TokenStream) -> Result<Definition, ParseError> {
    let start = stream.current_span();

    let mut doc_lines = Vec::new();
    while let Some(Token::DocComment(line)) = stream.peek() {
        doc_lines.push(line.clone());
        stream.advance();
    }
    let doc = (!doc_lines.is_empty()).then(|| doc_lines.join("\n"));

    let mut markers = Vec::new();
    while stream.check(&Token::Hash) {
        markers.push(parse_marker(stream)?);
    }

    stream.expect(Token::Fn)?;
    let (name, _) = stream.expect_ident("function name")?;

    stream.expect(Token::LParen)?;
    let mut params: Vec<Param> = Vec::new();
    while !stream.check(&Token::RParen) {
        let (param, span) = stream.expect_ident("parameter name")?;
        if params.iter().any(|p| p.name == param) {
            return Err(ParseError::new(
                format!("duplicate parameter `{param}`"),
                span,
            ));
        }
        stream.expect(Token::Colon)?;
        let annotation = expr::parse_expr(stream)?;
        params.push(Param {
            name: param,
            annotation,
            span: stream.span_from(span),
        });
        if !stream.eat(&Token::Comma) {
            break;
        }
    }
    stream.expect(Token::RParen)?;

    let body = parse_block(stream)?;
    Ok(Definition {
        name,
        doc,
        markers,
        params,
        body,
        span: stream.span_from(start),
    })
}

fn parse_marker(stream: &mut TokenStream) -> Result<Marker, ParseError> {
    let start = stream.expect(Token::Hash)?;
    stream.expect(Token::LBracket)?;
    let (name, _) = stream.expect_ident("marker name")?;
    let args = if stream.check(&Token::LParen) {
        expr::parse_call_args(stream)?
    } else {
        Vec::new()
    };
    stream.expect(Token::RBracket)?;
    Ok(Marker {
        name,
        args,
        span: stream.span_from(start),
    })
}

fn parse_block(stream: &mut TokenStream) -> Result<Vec<Stmt>, ParseError> {
    stream.expect(Token::LBrace)?;
    let mut body = Vec::new();
    while !stream.check(&Token::RBrace) {
        if stream.at_end() {
            return Err(stream.error_here("`}`"));
        }
        body.push(parse_stmt(stream)?);
    }
    stream.expect(Token::RBrace)?;
    Ok(body)
}

fn parse_stmt(stream: &mut TokenStream) -> Result<Stmt, ParseError> {
    let start = stream.current_span();
    let kind = match stream.peek() {
        Some(Token::Let) => {
            stream.advance();
            let (name, _) = stream.expect_ident("variable name")?;
            stream.expect(Token::Assign)?;
            let value = expr::parse_expr(stream)?;
            stream.expect(Token::Semi)?;
            StmtKind::Let { name, value }
        }
        Some(Token::If) => return parse_if(stream),
        Some(Token::For) => {
            stream.advance();
            let (var, _) = stream.expect_ident("loop variable")?;
            stream.expect(Token::In)?;
            let start_expr = expr::parse_expr(stream)?;
            stream.expect(Token::DotDot)?;
            let end_expr = expr::parse_expr(stream)?;
            let body = parse_block(stream)?;
            StmtKind::For {
                var,
                start: start_expr,
                end: end_expr,
                body,
            }
        }
        Some(Token::Assert) => {
            stream.advance();
            let cond = expr::parse_expr(stream)?;
            let message = if stream.eat(&Token::Comma) {
                Some(expr::parse_expr(stream)?)
            } else {
                None
            };
            stream.expect(Token::Semi)?;
            StmtKind::Assert { cond, message }
        }
        Some(Token::Return) => {
            stream.advance();
            let value = if stream.check(&Token::Semi) {
                None
            } else {
                Some(expr::parse_expr(stream)?)
            };
            stream.expect(Token::Semi)?;
            StmtKind::Return(value)
        }
        _ => {
            let first = expr::parse_expr(stream)?;
            if stream.check(&Token::Assign) {
                let mut exprs = vec![first];
                while stream.eat(&Token::Assign) {
                    exprs.push(expr::parse_expr(stream)?);
                }
                let value = exprs.pop().ok_or_else(|| stream.error_here("expression"))?;
                if let Some(bad) = exprs.iter().find(|target| !is_place(target)) {
                    return Err(ParseError::new(
                        format!("invalid assignment target `{bad}`"),
                        bad.span,
                    ));
                }
                stream.expect(Token::Semi)?;
                StmtKind::Assign {
                    targets: exprs,
                    value,
                }
            } else {
                stream.expect(Token::Semi)?;
                StmtKind::Expr(first)
            }
        }
    };
    Ok(Stmt::new(kind, stream.span_from(start)))
}

fn parse_if(stream: &mut TokenStream) -> Result<Stmt, ParseError> {
    let start = stream.expect(Token::If)?;
    let cond = expr::parse_expr(stream)?;
    let then_body = parse_block(stream)?;
    let else_body = if stream.eat(&Token::Else) {
        if stream.check(&Token::If) {
            Some(vec![parse_if(stream)?])
        } else {
            Some(parse_block(stream)?)
        }
    } else {
        None
    };
    Ok(Stmt::new(
        StmtKind::If {
            cond,
            then_body,
            else_body,
        },
        stream.span_from(start),
    ))
}

/// Returns `true` if `expr` can appear on the left of `=`.
pub(crate) fn is_place(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Ident(_) | ExprKind::Attribute { .. } | ExprKind::Index { .. } => true,
        ExprKind::Tuple(items) => items.iter().all(is_place),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::BinaryOp;

    #[test]
    fn test_parse_full_definition() {
        let src = r#"
            /// Adds two nibbles.
            #[parametrize(a, [1, 2])]
            fn test_add(a: Random(4), dut: Adder) {
                dut.a = a;
                dut.eval();
                assert dut.out == a, "mismatch";
            }
        "#;
        let def = parse_definition(src).unwrap();
        assert_eq!(def.name, "test_add");
        assert_eq!(def.doc.as_deref(), Some("Adds two nibbles."));
        assert_eq!(def.markers.len(), 1);
        assert_eq!(def.markers[0].name, "parametrize");
        assert_eq!(def.params.len(), 2);
        assert_eq!(def.params[1].annotation.as_ident(), Some("Adder"));
        assert_eq!(def.body.len(), 3);
        assert!(matches!(def.body[0].kind, StmtKind::Assign { .. }));
    }

    #[test]
    fn test_parse_chained_assignment() {
        let def = parse_definition("fn t(d: C) { d.x = d.y = 3; }").unwrap();
        match &def.body[0].kind {
            StmtKind::Assign { targets, .. } => assert_eq!(targets.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_precedence() {
        let expr = parse_expr("a + b * c == d").unwrap();
        match expr.kind {
            ExprKind::Binary { op, left, .. } => {
                assert_eq!(op, BinaryOp::Eq);
                assert!(matches!(left.kind, ExprKind::Binary { op: BinaryOp::Add, .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_else_if_and_for() {
        let src = "fn t() { for i in 0..4 { if i == 0 { x(); } else if i == 1 { y(); } else { z(); } } }";
        let def = parse_definition(src).unwrap();
        match &def.body[0].kind {
            StmtKind::For { var, body, .. } => {
                assert_eq!(var, "i");
                assert!(matches!(body[0].kind, StmtKind::If { else_body: Some(_), .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_module_multiple() {
        let defs = parse_module("fn a() {} fn b(x: Random(1)) { return; }").unwrap();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[1].name, "b");
    }

    #[test]
    fn test_missing_annotation() {
        let err = parse_definition("fn t(a) {}").unwrap_err();
        assert!(err.message.contains("expected `:`"), "{}", err.message);
    }

    #[test]
    fn test_duplicate_parameter() {
        let err = parse_definition("fn t(a: X, a: Y) {}").unwrap_err();
        assert_eq!(err.message, "duplicate parameter `a`");
    }

    #[test]
    fn test_unterminated_body() {
        let err = parse_definition("fn t() { x();").unwrap_err();
        assert!(err.message.contains("end of input"), "{}", err.message);
    }

    #[test]
    fn test_invalid_assignment_target() {
        let err = parse_definition("fn t() { 1 = 2; }").unwrap_err();
        assert!(err.message.contains("assignment target"), "{}", err.message);
    }
}
