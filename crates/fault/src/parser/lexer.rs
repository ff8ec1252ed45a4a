//! Tokenization of test-definition source using logos.

use logos::{Lexer, Logos};
use num_bigint::BigUint;
use num_traits::Num;
use std::fmt;
use std::ops::Range;

fn parse_radix(lex: &Lexer<Token>, prefix: usize, radix: u32) -> Option<BigUint> {
    let digits: String = lex.slice()[prefix..].chars().filter(|c| *c != '_').collect();
    BigUint::from_str_radix(&digits, radix).ok()
}

fn unescape(lex: &mut Lexer<Token>) -> Option<String> {
    let raw = lex.slice();
    let inner = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            '\\' => out.push('\\'),
            '"' => out.push('"'),
            _ => return None,
        }
    }
    Some(out)
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//([^/\n][^\n]*)?")]
pub enum Token {
    #[token("fn")]
    Fn,
    #[token("let")]
    Let,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("for")]
    For,
    #[token("in")]
    In,
    #[token("return")]
    Return,
    #[token("assert")]
    Assert,
    #[token("true")]
    True,
    #[token("false")]
    False,

    #[regex(r"///[^\n]*", |lex| lex.slice()[3..].trim().to_owned())]
    DocComment(String),
    #[regex("[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_owned())]
    Ident(String),
    #[regex("[0-9][0-9_]*", |lex| parse_radix(lex, 0, 10))]
    #[regex("0x[0-9a-fA-F_]+", |lex| parse_radix(lex, 2, 16))]
    #[regex("0b[01_]+", |lex| parse_radix(lex, 2, 2))]
    Int(BigUint),
    #[regex(r#""([^"\\\n]|\\.)*""#, unescape)]
    Str(String),

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
    #[token("..")]
    DotDot,
    #[token("#")]
    Hash,
    #[token("=")]
    Assign,
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
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("&")]
    Amp,
    #[token("&&")]
    AmpAmp,
    #[token("|")]
    Pipe,
    #[token("||")]
    PipePipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("!")]
    Bang,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Token::Fn => "`fn`",
            Token::Let => "`let`",
            Token::If => "`if`",
            Token::Else => "`else`",
            Token::For => "`for`",
            Token::In => "`in`",
            Token::Return => "`return`",
            Token::Assert => "`assert`",
            Token::True => "`true`",
            Token::False => "`false`",
            Token::DocComment(_) => "doc comment",
            Token::Ident(name) => return write!(f, "identifier `{name}`"),
            Token::Int(value) => return write!(f, "integer `{value}`"),
            Token::Str(_) => "string literal",
            Token::LParen => "`(`",
            Token::RParen => "`)`",
            Token::LBrace => "`{`",
            Token::RBrace => "`}`",
            Token::LBracket => "`[`",
            Token::RBracket => "`]`",
            Token::Comma => "`,`",
            Token::Semi => "`;`",
            Token::Colon => "`:`",
            Token::Dot => "`.`",
            Token::DotDot => "`..`",
            Token::Hash => "`#`",
            Token::Assign => "`=`",
            Token::EqEq => "`==`",
            Token::BangEq => "`!=`",
            Token::Lt => "`<`",
            Token::LtEq => "`<=`",
            Token::Gt => "`>`",
            Token::GtEq => "`>=`",
            Token::Shl => "`<<`",
            Token::Shr => "`>>`",
            Token::Plus => "`+`",
            Token::Minus => "`-`",
            Token::Star => "`*`",
            Token::Slash => "`/`",
            Token::Percent => "`%`",
            Token::Amp => "`&`",
            Token::AmpAmp => "`&&`",
            Token::Pipe => "`|`",
            Token::PipePipe => "`||`",
            Token::Caret => "`^`",
            Token::Tilde => "`~`",
            Token::Bang => "`!`",
        };
        f.write_str(s)
    }
}

/// Tokenizes `source`, returning the first unrecognized byte range on failure.
///
/// Doc comments are only meaningful in front of a definition; inside a body
/// they are dropped like ordinary comments.
pub fn lex(source: &str) -> Result<Vec<(Token, Range<usize>)>, Range<usize>> {
    let mut tokens = Vec::new();
    let mut depth = 0usize;
    for (token, span) in Token::lexer(source).spanned() {
        let token = token.map_err(|_| span.clone())?;
        match token {
            Token::LBrace => depth += 1,
            Token::RBrace => depth = depth.saturating_sub(1),
            Token::DocComment(_) if depth > 0 => continue,
            _ => {}
        }
        tokens.push((token, span));
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        lex(src).unwrap().into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn test_keywords_and_idents() {
        assert_eq!(
            kinds("fn format in_x"),
            vec![
                Token::Fn,
                Token::Ident("format".into()),
                Token::Ident("in_x".into())
            ]
        );
    }

    #[test]
    fn test_int_radix() {
        assert_eq!(
            kinds("0x1F 0b1010 1_000"),
            vec![
                Token::Int(31u32.into()),
                Token::Int(10u32.into()),
                Token::Int(1000u32.into())
            ]
        );
    }

    #[test]
    fn test_comments() {
        assert_eq!(
            kinds("/// doc\n// plain\nfn { /// inner\n }"),
            vec![
                Token::DocComment("doc".into()),
                Token::Fn,
                Token::LBrace,
                Token::RBrace
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("a..b <= << && ="),
            vec![
                Token::Ident("a".into()),
                Token::DotDot,
                Token::Ident("b".into()),
                Token::LtEq,
                Token::Shl,
                Token::AmpAmp,
                Token::Assign
            ]
        );
    }

    #[test]
    fn test_string_escape() {
        assert_eq!(kinds(r#""a\"b""#), vec![Token::Str("a\"b".into())]);
    }

    #[test]
    fn test_unknown_character() {
        assert_eq!(lex("fn @"), Err(3..4));
    }
}
