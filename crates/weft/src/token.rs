use smallvec::SmallVec;

use crate::{
    error::{EngineResult, Error},
    value::parse_int_prefix,
};

/// Upper bound on tokens in a single expression.
pub(crate) const MAX_TOKENS: usize = 256;

/// Characters that terminate an identifier or number span.
///
/// Note that `.` and `$` are absent: `a.b` lexes as a single variable
/// token, and the dot operator only arises at a bracket or paren boundary
/// (as in `a[1].b`).
pub(crate) const SEPARATORS: &[u8] = b"\"?<>=!#-+|&,)*/%[]( \t\r\n";

/// Expression operators, two-character forms listed first so the tokenizer
/// can try them before their one-character prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Lte,
    Gte,
    Eq,
    Ne,
    Or,
    And,
    Not,
    Exists,
    Lt,
    Gt,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
}

impl Op {
    /// The source spelling, used in diagnostics and the tree dump.
    pub(crate) fn symbol(self) -> &'static str {
        match self {
            Self::Lte => "<=",
            Self::Gte => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Or => "||",
            Self::And => "&&",
            Self::Not => "!",
            Self::Exists => "?",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBracket => "[",
            Self::RBracket => "]",
            Self::Dot => ".",
        }
    }
}

const TWO_CHAR_OPS: &[(&str, Op)] = &[
    ("<=", Op::Lte),
    (">=", Op::Gte),
    ("==", Op::Eq),
    ("!=", Op::Ne),
    ("||", Op::Or),
    ("&&", Op::And),
];

const ONE_CHAR_OPS: &[(u8, Op)] = &[
    (b'!', Op::Not),
    (b'?', Op::Exists),
    (b'<', Op::Lt),
    (b'>', Op::Gt),
    (b'+', Op::Add),
    (b'-', Op::Sub),
    (b'*', Op::Mul),
    (b'/', Op::Div),
    (b'%', Op::Mod),
    (b'(', Op::LParen),
    (b')', Op::RParen),
    (b'[', Op::LBracket),
    (b']', Op::RBracket),
    (b'.', Op::Dot),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
    /// Quoted string literal.
    Str,
    /// Integer literal, either forced with `#` or a bare all-numeric span.
    Num,
    /// Variable reference.
    Var,
    /// Forced-numeric variable reference (`#name`).
    VarNum,
    Op(Op),
}

/// A token slicing the expression source. The slice is empty for operator
/// tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
}

impl<'a> Token<'a> {
    fn op(op: Op) -> Self {
        Self {
            kind: TokenKind::Op(op),
            text: "",
        }
    }

    fn new(kind: TokenKind, text: &'a str) -> Self {
        Self { kind, text }
    }

    /// Whether this token is a value terminal rather than an operator.
    pub(crate) fn is_value(&self) -> bool {
        !matches!(self.kind, TokenKind::Op(_))
    }
}

pub(crate) type Tokens<'a> = SmallVec<[Token<'a>; 16]>;

fn span_to_separator(s: &str) -> &str {
    let end = s
        .bytes()
        .position(|b| SEPARATORS.contains(&b))
        .unwrap_or(s.len());
    &s[..end]
}

/// Slices an expression body into typed tokens.
///
/// `ctx` is the source-context prefix attached to any parse error.
pub(crate) fn tokenize<'a>(expr: &'a str, ctx: &str) -> EngineResult<Tokens<'a>> {
    let mut tokens = Tokens::new();
    let mut rest = expr.trim_start();
    'scan: while !rest.is_empty() {
        for (symbol, op) in TWO_CHAR_OPS {
            if let Some(after) = rest.strip_prefix(symbol) {
                tokens.push(Token::op(*op));
                rest = after.trim_start();
                check_ceiling(&tokens, expr, ctx)?;
                continue 'scan;
            }
        }
        let first = rest.as_bytes()[0];
        for (byte, op) in ONE_CHAR_OPS {
            if first == *byte {
                tokens.push(Token::op(*op));
                rest = rest[1..].trim_start();
                check_ceiling(&tokens, expr, ctx)?;
                continue 'scan;
            }
        }
        if first == b'#' {
            let body = &rest[1..];
            let (_, consumed) = parse_int_prefix(body);
            if consumed > 0 {
                tokens.push(Token::new(TokenKind::Num, &body[..consumed]));
                rest = body[consumed..].trim_start();
            } else {
                let span = span_to_separator(body);
                if span.is_empty() {
                    return Err(Error::parse(ctx, format!("Missing varname/number after #: {body}")));
                }
                tokens.push(Token::new(TokenKind::VarNum, span));
                rest = body[span.len()..].trim_start();
            }
        } else if first == b'"' || first == b'\'' {
            let body = &rest[1..];
            let Some(close) = body.bytes().position(|b| b == first) else {
                return Err(Error::parse(ctx, format!("Missing end of string: {body}")));
            };
            tokens.push(Token::new(TokenKind::Str, &body[..close]));
            rest = body[close + 1..].trim_start();
        } else if first == b'$' {
            let body = &rest[1..];
            let span = span_to_separator(body);
            if span.is_empty() {
                return Err(Error::parse(ctx, format!("Missing varname after $: {body}")));
            }
            tokens.push(Token::new(TokenKind::Var, span));
            rest = body[span.len()..].trim_start();
        } else {
            let span = span_to_separator(rest);
            if span.is_empty() {
                return Err(Error::parse(ctx, format!("Var arg specified with no varname: {rest}")));
            }
            // a bare span that is entirely a number is treated as one
            let (_, consumed) = parse_int_prefix(span);
            let kind = if consumed == span.len() && consumed > 0 {
                TokenKind::Num
            } else {
                TokenKind::Var
            };
            tokens.push(Token::new(kind, span));
            rest = rest[span.len()..].trim_start();
        }
        check_ceiling(&tokens, expr, ctx)?;
    }
    Ok(tokens)
}

fn check_ceiling(tokens: &Tokens<'_>, expr: &str, ctx: &str) -> EngineResult<()> {
    if tokens.len() >= MAX_TOKENS {
        return Err(Error::parse(
            ctx,
            format!("Expression exceeds maximum number of tokens of {MAX_TOKENS}: {expr}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(expr: &str) -> Vec<TokenKind> {
        tokenize(expr, "").unwrap().iter().map(|t| t.kind).collect()
    }

    #[test]
    fn dotted_name_is_one_token() {
        let tokens = tokenize("a.b.c", "").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Var);
        assert_eq!(tokens[0].text, "a.b.c");
    }

    #[test]
    fn two_char_ops_before_one_char() {
        assert_eq!(
            kinds("a <= b"),
            vec![TokenKind::Var, TokenKind::Op(Op::Lte), TokenKind::Var]
        );
        assert_eq!(
            kinds("a != b"),
            vec![TokenKind::Var, TokenKind::Op(Op::Ne), TokenKind::Var]
        );
    }

    #[test]
    fn bare_numbers_upgrade() {
        assert_eq!(kinds("42"), vec![TokenKind::Num]);
        assert_eq!(kinds("0x1f"), vec![TokenKind::Num]);
        assert_eq!(kinds("42abc"), vec![TokenKind::Var]);
    }

    #[test]
    fn forced_numeric() {
        let tokens = tokenize("#5", "").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Num);
        assert_eq!(tokens[0].text, "5");

        let tokens = tokenize("#count", "").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::VarNum);
        assert_eq!(tokens[0].text, "count");
    }

    #[test]
    fn quoted_strings() {
        let tokens = tokenize("\"hi there\" + 'x'", "").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Str);
        assert_eq!(tokens[0].text, "hi there");
        assert_eq!(tokens[2].kind, TokenKind::Str);
        assert_eq!(tokens[2].text, "x");
    }

    #[test]
    fn unterminated_string_is_parse_error() {
        let err = tokenize("\"oops", "[t:1]").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Parse);
        assert_eq!(err.context(), Some("[t:1]"));
    }

    #[test]
    fn dollar_var() {
        let tokens = tokenize("$name", "").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Var);
        assert_eq!(tokens[0].text, "name");
        assert!(tokenize("$", "").is_err());
    }

    #[test]
    fn subscript_chain() {
        assert_eq!(
            kinds("a[1].b"),
            vec![
                TokenKind::Var,
                TokenKind::Op(Op::LBracket),
                TokenKind::Num,
                TokenKind::Op(Op::RBracket),
                TokenKind::Op(Op::Dot),
                TokenKind::Var,
            ]
        );
    }

    #[test]
    fn token_ceiling() {
        let expr = "x + ".repeat(200);
        let err = tokenize(&expr, "").unwrap_err();
        assert!(err.message().contains("maximum number of tokens"));
    }
}
