use std::fmt;

use crate::{
    error::{EngineResult, Error},
    registry::FunctionRegistry,
    token::{Op, Token, TokenKind, Tokens, tokenize},
    value::parse_int_prefix,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    /// `!` boolean negation.
    Not,
    /// `?` existence test.
    Exists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    /// `.` dataset path concatenation.
    Dot,
    /// `a[b]` dataset subscript.
    Subscript,
}

/// An expression tree. The parser produces no shared subtrees; every node
/// owns its children and payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Expr {
    Str(String),
    Num(i64),
    Var(String),
    VarNum(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// Call of a registered function; the name was resolved against the
    /// registry at parse time.
    Func(String, Box<Expr>),
}

/// Operator precedence, lowest binding first. Level 2 holds the unary
/// operators; the subscript pseudo-level binds tightest.
const OPERATOR_ORDER: &[&[Op]] = &[
    &[Op::Or],
    &[Op::And],
    &[Op::Not, Op::Exists],
    &[Op::Eq, Op::Ne],
    &[Op::Gt, Op::Gte, Op::Lt, Op::Lte],
    &[Op::Add, Op::Sub],
    &[Op::Mul, Op::Div, Op::Mod, Op::Dot],
    &[Op::LBracket],
];

const UNARY_LEVEL: usize = 2;

fn bin_op(op: Op) -> BinOp {
    match op {
        Op::Or => BinOp::Or,
        Op::And => BinOp::And,
        Op::Eq => BinOp::Eq,
        Op::Ne => BinOp::Ne,
        Op::Lt => BinOp::Lt,
        Op::Lte => BinOp::Lte,
        Op::Gt => BinOp::Gt,
        Op::Gte => BinOp::Gte,
        Op::Add => BinOp::Add,
        Op::Sub => BinOp::Sub,
        Op::Mul => BinOp::Mul,
        Op::Div => BinOp::Div,
        Op::Mod => BinOp::Mod,
        Op::Dot => BinOp::Dot,
        Op::LBracket => BinOp::Subscript,
        _ => unreachable!("not a binary operator"),
    }
}

fn unary_op(op: Op) -> UnaryOp {
    match op {
        Op::Not => UnaryOp::Not,
        Op::Exists => UnaryOp::Exists,
        _ => unreachable!("not a unary operator"),
    }
}

fn token_op(token: &Token<'_>) -> Option<Op> {
    match token.kind {
        TokenKind::Op(op) => Some(op),
        _ => None,
    }
}

/// Operators permitted in an lvalue: a bare variable plus the path-forming
/// operators.
fn lvalue_ok(token: &Token<'_>) -> bool {
    match token.kind {
        TokenKind::Op(op) => matches!(op, Op::Dot | Op::LBracket | Op::RBracket),
        _ => true,
    }
}

/// Parses an expression body into a tree.
///
/// `lvalue` restricts the operator set to shapes that can appear on the
/// left of `set`. `ctx` is the source-context prefix for errors.
pub(crate) fn parse_expr(
    body: &str,
    lvalue: bool,
    functions: &FunctionRegistry,
    ctx: &str,
) -> EngineResult<Expr> {
    let tokens: Tokens<'_> = tokenize(body, ctx)?;
    parse_tokens(&tokens, lvalue, functions, ctx)
}

/// Recursive descent over a token slice: at each precedence level, scan
/// right to left (skipping balanced groups) for a binary operator of that
/// level; right-to-left scanning with left recursion yields standard left
/// associativity.
fn parse_tokens(
    tokens: &[Token<'_>],
    lvalue: bool,
    functions: &FunctionRegistry,
    ctx: &str,
) -> EngineResult<Expr> {
    if tokens.is_empty() {
        return Err(Error::parse(ctx, "Bad Expression"));
    }
    if tokens.len() == 1 {
        let token = &tokens[0];
        return match token.kind {
            TokenKind::Str => Ok(Expr::Str(token.text.to_owned())),
            TokenKind::Num => Ok(Expr::Num(parse_int_prefix(token.text).0)),
            TokenKind::Var => Ok(Expr::Var(token.text.to_owned())),
            TokenKind::VarNum => Ok(Expr::VarNum(token.text.to_owned())),
            TokenKind::Op(op) => Err(Error::parse(
                ctx,
                format!("Terminal token is not an argument, type is {}", op.symbol()),
            )),
        };
    }

    let last = tokens.len() - 1;
    for (level, ops) in OPERATOR_ORDER.iter().enumerate() {
        let mut x = last as isize;
        'scan: while x >= 0 {
            // skip over balanced groups: the whole group is an expression
            // that cannot match a binary operator at this level
            if token_op(&tokens[x as usize]) == Some(Op::RParen) {
                let mut depth = 1;
                x -= 1;
                while x >= 0 {
                    match token_op(&tokens[x as usize]) {
                        Some(Op::RParen) => depth += 1,
                        Some(Op::LParen) => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    x -= 1;
                }
                if depth != 0 {
                    return Err(Error::parse(ctx, "Missing left parenthesis in expression"));
                }
                if x == 0 {
                    break 'scan;
                }
                x -= 1;
            }
            if token_op(&tokens[x as usize]) == Some(Op::RBracket) {
                let mut depth = 1;
                x -= 1;
                while x >= 0 {
                    match token_op(&tokens[x as usize]) {
                        Some(Op::RBracket) => depth += 1,
                        Some(Op::LBracket) => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    x -= 1;
                }
                if depth != 0 {
                    return Err(Error::parse(ctx, "Missing left bracket in expression"));
                }
                if x == 0 {
                    break 'scan;
                }
                // no step here: the left bracket is both the group opener
                // and the subscript operator
            } else if let Some(op @ (Op::LBracket | Op::LParen)) = token_op(&tokens[x as usize]) {
                return Err(Error::parse(
                    ctx,
                    format!(
                        "Missing right {} in expression",
                        if op == Op::LBracket { "bracket" } else { "parenthesis" }
                    ),
                ));
            }
            let index = x as usize;
            if lvalue && !lvalue_ok(&tokens[index]) {
                let symbol = token_op(&tokens[index]).map_or("?", Op::symbol);
                return Err(Error::parse(ctx, format!("Invalid op '{symbol}' in lvalue")));
            }
            if level == UNARY_LEVEL {
                if index == 0 {
                    if let Some(op) = token_op(&tokens[0]).filter(|op| ops.contains(op)) {
                        let operand = parse_tokens(&tokens[1..], lvalue, functions, ctx)?;
                        return Ok(Expr::Unary(unary_op(op), Box::new(operand)));
                    }
                }
            } else if let Some(op) = token_op(&tokens[index]).filter(|op| ops.contains(op)) {
                let rhs = if op == Op::LBracket {
                    // re-parse from the bracket so the group strip below
                    // peels it; the lvalue restriction is lifted inside
                    parse_tokens(&tokens[index..], false, functions, ctx)?
                } else {
                    parse_tokens(&tokens[index + 1..], lvalue, functions, ctx)?
                };
                let lhs = parse_tokens(&tokens[..index], lvalue, functions, ctx)?;
                return Ok(Expr::Binary(bin_op(op), Box::new(lhs), Box::new(rhs)));
            }
            x -= 1;
        }
    }

    // the expression is wrapped in enclosing group tokens: strip and retry
    let first = token_op(&tokens[0]);
    let closing = token_op(&tokens[last]);
    if (first == Some(Op::LParen) && closing == Some(Op::RParen))
        || (first == Some(Op::LBracket) && closing == Some(Op::RBracket))
    {
        return parse_tokens(&tokens[1..last], lvalue, functions, ctx);
    }

    // unary operator against a parenthesized expression or a whole tail
    if let Some(op) = first.filter(|op| matches!(op, Op::Not | Op::Exists)) {
        let operand = if token_op(&tokens[1]) == Some(Op::LParen) && closing == Some(Op::RParen) {
            parse_tokens(&tokens[2..last], lvalue, functions, ctx)?
        } else {
            parse_tokens(&tokens[1..], lvalue, functions, ctx)?
        };
        return Ok(Expr::Unary(unary_op(op), Box::new(operand)));
    }

    // function call: name ( expr )
    if tokens[0].kind == TokenKind::Var
        && token_op(&tokens[1]) == Some(Op::LParen)
        && closing == Some(Op::RParen)
    {
        let name = tokens[0].text;
        if !functions.contains(name) {
            return Err(Error::parse(ctx, format!("Unknown function {name} called")));
        }
        let arg = parse_tokens(&tokens[2..last], lvalue, functions, ctx)?;
        return Ok(Expr::Func(name.to_owned(), Box::new(arg)));
    }

    Err(Error::parse(ctx, format!("Bad Expression:{}", token_list(tokens))))
}

fn token_list(tokens: &[Token<'_>]) -> String {
    use std::fmt::Write as _;

    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        let kind = match token.kind {
            TokenKind::Str => "s",
            TokenKind::Num => "n",
            TokenKind::Var => "v",
            TokenKind::VarNum => "vn",
            TokenKind::Op(op) => op.symbol(),
        };
        if token.is_value() {
            let _ = write!(out, " {i}:{kind}:'{}'", token.text);
        } else {
            let _ = write!(out, " {i}:{kind}");
        }
    }
    out
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::Or => "||",
            Self::And => "&&",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Dot => ".",
            Self::Subscript => "[",
        }
    }
}

/// Infix re-display, used by the tree dump.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn grouped(expr: &Expr, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match expr {
                Expr::Binary(op, ..) if !matches!(op, BinOp::Dot | BinOp::Subscript) => {
                    write!(f, "({expr})")
                }
                _ => write!(f, "{expr}"),
            }
        }

        match self {
            Self::Str(s) => write!(f, "\"{s}\""),
            Self::Num(n) => write!(f, "{n}"),
            Self::Var(name) => f.write_str(name),
            Self::VarNum(name) => write!(f, "#{name}"),
            Self::Unary(UnaryOp::Not, operand) => {
                f.write_str("!")?;
                grouped(operand, f)
            }
            Self::Unary(UnaryOp::Exists, operand) => {
                f.write_str("?")?;
                grouped(operand, f)
            }
            Self::Binary(BinOp::Subscript, lhs, rhs) => {
                grouped(lhs, f)?;
                write!(f, "[{rhs}]")
            }
            Self::Binary(BinOp::Dot, lhs, rhs) => {
                grouped(lhs, f)?;
                f.write_str(".")?;
                grouped(rhs, f)
            }
            Self::Binary(op, lhs, rhs) => {
                grouped(lhs, f)?;
                write!(f, " {} ", op.symbol())?;
                grouped(rhs, f)
            }
            Self::Func(name, arg) => write!(f, "{name}({arg})"),
        }
    }
}
