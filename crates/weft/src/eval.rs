use crate::{
    dataset::Dataset,
    error::EngineResult,
    expr::{BinOp, Expr, UnaryOp},
    registry::FunctionRegistry,
    scope::{LocalStack, Resolver},
    value::{Value, parse_int_full, parse_int_prefix},
};

/// Read-only evaluation context: everything an expression can touch.
pub(crate) struct EvalCtx<'a> {
    pub locals: &'a LocalStack,
    pub dataset: &'a Dataset,
    pub functions: &'a FunctionRegistry,
}

impl EvalCtx<'_> {
    pub fn resolver(&self) -> Resolver<'_> {
        Resolver {
            locals: self.locals,
            dataset: self.dataset,
        }
    }

    /// Evaluates an expression tree to a tagged value.
    pub fn eval(&self, expr: &Expr) -> EngineResult<Value> {
        match expr {
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Num(n) => Ok(Value::Num(*n)),
            Expr::Var(name) => Ok(Value::Var(name.clone())),
            Expr::VarNum(name) => Ok(Value::VarNum(name.clone())),
            Expr::Unary(op, operand) => {
                let arg = self.eval(operand)?;
                Ok(Value::Num(match op {
                    UnaryOp::Not => i64::from(self.as_bool(&arg) == 0),
                    UnaryOp::Exists => {
                        if arg.is_var() {
                            i64::from(self.as_string(&arg).is_some_and(|s| !s.is_empty()))
                        } else {
                            // all literal numbers and strings exist
                            1
                        }
                    }
                }))
            }
            Expr::Func(name, operand) => {
                let arg = self.eval(operand)?;
                self.functions.call(name, &self.resolver(), arg)
            }
            Expr::Binary(op, lhs, rhs) => {
                let arg1 = self.eval(lhs)?;
                let arg2 = self.eval(rhs)?;
                match op {
                    BinOp::Subscript => Ok(self.eval_subscript(&arg1, &arg2)),
                    BinOp::Dot => Ok(self.eval_dot(&arg1, &arg2)),
                    BinOp::And | BinOp::Or => Ok(self.eval_bool_op(*op, &arg1, &arg2)),
                    _ if arg1.is_numeric()
                        || arg2.is_numeric()
                        || matches!(op, BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod) =>
                    {
                        Ok(self.eval_num_op(*op, &arg1, &arg2))
                    }
                    _ => Ok(self.eval_str_op(*op, &arg1, &arg2)),
                }
            }
        }
    }

    /// `a[b]`: appends the stringified subscript to the base path. An
    /// empty subscript collapses the whole reference to empty.
    fn eval_subscript(&self, arg1: &Value, arg2: &Value) -> Value {
        let base = path_of(arg1);
        if arg2.is_numeric() {
            return Value::Var(format!("{base}.{}", self.as_num(arg2)));
        }
        match self.as_string(arg2) {
            Some(sub) if !sub.is_empty() => Value::Var(format!("{base}.{sub}")),
            _ => Value::Var(String::new()),
        }
    }

    /// `a.b`: path concatenation. A variable-typed right side contributes
    /// its path; literals contribute their value.
    fn eval_dot(&self, arg1: &Value, arg2: &Value) -> Value {
        let base = path_of(arg1);
        match arg2 {
            Value::Var(name) | Value::VarNum(name) => Value::Var(format!("{base}.{name}")),
            Value::Num(n) => Value::Var(format!("{base}.{n}")),
            Value::Str(_) => match self.as_string(arg2) {
                Some(sub) if !sub.is_empty() => Value::Var(format!("{base}.{sub}")),
                _ => Value::Var(String::new()),
            },
        }
    }

    fn eval_bool_op(&self, op: BinOp, arg1: &Value, arg2: &Value) -> Value {
        let n1 = self.as_bool(arg1) != 0;
        let n2 = self.as_bool(arg2) != 0;
        let out = match op {
            BinOp::And => n1 && n2,
            BinOp::Or => n1 || n2,
            _ => unreachable!("not a boolean operator"),
        };
        Value::Num(i64::from(out))
    }

    /// Numeric evaluation: both operands coerced to integers. Division by
    /// zero yields `i32::MAX`, modulo by zero yields 0.
    fn eval_num_op(&self, op: BinOp, arg1: &Value, arg2: &Value) -> Value {
        let n1 = self.as_num(arg1);
        let n2 = self.as_num(arg2);
        let out = match op {
            BinOp::Eq => i64::from(n1 == n2),
            BinOp::Ne => i64::from(n1 != n2),
            BinOp::Lt => i64::from(n1 < n2),
            BinOp::Lte => i64::from(n1 <= n2),
            BinOp::Gt => i64::from(n1 > n2),
            BinOp::Gte => i64::from(n1 >= n2),
            BinOp::Add => n1.wrapping_add(n2),
            BinOp::Sub => n1.wrapping_sub(n2),
            BinOp::Mul => n1.wrapping_mul(n2),
            BinOp::Div => {
                if n2 == 0 {
                    i64::from(i32::MAX)
                } else {
                    n1.wrapping_div(n2)
                }
            }
            BinOp::Mod => {
                if n2 == 0 {
                    0
                } else {
                    n1.wrapping_rem(n2)
                }
            }
            _ => unreachable!("not a numeric operator"),
        };
        Value::Num(out)
    }

    /// String evaluation with the null table: a missing variable is null,
    /// `null == null`, null orders before any string, and `null + x` is
    /// `x`.
    fn eval_str_op(&self, op: BinOp, arg1: &Value, arg2: &Value) -> Value {
        let s1 = self.as_string(arg1);
        let s2 = self.as_string(arg2);
        match (s1, s2) {
            (Some(s1), Some(s2)) => {
                let ord = s1.cmp(&s2);
                let out = match op {
                    BinOp::Eq => i64::from(ord.is_eq()),
                    BinOp::Ne => i64::from(ord.is_ne()),
                    BinOp::Lt => i64::from(ord.is_lt()),
                    BinOp::Lte => i64::from(ord.is_le()),
                    BinOp::Gt => i64::from(ord.is_gt()),
                    BinOp::Gte => i64::from(ord.is_ge()),
                    BinOp::Add => return Value::Str(s1 + &s2),
                    _ => unreachable!("not a string operator"),
                };
                Value::Num(out)
            }
            (s1, s2) => {
                let out = match op {
                    BinOp::Eq => i64::from(s1.is_none() && s2.is_none()),
                    BinOp::Ne => i64::from(s1.is_some() || s2.is_some()),
                    BinOp::Lt => i64::from(s1.is_none() && s2.is_some()),
                    BinOp::Lte => i64::from(s1.is_none()),
                    BinOp::Gt => i64::from(s1.is_some() && s2.is_none()),
                    BinOp::Gte => i64::from(s2.is_none()),
                    BinOp::Add => return Value::Str(s1.or(s2).unwrap_or_default()),
                    _ => unreachable!("not a string operator"),
                };
                Value::Num(out)
            }
        }
    }

    /// String coercion: literal passthrough, variable lookup (`None` for
    /// missing), integers decimalized.
    pub fn as_string(&self, value: &Value) -> Option<String> {
        match value {
            Value::Str(s) => Some(s.clone()),
            Value::Num(n) => Some(n.to_string()),
            Value::Var(name) | Value::VarNum(name) => self.resolver().value_of(name),
        }
    }

    /// Integer coercion: strings and variable values go through a base-0
    /// prefix parse.
    pub fn as_num(&self, value: &Value) -> i64 {
        match value {
            Value::Str(s) => parse_int_prefix(s).0,
            Value::Num(n) => *n,
            Value::Var(name) | Value::VarNum(name) => self.resolver().num_of(name),
        }
    }

    /// Boolean coercion. Missing or empty is false; a string that parses
    /// wholly as an integer coerces to that integer (so `"0"` is false);
    /// any other non-empty string is true.
    pub fn as_bool(&self, value: &Value) -> i64 {
        match value {
            Value::Num(n) => *n,
            Value::VarNum(name) => self.resolver().num_of(name),
            Value::Str(_) | Value::Var(_) => {
                let s = match value {
                    Value::Str(s) => Some(s.clone()),
                    Value::Var(name) => self.resolver().value_of(name),
                    _ => unreachable!(),
                };
                match s {
                    None => 0,
                    Some(s) if s.is_empty() => 0,
                    Some(s) => parse_int_full(&s).unwrap_or(1),
                }
            }
        }
    }
}

/// The variable path carried by a value, for the path-forming operators;
/// non-reference values contribute their text.
fn path_of(value: &Value) -> String {
    match value {
        Value::Var(name) | Value::VarNum(name) | Value::Str(name) => name.clone(),
        Value::Num(n) => n.to_string(),
    }
}
