//! Expression evaluator used by the renderer.
//!
//! The compiler carries condition, loop and echo expressions through verbatim;
//! they are parsed here, at render time, against the current scope. The grammar
//! is deliberately small:
//!
//! ```text
//! or      := and (("or" | "||") and)*
//! and     := cmp (("and" | "&&") cmp)*
//! cmp     := concat (("==" | "!=" | "<" | ">" | "<=" | ">=") concat)?
//! concat  := sum ("~" sum)*
//! sum     := product (("+" | "-") product)*
//! product := unary (("*" | "/" | "%") unary)*
//! unary   := ("not" | "!" | "-") unary | postfix
//! postfix := primary ("." name | "[" or "]")*
//! primary := literal | name | "$" name | "(" or ")"
//! ```

use serde_json::{Map, Number, Value};
use std::cmp::Ordering;

use super::filters::{stringify, value_kind};

/// Evaluation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// A top-level variable was not bound (strict mode only).
    Undefined(String),
    /// Any other parse or type error.
    Invalid(String),
}

fn invalid<T>(message: impl Into<String>) -> Result<T, EvalError> {
    Err(EvalError::Invalid(message.into()))
}

/// Variable lookup used during evaluation.
pub trait Scope {
    fn lookup(&self, name: &str) -> Option<&Value>;
}

impl Scope for Map<String, Value> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Concat,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    Attr(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Var(String),
    Str(String),
    Num(f64),
    Op(&'static str),
}

const OPERATORS: [&str; 20] = [
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "<", ">", "!", "~", "+", "-", "*", "/", "%",
    ".", "[", "]",
];

fn lex(source: &str) -> Result<Vec<Tok>, EvalError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '(' || c == ')' {
            tokens.push(Tok::Op(if c == '(' { "(" } else { ")" }));
            i += 1;
        } else if c == '\'' || c == '"' {
            let mut s = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return invalid(format!("unterminated string in '{source}'")),
                    Some('\\') => {
                        if let Some(&next) = chars.get(i + 1) {
                            s.push(match next {
                                'n' => '\n',
                                't' => '\t',
                                other => other,
                            });
                        }
                        i += 2;
                    }
                    Some(&q) if q == c => {
                        i += 1;
                        break;
                    }
                    Some(&other) => {
                        s.push(other);
                        i += 1;
                    }
                }
            }
            tokens.push(Tok::Str(s));
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len()
                && (chars[i].is_ascii_digit()
                    || (chars[i] == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit)))
            {
                i += 1;
            }
            let literal: String = chars[start..i].iter().collect();
            let n = literal
                .parse::<f64>()
                .map_err(|_| EvalError::Invalid(format!("invalid number '{literal}'")))?;
            tokens.push(Tok::Num(n));
        } else if c == '$' || c.is_alphabetic() || c == '_' {
            let sigil = c == '$';
            let start = if sigil { i + 1 } else { i };
            i = start;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let name: String = chars[start..i].iter().collect();
            if name.is_empty() {
                return invalid("expected a variable name after '$'");
            }
            tokens.push(if sigil { Tok::Var(name) } else { Tok::Ident(name) });
        } else {
            let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
            match OPERATORS.iter().find(|op| rest.starts_with(**op)) {
                Some(&op) => {
                    tokens.push(Tok::Op(op));
                    i += op.chars().count();
                }
                None => return invalid(format!("unexpected character '{c}' in '{source}'")),
            }
        }
    }

    Ok(tokens)
}

struct ExprParser {
    tokens: Vec<Tok>,
    pos: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn eat_op(&mut self, ops: &[&str]) -> Option<&'static str> {
        match self.peek() {
            Some(Tok::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Ident(w)) if w == word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.and()?;
        while self.eat_op(&["||"]).is_some() || self.eat_word("or") {
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(self.and()?));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.comparison()?;
        while self.eat_op(&["&&"]).is_some() || self.eat_word("and") {
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(self.comparison()?));
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Expr, EvalError> {
        let lhs = self.concat()?;
        let op = match self.eat_op(&["==", "===", "!=", "!==", "<", ">", "<=", ">="]) {
            Some("==" | "===") => BinOp::Eq,
            Some("!=" | "!==") => BinOp::Ne,
            Some("<") => BinOp::Lt,
            Some(">") => BinOp::Gt,
            Some("<=") => BinOp::Le,
            Some(">=") => BinOp::Ge,
            _ => return Ok(lhs),
        };
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(self.concat()?)))
    }

    fn concat(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.sum()?;
        while self.eat_op(&["~"]).is_some() {
            lhs = Expr::Binary(BinOp::Concat, Box::new(lhs), Box::new(self.sum()?));
        }
        Ok(lhs)
    }

    fn sum(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.product()?;
        while let Some(op) = self.eat_op(&["+", "-"]) {
            let op = if op == "+" { BinOp::Add } else { BinOp::Sub };
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(self.product()?));
        }
        Ok(lhs)
    }

    fn product(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.eat_op(&["*", "/", "%"]) {
            let op = match op {
                "*" => BinOp::Mul,
                "/" => BinOp::Div,
                _ => BinOp::Rem,
            };
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(self.unary()?));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        if self.eat_op(&["!"]).is_some() || self.eat_word("not") {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        if self.eat_op(&["-"]).is_some() {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat_op(&["."]).is_some() {
                match self.tokens.get(self.pos).cloned() {
                    Some(Tok::Ident(name)) | Some(Tok::Var(name)) => {
                        self.pos += 1;
                        expr = Expr::Attr(Box::new(expr), name);
                    }
                    Some(Tok::Num(n)) if n.fract() == 0.0 && n >= 0.0 => {
                        self.pos += 1;
                        expr = Expr::Index(Box::new(expr), Box::new(Expr::Literal(Value::from(n as u64))));
                    }
                    _ => return invalid("expected an attribute name after '.'"),
                }
            } else if self.eat_op(&["["]).is_some() {
                let index = self.or()?;
                if self.eat_op(&["]"]).is_none() {
                    return invalid("expected ']'");
                }
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        let Some(token) = self.tokens.get(self.pos).cloned() else {
            return invalid("unexpected end of expression");
        };
        self.pos += 1;

        match token {
            Tok::Num(n) => Ok(Expr::Literal(number(n))),
            Tok::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Tok::Var(name) => Ok(Expr::Var(name)),
            Tok::Ident(word) => Ok(match word.as_str() {
                "true" | "TRUE" => Expr::Literal(Value::Bool(true)),
                "false" | "FALSE" => Expr::Literal(Value::Bool(false)),
                "null" | "NULL" | "none" => Expr::Literal(Value::Null),
                _ => Expr::Var(word),
            }),
            Tok::Op("(") => {
                let inner = self.or()?;
                if self.eat_op(&[")"]).is_none() {
                    return invalid("expected ')'");
                }
                Ok(inner)
            }
            Tok::Op(op) => invalid(format!("unexpected '{op}'")),
        }
    }
}

/// Parses an expression.
///
/// # Errors
///
/// Returns [`EvalError::Invalid`] for malformed input or trailing tokens.
pub fn parse(source: &str) -> Result<Expr, EvalError> {
    let mut parser = ExprParser {
        tokens: lex(source)?,
        pos: 0,
    };
    if parser.tokens.is_empty() {
        return invalid("empty expression");
    }
    let expr = parser.or()?;
    if parser.pos != parser.tokens.len() {
        return invalid(format!("unexpected trailing input in '{source}'"));
    }
    Ok(expr)
}

/// Integral values become JSON integers, everything else a float.
fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Truthiness: `null`, `false`, `0`, `""` and empty collections are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn as_number(value: &Value, op: &str) -> Result<f64, EvalError> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| EvalError::Invalid("number out of range".into())),
        Value::Null => Ok(0.0),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| {
            EvalError::Invalid(format!("cannot use string '{s}' as a number in '{op}'"))
        }),
        other => invalid(format!("cannot use {} as a number in '{op}'", value_kind(other))),
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Result<Ordering, EvalError> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        (Value::Number(_) | Value::Null | Value::Bool(_), Value::Number(_) | Value::Null | Value::Bool(_))
        | (Value::Number(_), Value::String(_))
        | (Value::String(_), Value::Number(_)) => {
            let (x, y) = (as_number(a, "compare")?, as_number(b, "compare")?);
            x.partial_cmp(&y).ok_or_else(|| EvalError::Invalid("cannot compare NaN".into()))
        }
        _ => invalid(format!("cannot compare {} with {}", value_kind(a), value_kind(b))),
    }
}

fn index(target: Value, key: &Value) -> Value {
    match (target, key) {
        (Value::Object(mut map), key) => map.remove(&stringify(key)).unwrap_or(Value::Null),
        (Value::Array(mut items), Value::Number(n)) => match n.as_u64() {
            Some(i) if (i as usize) < items.len() => items.swap_remove(i as usize),
            _ => Value::Null,
        },
        (Value::String(s), Value::Number(n)) => n
            .as_u64()
            .and_then(|i| s.chars().nth(i as usize))
            .map(|c| Value::String(c.to_string()))
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// Evaluates a parsed expression against `scope`.
///
/// Unbound top-level names are `null`, or [`EvalError::Undefined`] when
/// `strict` is set. Missing attributes and out-of-range indexes are `null`.
pub fn evaluate(expr: &Expr, scope: &dyn Scope, strict: bool) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Var(name) => match scope.lookup(name) {
            Some(value) => Ok(value.clone()),
            None if strict => Err(EvalError::Undefined(name.clone())),
            None => Ok(Value::Null),
        },
        Expr::Attr(target, name) => {
            let target = evaluate(target, scope, strict)?;
            Ok(index(target, &Value::String(name.clone())))
        }
        Expr::Index(target, key) => {
            let target = evaluate(target, scope, strict)?;
            let key = evaluate(key, scope, strict)?;
            Ok(index(target, &key))
        }
        Expr::Not(inner) => Ok(Value::Bool(!is_truthy(&evaluate(inner, scope, strict)?))),
        Expr::Neg(inner) => Ok(number(-as_number(&evaluate(inner, scope, strict)?, "-")?)),
        Expr::Binary(BinOp::Or, lhs, rhs) => {
            let left = evaluate(lhs, scope, strict)?;
            if is_truthy(&left) {
                Ok(Value::Bool(true))
            } else {
                Ok(Value::Bool(is_truthy(&evaluate(rhs, scope, strict)?)))
            }
        }
        Expr::Binary(BinOp::And, lhs, rhs) => {
            let left = evaluate(lhs, scope, strict)?;
            if !is_truthy(&left) {
                Ok(Value::Bool(false))
            } else {
                Ok(Value::Bool(is_truthy(&evaluate(rhs, scope, strict)?)))
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            let left = evaluate(lhs, scope, strict)?;
            let right = evaluate(rhs, scope, strict)?;
            binary(*op, &left, &right)
        }
    }
}

fn binary(op: BinOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    let arithmetic = |symbol: &str, f: fn(f64, f64) -> f64| -> Result<Value, EvalError> {
        Ok(number(f(as_number(left, symbol)?, as_number(right, symbol)?)))
    };

    match op {
        BinOp::Eq => Ok(Value::Bool(loose_eq(left, right))),
        BinOp::Ne => Ok(Value::Bool(!loose_eq(left, right))),
        BinOp::Lt => Ok(Value::Bool(compare(left, right)? == Ordering::Less)),
        BinOp::Gt => Ok(Value::Bool(compare(left, right)? == Ordering::Greater)),
        BinOp::Le => Ok(Value::Bool(compare(left, right)? != Ordering::Greater)),
        BinOp::Ge => Ok(Value::Bool(compare(left, right)? != Ordering::Less)),
        BinOp::Concat => Ok(Value::String(format!("{}{}", stringify(left), stringify(right)))),
        BinOp::Add => arithmetic("+", |a, b| a + b),
        BinOp::Sub => arithmetic("-", |a, b| a - b),
        BinOp::Mul => arithmetic("*", |a, b| a * b),
        BinOp::Div | BinOp::Rem => {
            let divisor = as_number(right, "/")?;
            if divisor == 0.0 {
                return invalid("division by zero");
            }
            let dividend = as_number(left, "/")?;
            Ok(number(if op == BinOp::Div { dividend / divisor } else { dividend % divisor }))
        }
        BinOp::Or | BinOp::And => unreachable!("short-circuit operators are handled in evaluate"),
    }
}

/// Parses and evaluates in one step.
pub fn eval_str(source: &str, scope: &dyn Scope, strict: bool) -> Result<Value, EvalError> {
    evaluate(&parse(source)?, scope, strict)
}
