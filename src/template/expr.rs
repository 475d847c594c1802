// Expression language for array counts, bit widths and field transforms.
// A small interpreter over scope values: literals, names, indexing,
// `fileSize()`/`len()`, C-style unary/binary operators and `?:`.

use super::scope::{Binding, Scope, Value};
use super::{Result, TemplateError};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, hex_digit1, multispace0},
    combinator::{all_consuming, map, map_res, opt, recognize},
    multi::separated_list0,
    sequence::{delimited, pair, preceded, terminated},
    IResult, Parser,
};

/// Always-available builtin returning the buffer length
pub const FILE_SIZE: &str = "fileSize";

/// Argument names bound when a transform has no parameter header
pub const DEFAULT_PARAMS: [&str; 3] = ["value", "index", "array"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    Index(String, Box<Expr>),
    Call(String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

/// A parsed expression with an optional parameter header (`v => ...`)
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    params: Vec<String>,
    body: Expr,
}

/// Positional argument passed to a transform
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Value(Value),
    /// Refers to a sequence already bound in the scope under this name
    Sequence(String),
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self> {
        all_consuming(definition)
            .parse(source)
            .map(|(_, expression)| expression)
            .map_err(|e| TemplateError::Schema(format!("invalid expression `{}`: {}", source, e)))
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Evaluate against the scope alone
    pub fn evaluate(&self, scope: &Scope) -> Result<Value> {
        let env = Env {
            scope,
            locals: Vec::new(),
        };
        eval(&self.body, &env)
    }

    /// Evaluate with positional arguments bound to the parameter names,
    /// or to `value`, `index`, `array` when the expression declares none
    pub fn apply(&self, scope: &Scope, args: Vec<Argument>) -> Result<Value> {
        let names: Vec<&str> = if self.params.is_empty() {
            DEFAULT_PARAMS.to_vec()
        } else {
            self.params.iter().map(String::as_str).collect()
        };
        let env = Env {
            scope,
            locals: names.into_iter().zip(args).collect(),
        };
        eval(&self.body, &env)
    }
}

/// Parse and evaluate `source` against `scope`
pub fn evaluate(source: &str, scope: &Scope) -> Result<Value> {
    Expression::parse(source)?.evaluate(scope)
}

// Parsing

fn symbol<'a>(sym: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    move |input: &'a str| preceded(multispace0, tag(sym)).parse(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    preceded(
        multispace0,
        recognize(pair(
            take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
            take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
        )),
    )
    .parse(input)
}

fn hex_number(input: &str) -> IResult<&str, Value> {
    map_res(
        preceded(alt((tag("0x"), tag("0X"))), hex_digit1),
        |digits: &str| i64::from_str_radix(digits, 16).map(Value::Int),
    )
    .parse(input)
}

fn decimal_number(input: &str) -> IResult<&str, Value> {
    map_res(
        recognize(pair(digit1, opt(pair(char('.'), digit1)))),
        |text: &str| -> std::result::Result<Value, String> {
            if text.contains('.') {
                text.parse::<f64>()
                    .map(Value::Float)
                    .map_err(|e| e.to_string())
            } else {
                text.parse::<i64>().map(Value::Int).map_err(|e| e.to_string())
            }
        },
    )
    .parse(input)
}

fn number(input: &str) -> IResult<&str, Value> {
    preceded(multispace0, alt((hex_number, decimal_number))).parse(input)
}

fn string_literal(input: &str) -> IResult<&str, Value> {
    map(
        preceded(
            multispace0,
            alt((
                delimited(char('"'), take_while(|c: char| c != '"'), char('"')),
                delimited(char('\''), take_while(|c: char| c != '\''), char('\'')),
            )),
        ),
        |text: &str| Value::Text(text.to_string()),
    )
    .parse(input)
}

fn reference(input: &str) -> IResult<&str, Expr> {
    let (input, name) = identifier(input)?;

    let call = delimited(
        symbol("("),
        separated_list0(symbol(","), expression),
        symbol(")"),
    )
    .parse(input);
    if let Ok((rest, args)) = call {
        return Ok((rest, Expr::Call(name.to_string(), args)));
    }

    let index = delimited(symbol("["), expression, symbol("]")).parse(input);
    if let Ok((rest, index)) = index {
        return Ok((rest, Expr::Index(name.to_string(), Box::new(index))));
    }

    let expr = match name {
        "true" => Expr::Literal(Value::Int(1)),
        "false" => Expr::Literal(Value::Int(0)),
        _ => Expr::Ident(name.to_string()),
    };
    Ok((input, expr))
}

fn primary(input: &str) -> IResult<&str, Expr> {
    alt((
        map(number, Expr::Literal),
        map(string_literal, Expr::Literal),
        delimited(symbol("("), expression, symbol(")")),
        reference,
    ))
    .parse(input)
}

fn unary(input: &str) -> IResult<&str, Expr> {
    let trimmed = input.trim_start();
    let op = match trimmed.chars().next() {
        Some('-') => UnaryOp::Neg,
        Some('!') => UnaryOp::Not,
        Some('~') => UnaryOp::BitNot,
        _ => return primary(input),
    };
    let (rest, operand) = unary(&trimmed[1..])?;
    Ok((rest, Expr::Unary(op, Box::new(operand))))
}

// Longest tokens first so `<<` is never read as `<`
const OPERATORS: [&str; 18] = [
    "||", "&&", "==", "!=", "<=", ">=", "<<", ">>", "|", "^", "&", "<", ">", "+", "-", "*",
    "/", "%",
];

// Lowest precedence first
const LEVELS: [&[(&str, BinaryOp)]; 10] = [
    &[("||", BinaryOp::Or)],
    &[("&&", BinaryOp::And)],
    &[("|", BinaryOp::BitOr)],
    &[("^", BinaryOp::BitXor)],
    &[("&", BinaryOp::BitAnd)],
    &[("==", BinaryOp::Eq), ("!=", BinaryOp::Ne)],
    &[
        ("<=", BinaryOp::Le),
        (">=", BinaryOp::Ge),
        ("<", BinaryOp::Lt),
        (">", BinaryOp::Gt),
    ],
    &[("<<", BinaryOp::Shl), (">>", BinaryOp::Shr)],
    &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
    &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Rem)],
];

fn operator(input: &str) -> Option<&'static str> {
    OPERATORS.iter().copied().find(|op| input.starts_with(op))
}

fn binary(input: &str, level: usize) -> IResult<&str, Expr> {
    if level == LEVELS.len() {
        return unary(input);
    }

    let (mut input, mut lhs) = binary(input, level + 1)?;
    loop {
        let rest = input.trim_start();
        let Some(token) = operator(rest) else { break };
        let Some(&(_, op)) = LEVELS[level].iter().find(|(sym, _)| *sym == token) else {
            break;
        };
        let (next, rhs) = binary(&rest[token.len()..], level + 1)?;
        lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        input = next;
    }
    Ok((input, lhs))
}

fn expression(input: &str) -> IResult<&str, Expr> {
    let (input, condition) = binary(input, 0)?;
    let Ok((rest, _)) = symbol("?").parse(input) else {
        return Ok((input, condition));
    };
    let (rest, then) = expression(rest)?;
    let (rest, _) = symbol(":").parse(rest)?;
    let (rest, otherwise) = expression(rest)?;
    Ok((
        rest,
        Expr::Conditional(Box::new(condition), Box::new(then), Box::new(otherwise)),
    ))
}

fn parameters(input: &str) -> IResult<&str, Vec<&str>> {
    terminated(
        alt((
            delimited(
                symbol("("),
                separated_list0(symbol(","), identifier),
                symbol(")"),
            ),
            map(identifier, |name| vec![name]),
        )),
        symbol("=>"),
    )
    .parse(input)
}

fn definition(input: &str) -> IResult<&str, Expression> {
    map(
        pair(opt(parameters), terminated(expression, multispace0)),
        |(params, body)| Expression {
            params: params
                .unwrap_or_default()
                .into_iter()
                .map(str::to_string)
                .collect(),
            body,
        },
    )
    .parse(input)
}

// Evaluation

enum Lookup<'a> {
    Scalar(&'a Value),
    Sequence(&'a [Value]),
}

struct Env<'a> {
    scope: &'a Scope,
    locals: Vec<(&'a str, Argument)>,
}

impl Env<'_> {
    fn lookup(&self, name: &str) -> Option<Lookup<'_>> {
        if let Some((_, arg)) = self.locals.iter().find(|(local, _)| *local == name) {
            return Some(match arg {
                Argument::Value(value) => Lookup::Scalar(value),
                Argument::Sequence(alias) => match self.scope.get(alias) {
                    Some(Binding::Scalar(value)) => Lookup::Scalar(value),
                    Some(Binding::Sequence(values)) => Lookup::Sequence(values),
                    None => Lookup::Sequence(&[]),
                },
            });
        }
        match self.scope.get(name)? {
            Binding::Scalar(value) => Some(Lookup::Scalar(value)),
            Binding::Sequence(values) => Some(Lookup::Sequence(values)),
        }
    }

    fn file_size(&self) -> Result<Value> {
        self.scope
            .file_size()
            .map(|size| Value::Int(size as i64))
            .ok_or_else(|| TemplateError::UnresolvedReference(FILE_SIZE.to_string()))
    }
}

fn eval(expr: &Expr, env: &Env<'_>) -> Result<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Ident(name) => match env.lookup(name) {
            Some(Lookup::Scalar(value)) => Ok(value.clone()),
            Some(Lookup::Sequence(_)) => Err(TemplateError::Type(format!(
                "`{}` is a sequence and must be indexed",
                name
            ))),
            None if name == FILE_SIZE => env.file_size(),
            None => Err(TemplateError::UnresolvedReference(name.clone())),
        },
        Expr::Index(name, index) => {
            let position = eval(index, env)?.as_i64()?;
            match env.lookup(name) {
                Some(Lookup::Sequence(values)) => usize::try_from(position)
                    .ok()
                    .and_then(|i| values.get(i))
                    .cloned()
                    .ok_or_else(|| {
                        TemplateError::UnresolvedReference(format!("{}[{}]", name, position))
                    }),
                Some(Lookup::Scalar(_)) => Err(TemplateError::Type(format!(
                    "`{}` is not a sequence",
                    name
                ))),
                None => Err(TemplateError::UnresolvedReference(name.clone())),
            }
        }
        Expr::Call(name, args) => call(name, args, env),
        Expr::Unary(op, operand) => unary_op(*op, eval(operand, env)?),
        Expr::Binary(BinaryOp::And, lhs, rhs) => {
            let truth = eval(lhs, env)?.is_truthy() && eval(rhs, env)?.is_truthy();
            Ok(Value::Int(truth as i64))
        }
        Expr::Binary(BinaryOp::Or, lhs, rhs) => {
            let truth = eval(lhs, env)?.is_truthy() || eval(rhs, env)?.is_truthy();
            Ok(Value::Int(truth as i64))
        }
        Expr::Binary(op, lhs, rhs) => binary_op(*op, eval(lhs, env)?, eval(rhs, env)?),
        Expr::Conditional(condition, then, otherwise) => {
            if eval(condition, env)?.is_truthy() {
                eval(then, env)
            } else {
                eval(otherwise, env)
            }
        }
    }
}

fn call(name: &str, args: &[Expr], env: &Env<'_>) -> Result<Value> {
    match (name, args) {
        (FILE_SIZE, []) => env.file_size(),
        ("len", [Expr::Ident(target)]) => match env.lookup(target) {
            Some(Lookup::Sequence(values)) => Ok(Value::Int(values.len() as i64)),
            Some(Lookup::Scalar(Value::Text(s))) => Ok(Value::Int(s.chars().count() as i64)),
            Some(Lookup::Scalar(_)) => Err(TemplateError::Type(format!(
                "len() needs a sequence or text, `{}` is a number",
                target
            ))),
            None => Err(TemplateError::UnresolvedReference(target.clone())),
        },
        (FILE_SIZE, _) | ("len", _) => Err(TemplateError::Type(format!(
            "wrong arguments for {}()",
            name
        ))),
        _ => Err(TemplateError::UnresolvedReference(format!("{}()", name))),
    }
}

fn unary_op(op: UnaryOp, value: Value) -> Result<Value> {
    match (op, value) {
        (UnaryOp::Not, value) => Ok(Value::Int(!value.is_truthy() as i64)),
        (UnaryOp::Neg, Value::Int(v)) => Ok(Value::Int(v.wrapping_neg())),
        (UnaryOp::Neg, Value::Float(v)) => Ok(Value::Float(-v)),
        (UnaryOp::BitNot, value @ (Value::Int(_) | Value::Float(_))) => {
            Ok(Value::Int(!value.as_i64()?))
        }
        (_, Value::Text(s)) => Err(TemplateError::Type(format!(
            "operator {:?} needs a number, got `{}`",
            op, s
        ))),
    }
}

fn binary_op(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value> {
    use BinaryOp::*;

    match op {
        Eq => return Ok(Value::Int(values_equal(&lhs, &rhs) as i64)),
        Ne => return Ok(Value::Int(!values_equal(&lhs, &rhs) as i64)),
        Lt | Le | Gt | Ge => {
            let ordering = compare(&lhs, &rhs)?;
            let truth = match op {
                Lt => ordering.is_lt(),
                Le => ordering.is_le(),
                Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            return Ok(Value::Int(truth as i64));
        }
        Add if !lhs.is_number() || !rhs.is_number() => {
            return Ok(Value::Text(format!("{}{}", lhs, rhs)));
        }
        _ => {}
    }

    if !lhs.is_number() || !rhs.is_number() {
        return Err(TemplateError::Type(format!(
            "operator {:?} needs numbers, got `{}` and `{}`",
            op, lhs, rhs
        )));
    }

    match op {
        Shl | Shr | BitAnd | BitXor | BitOr => {
            let (a, b) = (lhs.as_i64()?, rhs.as_i64()?);
            let result = match op {
                Shl => a.wrapping_shl((b & 63) as u32),
                Shr => a.wrapping_shr((b & 63) as u32),
                BitAnd => a & b,
                BitXor => a ^ b,
                _ => a | b,
            };
            Ok(Value::Int(result))
        }
        _ => match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => integer_arithmetic(op, a, b),
            (lhs, rhs) => float_arithmetic(op, lhs.as_f64()?, rhs.as_f64()?),
        },
    }
}

fn integer_arithmetic(op: BinaryOp, a: i64, b: i64) -> Result<Value> {
    let value = match op {
        BinaryOp::Add => Value::Int(a.wrapping_add(b)),
        BinaryOp::Sub => Value::Int(a.wrapping_sub(b)),
        BinaryOp::Mul => Value::Int(a.wrapping_mul(b)),
        BinaryOp::Div | BinaryOp::Rem if b == 0 => {
            return Err(TemplateError::Type("division by zero".to_string()))
        }
        // Exact quotients stay integral so they can serve as counts
        BinaryOp::Div if a.wrapping_rem(b) == 0 => Value::Int(a.wrapping_div(b)),
        BinaryOp::Div => Value::Float(a as f64 / b as f64),
        BinaryOp::Rem => Value::Int(a.wrapping_rem(b)),
        other => {
            return Err(TemplateError::Type(format!(
                "operator {:?} is not arithmetic",
                other
            )))
        }
    };
    Ok(value)
}

fn float_arithmetic(op: BinaryOp, a: f64, b: f64) -> Result<Value> {
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Rem if b == 0.0 => {
            return Err(TemplateError::Type("division by zero".to_string()))
        }
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        other => {
            return Err(TemplateError::Type(format!(
                "operator {:?} is not arithmetic",
                other
            )))
        }
    };
    Ok(Value::Float(value))
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Text(a), Value::Text(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Text(_), _) | (_, Value::Text(_)) => false,
        (a, b) => a.as_f64().ok() == b.as_f64().ok(),
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Result<std::cmp::Ordering> {
    match (lhs, rhs) {
        (Value::Text(a), Value::Text(b)) => Ok(a.cmp(b)),
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        (Value::Text(_), _) | (_, Value::Text(_)) => Err(TemplateError::Type(format!(
            "cannot compare `{}` with `{}`",
            lhs, rhs
        ))),
        (a, b) => a
            .as_f64()?
            .partial_cmp(&b.as_f64()?)
            .ok_or_else(|| TemplateError::Type("comparison with NaN".to_string())),
    }
}
