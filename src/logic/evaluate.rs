use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::logic::functions;
use crate::logic::template::{parse_template, BinaryOp, Expr, ParseError, Part, Template, UnaryOp};
use crate::model::{Value, ValueMap};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("unknown variable accessed: {0}")]
    UnknownVariable(String),
    #[error("unknown function called: {0}")]
    UnknownFunction(String),
    #[error("{function}: expected {expected} argument(s), got {actual}")]
    Arity {
        function: String,
        expected: usize,
        actual: usize,
    },
    #[error("{function}: argument {position} should be {expected}, got {actual}")]
    ArgumentType {
        function: String,
        position: usize,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("{function}: {message}")]
    Function { function: String, message: String },
    #[error("Assertion failed: {0}")]
    AssertionFailed(String),
    #[error("invalid operand: {0}")]
    InvalidOperand(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("cannot interpolate a {0} into text")]
    NotText(&'static str),
}

/// Monotonic counter backing `counter.next()`.
///
/// Clones share the same underlying value, so one counter can be handed to
/// every evaluator that should draw from the same sequence.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicI64>);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next call to `next()` returns `value + 1`.
    pub fn starting_at(value: i64) -> Self {
        Self(Arc::new(AtomicI64::new(value)))
    }

    pub fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }
}

/// Evaluates interpolation templates against a variable scope.
#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    counter: Counter,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_counter(counter: Counter) -> Self {
        Self { counter }
    }

    pub fn counter(&self) -> &Counter {
        &self.counter
    }

    /// A template that is exactly one `${}` region yields that region's value;
    /// scalars come back as text while lists and maps pass through. Anything
    /// else is rendered and concatenated into text.
    pub fn eval(&self, template: &str, variables: &ValueMap) -> Result<Value, EvalError> {
        let parsed = parse_template(template)?;
        self.eval_template(&parsed, variables)
    }

    pub fn eval_template(&self, template: &Template, variables: &ValueMap) -> Result<Value, EvalError> {
        match template.parts.as_slice() {
            [Part::Interpolation(expr)] => match self.eval_expr(expr, variables)? {
                collection @ (Value::List(_) | Value::Map(_)) => Ok(collection),
                scalar => Ok(Value::Text(scalar.to_text().unwrap_or_default())),
            },
            _ => self.render(template, variables).map(Value::Text),
        }
    }

    fn render(&self, template: &Template, variables: &ValueMap) -> Result<String, EvalError> {
        let mut out = String::new();
        for part in &template.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Interpolation(expr) => {
                    let value = self.eval_expr(expr, variables)?;
                    let text = value.to_text().ok_or(EvalError::NotText(value.type_name()))?;
                    out.push_str(&text);
                }
            }
        }
        Ok(out)
    }

    fn eval_expr(&self, expr: &Expr, variables: &ValueMap) -> Result<Value, EvalError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Text(template) => self.render(template, variables).map(Value::Text),
            Expr::Variable(name) => variables
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::UnknownVariable(name.clone())),
            Expr::Index(target, index) => {
                let target = self.eval_expr(target, variables)?;
                let index = self.eval_expr(index, variables)?;
                lookup_index(target, &index)
            }
            Expr::Call { name, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.eval_expr(arg, variables))
                    .collect::<Result<Vec<_>, _>>()?;
                functions::call(self, name, args)
            }
            Expr::Unary(op, operand) => {
                let operand = self.eval_expr(operand, variables)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!to_bool(&operand)?)),
                    UnaryOp::Neg => match to_number(&operand)? {
                        Number::Int(i) => i
                            .checked_neg()
                            .map(Value::Integer)
                            .ok_or_else(|| EvalError::InvalidOperand("integer overflow".to_string())),
                        Number::Float(f) => Ok(Value::Float(-f)),
                    },
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval_expr(lhs, variables)?;
                let rhs = self.eval_expr(rhs, variables)?;
                apply_binary(*op, &lhs, &rhs)
            }
            Expr::Conditional(condition, then, otherwise) => {
                // Both branches are evaluated, so calls with side effects run
                // regardless of the condition.
                let condition = self.eval_expr(condition, variables)?;
                let then = self.eval_expr(then, variables)?;
                let otherwise = self.eval_expr(otherwise, variables)?;
                Ok(if to_bool(&condition)? { then } else { otherwise })
            }
        }
    }
}

/// Whether `candidate` is plain text rather than a live template: it
/// evaluates against an empty scope to exactly itself.
pub fn is_literal(candidate: &str) -> bool {
    match Evaluator::new().eval(candidate, &ValueMap::new()) {
        Ok(value) => value.to_text().as_deref() == Some(candidate),
        Err(_) => false,
    }
}

enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn as_f64(&self) -> f64 {
        match self {
            Number::Int(i) => *i as f64,
            Number::Float(f) => *f,
        }
    }
}

fn to_number(value: &Value) -> Result<Number, EvalError> {
    match value {
        Value::Integer(i) => Ok(Number::Int(*i)),
        Value::Float(f) => Ok(Number::Float(*f)),
        Value::Text(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .map(Number::Int)
                .or_else(|_| trimmed.parse::<f64>().map(Number::Float))
                .map_err(|_| EvalError::InvalidOperand(format!("expected a number, got {:?}", s)))
        }
        other => Err(EvalError::InvalidOperand(format!(
            "expected a number, got a {}",
            other.type_name()
        ))),
    }
}

fn to_bool(value: &Value) -> Result<bool, EvalError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Text(s) if s == "true" => Ok(true),
        Value::Text(s) if s == "false" => Ok(false),
        other => Err(EvalError::InvalidOperand(format!(
            "expected a boolean, got {}",
            other
        ))),
    }
}

fn lookup_index(target: Value, index: &Value) -> Result<Value, EvalError> {
    match target {
        Value::List(items) => {
            let position = match to_number(index)? {
                Number::Int(i) => i,
                Number::Float(f) => f as i64,
            };
            let len = items.len();
            usize::try_from(position)
                .ok()
                .and_then(|i| items.into_iter().nth(i))
                .ok_or_else(|| {
                    EvalError::InvalidOperand(format!("index {} out of range for list of length {}", position, len))
                })
        }
        Value::Map(mut map) => {
            let key = index.to_text().ok_or(EvalError::NotText(index.type_name()))?;
            map.remove(&key)
                .ok_or_else(|| EvalError::InvalidOperand(format!("key {:?} not found in map", key)))
        }
        other => Err(EvalError::InvalidOperand(format!("cannot index a {}", other.type_name()))),
    }
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ if std::mem::discriminant(lhs) == std::mem::discriminant(rhs) => lhs == rhs,
        _ => match (lhs.to_text(), rhs.to_text()) {
            (Some(l), Some(r)) => l == r,
            _ => false,
        },
    }
}

fn apply_binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(lhs, rhs))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(lhs, rhs))),
        BinaryOp::And => Ok(Value::Bool(to_bool(lhs)? && to_bool(rhs)?)),
        BinaryOp::Or => Ok(Value::Bool(to_bool(lhs)? || to_bool(rhs)?)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let (l, r) = (to_number(lhs)?.as_f64(), to_number(rhs)?.as_f64());
            Ok(Value::Bool(match op {
                BinaryOp::Lt => l < r,
                BinaryOp::Le => l <= r,
                BinaryOp::Gt => l > r,
                _ => l >= r,
            }))
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            arithmetic(op, to_number(lhs)?, to_number(rhs)?)
        }
    }
}

fn arithmetic(op: BinaryOp, lhs: Number, rhs: Number) -> Result<Value, EvalError> {
    if let (Number::Int(l), Number::Int(r)) = (&lhs, &rhs) {
        let (l, r) = (*l, *r);
        let result = match op {
            BinaryOp::Add => l.checked_add(r),
            BinaryOp::Sub => l.checked_sub(r),
            BinaryOp::Mul => l.checked_mul(r),
            BinaryOp::Div if r == 0 => return Err(EvalError::DivisionByZero),
            BinaryOp::Div => l.checked_div(r),
            BinaryOp::Mod if r == 0 => return Err(EvalError::DivisionByZero),
            _ => l.checked_rem(r),
        };
        return result
            .map(Value::Integer)
            .ok_or_else(|| EvalError::InvalidOperand("integer overflow".to_string()));
    }

    let (l, r) = (lhs.as_f64(), rhs.as_f64());
    let result = match op {
        BinaryOp::Add => l + r,
        BinaryOp::Sub => l - r,
        BinaryOp::Mul => l * r,
        BinaryOp::Div if r == 0.0 => return Err(EvalError::DivisionByZero),
        BinaryOp::Div => l / r,
        BinaryOp::Mod if r == 0.0 => return Err(EvalError::DivisionByZero),
        _ => l % r,
    };
    Ok(Value::Float(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn vars(pairs: &[(&str, Value)]) -> ValueMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn eval(template: &str) -> Result<Value, EvalError> {
        Evaluator::new().eval(template, &ValueMap::new())
    }

    #[test]
    fn test_literals_and_arithmetic() {
        assert_eq!(eval("${33}").unwrap(), Value::from("33"));
        assert_eq!(eval("${1+1}").unwrap(), Value::from("2"));
        assert_eq!(eval("${7 / 2}").unwrap(), Value::from("3"));
        assert_eq!(eval("${7.0 / 2}").unwrap(), Value::from("3.5"));
        assert_eq!(eval("${(1 + 2) * -3}").unwrap(), Value::from("-9"));
        assert_eq!(eval("${10 % 4}").unwrap(), Value::from("2"));
        assert_eq!(eval("plain text").unwrap(), Value::from("plain text"));
        assert_eq!(eval("").unwrap(), Value::from(""));
    }

    #[test]
    fn test_variable_substitution() {
        let scope = vars(&[("foo", Value::Integer(33)), ("request.plan_id", Value::from("p-1"))]);
        let evaluator = Evaluator::new();

        assert_eq!(evaluator.eval("${foo}", &scope).unwrap(), Value::from("33"));
        assert_eq!(
            evaluator.eval("plan-${request.plan_id}-${foo + 1}", &scope).unwrap(),
            Value::from("plan-p-1-34")
        );
    }

    #[test]
    fn test_unknown_variable() {
        let err = eval("${a}").unwrap_err();
        assert_eq!(err.to_string(), "unknown variable accessed: a");
    }

    #[test]
    fn test_bad_template() {
        let err = eval("${").unwrap_err();
        assert!(matches!(err, EvalError::Parse(_)));
        assert!(err.to_string().contains("expected expression"));
    }

    #[test]
    fn test_collections_pass_through_single_interpolation() {
        let labels = Value::from(std::collections::BTreeMap::from([("env".to_string(), "prod".to_string())]));
        let scope = vars(&[("labels", labels.clone()), ("zones", Value::List(vec![Value::from("a")]))]);
        let evaluator = Evaluator::new();

        assert_eq!(evaluator.eval("${labels}", &scope).unwrap(), labels);
        assert_eq!(evaluator.eval(r#"${labels["env"]}"#, &scope).unwrap(), Value::from("prod"));
        assert_eq!(evaluator.eval("${zones[0]}", &scope).unwrap(), Value::from("a"));

        let err = evaluator.eval("labels: ${labels}", &scope).unwrap_err();
        assert_eq!(err, EvalError::NotText("map"));
        assert!(evaluator.eval("${zones[3]}", &scope).is_err());
    }

    #[test]
    fn test_comparisons_and_conditionals() {
        let scope = vars(&[("size", Value::from("20")), ("max", Value::Integer(10))]);
        let evaluator = Evaluator::new();

        assert_eq!(evaluator.eval("${size > max}", &scope).unwrap(), Value::from("true"));
        assert_eq!(evaluator.eval(r#"${size == "20"}"#, &scope).unwrap(), Value::from("true"));
        assert_eq!(evaluator.eval("${size == 20}", &scope).unwrap(), Value::from("true"));
        assert_eq!(evaluator.eval(r#"${max > 5 ? "big" : "small"}"#, &scope).unwrap(), Value::from("big"));
        assert_eq!(evaluator.eval("${!(1 < 2) || false}", &scope).unwrap(), Value::from("false"));
    }

    #[test]
    fn test_conditional_evaluates_both_branches() {
        let evaluator = Evaluator::new();
        let result = evaluator
            .eval("${true ? counter.next() : counter.next()}", &ValueMap::new())
            .unwrap();
        assert_eq!(result, Value::from("1"));
        assert_eq!(evaluator.counter().current(), 2);
    }

    #[test]
    fn test_counter_is_per_evaluator() {
        let first = Evaluator::new();
        assert_eq!(
            first.eval("${counter.next()},${counter.next()}", &ValueMap::new()).unwrap(),
            Value::from("1,2")
        );

        let second = Evaluator::new();
        assert_eq!(second.eval("${counter.next()}", &ValueMap::new()).unwrap(), Value::from("1"));

        let shared = Evaluator::with_counter(first.counter().clone());
        assert_eq!(shared.eval("${counter.next()}", &ValueMap::new()).unwrap(), Value::from("3"));

        first.counter().reset();
        assert_eq!(first.eval("${counter.next()}", &ValueMap::new()).unwrap(), Value::from("1"));
    }

    #[test]
    fn test_assert_messages_are_interpolated() {
        let err = eval(r#"${assert(false, "failure message ${1+1}")}"#).unwrap_err();
        assert_eq!(err.to_string(), "Assertion failed: failure message 2");

        assert_eq!(eval(r#"${assert(true, "never shown")}"#).unwrap(), Value::from("true"));
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(eval("${1 / 0}").unwrap_err(), EvalError::DivisionByZero);
        assert_eq!(eval("${1 % 0}").unwrap_err(), EvalError::DivisionByZero);
    }

    #[test]
    fn test_negating_smallest_integer_is_an_error() {
        let scope = vars(&[("offset", Value::Integer(i64::MIN))]);
        let err = Evaluator::new().eval("${-offset}", &scope).unwrap_err();
        assert_eq!(err, EvalError::InvalidOperand("integer overflow".to_string()));

        let scope = vars(&[("offset", Value::Integer(5))]);
        assert_eq!(Evaluator::new().eval("${-offset}", &scope).unwrap(), Value::from("-5"));
    }

    #[test]
    fn test_is_literal() {
        assert!(is_literal("hello world"));
        assert!(is_literal(""));
        assert!(!is_literal("${1+1}"));
        assert!(!is_literal("${a}"));
        assert!(!is_literal("$${escaped}"));
        assert!(!is_literal("${"));
    }
}
