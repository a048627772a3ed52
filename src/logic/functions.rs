//! The fixed function library available inside `${}` regions.

use std::collections::HashMap;
use std::sync::LazyLock;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use itertools::Itertools;
use rand::rngs::OsRng;
use rand::RngCore;
use regex::Regex;

use crate::logic::evaluate::{EvalError, Evaluator};
use crate::model::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Int,
    Text,
    Bool,
    Map,
    Any,
}

impl ArgType {
    fn name(&self) -> &'static str {
        match self {
            ArgType::Int => "an integer",
            ArgType::Text => "a string",
            ArgType::Bool => "a boolean",
            ArgType::Map => "a map",
            ArgType::Any => "any value",
        }
    }
}

/// Upper bound on `rand.base64` output, in bytes before encoding.
pub const MAX_RANDOM_BYTES: usize = 4096;

type Callback = fn(&Evaluator, &[Value]) -> Result<Value, EvalError>;

pub struct Function {
    pub args: &'static [ArgType],
    callback: Callback,
}

static STANDARD_LIBRARY: LazyLock<HashMap<&'static str, Function>> = LazyLock::new(|| {
    let mut library: HashMap<&'static str, Function> = HashMap::new();
    let mut register = |name: &'static str, args: &'static [ArgType], callback: Callback| {
        library.insert(name, Function { args, callback });
    };

    register("time.nano", &[], time_nano);
    register("str.truncate", &[ArgType::Int, ArgType::Text], str_truncate);
    register("str.queryEscape", &[ArgType::Text], str_query_escape);
    register("regexp.matches", &[ArgType::Text, ArgType::Text], regexp_matches);
    register("counter.next", &[], counter_next);
    register("rand.base64", &[ArgType::Int], rand_base64);
    register("assert", &[ArgType::Bool, ArgType::Text], assert);
    register("json.marshal", &[ArgType::Any], json_marshal);
    register("map.flatten", &[ArgType::Text, ArgType::Text, ArgType::Map], map_flatten);

    library
});

pub fn function_names() -> Vec<&'static str> {
    STANDARD_LIBRARY.keys().copied().sorted().collect()
}

/// Checks arity and argument types, then runs the named function.
pub fn call(evaluator: &Evaluator, name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
    let function = STANDARD_LIBRARY
        .get(name)
        .ok_or_else(|| EvalError::UnknownFunction(name.to_string()))?;

    if args.len() != function.args.len() {
        return Err(EvalError::Arity {
            function: name.to_string(),
            expected: function.args.len(),
            actual: args.len(),
        });
    }

    let args = args
        .into_iter()
        .zip(function.args)
        .enumerate()
        .map(|(i, (arg, expected))| coerce(name, i + 1, arg, *expected))
        .collect::<Result<Vec<_>, _>>()?;

    (function.callback)(evaluator, &args)
}

fn coerce(function: &str, position: usize, arg: Value, expected: ArgType) -> Result<Value, EvalError> {
    let mismatch = |arg: &Value| EvalError::ArgumentType {
        function: function.to_string(),
        position,
        expected: expected.name(),
        actual: arg.type_name(),
    };

    match expected {
        ArgType::Any => Ok(arg),
        ArgType::Int => match &arg {
            Value::Integer(_) => Ok(arg),
            Value::Float(_) => arg.as_i64().map(Value::Integer).ok_or_else(|| mismatch(&arg)),
            Value::Text(s) => s.trim().parse::<i64>().map(Value::Integer).map_err(|_| mismatch(&arg)),
            _ => Err(mismatch(&arg)),
        },
        ArgType::Text => match arg.to_text() {
            Some(text) => Ok(Value::Text(text)),
            None => Err(mismatch(&arg)),
        },
        ArgType::Bool => match &arg {
            Value::Bool(_) => Ok(arg),
            Value::Text(s) if s == "true" => Ok(Value::Bool(true)),
            Value::Text(s) if s == "false" => Ok(Value::Bool(false)),
            _ => Err(mismatch(&arg)),
        },
        ArgType::Map => match &arg {
            Value::Map(_) => Ok(arg),
            _ => Err(mismatch(&arg)),
        },
    }
}

fn text(args: &[Value], i: usize) -> &str {
    args[i].as_str().unwrap_or_default()
}

fn int(args: &[Value], i: usize) -> i64 {
    args[i].as_i64().unwrap_or_default()
}

fn function_error(function: &str, message: impl Into<String>) -> EvalError {
    EvalError::Function {
        function: function.to_string(),
        message: message.into(),
    }
}

fn time_nano(_: &Evaluator, _: &[Value]) -> Result<Value, EvalError> {
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .ok_or_else(|| function_error("time.nano", "current time is out of range"))?;
    Ok(Value::Text(nanos.to_string()))
}

fn str_truncate(_: &Evaluator, args: &[Value]) -> Result<Value, EvalError> {
    let length = usize::try_from(int(args, 0))
        .map_err(|_| function_error("str.truncate", "length must not be negative"))?;
    Ok(Value::Text(text(args, 1).chars().take(length).collect()))
}

fn str_query_escape(_: &Evaluator, args: &[Value]) -> Result<Value, EvalError> {
    let escaped: String = url::form_urlencoded::byte_serialize(text(args, 0).as_bytes()).collect();
    Ok(Value::Text(escaped))
}

fn regexp_matches(_: &Evaluator, args: &[Value]) -> Result<Value, EvalError> {
    let pattern = Regex::new(text(args, 0))
        .map_err(|e| function_error("regexp.matches", format!("error parsing regexp: {}", e)))?;
    Ok(Value::Bool(pattern.is_match(text(args, 1))))
}

fn counter_next(evaluator: &Evaluator, _: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::Integer(evaluator.counter().next()))
}

fn rand_base64(_: &Evaluator, args: &[Value]) -> Result<Value, EvalError> {
    let count = usize::try_from(int(args, 0))
        .map_err(|_| function_error("rand.base64", "byte count must not be negative"))?;
    if count > MAX_RANDOM_BYTES {
        return Err(function_error(
            "rand.base64",
            format!("byte count {} exceeds the limit of {}", count, MAX_RANDOM_BYTES),
        ));
    }
    let mut bytes = vec![0u8; count];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| function_error("rand.base64", e.to_string()))?;
    Ok(Value::Text(URL_SAFE.encode(bytes)))
}

fn assert(_: &Evaluator, args: &[Value]) -> Result<Value, EvalError> {
    if args[0].as_bool().unwrap_or(false) {
        Ok(Value::Bool(true))
    } else {
        Err(EvalError::AssertionFailed(text(args, 1).to_string()))
    }
}

fn json_marshal(_: &Evaluator, args: &[Value]) -> Result<Value, EvalError> {
    serde_json::to_string(&args[0].to_json())
        .map(Value::Text)
        .map_err(|e| function_error("json.marshal", e.to_string()))
}

fn map_flatten(_: &Evaluator, args: &[Value]) -> Result<Value, EvalError> {
    let (kv_separator, tuple_separator) = (text(args, 0), text(args, 1));
    let Some(map) = args[2].as_map() else {
        return Ok(Value::Text(String::new()));
    };

    // pairs are ordered by their rendered form, not by key
    let tuples = map
        .iter()
        .map(|(key, value)| {
            value
                .to_text()
                .map(|value| format!("{}{}{}", key, kv_separator, value))
                .ok_or(EvalError::NotText(value.type_name()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::Text(tuples.into_iter().sorted().join(tuple_separator)))
}
