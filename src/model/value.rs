use crate::model::JsonType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub type ValueMap = BTreeMap<String, Value>;

/// Dynamic value threaded through the expression evaluator and resolved
/// variable contexts.
///
/// `Null` only appears when user-supplied JSON carries an explicit null; the
/// evaluator never produces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
    Map(ValueMap),
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("unable to cast {value} of type {from} to {to}")]
pub struct CastError {
    pub value: String,
    pub from: &'static str,
    pub to: JsonType,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Text form used when a value is interpolated into a template.
    /// Lists and maps have no text form.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => Some(String::new()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Text(s) => Some(s.clone()),
            Value::List(_) | Value::Map(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Converts the value to the requested schema type, the way operator and
    /// author supplied defaults are coerced before they land in a context.
    pub fn cast_to(self, target: JsonType) -> Result<Value, CastError> {
        let fail = |value: &Value| CastError {
            value: value.to_string(),
            from: value.type_name(),
            to: target,
        };

        match target {
            JsonType::String => match &self {
                Value::List(_) | Value::Map(_) => Err(fail(&self)),
                other => Ok(Value::Text(other.to_text().unwrap_or_default())),
            },
            JsonType::Integer => match &self {
                Value::Integer(_) => Ok(self),
                Value::Float(f) => Ok(Value::Integer(f.trunc() as i64)),
                Value::Bool(b) => Ok(Value::Integer(i64::from(*b))),
                Value::Null => Ok(Value::Integer(0)),
                Value::Text(s) => s.trim().parse::<i64>().map(Value::Integer).map_err(|_| fail(&self)),
                _ => Err(fail(&self)),
            },
            JsonType::Number => match &self {
                Value::Float(_) => Ok(self),
                Value::Integer(i) => Ok(Value::Float(*i as f64)),
                Value::Bool(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
                Value::Null => Ok(Value::Float(0.0)),
                Value::Text(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| fail(&self)),
                _ => Err(fail(&self)),
            },
            JsonType::Boolean => match &self {
                Value::Bool(_) => Ok(self),
                Value::Integer(i) => Ok(Value::Bool(*i != 0)),
                Value::Float(f) => Ok(Value::Bool(*f != 0.0)),
                Value::Null => Ok(Value::Bool(false)),
                Value::Text(s) => parse_bool(s).map(Value::Bool).ok_or_else(|| fail(&self)),
                _ => Err(fail(&self)),
            },
            JsonType::Object => match &self {
                Value::Map(_) => Ok(self),
                Value::Text(s) => match serde_json::from_str::<serde_json::Value>(s) {
                    Ok(json @ serde_json::Value::Object(_)) => Ok(Value::from(json)),
                    _ => Err(fail(&self)),
                },
                _ => Err(fail(&self)),
            },
            JsonType::Array => match &self {
                Value::List(_) => Ok(self),
                Value::Text(s) => match serde_json::from_str::<serde_json::Value>(s) {
                    Ok(json @ serde_json::Value::Array(_)) => Ok(Value::from(json)),
                    _ => Err(fail(&self)),
                },
                _ => Err(fail(&self)),
            },
        }
    }
}

/// Accepts the same spellings as Go's `strconv.ParseBool`, which operators
/// are used to writing in configuration files.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_text() {
            Some(text) => f.write_str(&text),
            None => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<ValueMap> for Value {
    fn from(map: ValueMap) -> Self {
        Value::Map(map)
    }
}

impl From<BTreeMap<String, String>> for Value {
    fn from(map: BTreeMap<String, String>) -> Self {
        Value::Map(map.into_iter().map(|(k, v)| (k, Value::Text(v))).collect())
    }
}
