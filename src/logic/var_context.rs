use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::model::{parse_bool, Value, ValueMap};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VarContextError {
    #[error("missing value for key {0:?}")]
    Missing(String),
    #[error("value for {key:?} must be a {expected}")]
    WrongType { key: String, expected: &'static str },
}

/// Resolved variables for one provision or bind request. Immutable once
/// built; this is what backend providers receive.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct VarContext {
    context: ValueMap,
}

impl VarContext {
    pub(crate) fn from_map(context: ValueMap) -> Self {
        Self { context }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.context.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.context.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.context.len()
    }

    pub fn is_empty(&self) -> bool {
        self.context.is_empty()
    }

    fn require(&self, key: &str) -> Result<&Value, VarContextError> {
        self.context
            .get(key)
            .ok_or_else(|| VarContextError::Missing(key.to_string()))
    }

    fn wrong_type(key: &str, expected: &'static str) -> VarContextError {
        VarContextError::WrongType {
            key: key.to_string(),
            expected,
        }
    }

    pub fn get_string(&self, key: &str) -> Result<String, VarContextError> {
        match self.require(key)? {
            Value::List(_) | Value::Map(_) | Value::Null => Err(Self::wrong_type(key, "string")),
            scalar => Ok(scalar.to_text().unwrap_or_default()),
        }
    }

    pub fn get_int(&self, key: &str) -> Result<i64, VarContextError> {
        let parsed = match self.require(key)? {
            Value::Text(s) => s.trim().parse().ok(),
            other => other.as_i64(),
        };
        parsed.ok_or_else(|| Self::wrong_type(key, "integer"))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, VarContextError> {
        match self.require(key)? {
            Value::Bool(b) => Ok(*b),
            Value::Text(s) => parse_bool(s).ok_or_else(|| Self::wrong_type(key, "boolean")),
            _ => Err(Self::wrong_type(key, "boolean")),
        }
    }

    /// A map of text values, also accepting a JSON object encoded as text.
    pub fn get_string_map(&self, key: &str) -> Result<BTreeMap<String, String>, VarContextError> {
        let map = match self.require(key)? {
            Value::Map(map) => map.clone(),
            Value::Text(s) => match serde_json::from_str::<serde_json::Value>(s) {
                Ok(json @ serde_json::Value::Object(_)) => match Value::from(json) {
                    Value::Map(map) => map,
                    _ => return Err(Self::wrong_type(key, "map")),
                },
                _ => return Err(Self::wrong_type(key, "map")),
            },
            _ => return Err(Self::wrong_type(key, "map")),
        };

        map.into_iter()
            .map(|(k, v)| match v.to_text() {
                Some(text) => Ok((k, text)),
                None => Err(Self::wrong_type(key, "map of strings")),
            })
            .collect()
    }

    pub fn to_map(&self) -> ValueMap {
        self.context.clone()
    }

    pub fn to_json(&self) -> serde_json::Value {
        Value::Map(self.context.clone()).to_json()
    }
}
