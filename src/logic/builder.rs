use std::collections::BTreeMap;
use std::fmt;

use itertools::Itertools;
use serde::Serialize;
use thiserror::Error;

use crate::logic::evaluate::{is_literal, EvalError, Evaluator};
use crate::logic::var_context::VarContext;
use crate::model::{CastError, DefaultVariable, JsonType, Value, ValueMap};

/// One problem found while merging a source into a context.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolutionError {
    #[error("couldn't compute the value for {key:?}, template: {template:?}, {source}")]
    Eval {
        key: String,
        template: String,
        source: EvalError,
    },
    #[error("couldn't cast the value for {key:?}: {source}")]
    Cast { key: String, source: CastError },
    #[error("invalid JSON object: {0}")]
    InvalidJson(String),
}

/// Every problem collected during a build pass.
#[derive(Debug, Clone, PartialEq, Error)]
pub struct BuildError {
    pub errors: Vec<ResolutionError>,
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} error(s) occurred:\n{}",
            self.errors.len(),
            self.errors.iter().map(|e| format!("* {}", e)).join("\n")
        )
    }
}

/// Merges configuration sources into a [`VarContext`]. Later merges replace
/// keys set by earlier ones.
///
/// Problems are collected instead of returned so one `build()` reports all of
/// them. A builder is meant for a single request.
#[derive(Debug, Default)]
pub struct ContextBuilder {
    evaluator: Evaluator,
    context: ValueMap,
    constants: ValueMap,
    errors: Vec<ResolutionError>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_evaluator(evaluator: Evaluator) -> Self {
        Self {
            evaluator,
            ..Self::default()
        }
    }

    /// Values visible to every later expression but left out of the built
    /// context.
    pub fn set_eval_constants(mut self, constants: ValueMap) -> Self {
        self.constants.extend(constants);
        self
    }

    pub fn merge_map(mut self, map: &ValueMap) -> Self {
        self.context
            .extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn merge_string_map(mut self, map: &BTreeMap<String, String>) -> Self {
        self.context
            .extend(map.iter().map(|(k, v)| (k.clone(), Value::Text(v.clone()))));
        self
    }

    /// Merges a raw JSON object verbatim. Values are never evaluated, so user
    /// input cannot run as an expression. Blank input is an empty object.
    pub fn merge_json_object(self, raw: &str) -> Self {
        if raw.trim().is_empty() {
            return self;
        }
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(json) => self.merge_json_value(Some(&json)),
            Err(e) => self.with_error(ResolutionError::InvalidJson(e.to_string())),
        }
    }

    pub fn merge_json_value(mut self, json: Option<&serde_json::Value>) -> Self {
        match json {
            None | Some(serde_json::Value::Null) => self,
            Some(serde_json::Value::Object(object)) => {
                self.context.extend(
                    object
                        .iter()
                        .map(|(k, v)| (k.clone(), Value::from(v.clone()))),
                );
                self
            }
            Some(other) => {
                let kind = match other {
                    serde_json::Value::Array(_) => "an array",
                    serde_json::Value::String(_) => "a string",
                    serde_json::Value::Number(_) => "a number",
                    _ => "a boolean",
                };
                self.errors.push(ResolutionError::InvalidJson(format!(
                    "expected an object, got {}",
                    kind
                )));
                self
            }
        }
    }

    pub fn merge_struct<T: Serialize>(self, value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(json) => self.merge_json_value(Some(&json)),
            Err(e) => self.with_error(ResolutionError::InvalidJson(e.to_string())),
        }
    }

    /// Merges declared defaults in order. A null default is skipped, as is an
    /// existing key unless the entry may overwrite. Text defaults that are
    /// live templates are evaluated against everything merged so far.
    pub fn merge_defaults(mut self, defaults: &[DefaultVariable]) -> Self {
        for var in defaults {
            if var.default.is_null() {
                continue;
            }
            if self.context.contains_key(&var.name) && !var.overwrite {
                continue;
            }

            match &var.default {
                serde_json::Value::String(template) if !is_literal(template) => {
                    self.eval_into(&var.name, template, var.var_type);
                }
                literal => self.insert_cast(&var.name, Value::from(literal.clone()), var.var_type),
            }
        }
        self
    }

    pub fn merge_eval_result(mut self, key: &str, template: &str, result_type: Option<JsonType>) -> Self {
        self.eval_into(key, template, result_type);
        self
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn build(self) -> Result<VarContext, BuildError> {
        if self.errors.is_empty() {
            Ok(VarContext::from_map(self.context))
        } else {
            Err(BuildError { errors: self.errors })
        }
    }

    pub fn build_map(self) -> Result<ValueMap, BuildError> {
        self.build().map(|vc| vc.to_map())
    }

    fn with_error(mut self, error: ResolutionError) -> Self {
        self.errors.push(error);
        self
    }

    fn eval_into(&mut self, key: &str, template: &str, result_type: Option<JsonType>) {
        let mut scope = self.context.clone();
        scope.extend(self.constants.iter().map(|(k, v)| (k.clone(), v.clone())));

        match self.evaluator.eval(template, &scope) {
            Ok(value) => self.insert_cast(key, value, result_type),
            Err(source) => self.errors.push(ResolutionError::Eval {
                key: key.to_string(),
                template: template.to_string(),
                source,
            }),
        }
    }

    fn insert_cast(&mut self, key: &str, value: Value, result_type: Option<JsonType>) {
        let cast = match result_type {
            Some(target) => value.cast_to(target),
            None => Ok(value),
        };
        match cast {
            Ok(value) => {
                self.context.insert(key.to_string(), value);
            }
            Err(source) => self.errors.push(ResolutionError::Cast {
                key: key.to_string(),
                source,
            }),
        }
    }
}
