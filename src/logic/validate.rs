use std::fmt;

use itertools::Itertools;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{BrokerVariable, JsonType, Value, ValueMap};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub error_type: ViolationType,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationType {
    MissingRequiredParameter,
    TypeMismatch,
    NotInEnum,
    TooShort,
    TooLong,
    PatternMismatch,
    BelowMinimum,
    AboveMaximum,
    InvalidSchema,
}

/// Per-field problems with request parameters. These are the caller's
/// fault and map to a client error.
#[derive(Debug, Clone, PartialEq, Error)]
pub struct SchemaValidationError {
    pub violations: Vec<FieldViolation>,
}

impl SchemaValidationError {
    pub fn is_client_error(&self) -> bool {
        true
    }
}

impl fmt::Display for SchemaValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} error(s) occurred:\n{}",
            self.violations.len(),
            self.violations
                .iter()
                .map(|v| format!("* ({}): {}", v.field, v.message))
                .join("\n")
        )
    }
}

pub struct SchemaValidator;

impl SchemaValidator {
    /// Checks resolved parameters against declared input variables.
    pub fn validate_variables(params: &ValueMap, vars: &[BrokerVariable]) -> Result<(), SchemaValidationError> {
        let violations: Vec<FieldViolation> = vars
            .iter()
            .flat_map(|var| match params.get(&var.field_name) {
                None | Some(Value::Null) if var.required => vec![violation(
                    var,
                    ViolationType::MissingRequiredParameter,
                    format!("missing required parameter {:?}", var.field_name),
                )],
                None | Some(Value::Null) => Vec::new(),
                Some(value) => Self::validate_field(value, var),
            })
            .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(SchemaValidationError { violations })
        }
    }

    pub fn validate_field(value: &Value, var: &BrokerVariable) -> Vec<FieldViolation> {
        if !matches_type(value, var.var_type) {
            return vec![violation(
                var,
                ViolationType::TypeMismatch,
                format!("invalid type, expected {}, given {}", var.var_type, value.type_name()),
            )];
        }

        let mut violations = Vec::new();

        if !var.enum_values.is_empty() {
            let allowed = var
                .enum_values
                .iter()
                .any(|option| enum_matches(value, &Value::from(option.value.clone())));
            if !allowed {
                let choices = var.enum_values.iter().map(|option| option.value.to_string()).join(", ");
                violations.push(violation(
                    var,
                    ViolationType::NotInEnum,
                    format!("must be one of the following: {}", choices),
                ));
            }
        }

        let constraints = &var.constraints;
        if let Value::Text(text) = value {
            let length = text.chars().count();
            if let Some(min) = constraints.min_length.filter(|min| length < *min) {
                violations.push(violation(
                    var,
                    ViolationType::TooShort,
                    format!("string length must be greater than or equal to {}", min),
                ));
            }
            if let Some(max) = constraints.max_length.filter(|max| length > *max) {
                violations.push(violation(
                    var,
                    ViolationType::TooLong,
                    format!("string length must be less than or equal to {}", max),
                ));
            }
            if let Some(pattern) = &constraints.pattern {
                match Regex::new(pattern) {
                    Ok(re) if !re.is_match(text) => violations.push(violation(
                        var,
                        ViolationType::PatternMismatch,
                        format!("does not match pattern '{}'", pattern),
                    )),
                    Ok(_) => {}
                    Err(e) => violations.push(violation(
                        var,
                        ViolationType::InvalidSchema,
                        format!("invalid pattern '{}': {}", pattern, e),
                    )),
                }
            }
        }

        if let Some(number) = value.as_f64() {
            if let Some(min) = constraints.minimum.filter(|min| number < *min) {
                violations.push(violation(
                    var,
                    ViolationType::BelowMinimum,
                    format!("must be greater than or equal to {}", min),
                ));
            }
            if let Some(max) = constraints.maximum.filter(|max| number > *max) {
                violations.push(violation(
                    var,
                    ViolationType::AboveMaximum,
                    format!("must be less than or equal to {}", max),
                ));
            }
        }

        violations
    }
}

fn violation(var: &BrokerVariable, error_type: ViolationType, message: String) -> FieldViolation {
    FieldViolation {
        field: var.field_name.clone(),
        error_type,
        message,
    }
}

fn matches_type(value: &Value, expected: JsonType) -> bool {
    match expected {
        JsonType::String => matches!(value, Value::Text(_)),
        JsonType::Integer => value.as_i64().is_some(),
        JsonType::Number => value.as_f64().is_some(),
        JsonType::Boolean => matches!(value, Value::Bool(_)),
        JsonType::Object => matches!(value, Value::Map(_)),
        JsonType::Array => matches!(value, Value::List(_)),
    }
}

fn enum_matches(value: &Value, option: &Value) -> bool {
    match (value.as_f64(), option.as_f64()) {
        (Some(v), Some(o)) => v == o,
        _ => value == option,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Constraints;
    use serde_json::json;

    fn params(json: serde_json::Value) -> ValueMap {
        match Value::from(json) {
            Value::Map(map) => map,
            other => panic!("expected an object, got {:?}", other),
        }
    }

    fn name_var() -> BrokerVariable {
        BrokerVariable::new("name", JsonType::String, "Instance name")
            .required()
            .with_constraints(Constraints {
                min_length: Some(3),
                max_length: Some(10),
                pattern: Some("^[a-z][a-z0-9-]*$".to_string()),
                ..Constraints::default()
            })
    }

    #[test]
    fn test_valid_parameters_pass() {
        let vars = vec![
            name_var(),
            BrokerVariable::new("size", JsonType::Integer, "").with_constraints(Constraints {
                minimum: Some(1.0),
                maximum: Some(100.0),
                ..Constraints::default()
            }),
        ];
        assert!(SchemaValidator::validate_variables(&params(json!({"name": "my-db", "size": 10})), &vars).is_ok());
        assert!(SchemaValidator::validate_variables(&params(json!({"name": "my-db"})), &vars).is_ok());
    }

    #[test]
    fn test_missing_required_parameter() {
        let err = SchemaValidator::validate_variables(&ValueMap::new(), &[name_var()]).unwrap_err();
        assert_eq!(err.violations.len(), 1);
        assert_eq!(err.violations[0].error_type, ViolationType::MissingRequiredParameter);
        assert_eq!(err.violations[0].message, "missing required parameter \"name\"");
        assert!(err.is_client_error());
    }

    #[test]
    fn test_structural_violations_are_reported_per_field() {
        let err = SchemaValidator::validate_variables(&params(json!({"name": "AB"})), &[name_var()]).unwrap_err();
        let kinds: Vec<ViolationType> = err.violations.iter().map(|v| v.error_type).collect();
        assert_eq!(kinds, vec![ViolationType::TooShort, ViolationType::PatternMismatch]);
        assert!(err.to_string().starts_with("2 error(s) occurred:\n* (name): "));
    }

    #[test]
    fn test_type_mismatch_short_circuits_field_checks() {
        let err = SchemaValidator::validate_variables(&params(json!({"name": 5})), &[name_var()]).unwrap_err();
        assert_eq!(err.violations.len(), 1);
        assert_eq!(err.violations[0].error_type, ViolationType::TypeMismatch);
    }

    #[test]
    fn test_enum_membership() {
        let var = BrokerVariable::new("tier", JsonType::Integer, "").with_enum([(1, "one"), (2, "two")]);

        assert!(SchemaValidator::validate_variables(&params(json!({"tier": 2})), &[var.clone()]).is_ok());
        assert!(SchemaValidator::validate_variables(&params(json!({"tier": 2.0})), &[var.clone()]).is_ok());

        let err = SchemaValidator::validate_variables(&params(json!({"tier": 3})), &[var]).unwrap_err();
        assert_eq!(err.violations[0].error_type, ViolationType::NotInEnum);
        assert_eq!(err.violations[0].message, "must be one of the following: 1, 2");
    }

    #[test]
    fn test_numeric_bounds() {
        let var = BrokerVariable::new("size", JsonType::Number, "").with_constraints(Constraints {
            minimum: Some(1.0),
            maximum: Some(5.0),
            ..Constraints::default()
        });
        let err = SchemaValidator::validate_variables(&params(json!({"size": 6.5})), &[var.clone()]).unwrap_err();
        assert_eq!(err.violations[0].error_type, ViolationType::AboveMaximum);

        let err = SchemaValidator::validate_variables(&params(json!({"size": 0})), &[var]).unwrap_err();
        assert_eq!(err.violations[0].error_type, ViolationType::BelowMinimum);
    }
}
