use crate::model::JsonType;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// An input or output field of a service, described the way it is exposed in
/// the catalog and validated on every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerVariable {
    #[serde(default)]
    pub required: bool,
    pub field_name: String,
    #[serde(rename = "type")]
    pub var_type: JsonType,
    #[serde(default)]
    pub details: String,
    /// Literal value or expression template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default, rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<EnumOption>,
    #[serde(default, skip_serializing_if = "Constraints::is_empty")]
    pub constraints: Constraints,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumOption {
    pub value: serde_json::Value,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        self == &Constraints::default()
    }
}

impl BrokerVariable {
    pub fn new(field_name: impl Into<String>, var_type: JsonType, details: impl Into<String>) -> Self {
        Self {
            required: false,
            field_name: field_name.into(),
            var_type,
            details: details.into(),
            default: None,
            enum_values: Vec::new(),
            constraints: Constraints::default(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_enum<I, V, L>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = (V, L)>,
        V: Into<serde_json::Value>,
        L: Into<String>,
    {
        self.enum_values = options
            .into_iter()
            .map(|(value, label)| EnumOption {
                value: value.into(),
                label: label.into(),
            })
            .collect();
        self
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// JSON-schema fragment describing this field.
    pub fn to_schema(&self) -> serde_json::Value {
        let mut schema = serde_json::Map::new();
        schema.insert("title".into(), json!(self.field_name));
        schema.insert("type".into(), json!(self.var_type.as_str()));
        if !self.details.is_empty() {
            schema.insert("description".into(), json!(self.details));
        }
        if let Some(default) = &self.default {
            schema.insert("default".into(), default.clone());
        }
        if !self.enum_values.is_empty() {
            let mut options = self.enum_values.clone();
            options.sort_by_key(|option| option.value.to_string());
            schema.insert(
                "enum".into(),
                options.iter().map(|option| option.value.clone()).collect(),
            );
            schema.insert(
                "enumNames".into(),
                options.iter().map(|option| json!(option.label)).collect(),
            );
        }

        let c = &self.constraints;
        if let Some(v) = c.min_length {
            schema.insert("minLength".into(), json!(v));
        }
        if let Some(v) = c.max_length {
            schema.insert("maxLength".into(), json!(v));
        }
        if let Some(v) = &c.pattern {
            schema.insert("pattern".into(), json!(v));
        }
        if let Some(v) = c.minimum {
            schema.insert("minimum".into(), json!(v));
        }
        if let Some(v) = c.maximum {
            schema.insert("maximum".into(), json!(v));
        }

        serde_json::Value::Object(schema)
    }
}

/// Builds the object schema for a whole variable list.
pub fn create_json_schema(vars: &[BrokerVariable]) -> serde_json::Value {
    let mut properties = serde_json::Map::new();
    let mut required: Vec<&str> = Vec::new();
    for var in vars {
        properties.insert(var.field_name.clone(), var.to_schema());
        if var.required {
            required.push(&var.field_name);
        }
    }
    required.sort_unstable();

    let mut schema = json!({
        "$schema": "http://json-schema.org/draft-04/schema#",
        "type": "object",
        "properties": properties,
    });
    if !required.is_empty() {
        schema["required"] = json!(required);
    }
    schema
}

/// A value derived during resolution rather than supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultVariable {
    pub name: String,
    /// Literal value or expression template; null means nothing is merged.
    #[serde(default)]
    pub default: serde_json::Value,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub var_type: Option<JsonType>,
}

impl DefaultVariable {
    pub fn new(name: impl Into<String>, default: impl Into<serde_json::Value>) -> Self {
        Self {
            name: name.into(),
            default: default.into(),
            overwrite: false,
            var_type: None,
        }
    }

    pub fn overwriting(mut self) -> Self {
        self.overwrite = true;
        self
    }

    pub fn typed(mut self, var_type: JsonType) -> Self {
        self.var_type = Some(var_type);
        self
    }
}

impl From<&BrokerVariable> for DefaultVariable {
    fn from(var: &BrokerVariable) -> Self {
        Self {
            name: var.field_name.clone(),
            default: var.default.clone().unwrap_or(serde_json::Value::Null),
            overwrite: false,
            var_type: Some(var.var_type),
        }
    }
}
