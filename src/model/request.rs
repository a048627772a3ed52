use crate::model::Id;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvisionDetails {
    pub service_id: Id,
    pub plan_id: Id,
    #[serde(default)]
    pub organization_guid: String,
    #[serde(default)]
    pub space_guid: String,
    /// User parameters; never evaluated as expressions.
    #[serde(default, rename = "parameters", skip_serializing_if = "Option::is_none")]
    pub raw_parameters: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BindDetails {
    pub service_id: Id,
    pub plan_id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_guid: Option<String>,
    #[serde(default, rename = "parameters", skip_serializing_if = "Option::is_none")]
    pub raw_parameters: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeprovisionDetails {
    pub service_id: Id,
    pub plan_id: Id,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnbindDetails {
    pub service_id: Id,
    pub plan_id: Id,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionedServiceSpec {
    pub is_async: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeprovisionServiceSpec {
    pub is_async: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub credentials: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LastOperationState {
    InProgress,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastOperation {
    pub state: LastOperationState,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl LastOperation {
    pub fn new(state: LastOperationState, description: impl Into<String>) -> Self {
        Self {
            state,
            description: description.into(),
        }
    }
}
