use crate::model::{Id, ValueMap};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Kind of asynchronous work pending against an instance record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Provision,
    Deprovision,
    Update,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Provision => "provision",
            OperationType::Deprovision => "deprovision",
            OperationType::Update => "update",
        }
    }
}

/// Persisted record of a provisioned service instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstanceDetails {
    pub id: Id,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub url: String,
    /// Provider specific JSON payload, stored verbatim.
    #[serde(default)]
    pub other_details: String,
    pub service_id: Id,
    pub plan_id: Id,
    #[serde(default)]
    pub space_guid: String,
    #[serde(default)]
    pub organization_guid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_type: Option<OperationType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    /// Bumped by the store on every save; used for compare-and-save.
    #[serde(default)]
    pub version: u64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ServiceInstanceDetails {
    pub fn new(id: impl Into<Id>, service_id: impl Into<Id>, plan_id: impl Into<Id>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            location: String::new(),
            url: String::new(),
            other_details: String::new(),
            service_id: service_id.into(),
            plan_id: plan_id.into(),
            space_guid: String::new(),
            organization_guid: String::new(),
            operation_type: None,
            operation_id: None,
            version: 0,
            created_at: Utc::now(),
        }
    }

    /// A record with pending work must not be mutated by another request.
    pub fn is_locked(&self) -> bool {
        self.operation_type.is_some()
    }

    pub fn begin_operation(&mut self, operation_type: OperationType, operation_id: impl Into<String>) {
        self.operation_type = Some(operation_type);
        self.operation_id = Some(operation_id.into());
    }

    pub fn clear_operation(&mut self) {
        self.operation_type = None;
        self.operation_id = None;
    }

    pub fn set_other_details<T: Serialize>(&mut self, details: &T) -> serde_json::Result<()> {
        self.other_details = serde_json::to_string(details)?;
        Ok(())
    }

    pub fn get_other_details<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.other_details)
    }

    /// The payload as a map; a blank payload is an empty map.
    pub fn other_details_map(&self) -> serde_json::Result<ValueMap> {
        if self.other_details.trim().is_empty() {
            return Ok(ValueMap::new());
        }
        self.get_other_details()
    }
}

/// Persisted record of a binding and the credentials handed out for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceBindingCredentials {
    pub id: Id,
    #[serde(default)]
    pub other_details: String,
    pub service_id: Id,
    pub service_instance_id: Id,
    pub binding_id: Id,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ServiceBindingCredentials {
    pub fn get_other_details<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.other_details)
    }
}

/// The raw parameters of the provision request that created an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionRequestDetails {
    pub service_instance_id: Id,
    #[serde(default)]
    pub request_details: String,
}
