use crate::model::{Id, ValueMap};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A purchasable configuration profile of a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePlan {
    pub id: Id,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    /// Fixed properties merged into every resolution against this plan.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub service_properties: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub provision_overrides: ValueMap,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bind_overrides: ValueMap,
    /// Parameter schemas, attached only when catalog schemas are enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schemas: Option<serde_json::Value>,
}

impl ServicePlan {
    pub fn new(id: impl Into<Id>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            display_name: String::new(),
            description: description.into(),
            service_properties: BTreeMap::new(),
            provision_overrides: ValueMap::new(),
            bind_overrides: ValueMap::new(),
            schemas: None,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.service_properties.insert(key.into(), value.into());
        self
    }
}

/// A plan declared by the operator in configuration rather than shipped with
/// the service definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomPlan {
    #[serde(default)]
    pub guid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub provision_overrides: ValueMap,
    #[serde(default)]
    pub bind_overrides: ValueMap,
}

impl CustomPlan {
    pub fn to_service_plan(&self) -> ServicePlan {
        ServicePlan {
            id: self.guid.clone(),
            name: self.name.clone(),
            display_name: self.display_name.clone(),
            description: self.description.clone(),
            service_properties: self.properties.clone(),
            provision_overrides: self.provision_overrides.clone(),
            bind_overrides: self.bind_overrides.clone(),
            schemas: None,
        }
    }
}

/// Operator configuration for a single service, consumed once when the
/// service is registered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub provision_defaults: ValueMap,
    #[serde(default)]
    pub bind_defaults: ValueMap,
    #[serde(default)]
    pub custom_plans: Vec<CustomPlan>,
}

/// Operator configuration keyed by service id.
pub type ServiceConfigMap = HashMap<Id, ServiceConfig>;

pub fn parse_service_config_map(raw: &str) -> serde_json::Result<ServiceConfigMap> {
    if raw.trim().is_empty() {
        return Ok(ServiceConfigMap::new());
    }
    serde_json::from_str(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;

    #[test]
    fn test_custom_plan_converts_to_service_plan() {
        let plan = CustomPlan {
            guid: "8a6f6e5c-0bd7-4c07-a3b8-f8c4e5e0e2a1".into(),
            name: "large".into(),
            description: "A large plan".into(),
            properties: BTreeMap::from([("tier".to_string(), "db-n1-standard-4".to_string())]),
            ..CustomPlan::default()
        };

        let service_plan = plan.to_service_plan();
        assert_eq!(service_plan.id, plan.guid);
        assert_eq!(service_plan.name, "large");
        assert_eq!(service_plan.service_properties["tier"], "db-n1-standard-4");
        assert!(service_plan.schemas.is_none());
    }

    #[test]
    fn test_service_config_map_parses_operator_json() {
        let raw = r#"{
            "b9e4332e-b42b-4680-bda5-ea1506797474": {
                "disabled": false,
                "provision_defaults": {"location": "us-west1"},
                "custom_plans": [{"guid": "p1", "name": "small", "properties": {"tier": "s"}}]
            }
        }"#;

        let configs = parse_service_config_map(raw).unwrap();
        let config = &configs["b9e4332e-b42b-4680-bda5-ea1506797474"];
        assert_eq!(config.provision_defaults["location"], Value::from("us-west1"));
        assert_eq!(config.custom_plans.len(), 1);
        assert!(config.bind_defaults.is_empty());

        assert!(parse_service_config_map("  ").unwrap().is_empty());
    }
}
