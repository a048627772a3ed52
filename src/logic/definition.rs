use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde_json::json;

use crate::logic::evaluate::is_literal;
use crate::logic::provider::{ProviderSettings, ServiceProvider};
use crate::logic::registry::RegistryError;
use crate::model::{
    create_json_schema, is_uuid, BrokerVariable, CatalogService, CustomPlan, DefaultVariable, Id,
    ServiceConfig, ServiceMetadata, ServicePlan, Value,
};

/// Factory producing the backend provider for a service.
pub type ProviderBuilder = Arc<dyn Fn(&ProviderSettings) -> Arc<dyn ServiceProvider> + Send + Sync>;

/// Declarative description of a service: identity, plans, variable schemas
/// and the computed-variable pipelines run for provision and bind.
#[derive(Clone)]
pub struct ServiceDefinition {
    pub id: Id,
    pub name: String,
    pub description: String,
    pub display_name: String,
    pub image_url: String,
    pub documentation_url: String,
    pub support_url: String,
    pub tags: Vec<String>,
    pub bindable: bool,
    pub plan_updateable: bool,
    pub plans: Vec<ServicePlan>,
    pub provision_input_variables: Vec<BrokerVariable>,
    pub provision_computed_variables: Vec<DefaultVariable>,
    pub bind_input_variables: Vec<BrokerVariable>,
    pub bind_output_variables: Vec<BrokerVariable>,
    pub bind_computed_variables: Vec<DefaultVariable>,
    /// Properties every operator-declared custom plan must carry.
    pub plan_variables: Vec<BrokerVariable>,
    pub default_role_whitelist: Vec<String>,
    pub provider_builder: Option<ProviderBuilder>,
    pub is_builtin: bool,

    pub(crate) operator_config: ServiceConfig,
    pub(crate) custom_plans: Vec<ServicePlan>,
    pub(crate) catalog_schemas: bool,
}

impl fmt::Debug for ServiceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("plans", &self.plans.iter().map(|p| &p.name).collect::<Vec<_>>())
            .field("custom_plans", &self.custom_plans.iter().map(|p| &p.name).collect::<Vec<_>>())
            .field("has_provider", &self.provider_builder.is_some())
            .finish()
    }
}

impl ServiceDefinition {
    pub fn new(id: impl Into<Id>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            display_name: String::new(),
            image_url: String::new(),
            documentation_url: String::new(),
            support_url: String::new(),
            tags: Vec::new(),
            bindable: true,
            plan_updateable: false,
            plans: Vec::new(),
            provision_input_variables: Vec::new(),
            provision_computed_variables: Vec::new(),
            bind_input_variables: Vec::new(),
            bind_output_variables: Vec::new(),
            bind_computed_variables: Vec::new(),
            plan_variables: Vec::new(),
            default_role_whitelist: Vec::new(),
            provider_builder: None,
            is_builtin: true,
            operator_config: ServiceConfig::default(),
            custom_plans: Vec::new(),
            catalog_schemas: false,
        }
    }

    pub fn with_plan(mut self, plan: ServicePlan) -> Self {
        self.plans.push(plan);
        self
    }

    pub fn with_provider(mut self, builder: ProviderBuilder) -> Self {
        self.provider_builder = Some(builder);
        self
    }

    pub fn operator_config(&self) -> &ServiceConfig {
        &self.operator_config
    }

    pub fn is_disabled(&self) -> bool {
        self.operator_config.disabled
    }

    pub fn is_role_whitelist_enabled(&self) -> bool {
        !self.default_role_whitelist.is_empty()
    }

    /// Bind input restricting `role` to the whitelist, when one is set.
    pub fn role_whitelist_variable(&self) -> Option<BrokerVariable> {
        if !self.is_role_whitelist_enabled() {
            return None;
        }
        let default = self.default_role_whitelist.first().cloned().unwrap_or_default();
        Some(
            BrokerVariable::new("role", crate::model::JsonType::String, "The role for the account.")
                .with_default(json!(default))
                .with_enum(self.default_role_whitelist.iter().map(|role| (role.clone(), role.clone()))),
        )
    }

    /// Structural checks run once at registration.
    pub fn validate(&self) -> Result<(), RegistryError> {
        let mut problems = Vec::new();

        if !is_uuid(&self.id) {
            problems.push(format!("id {:?} must be a UUID", self.id));
        }
        if !is_osb_name(&self.name) {
            problems.push(format!(
                "name {:?} must be non-empty and contain only alphanumerics, '-' and '.'",
                self.name
            ));
        }
        if self.description.trim().is_empty() {
            problems.push("description is required".to_string());
        }
        for (field, value) in [
            ("image_url", &self.image_url),
            ("documentation_url", &self.documentation_url),
            ("support_url", &self.support_url),
        ] {
            if !value.is_empty() && url::Url::parse(value).is_err() {
                problems.push(format!("{} {:?} is not a valid URL", field, value));
            }
        }

        let mut plan_ids = HashSet::new();
        for (i, plan) in self.plans.iter().enumerate() {
            if plan.id.is_empty() {
                problems.push(format!("plans[{}] is missing an id", i));
            } else if !plan_ids.insert(plan.id.as_str()) {
                problems.push(format!("plans[{}] reuses plan id {:?}", i, plan.id));
            }
            if plan.name.is_empty() {
                problems.push(format!("plans[{}] is missing a name", i));
            }
        }

        for (list, vars) in [
            ("provision_input_variables", &self.provision_input_variables),
            ("bind_input_variables", &self.bind_input_variables),
            ("bind_output_variables", &self.bind_output_variables),
            ("plan_variables", &self.plan_variables),
        ] {
            validate_variable_list(list, vars, &mut problems);
        }
        for (list, vars) in [
            ("provision_computed_variables", &self.provision_computed_variables),
            ("bind_computed_variables", &self.bind_computed_variables),
        ] {
            for (i, var) in vars.iter().enumerate() {
                validate_computed_variable(list, i, var, &mut problems);
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::InvalidDefinition {
                name: self.name.clone(),
                problems,
            })
        }
    }

    /// Custom plans declared by the operator, rejected as a whole if any
    /// one of them lacks an id, a name, or a required plan property.
    pub fn user_defined_plans(&self) -> Result<Vec<ServicePlan>, RegistryError> {
        self.operator_config
            .custom_plans
            .iter()
            .map(|plan| {
                self.validate_plan(plan)?;
                Ok(plan.to_service_plan())
            })
            .collect()
    }

    fn validate_plan(&self, plan: &CustomPlan) -> Result<(), RegistryError> {
        let invalid = |reason: String| RegistryError::InvalidCustomPlan {
            service: self.name.clone(),
            reason,
        };

        if plan.guid.is_empty() {
            return Err(invalid(format!("custom plan {:?} is missing an id", plan.name)));
        }
        if plan.name.is_empty() {
            return Err(invalid(format!("custom plan {:?} is missing a name", plan.guid)));
        }
        for var in self.plan_variables.iter().filter(|var| var.required) {
            if !plan.properties.contains_key(&var.field_name) {
                return Err(invalid(format!(
                    "custom plan {:?} is missing required property {}",
                    plan.name, var.field_name
                )));
            }
        }
        Ok(())
    }

    /// Externally visible catalog entry: built-in plans followed by the
    /// operator's custom plans.
    pub fn catalog_entry(&self) -> CatalogService {
        let schemas = self.catalog_schemas.then(|| {
            json!({
                "service_instance": {"create": {"parameters": create_json_schema(&self.provision_input_variables)}},
                "service_binding": {"create": {"parameters": create_json_schema(&self.bind_input_variables)}},
            })
        });

        let plans = self
            .plans
            .iter()
            .chain(self.custom_plans.iter())
            .map(|plan| ServicePlan {
                schemas: schemas.clone(),
                ..plan.clone()
            })
            .collect();

        CatalogService {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            bindable: self.bindable,
            plan_updateable: self.plan_updateable,
            tags: self.tags.clone(),
            metadata: ServiceMetadata {
                display_name: self.display_name.clone(),
                image_url: self.image_url.clone(),
                long_description: self.description.clone(),
                documentation_url: self.documentation_url.clone(),
                support_url: self.support_url.clone(),
            },
            plans,
        }
    }

    pub fn get_plan_by_id(&self, plan_id: &str) -> Result<ServicePlan, RegistryError> {
        self.catalog_entry()
            .plans
            .into_iter()
            .find(|plan| plan.id == plan_id)
            .ok_or_else(|| RegistryError::PlanNotFound(plan_id.to_string()))
    }

    pub fn provider(&self, settings: &ProviderSettings) -> Option<Arc<dyn ServiceProvider>> {
        self.provider_builder.as_ref().map(|build| build(settings))
    }
}

fn is_osb_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

fn validate_variable_list(list: &str, vars: &[BrokerVariable], problems: &mut Vec<String>) {
    let mut seen = HashSet::new();
    for (i, var) in vars.iter().enumerate() {
        if var.field_name.is_empty() {
            problems.push(format!("{}[{}] is missing a field name", list, i));
        } else if !seen.insert(var.field_name.as_str()) {
            problems.push(format!("{}[{}] repeats field {:?}", list, i, var.field_name));
        }
        if let Some(pattern) = &var.constraints.pattern {
            if let Err(e) = regex::Regex::new(pattern) {
                problems.push(format!("{}[{}] has an invalid pattern: {}", list, i, e));
            }
        }
    }
}

fn validate_computed_variable(list: &str, index: usize, var: &DefaultVariable, problems: &mut Vec<String>) {
    if var.name.trim().is_empty() {
        problems.push(format!("{}[{}] is missing a name", list, index));
    }
    if var.default.is_null() {
        problems.push(format!("{}[{}] is missing a default", list, index));
        return;
    }

    // templates are only typed once evaluated
    let Some(var_type) = var.var_type else {
        return;
    };
    if let serde_json::Value::String(text) = &var.default {
        if !is_literal(text) {
            return;
        }
    }
    if Value::from(var.default.clone()).cast_to(var_type).is_err() {
        problems.push(format!(
            "{}[{}] default {} is not a valid {}",
            list,
            index,
            var.default,
            var_type.as_str()
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Constraints, JsonType};
    use std::collections::BTreeMap;

    const SERVICE_ID: &str = "b9e4332e-b42b-4680-bda5-ea1506797474";

    fn definition() -> ServiceDefinition {
        let mut def = ServiceDefinition::new(SERVICE_ID, "example-storage", "Object storage")
            .with_plan(ServicePlan::new("e1d11f65-da66-46ad-977c-6d56513baf43", "standard", "Standard storage"));
        def.display_name = "Example Storage".to_string();
        def.documentation_url = "https://example.com/docs".to_string();
        def.provision_input_variables = vec![BrokerVariable::new("name", JsonType::String, "Bucket name")];
        def.bind_input_variables = vec![BrokerVariable::new("role", JsonType::String, "Role")];
        def.plan_variables = vec![BrokerVariable::new("storage_class", JsonType::String, "").required()];
        def
    }

    fn custom_plan(guid: &str, name: &str) -> CustomPlan {
        CustomPlan {
            guid: guid.to_string(),
            name: name.to_string(),
            properties: BTreeMap::from([("storage_class".to_string(), "COLDLINE".to_string())]),
            ..CustomPlan::default()
        }
    }

    #[test]
    fn test_valid_definition() {
        assert!(definition().validate().is_ok());
    }

    #[test]
    fn test_invalid_definition_lists_every_problem() {
        let mut def = ServiceDefinition::new("not-a-uuid", "bad name!", "");
        def.support_url = "not a url".to_string();
        def.plans = vec![ServicePlan::new("", "", "")];
        def.provision_input_variables = vec![
            BrokerVariable::new("a", JsonType::String, ""),
            BrokerVariable::new("a", JsonType::String, "").with_constraints(Constraints {
                pattern: Some("(".to_string()),
                ..Constraints::default()
            }),
        ];

        match def.validate().unwrap_err() {
            RegistryError::InvalidDefinition { problems, .. } => assert_eq!(problems.len(), 8, "{:?}", problems),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_computed_variables_need_a_typed_default() {
        let mut def = definition();
        def.provision_computed_variables = vec![
            DefaultVariable::new("labels", json!("${json.marshal(request.default_labels)}")).overwriting(),
            DefaultVariable::new("is_first_gen", json!("${tier == \"D0\"}")).typed(JsonType::Boolean),
            DefaultVariable::new("binlog", json!("true")).typed(JsonType::Boolean),
        ];
        assert!(def.validate().is_ok());

        def.bind_computed_variables = vec![
            DefaultVariable::new("missing", serde_json::Value::Null),
            DefaultVariable::new("port", json!("not-a-number")).typed(JsonType::Integer),
            DefaultVariable::new("", json!("x")),
        ];
        match def.validate().unwrap_err() {
            RegistryError::InvalidDefinition { problems, .. } => {
                assert_eq!(
                    problems,
                    vec![
                        "bind_computed_variables[0] is missing a default".to_string(),
                        "bind_computed_variables[1] default \"not-a-number\" is not a valid integer".to_string(),
                        "bind_computed_variables[2] is missing a name".to_string(),
                    ]
                );
            }
            other => panic!("unexpected error {:?}", other),
        }

        let unknown_type = serde_json::from_value::<DefaultVariable>(json!({"name": "x", "default": "1", "type": "int"}));
        assert!(unknown_type.is_err());
    }

    #[test]
    fn test_custom_plan_missing_name_is_rejected() {
        let mut def = definition();
        def.operator_config.custom_plans = vec![custom_plan("0a2b2c0c-5e3e-4c0d-9a7d-9c4b0b2c1c11", "")];

        let err = def.user_defined_plans().unwrap_err();
        assert!(err.to_string().contains("is missing a name"), "{}", err);
    }

    #[test]
    fn test_custom_plan_missing_id_or_property_is_rejected() {
        let mut def = definition();
        def.operator_config.custom_plans = vec![custom_plan("", "cold")];
        assert!(def.user_defined_plans().unwrap_err().to_string().contains("is missing an id"));

        let mut plan = custom_plan("0a2b2c0c-5e3e-4c0d-9a7d-9c4b0b2c1c11", "cold");
        plan.properties.clear();
        def.operator_config.custom_plans = vec![plan];
        assert!(def
            .user_defined_plans()
            .unwrap_err()
            .to_string()
            .contains("is missing required property storage_class"));
    }

    #[test]
    fn test_catalog_entry_merges_custom_plans() {
        let mut def = definition();
        def.operator_config.custom_plans = vec![custom_plan("0a2b2c0c-5e3e-4c0d-9a7d-9c4b0b2c1c11", "cold")];
        def.custom_plans = def.user_defined_plans().unwrap();

        let entry = def.catalog_entry();
        assert_eq!(entry.plans.len(), 2);
        assert_eq!(entry.plans[1].name, "cold");
        assert_eq!(entry.metadata.display_name, "Example Storage");
        assert!(entry.plans.iter().all(|plan| plan.schemas.is_none()));

        def.catalog_schemas = true;
        let entry = def.catalog_entry();
        let schemas = entry.plans[0].schemas.as_ref().unwrap();
        assert_eq!(
            schemas["service_instance"]["create"]["parameters"]["properties"]["name"]["type"],
            "string"
        );
        assert!(schemas["service_binding"]["create"]["parameters"]["properties"]["role"].is_object());
    }

    #[test]
    fn test_get_plan_by_id() {
        let mut def = definition();
        def.custom_plans = vec![custom_plan("0a2b2c0c-5e3e-4c0d-9a7d-9c4b0b2c1c11", "cold").to_service_plan()];

        assert_eq!(def.get_plan_by_id("e1d11f65-da66-46ad-977c-6d56513baf43").unwrap().name, "standard");
        assert_eq!(def.get_plan_by_id("0a2b2c0c-5e3e-4c0d-9a7d-9c4b0b2c1c11").unwrap().name, "cold");
        assert_eq!(
            def.get_plan_by_id("missing").unwrap_err().to_string(),
            "Plan ID \"missing\" could not be found"
        );
    }

    #[test]
    fn test_role_whitelist() {
        let mut def = definition();
        assert!(!def.is_role_whitelist_enabled());
        assert!(def.role_whitelist_variable().is_none());

        def.default_role_whitelist = vec!["storage.objectViewer".to_string(), "storage.objectAdmin".to_string()];
        let var = def.role_whitelist_variable().unwrap();
        assert_eq!(var.default, Some(json!("storage.objectViewer")));
        assert_eq!(var.enum_values.len(), 2);
    }
}
