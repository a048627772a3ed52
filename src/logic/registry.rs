use std::collections::HashMap;

use thiserror::Error;

use crate::config::FeatureToggles;
use crate::logic::definition::ServiceDefinition;
use crate::logic::evaluate::{Counter, Evaluator};
use crate::logic::resolve::ResolveError;
use crate::logic::var_context::VarContext;
use crate::model::{
    BindDetails, CatalogService, Id, ProvisionDetails, ServiceConfigMap, ServiceInstanceDetails, ServicePlan,
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("service definition {name:?} is invalid: {}", problems.join("; "))]
    InvalidDefinition { name: String, problems: Vec<String> },
    #[error("{service} {reason}")]
    InvalidCustomPlan { service: String, reason: String },
    #[error("tried to register multiple instances of: {0:?}")]
    DuplicateName(String),
    #[error("tried to register multiple services with id: {0:?}")]
    DuplicateId(Id),
    #[error("Unknown service ID: {0:?}")]
    UnknownService(Id),
    #[error("Plan ID {0:?} could not be found")]
    PlanNotFound(Id),
}

/// Every registered service, keyed by name.
#[derive(Debug, Default)]
pub struct BrokerRegistry {
    services: HashMap<String, ServiceDefinition>,
    toggles: FeatureToggles,
    counter: Counter,
}

impl BrokerRegistry {
    pub fn new(toggles: FeatureToggles) -> Self {
        Self {
            services: HashMap::new(),
            toggles,
            counter: Counter::new(),
        }
    }

    pub fn toggles(&self) -> &FeatureToggles {
        &self.toggles
    }

    /// Validates and stores a definition together with its operator
    /// configuration. Nothing is stored when any check fails.
    pub fn register(&mut self, mut definition: ServiceDefinition, configs: &ServiceConfigMap) -> Result<(), RegistryError> {
        if self.services.contains_key(&definition.name) {
            return Err(RegistryError::DuplicateName(definition.name));
        }
        if self.services.values().any(|existing| existing.id == definition.id) {
            return Err(RegistryError::DuplicateId(definition.id));
        }

        definition.validate()?;

        definition.operator_config = configs.get(&definition.id).cloned().unwrap_or_default();
        definition.custom_plans = definition.user_defined_plans()?;
        definition.catalog_schemas = self.toggles.enable_catalog_schemas;

        log::info!(
            "registered service {} ({}) with {} plan(s)",
            definition.name,
            definition.id,
            definition.plans.len() + definition.custom_plans.len()
        );
        self.services.insert(definition.name.clone(), definition);
        Ok(())
    }

    /// All services sorted by name.
    pub fn get_all_services(&self) -> Vec<&ServiceDefinition> {
        let mut services: Vec<&ServiceDefinition> = self.services.values().collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        services
    }

    /// Services not disabled by the operator nor hidden by a lifecycle tag.
    pub fn get_enabled_services(&self) -> Vec<&ServiceDefinition> {
        self.get_all_services()
            .into_iter()
            .filter(|service| !service.is_disabled() && self.toggles.service_enabled(&service.tags))
            .collect()
    }

    pub fn get_service_by_id(&self, service_id: &str) -> Result<&ServiceDefinition, RegistryError> {
        self.services
            .values()
            .find(|service| service.id == service_id)
            .ok_or_else(|| RegistryError::UnknownService(service_id.to_string()))
    }

    pub fn catalog(&self) -> Vec<CatalogService> {
        self.get_enabled_services()
            .into_iter()
            .map(ServiceDefinition::catalog_entry)
            .collect()
    }

    /// An evaluator sharing the registry counter.
    pub fn evaluator(&self) -> Evaluator {
        Evaluator::with_counter(self.counter.clone())
    }

    pub fn lookup_plan(&self, service_id: &str, plan_id: &str) -> Result<(&ServiceDefinition, ServicePlan), RegistryError> {
        let service = self.get_service_by_id(service_id)?;
        let plan = service.get_plan_by_id(plan_id)?;
        Ok((service, plan))
    }

    pub fn provision_variables(&self, instance_id: &str, details: &ProvisionDetails) -> Result<VarContext, RegistryResolveError> {
        let (service, plan) = self.lookup_plan(&details.service_id, &details.plan_id)?;
        Ok(service.provision_variables(instance_id, details, &plan, &self.evaluator())?)
    }

    /// Resolves against the plan recorded on the instance, not the request.
    pub fn bind_variables(
        &self,
        instance: &ServiceInstanceDetails,
        binding_id: &str,
        details: &BindDetails,
    ) -> Result<VarContext, RegistryResolveError> {
        let (service, plan) = self.lookup_plan(&instance.service_id, &instance.plan_id)?;
        Ok(service.bind_variables(instance, binding_id, details, &plan, &self.evaluator())?)
    }
}

/// A lookup or resolution failure from the registry shortcuts.
#[derive(Debug, Error)]
pub enum RegistryResolveError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BrokerVariable, CustomPlan, JsonType, ServiceConfig};
    use serde_json::json;
    use std::collections::BTreeMap;

    const STORAGE_ID: &str = "b9e4332e-b42b-4680-bda5-ea1506797474";
    const SQL_ID: &str = "4bc59b9a-8520-409f-85da-1c7552315863";

    fn storage() -> ServiceDefinition {
        let mut def = ServiceDefinition::new(STORAGE_ID, "example-storage", "Object storage")
            .with_plan(ServicePlan::new("e1d11f65-da66-46ad-977c-6d56513baf43", "standard", ""));
        def.provision_input_variables = vec![
            BrokerVariable::new("name", JsonType::String, "").with_default(json!("bucket-${counter.next()}")),
        ];
        def
    }

    fn sql() -> ServiceDefinition {
        let mut def = ServiceDefinition::new(SQL_ID, "example-sql", "Managed SQL");
        def.tags = vec!["sql".to_string(), "beta".to_string()];
        def.plan_variables = vec![BrokerVariable::new("tier", JsonType::String, "").required()];
        def
    }

    #[test]
    fn test_duplicates_are_rejected() {
        let mut registry = BrokerRegistry::default();
        registry.register(storage(), &ServiceConfigMap::new()).unwrap();

        let err = registry.register(storage(), &ServiceConfigMap::new()).unwrap_err();
        assert_eq!(err.to_string(), "tried to register multiple instances of: \"example-storage\"");

        let mut same_id = sql();
        same_id.id = STORAGE_ID.to_string();
        assert!(matches!(
            registry.register(same_id, &ServiceConfigMap::new()),
            Err(RegistryError::DuplicateId(_))
        ));
    }

    #[test]
    fn test_invalid_custom_plan_rejects_registration() {
        let mut registry = BrokerRegistry::default();
        let configs = ServiceConfigMap::from([(
            SQL_ID.to_string(),
            ServiceConfig {
                custom_plans: vec![CustomPlan {
                    guid: "1b5c8d3e-8d2c-4f5b-9a0e-6c1d2e3f4a5b".to_string(),
                    name: "small".to_string(),
                    ..CustomPlan::default()
                }],
                ..ServiceConfig::default()
            },
        )]);

        let err = registry.register(sql(), &configs).unwrap_err();
        assert_eq!(
            err.to_string(),
            "example-sql custom plan \"small\" is missing required property tier"
        );
        assert!(registry.get_service_by_id(SQL_ID).is_err());
    }

    #[test]
    fn test_catalog_honours_toggles_and_disabled_flag() {
        let mut registry = BrokerRegistry::new(FeatureToggles {
            enable_beta_services: false,
            ..FeatureToggles::default()
        });
        registry.register(storage(), &ServiceConfigMap::new()).unwrap();
        registry.register(sql(), &ServiceConfigMap::new()).unwrap();

        assert_eq!(registry.get_all_services().len(), 2);
        let names: Vec<String> = registry.catalog().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["example-storage"]);

        let mut registry = BrokerRegistry::default();
        let configs = ServiceConfigMap::from([(
            STORAGE_ID.to_string(),
            ServiceConfig {
                disabled: true,
                ..ServiceConfig::default()
            },
        )]);
        registry.register(storage(), &configs).unwrap();
        registry.register(sql(), &ServiceConfigMap::new()).unwrap();
        let names: Vec<String> = registry.catalog().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["example-sql"]);
    }

    #[test]
    fn test_custom_plans_are_resolvable() {
        let mut registry = BrokerRegistry::default();
        let configs = ServiceConfigMap::from([(
            SQL_ID.to_string(),
            ServiceConfig {
                custom_plans: vec![CustomPlan {
                    guid: "1b5c8d3e-8d2c-4f5b-9a0e-6c1d2e3f4a5b".to_string(),
                    name: "small".to_string(),
                    properties: BTreeMap::from([("tier".to_string(), "db-f1-micro".to_string())]),
                    ..CustomPlan::default()
                }],
                ..ServiceConfig::default()
            },
        )]);
        registry.register(sql(), &configs).unwrap();

        let details = ProvisionDetails {
            service_id: SQL_ID.to_string(),
            plan_id: "1b5c8d3e-8d2c-4f5b-9a0e-6c1d2e3f4a5b".to_string(),
            ..ProvisionDetails::default()
        };
        let vars = registry.provision_variables("i-1", &details).unwrap();
        assert_eq!(vars.get_string("tier").unwrap(), "db-f1-micro");
    }

    #[test]
    fn test_unknown_service_and_plan() {
        let mut registry = BrokerRegistry::default();
        registry.register(storage(), &ServiceConfigMap::new()).unwrap();

        let err = registry.get_service_by_id("nope").unwrap_err();
        assert_eq!(err.to_string(), "Unknown service ID: \"nope\"");
        assert!(matches!(
            registry.lookup_plan(STORAGE_ID, "nope"),
            Err(RegistryError::PlanNotFound(_))
        ));
    }

    #[test]
    fn test_resolutions_share_the_registry_counter() {
        let mut registry = BrokerRegistry::default();
        registry.register(storage(), &ServiceConfigMap::new()).unwrap();
        let details = ProvisionDetails {
            service_id: STORAGE_ID.to_string(),
            plan_id: "e1d11f65-da66-46ad-977c-6d56513baf43".to_string(),
            ..ProvisionDetails::default()
        };

        let first = registry.provision_variables("i-1", &details).unwrap();
        let second = registry.provision_variables("i-2", &details).unwrap();
        assert_eq!(first.get_string("name").unwrap(), "bucket-1");
        assert_eq!(second.get_string("name").unwrap(), "bucket-2");
    }
}
