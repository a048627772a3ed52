use std::collections::BTreeMap;

use thiserror::Error;

use crate::logic::builder::{BuildError, ContextBuilder};
use crate::logic::definition::ServiceDefinition;
use crate::logic::evaluate::Evaluator;
use crate::logic::validate::{SchemaValidationError, SchemaValidator};
use crate::logic::var_context::VarContext;
use crate::model::{
    BindDetails, BrokerVariable, DefaultVariable, ProvisionDetails, ServiceInstanceDetails, ServicePlan, Value,
    ValueMap,
};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Validation(#[from] SchemaValidationError),
    #[error("couldn't read instance details: {0}")]
    InstanceDetails(#[from] serde_json::Error),
}

impl ResolveError {
    pub fn is_client_error(&self) -> bool {
        matches!(self, ResolveError::Validation(e) if e.is_client_error())
    }
}

impl ServiceDefinition {
    /// Resolves the variables handed to the provider on provision.
    pub fn provision_variables(
        &self,
        instance_id: &str,
        details: &ProvisionDetails,
        plan: &ServicePlan,
        evaluator: &Evaluator,
    ) -> Result<VarContext, ResolveError> {
        let constants = ValueMap::from([
            ("request.plan_id".to_string(), Value::from(details.plan_id.as_str())),
            ("request.service_id".to_string(), Value::from(details.service_id.as_str())),
            ("request.instance_id".to_string(), Value::from(instance_id)),
            (
                "request.default_labels".to_string(),
                Value::from(default_labels(&details.organization_guid, &details.space_guid, instance_id)),
            ),
        ]);

        let input_defaults = as_defaults(&self.provision_input_variables);

        let vars = ContextBuilder::with_evaluator(evaluator.clone())
            .set_eval_constants(constants)
            .merge_map(&self.operator_config.provision_defaults)
            .merge_json_value(details.raw_parameters.as_ref())
            .merge_map(&plan.provision_overrides)
            .merge_defaults(&input_defaults)
            .merge_string_map(&plan.service_properties)
            .merge_defaults(&self.provision_computed_variables)
            .build()?;

        SchemaValidator::validate_variables(&vars.to_map(), &self.provision_input_variables)?;
        log::debug!("resolved {} provision variables for instance {}", vars.len(), instance_id);
        Ok(vars)
    }

    /// Resolves the variables handed to the provider on bind. Instance facts
    /// come from the persisted record, not the request.
    pub fn bind_variables(
        &self,
        instance: &ServiceInstanceDetails,
        binding_id: &str,
        details: &BindDetails,
        plan: &ServicePlan,
        evaluator: &Evaluator,
    ) -> Result<VarContext, ResolveError> {
        let plan_properties: BTreeMap<String, String> = plan.service_properties.clone();
        let constants = ValueMap::from([
            ("request.binding_id".to_string(), Value::from(binding_id)),
            ("request.instance_id".to_string(), Value::from(instance.id.as_str())),
            ("request.plan_id".to_string(), Value::from(instance.plan_id.as_str())),
            ("request.service_id".to_string(), Value::from(instance.service_id.as_str())),
            (
                "request.app_guid".to_string(),
                Value::from(details.app_guid.clone().unwrap_or_default()),
            ),
            ("request.plan_properties".to_string(), Value::from(plan_properties)),
            ("instance.name".to_string(), Value::from(instance.name.as_str())),
            ("instance.details".to_string(), Value::Map(instance.other_details_map()?)),
        ]);

        let inputs = self.bind_inputs();
        let input_defaults = as_defaults(&inputs);

        let vars = ContextBuilder::with_evaluator(evaluator.clone())
            .set_eval_constants(constants)
            .merge_map(&self.operator_config.bind_defaults)
            .merge_json_value(details.raw_parameters.as_ref())
            .merge_map(&plan.bind_overrides)
            .merge_defaults(&input_defaults)
            .merge_defaults(&self.bind_computed_variables)
            .build()?;

        SchemaValidator::validate_variables(&vars.to_map(), &inputs)?;
        log::debug!("resolved {} bind variables for binding {}", vars.len(), binding_id);
        Ok(vars)
    }

    /// Declared bind inputs plus the role whitelist field when one applies.
    pub fn bind_inputs(&self) -> Vec<BrokerVariable> {
        let mut inputs = self.bind_input_variables.clone();
        if let Some(role) = self.role_whitelist_variable() {
            if !inputs.iter().any(|var| var.field_name == role.field_name) {
                inputs.push(role);
            }
        }
        inputs
    }
}

fn as_defaults(vars: &[BrokerVariable]) -> Vec<DefaultVariable> {
    vars.iter().map(DefaultVariable::from).collect()
}

/// Labels attached to every provisioned resource, sanitized to the label
/// charset.
pub fn default_labels(organization_guid: &str, space_guid: &str, instance_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("pcf-organization-guid".to_string(), sanitize_label(organization_guid)),
        ("pcf-space-guid".to_string(), sanitize_label(space_guid)),
        ("pcf-instance-id".to_string(), sanitize_label(instance_id)),
    ])
}

fn sanitize_label(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_run = false;
    for c in raw.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    out
}
