use anyhow::Result;
use serde_json::json;

use crate::logic::definition::ServiceDefinition;
use crate::logic::registry::BrokerRegistry;
use crate::model::{BrokerVariable, Constraints, DefaultVariable, JsonType, ServiceConfigMap, ServicePlan};

const IDENTIFIER_TEMPLATE: &str = "pcf-sb-${counter.next()}-${time.nano()}";
const USERNAME_TEMPLATE: &str = "sb${str.truncate(14, time.nano())}";
const PASSWORD_TEMPLATE: &str = "${rand.base64(32)}";

fn identifier_constraints() -> Constraints {
    Constraints {
        pattern: Some("^[a-z][a-z0-9-]+$".to_string()),
        max_length: Some(84),
        ..Constraints::default()
    }
}

/// Service account style bind inputs shared by the built-in services.
fn role_bind_variable(whitelist: &[&str], default: &str) -> BrokerVariable {
    BrokerVariable::new(
        "role",
        JsonType::String,
        "The role for the account without the \"roles/\" prefix.",
    )
    .with_default(json!(default))
    .with_enum(whitelist.iter().map(|role| (role.to_string(), format!("roles/{}", role))))
}

fn service_account_computed_variables() -> Vec<DefaultVariable> {
    vec![
        DefaultVariable::new("service_account_name", json!("${str.truncate(20, \"pcf-binding-${counter.next()}\")}"))
            .overwriting(),
        DefaultVariable::new("service_account_display_name", json!("${service_account_name}")).overwriting(),
    ]
}

pub fn storage_definition() -> ServiceDefinition {
    let whitelist = ["storage.objectCreator", "storage.objectViewer", "storage.objectAdmin"];

    let mut def = ServiceDefinition::new(
        "b9e4332e-b42b-4680-bda5-ea1506797474",
        "google-storage",
        "Unified object storage for developers and enterprises.",
    )
    .with_plan(
        ServicePlan::new("e1d11f65-da66-46ad-977c-6d56513baf43", "standard", "Standard storage class.")
            .with_property("storage_class", "STANDARD"),
    )
    .with_plan(
        ServicePlan::new("a42c1182-d1a0-4d40-82c1-28220518b360", "nearline", "Nearline storage class.")
            .with_property("storage_class", "NEARLINE"),
    )
    .with_plan(
        ServicePlan::new(
            "1a1f4fe6-1904-44d0-838c-4c87a9490a6b",
            "reduced-availability",
            "Durable Reduced Availability storage class.",
        )
        .with_property("storage_class", "DURABLE_REDUCED_AVAILABILITY"),
    );

    def.display_name = "Google Cloud Storage".to_string();
    def.documentation_url = "https://cloud.google.com/storage/docs/overview".to_string();
    def.support_url = "https://cloud.google.com/support/".to_string();
    def.image_url = "https://cloud.google.com/_static/images/cloud/products/logos/svg/storage.svg".to_string();
    def.tags = vec!["gcp".to_string(), "storage".to_string()];
    def.provision_input_variables = vec![
        BrokerVariable::new(
            "name",
            JsonType::String,
            "The name of the bucket. There is a single global namespace shared by all buckets so it MUST be unique.",
        )
        .with_default(json!("pcf_sb_${counter.next()}_${time.nano()}")),
        BrokerVariable::new("location", JsonType::String, "The location of the bucket.").with_default(json!("US")),
    ];
    def.provision_computed_variables =
        vec![DefaultVariable::new("labels", json!("${json.marshal(request.default_labels)}")).overwriting()];
    def.default_role_whitelist = whitelist.iter().map(|role| role.to_string()).collect();
    def.bind_input_variables = vec![role_bind_variable(&whitelist, "storage.objectAdmin")];
    def.bind_output_variables = vec![
        BrokerVariable::new("bucket_name", JsonType::String, "Name of the bucket this binding is for").required(),
    ];
    def.bind_computed_variables = service_account_computed_variables();
    def
}

pub fn cloudsql_mysql_definition() -> ServiceDefinition {
    let whitelist = ["cloudsql.editor", "cloudsql.viewer", "cloudsql.client"];

    let mut def = ServiceDefinition::new(
        "4bc59b9a-8520-409f-85da-1c7552315863",
        "google-cloudsql-mysql",
        "Google Cloud SQL is a fully-managed MySQL database service.",
    )
    .with_plan(
        ServicePlan::new(
            "7d8f9ade-30c1-4c96-b622-ea0205cc5f0b",
            "mysql-db-f1-micro",
            "MySQL on a db-f1-micro (Shared CPUs, 0.6 GB/RAM, 3062 GB/disk, 250 Connections)",
        )
        .with_property("tier", "db-f1-micro")
        .with_property("max_disk_size", "3062"),
    )
    .with_plan(
        ServicePlan::new(
            "bdfd8033-c2b9-46e9-9b37-1f3a5889eef4",
            "mysql-db-n1-standard-1",
            "MySQL on a db-n1-standard-1 (1 CPUs, 3.75 GB/RAM, 10230 GB/disk, 4,000 Connections)",
        )
        .with_property("tier", "db-n1-standard-1")
        .with_property("max_disk_size", "10230"),
    );

    def.display_name = "Google CloudSQL for MySQL".to_string();
    def.documentation_url = "https://cloud.google.com/sql/docs/".to_string();
    def.support_url = "https://cloud.google.com/support/".to_string();
    def.tags = vec!["gcp".to_string(), "cloudsql".to_string(), "mysql".to_string()];
    def.provision_input_variables = vec![
        BrokerVariable::new("instance_name", JsonType::String, "Name of the Cloud SQL instance.")
            .with_default(json!(IDENTIFIER_TEMPLATE))
            .with_constraints(identifier_constraints()),
        BrokerVariable::new("database_name", JsonType::String, "Name of the database inside of the instance.")
            .with_default(json!(IDENTIFIER_TEMPLATE)),
        BrokerVariable::new("version", JsonType::String, "The database engine type and version.").with_enum([
            ("MYSQL_5_5", "MySQL 5.5.X"),
            ("MYSQL_5_6", "MySQL 5.6.X"),
            ("MYSQL_5_7", "MySQL 5.7.X"),
        ]),
        BrokerVariable::new("disk_size", JsonType::String, "In GB (only for 2nd generation instances).")
            .with_default(json!("10"))
            .with_constraints(Constraints {
                pattern: Some("^[1-9][0-9]+$".to_string()),
                max_length: Some(5),
                ..Constraints::default()
            }),
        BrokerVariable::new("activation_policy", JsonType::String, "When the instance is activated.")
            .with_default(json!("ALWAYS"))
            .with_enum([
                ("ALWAYS", "Always, instance is always on."),
                ("NEVER", "Never, instance does not turn on if a request arrives."),
                ("ON_DEMAND", "On Demand, instance responds to incoming requests and turns off when not in use."),
            ]),
    ];
    def.provision_computed_variables = vec![
        DefaultVariable::new("labels", json!("${json.marshal(request.default_labels)}")).overwriting(),
        DefaultVariable::new(
            "instance_name",
            json!(format!("${{instance_name == \"\" ? \"{}\" : instance_name}}", IDENTIFIER_TEMPLATE)),
        )
        .overwriting(),
        DefaultVariable::new(
            "database_name",
            json!(format!("${{database_name == \"\" ? \"{}\" : database_name}}", IDENTIFIER_TEMPLATE)),
        )
        .overwriting(),
        DefaultVariable::new("is_first_gen", json!("${regexp.matches(\"^(d|D)[0-9]+$\", tier)}"))
            .overwriting()
            .typed(JsonType::Boolean),
        DefaultVariable::new("version", json!("${is_first_gen ? \"MYSQL_5_6\" : \"MYSQL_5_7\"}")),
        DefaultVariable::new(
            "_",
            json!("${assert(disk_size <= max_disk_size, \"disk size (${disk_size}) is greater than max allowed disk size for this plan (${max_disk_size})\")}"),
        )
        .overwriting(),
    ];
    def.plan_variables = vec![
        BrokerVariable::new("tier", JsonType::String, "Case-sensitive tier/machine type name.").required(),
        BrokerVariable::new("max_disk_size", JsonType::String, "Maximum disk size in GB.").required(),
    ];
    def.default_role_whitelist = whitelist.iter().map(|role| role.to_string()).collect();
    def.bind_input_variables = vec![
        role_bind_variable(&whitelist, "cloudsql.client"),
        BrokerVariable::new("username", JsonType::String, "The SQL username for the account.")
            .with_default(json!(USERNAME_TEMPLATE)),
        BrokerVariable::new("password", JsonType::String, "The SQL password for the account.")
            .with_default(json!(PASSWORD_TEMPLATE)),
    ];
    def.bind_output_variables = vec![
        BrokerVariable::new("Username", JsonType::String, "The name of the SQL user provisioned.").required(),
        BrokerVariable::new("Password", JsonType::String, "The database password for the SQL user.").required(),
        BrokerVariable::new("uri", JsonType::String, "A database connection string.").required(),
    ];
    let mut bind_computed = service_account_computed_variables();
    bind_computed.extend([
        DefaultVariable::new(
            "password",
            json!(format!("${{password == \"\" ? \"{}\" : password}}", PASSWORD_TEMPLATE)),
        )
        .overwriting(),
        DefaultVariable::new(
            "username",
            json!(format!("${{username == \"\" ? \"{}\" : username}}", USERNAME_TEMPLATE)),
        )
        .overwriting(),
    ]);
    def.bind_computed_variables = bind_computed;
    def
}

pub fn builtin_services() -> Vec<ServiceDefinition> {
    vec![storage_definition(), cloudsql_mysql_definition()]
}

/// Registers every built-in service, stopping at the first one that fails.
pub fn load_builtin_services(registry: &mut BrokerRegistry, configs: &ServiceConfigMap) -> Result<()> {
    for definition in builtin_services() {
        let name = definition.name.clone();
        registry
            .register(definition, configs)
            .map_err(|e| anyhow::anyhow!("couldn't register {}: {}", name, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::evaluate::Evaluator;
    use crate::model::{BindDetails, ProvisionDetails, ServiceInstanceDetails};

    #[test]
    fn test_builtin_services_register() {
        let mut registry = BrokerRegistry::default();
        load_builtin_services(&mut registry, &ServiceConfigMap::new()).unwrap();

        let names: Vec<String> = registry.catalog().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["google-cloudsql-mysql", "google-storage"]);
    }

    #[test]
    fn test_cloudsql_provision_defaults() {
        let def = cloudsql_mysql_definition();
        let plan = def.plans[0].clone();
        let details = ProvisionDetails {
            service_id: def.id.clone(),
            plan_id: plan.id.clone(),
            organization_guid: "org".to_string(),
            space_guid: "space".to_string(),
            raw_parameters: Some(json!({"instance_name": ""})),
        };

        let vars = def
            .provision_variables("i-1", &details, &plan, &Evaluator::new())
            .unwrap();
        assert!(vars.get_string("instance_name").unwrap().starts_with("pcf-sb-"));
        assert!(!vars.get_bool("is_first_gen").unwrap());
        assert_eq!(vars.get_string("version").unwrap(), "MYSQL_5_7");
        assert_eq!(vars.get_string("tier").unwrap(), "db-f1-micro");
    }

    #[test]
    fn test_cloudsql_disk_size_is_bounded_by_plan() {
        let def = cloudsql_mysql_definition();
        let plan = def.plans[0].clone();
        let details = ProvisionDetails {
            service_id: def.id.clone(),
            plan_id: plan.id.clone(),
            raw_parameters: Some(json!({"disk_size": "4000"})),
            ..ProvisionDetails::default()
        };

        let err = def
            .provision_variables("i-1", &details, &plan, &Evaluator::new())
            .unwrap_err();
        assert!(
            err.to_string()
                .contains("Assertion failed: disk size (4000) is greater than max allowed disk size for this plan (3062)"),
            "{}",
            err
        );
    }

    #[test]
    fn test_cloudsql_bind_fills_blank_credentials() {
        let def = cloudsql_mysql_definition();
        let plan = def.plans[0].clone();
        let instance = ServiceInstanceDetails::new("i-1", def.id.clone(), plan.id.clone());
        let details = BindDetails {
            service_id: def.id.clone(),
            plan_id: plan.id.clone(),
            raw_parameters: Some(json!({"username": "", "password": "hunter2"})),
            ..BindDetails::default()
        };

        let vars = def
            .bind_variables(&instance, "b-1", &details, &plan, &Evaluator::new())
            .unwrap();
        let username = vars.get_string("username").unwrap();
        assert!(username.starts_with("sb") && username.len() <= 16, "{}", username);
        assert_eq!(vars.get_string("password").unwrap(), "hunter2");
        assert_eq!(vars.get_string("role").unwrap(), "cloudsql.client");
        assert!(vars.get_string("service_account_name").unwrap().starts_with("pcf-binding-"));
    }
}
