use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::logic::provider::ProviderSettings;
use crate::logic::tracker::TrackerSettings;
use crate::model::{parse_service_config_map, ServiceConfigMap};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub broker: BrokerSettings,
    #[serde(default)]
    pub features: FeatureToggles,
    #[serde(default)]
    pub operations: OperationSettings,
    /// Operator configuration keyed by service id.
    #[serde(default)]
    pub services: ServiceConfigMap,
    /// The same map as a JSON document, for environments where nested keys
    /// are awkward. Entries here win over `services`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_config_json: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerSettings {
    #[serde(default)]
    pub project_id: String,
}

/// Switches consulted when the catalog is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureToggles {
    pub enable_catalog_schemas: bool,
    pub enable_preview_services: bool,
    pub enable_unmaintained_services: bool,
    pub enable_eol_services: bool,
    pub enable_beta_services: bool,
    pub enable_deprecated_services: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            enable_catalog_schemas: false,
            enable_preview_services: true,
            enable_unmaintained_services: false,
            enable_eol_services: false,
            enable_beta_services: true,
            enable_deprecated_services: false,
        }
    }
}

impl FeatureToggles {
    /// Lifecycle tags gate services; other tags never do.
    pub fn tag_enabled(&self, tag: &str) -> bool {
        match tag.to_lowercase().as_str() {
            "preview" => self.enable_preview_services,
            "unmaintained" => self.enable_unmaintained_services,
            "eol" => self.enable_eol_services,
            "beta" => self.enable_beta_services,
            "deprecated" => self.enable_deprecated_services,
            _ => true,
        }
    }

    pub fn service_enabled<'a>(&self, tags: impl IntoIterator<Item = &'a String>) -> bool {
        tags.into_iter().all(|tag| self.tag_enabled(tag))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSettings {
    pub poll_interval_ms: u64,
    /// Zero disables the timeout.
    pub timeout_secs: u64,
    pub done_status: String,
}

impl Default for OperationSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            timeout_secs: 3600,
            done_status: "DONE".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional `broker` file, and
    /// `BROKER__`-prefixed environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        config = config.add_source(config::File::with_name("broker").required(false));

        // e.g. BROKER__FEATURES__ENABLE_CATALOG_SCHEMAS=true
        config = config.add_source(
            config::Environment::with_prefix("BROKER")
                .separator("__")
                .prefix_separator("__")
                .try_parsing(true),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }

    pub fn service_configs(&self) -> anyhow::Result<ServiceConfigMap> {
        let mut configs = self.services.clone();
        if let Some(raw) = &self.service_config_json {
            configs.extend(parse_service_config_map(raw)?);
        }
        Ok(configs)
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        let ops = &self.operations;
        TrackerSettings {
            done_status: ops.done_status.clone(),
            poll_interval: Duration::from_millis(ops.poll_interval_ms),
            timeout: (ops.timeout_secs > 0).then(|| Duration::from_secs(ops.timeout_secs)),
        }
    }

    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            project_id: self.broker.project_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_tags_gate_services() {
        let toggles = FeatureToggles::default();
        let tags = |t: &[&str]| t.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        assert!(toggles.service_enabled(&tags(&["gcp", "preview", "beta"])));
        assert!(!toggles.service_enabled(&tags(&["gcp", "eol"])));
        assert!(!toggles.service_enabled(&tags(&["Deprecated"])));

        let toggles = FeatureToggles {
            enable_eol_services: true,
            ..FeatureToggles::default()
        };
        assert!(toggles.service_enabled(&tags(&["eol"])));
    }

    #[test]
    fn test_tracker_settings_from_operations() {
        let mut config = AppConfig::default();
        config.operations.timeout_secs = 0;
        config.operations.poll_interval_ms = 250;
        config.operations.done_status = "SUCCEEDED".to_string();

        let settings = config.tracker_settings();
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.timeout, None);
        assert_eq!(settings.done_status, "SUCCEEDED");
    }

    #[test]
    fn test_service_config_json_wins() {
        let mut config = AppConfig::default();
        config.services.insert("svc".to_string(), Default::default());
        config.service_config_json = Some(r#"{"svc": {"disabled": true}}"#.to_string());

        let configs = config.service_configs().unwrap();
        assert!(configs["svc"].disabled);
    }
}
