use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::logic::tracker::{FinishingStep, OperationBackend, OperationStatusReport};
use crate::logic::var_context::VarContext;
use crate::model::{
    CloudOperation, DeprovisionDetails, OperationType, ProvisionRequestDetails, ServiceBindingCredentials,
    ServiceInstanceDetails, Value, ValueMap,
};

/// Settings every provider factory receives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub project_id: String,
}

/// Backend that creates and destroys the real resources behind a service.
#[async_trait::async_trait]
pub trait ServiceProvider: Send + Sync {
    /// Creates the resource. An async provider returns the backend operation
    /// id in `operation_id`.
    async fn provision(&self, vars: &VarContext) -> Result<ServiceInstanceDetails>;

    async fn bind(&self, vars: &VarContext) -> Result<ValueMap>;

    /// Credentials handed to the application; by default the binding
    /// details layered over the instance details.
    async fn build_instance_credentials(
        &self,
        binding: &ValueMap,
        instance: &ServiceInstanceDetails,
    ) -> Result<serde_json::Value> {
        let mut credentials = instance.other_details_map()?;
        credentials.extend(binding.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(Value::Map(credentials).to_json())
    }

    async fn unbind(&self, instance: &ServiceInstanceDetails, binding: &ServiceBindingCredentials) -> Result<()>;

    /// Returns the backend operation id when deprovisioning is asynchronous.
    async fn deprovision(
        &self,
        instance: &ServiceInstanceDetails,
        details: &DeprovisionDetails,
    ) -> Result<Option<String>>;

    /// Whether the pending operation on the instance has completed.
    async fn poll_instance(&self, instance: &ServiceInstanceDetails) -> Result<bool>;

    fn provisions_async(&self) -> bool;

    fn deprovisions_async(&self) -> bool;

    /// Refreshes the stored details after an asynchronous operation.
    async fn update_instance_details(&self, _instance: &mut ServiceInstanceDetails) -> Result<()> {
        Ok(())
    }

    /// Current status of the pending operation. By default a completed
    /// `poll_instance` reports `done_status`, anything else keeps the stored
    /// status.
    async fn operation_status(
        &self,
        instance: &ServiceInstanceDetails,
        operation: &CloudOperation,
        done_status: &str,
    ) -> Result<OperationStatusReport> {
        if self.poll_instance(instance).await? {
            Ok(OperationStatusReport::new(done_status))
        } else {
            Ok(OperationStatusReport::new(operation.status.clone()))
        }
    }

    fn requires_finishing_step(&self, _operation_type: OperationType) -> bool {
        false
    }

    async fn finish_provisioning(
        &self,
        _instance: &ServiceInstanceDetails,
        _request: Option<&ProvisionRequestDetails>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Exposes a provider to the operation tracker.
#[derive(Clone)]
pub struct ProviderOperations(pub Arc<dyn ServiceProvider>);

#[async_trait::async_trait]
impl OperationBackend for ProviderOperations {
    async fn operation_status(
        &self,
        instance: &ServiceInstanceDetails,
        operation: &CloudOperation,
        done_status: &str,
    ) -> Result<OperationStatusReport> {
        self.0.operation_status(instance, operation, done_status).await
    }
}

#[async_trait::async_trait]
impl FinishingStep for ProviderOperations {
    fn requires_finish(&self, operation_type: OperationType) -> bool {
        self.0.requires_finishing_step(operation_type)
    }

    async fn finish(
        &self,
        instance: &ServiceInstanceDetails,
        request: Option<&ProvisionRequestDetails>,
    ) -> Result<()> {
        self.0.finish_provisioning(instance, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubProvider {
        done: AtomicBool,
    }

    #[async_trait::async_trait]
    impl ServiceProvider for StubProvider {
        async fn provision(&self, _: &VarContext) -> Result<ServiceInstanceDetails> {
            Ok(ServiceInstanceDetails::new("", "", ""))
        }

        async fn bind(&self, _: &VarContext) -> Result<ValueMap> {
            Ok(ValueMap::new())
        }

        async fn unbind(&self, _: &ServiceInstanceDetails, _: &ServiceBindingCredentials) -> Result<()> {
            Ok(())
        }

        async fn deprovision(&self, _: &ServiceInstanceDetails, _: &DeprovisionDetails) -> Result<Option<String>> {
            Ok(None)
        }

        async fn poll_instance(&self, _: &ServiceInstanceDetails) -> Result<bool> {
            Ok(self.done.load(Ordering::SeqCst))
        }

        fn provisions_async(&self) -> bool {
            true
        }

        fn deprovisions_async(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_default_credentials_layer_binding_over_instance() {
        let provider = StubProvider {
            done: AtomicBool::new(false),
        };
        let mut instance = ServiceInstanceDetails::new("i-1", "s", "p");
        instance.other_details = r#"{"bucket_name":"b","project":"p1"}"#.to_string();
        let binding = ValueMap::from([("project".to_string(), Value::from("p2"))]);

        let credentials = provider.build_instance_credentials(&binding, &instance).await.unwrap();
        assert_eq!(credentials, json!({"bucket_name": "b", "project": "p2"}));
    }

    #[tokio::test]
    async fn test_default_operation_status_follows_poll_instance() {
        let provider = Arc::new(StubProvider {
            done: AtomicBool::new(false),
        });
        let operations = ProviderOperations(provider.clone());
        let instance = ServiceInstanceDetails::new("i-1", "s", "p");
        let operation = CloudOperation::pending("op-1", "CREATE", "i-1");

        let report = operations.operation_status(&instance, &operation, "DONE").await.unwrap();
        assert_eq!(report.status, "PENDING");

        provider.done.store(true, Ordering::SeqCst);
        let report = operations.operation_status(&instance, &operation, "DONE").await.unwrap();
        assert_eq!(report, OperationStatusReport::new("DONE"));
        let report = operations.operation_status(&instance, &operation, "SUCCEEDED").await.unwrap();
        assert_eq!(report, OperationStatusReport::new("SUCCEEDED"));
        assert!(!operations.requires_finish(OperationType::Provision));
    }

    #[tokio::test]
    async fn test_default_status_completes_under_custom_done_status() {
        use crate::logic::tracker::{OperationTracker, TrackerSettings};
        use crate::model::OperationState;
        use crate::store::{InstanceStore, MemoryStore};

        let store = Arc::new(MemoryStore::new());
        let tracker = OperationTracker::new(
            store.clone(),
            TrackerSettings {
                done_status: "SUCCEEDED".to_string(),
                ..TrackerSettings::default()
            },
        );
        tracker
            .track_new(
                ServiceInstanceDetails::new("i-1", "s", "p"),
                OperationType::Provision,
                CloudOperation::pending("op-1", "CREATE", "i-1"),
            )
            .await
            .unwrap();

        let operations = ProviderOperations(Arc::new(StubProvider {
            done: AtomicBool::new(true),
        }));
        let outcome = tracker.poll(&"i-1".to_string(), &operations, &operations).await.unwrap();
        assert_eq!(outcome.state, OperationState::Done);
        assert!(!outcome.locked);

        let snapshot = tracker.snapshot(&"i-1".to_string()).await.unwrap().unwrap();
        assert_eq!(snapshot.status, "SUCCEEDED");
        assert!(!store.get_instance(&"i-1".to_string()).await.unwrap().unwrap().is_locked());
    }
}
