use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use parking_lot::RwLock;

use crate::model::{CloudOperation, Id, ProvisionRequestDetails, ServiceBindingCredentials, ServiceInstanceDetails};
use crate::store::traits::{BindingStore, InstanceStore, OperationStore, ProvisionRequestStore};

/// In-process store backed by hash maps.
///
/// Locks are never held across an await point.
#[derive(Debug, Default)]
pub struct MemoryStore {
    instances: RwLock<HashMap<Id, ServiceInstanceDetails>>,
    bindings: RwLock<HashMap<Id, ServiceBindingCredentials>>,
    operations: RwLock<HashMap<Id, CloudOperation>>,
    provision_requests: RwLock<HashMap<Id, ProvisionRequestDetails>>,
    operation_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of operation snapshots written so far.
    pub fn operation_writes(&self) -> usize {
        self.operation_writes.load(Ordering::SeqCst)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.read().len()
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.read().len()
    }
}

#[async_trait::async_trait]
impl InstanceStore for MemoryStore {
    async fn get_instance(&self, id: &Id) -> Result<Option<ServiceInstanceDetails>> {
        Ok(self.instances.read().get(id).cloned())
    }

    async fn instance_exists(&self, id: &Id) -> Result<bool> {
        Ok(self.instances.read().contains_key(id))
    }

    async fn create_instance(&self, mut instance: ServiceInstanceDetails) -> Result<Option<ServiceInstanceDetails>> {
        let mut instances = self.instances.write();
        if instances.contains_key(&instance.id) {
            return Ok(None);
        }
        instance.version = 1;
        instances.insert(instance.id.clone(), instance.clone());
        Ok(Some(instance))
    }

    async fn save_instance(&self, mut instance: ServiceInstanceDetails) -> Result<ServiceInstanceDetails> {
        let mut instances = self.instances.write();
        let current = instances.get(&instance.id).map(|stored| stored.version).unwrap_or(0);
        instance.version = current + 1;
        instances.insert(instance.id.clone(), instance.clone());
        Ok(instance)
    }

    async fn compare_and_save_instance(
        &self,
        mut instance: ServiceInstanceDetails,
    ) -> Result<Option<ServiceInstanceDetails>> {
        let mut instances = self.instances.write();
        let current = instances.get(&instance.id).map(|stored| stored.version);
        match current {
            Some(version) if version == instance.version => {
                instance.version = version + 1;
                instances.insert(instance.id.clone(), instance.clone());
                Ok(Some(instance))
            }
            Some(version) => {
                log::debug!(
                    "stale write to instance {}: expected version {}, found {}",
                    instance.id,
                    instance.version,
                    version
                );
                Ok(None)
            }
            None => Err(anyhow::anyhow!("instance {} does not exist", instance.id)),
        }
    }

    async fn delete_instance(&self, id: &Id) -> Result<bool> {
        Ok(self.instances.write().remove(id).is_some())
    }
}

#[async_trait::async_trait]
impl BindingStore for MemoryStore {
    async fn get_binding(&self, binding_id: &Id) -> Result<Option<ServiceBindingCredentials>> {
        Ok(self.bindings.read().get(binding_id).cloned())
    }

    async fn binding_exists(&self, binding_id: &Id) -> Result<bool> {
        Ok(self.bindings.read().contains_key(binding_id))
    }

    async fn save_binding(&self, binding: ServiceBindingCredentials) -> Result<()> {
        self.bindings.write().insert(binding.binding_id.clone(), binding);
        Ok(())
    }

    async fn delete_binding(&self, binding_id: &Id) -> Result<bool> {
        Ok(self.bindings.write().remove(binding_id).is_some())
    }
}

#[async_trait::async_trait]
impl OperationStore for MemoryStore {
    async fn get_operation(&self, instance_id: &Id) -> Result<Option<CloudOperation>> {
        Ok(self.operations.read().get(instance_id).cloned())
    }

    async fn save_operation(&self, instance_id: &Id, operation: CloudOperation) -> Result<()> {
        self.operations.write().insert(instance_id.clone(), operation);
        self.operation_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_operation(&self, instance_id: &Id) -> Result<bool> {
        Ok(self.operations.write().remove(instance_id).is_some())
    }
}

#[async_trait::async_trait]
impl ProvisionRequestStore for MemoryStore {
    async fn get_provision_request(&self, instance_id: &Id) -> Result<Option<ProvisionRequestDetails>> {
        Ok(self.provision_requests.read().get(instance_id).cloned())
    }

    async fn save_provision_request(&self, request: ProvisionRequestDetails) -> Result<()> {
        self.provision_requests
            .write()
            .insert(request.service_instance_id.clone(), request);
        Ok(())
    }

    async fn delete_provision_request(&self, instance_id: &Id) -> Result<bool> {
        Ok(self.provision_requests.write().remove(instance_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_bumps_version() {
        let store = MemoryStore::new();
        let saved = store
            .save_instance(ServiceInstanceDetails::new("i-1", "s", "p"))
            .await
            .unwrap();
        assert_eq!(saved.version, 1);

        let saved = store.save_instance(saved).await.unwrap();
        assert_eq!(saved.version, 2);
        assert!(store.instance_exists(&"i-1".to_string()).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_refuses_taken_id() {
        let store = MemoryStore::new();
        let mut first = ServiceInstanceDetails::new("i-1", "s", "p");
        first.name = "first".to_string();
        let mut second = first.clone();
        second.name = "second".to_string();

        let created = store.create_instance(first).await.unwrap();
        assert_eq!(created.map(|i| i.version), Some(1));
        assert!(store.create_instance(second).await.unwrap().is_none());
        assert_eq!(store.get_instance(&"i-1".to_string()).await.unwrap().unwrap().name, "first");
        assert_eq!(store.instance_count(), 1);
    }

    #[tokio::test]
    async fn test_compare_and_save_rejects_stale_writes() {
        let store = MemoryStore::new();
        let first = store
            .save_instance(ServiceInstanceDetails::new("i-1", "s", "p"))
            .await
            .unwrap();
        let second = first.clone();

        let winner = store.compare_and_save_instance(first).await.unwrap();
        assert_eq!(winner.map(|i| i.version), Some(2));
        assert!(store.compare_and_save_instance(second).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_compare_and_save_requires_existing_record() {
        let store = MemoryStore::new();
        let missing = ServiceInstanceDetails::new("nope", "s", "p");
        assert!(store.compare_and_save_instance(missing).await.is_err());
    }

    #[tokio::test]
    async fn test_operation_writes_are_counted() {
        let store = MemoryStore::new();
        let id = "i-1".to_string();
        store
            .save_operation(&id, CloudOperation::pending("op-1", "CREATE", "i-1"))
            .await
            .unwrap();
        assert_eq!(store.operation_writes(), 1);
        assert_eq!(store.get_operation(&id).await.unwrap().unwrap().name, "op-1");
        assert!(store.delete_operation(&id).await.unwrap());
        assert!(store.get_operation(&id).await.unwrap().is_none());
    }
}
