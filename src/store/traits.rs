use crate::model::{CloudOperation, Id, ProvisionRequestDetails, ServiceBindingCredentials, ServiceInstanceDetails};
use anyhow::Result;

#[async_trait::async_trait]
pub trait InstanceStore: Send + Sync {
    async fn get_instance(&self, id: &Id) -> Result<Option<ServiceInstanceDetails>>;
    async fn instance_exists(&self, id: &Id) -> Result<bool>;
    /// Inserts a record whose id is not yet stored. Returns `None`, leaving
    /// the stored record untouched, when the id is already taken.
    async fn create_instance(&self, instance: ServiceInstanceDetails) -> Result<Option<ServiceInstanceDetails>>;
    /// Unconditional upsert. Returns the stored record with its new version.
    async fn save_instance(&self, instance: ServiceInstanceDetails) -> Result<ServiceInstanceDetails>;
    /// Saves only if the stored version still equals `instance.version`.
    /// Returns `None` when another writer got there first.
    async fn compare_and_save_instance(
        &self,
        instance: ServiceInstanceDetails,
    ) -> Result<Option<ServiceInstanceDetails>>;
    async fn delete_instance(&self, id: &Id) -> Result<bool>;
}

#[async_trait::async_trait]
pub trait BindingStore: Send + Sync {
    async fn get_binding(&self, binding_id: &Id) -> Result<Option<ServiceBindingCredentials>>;
    async fn binding_exists(&self, binding_id: &Id) -> Result<bool>;
    async fn save_binding(&self, binding: ServiceBindingCredentials) -> Result<()>;
    async fn delete_binding(&self, binding_id: &Id) -> Result<bool>;
}

/// Latest operation snapshot per instance.
#[async_trait::async_trait]
pub trait OperationStore: Send + Sync {
    async fn get_operation(&self, instance_id: &Id) -> Result<Option<CloudOperation>>;
    async fn save_operation(&self, instance_id: &Id, operation: CloudOperation) -> Result<()>;
    async fn delete_operation(&self, instance_id: &Id) -> Result<bool>;
}

#[async_trait::async_trait]
pub trait ProvisionRequestStore: Send + Sync {
    async fn get_provision_request(&self, instance_id: &Id) -> Result<Option<ProvisionRequestDetails>>;
    async fn save_provision_request(&self, request: ProvisionRequestDetails) -> Result<()>;
    async fn delete_provision_request(&self, instance_id: &Id) -> Result<bool>;
}

pub trait Store: InstanceStore + BindingStore + OperationStore + ProvisionRequestStore + Send + Sync {}

impl<T: InstanceStore + BindingStore + OperationStore + ProvisionRequestStore + Send + Sync> Store for T {}
