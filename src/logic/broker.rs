use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use crate::logic::provider::{ProviderOperations, ProviderSettings, ServiceProvider};
use crate::logic::registry::{BrokerRegistry, RegistryError};
use crate::logic::resolve::ResolveError;
use crate::logic::tracker::{OperationTracker, PollHandle, PollOutcome, TrackerError, TrackerSettings};
use crate::model::{
    generate_id, BindDetails, Binding, CatalogService, CloudOperation, DeprovisionDetails, DeprovisionServiceSpec, Id,
    LastOperation, LastOperationState, OperationState, OperationType, ProvisionDetails, ProvisionRequestDetails,
    ProvisionedServiceSpec, ServiceBindingCredentials, ServiceInstanceDetails, UnbindDetails, Value,
};
use crate::store::Store;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("instance {0:?} already exists")]
    InstanceAlreadyExists(Id),
    #[error("instance {0:?} does not exist")]
    InstanceDoesNotExist(Id),
    #[error("binding {0:?} already exists")]
    BindingAlreadyExists(Id),
    #[error("binding {0:?} does not exist")]
    BindingDoesNotExist(Id),
    #[error("This service plan requires client support for asynchronous service operations.")]
    AsyncRequired,
    #[error("instance {0:?} has an operation in progress")]
    OperationInProgress(Id),
    #[error("service {0:?} is not bindable")]
    NotBindable(String),
    #[error("no provider registered for service {0:?}")]
    NoProvider(Id),
    #[error("Can't call LastOperation on a synchronous service")]
    SynchronousService,
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Tracker(TrackerError),
    #[error(transparent)]
    Provider(anyhow::Error),
    #[error(transparent)]
    Store(anyhow::Error),
    #[error("couldn't serialize binding details: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<TrackerError> for BrokerError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::Locked { instance_id, .. } => BrokerError::OperationInProgress(instance_id),
            TrackerError::InstanceNotFound(instance_id) => BrokerError::InstanceDoesNotExist(instance_id),
            TrackerError::AlreadyExists(instance_id) => BrokerError::InstanceAlreadyExists(instance_id),
            other => BrokerError::Tracker(other),
        }
    }
}

impl BrokerError {
    /// Whether the request itself was at fault.
    pub fn is_client_error(&self) -> bool {
        match self {
            BrokerError::InstanceAlreadyExists(_)
            | BrokerError::InstanceDoesNotExist(_)
            | BrokerError::BindingAlreadyExists(_)
            | BrokerError::BindingDoesNotExist(_)
            | BrokerError::AsyncRequired
            | BrokerError::OperationInProgress(_)
            | BrokerError::NotBindable(_) => true,
            BrokerError::Registry(e) => matches!(e, RegistryError::UnknownService(_) | RegistryError::PlanNotFound(_)),
            BrokerError::Resolve(e) => e.is_client_error(),
            _ => false,
        }
    }
}

/// Request-level facade tying the registry, providers, store and tracker
/// together.
pub struct ServiceBroker<S: Store + 'static> {
    registry: Arc<BrokerRegistry>,
    store: Arc<S>,
    tracker: OperationTracker<S>,
    providers: HashMap<Id, Arc<dyn ServiceProvider>>,
}

impl<S: Store + 'static> Clone for ServiceBroker<S> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            store: self.store.clone(),
            tracker: self.tracker.clone(),
            providers: self.providers.clone(),
        }
    }
}

impl<S: Store + 'static> ServiceBroker<S> {
    pub fn new(
        registry: BrokerRegistry,
        store: Arc<S>,
        tracker_settings: TrackerSettings,
        provider_settings: &ProviderSettings,
    ) -> Self {
        let providers: HashMap<Id, Arc<dyn ServiceProvider>> = registry
            .get_all_services()
            .into_iter()
            .filter_map(|service| service.provider(provider_settings).map(|p| (service.id.clone(), p)))
            .collect();

        Self {
            tracker: OperationTracker::new(store.clone(), tracker_settings),
            registry: Arc::new(registry),
            store,
            providers,
        }
    }

    pub fn registry(&self) -> &BrokerRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn tracker(&self) -> &OperationTracker<S> {
        &self.tracker
    }

    pub fn services(&self) -> Vec<CatalogService> {
        self.registry.catalog()
    }

    pub async fn provision(
        &self,
        instance_id: &Id,
        details: &ProvisionDetails,
        async_allowed: bool,
    ) -> Result<ProvisionedServiceSpec, BrokerError> {
        log::info!(
            "Provisioning instance {} (service {}, plan {}, async allowed: {})",
            instance_id,
            details.service_id,
            details.plan_id,
            async_allowed
        );

        // early refusal only; the insert below is what settles a race
        if self.store.instance_exists(instance_id).await.map_err(BrokerError::Store)? {
            return Err(BrokerError::InstanceAlreadyExists(instance_id.clone()));
        }

        let (service, plan) = self.registry.lookup_plan(&details.service_id, &details.plan_id)?;
        let provider = self.provider(&service.id)?;

        let provisions_async = provider.provisions_async();
        if provisions_async && !async_allowed {
            return Err(BrokerError::AsyncRequired);
        }

        let vars = service.provision_variables(instance_id, details, &plan, &self.registry.evaluator())?;
        let mut instance = provider.provision(&vars).await.map_err(BrokerError::Provider)?;

        instance.id = instance_id.clone();
        instance.service_id = details.service_id.clone();
        instance.plan_id = details.plan_id.clone();
        instance.space_guid = details.space_guid.clone();
        instance.organization_guid = details.organization_guid.clone();
        let operation_id = instance.operation_id.take();
        instance.clear_operation();

        let operation_data = if provisions_async {
            let name = operation_id.unwrap_or_else(|| instance_id.clone());
            self.tracker
                .track_new(
                    instance,
                    OperationType::Provision,
                    CloudOperation::pending(name.clone(), "CREATE", instance_id.clone()),
                )
                .await?;
            Some(name)
        } else {
            self.store
                .create_instance(instance)
                .await
                .map_err(BrokerError::Store)?
                .ok_or_else(|| BrokerError::InstanceAlreadyExists(instance_id.clone()))?;
            None
        };

        self.store
            .save_provision_request(ProvisionRequestDetails {
                service_instance_id: instance_id.clone(),
                request_details: details
                    .raw_parameters
                    .as_ref()
                    .map(|params| params.to_string())
                    .unwrap_or_default(),
            })
            .await
            .map_err(BrokerError::Store)?;

        Ok(ProvisionedServiceSpec {
            is_async: provisions_async,
            operation_data,
        })
    }

    pub async fn deprovision(
        &self,
        instance_id: &Id,
        details: &DeprovisionDetails,
        async_allowed: bool,
    ) -> Result<DeprovisionServiceSpec, BrokerError> {
        log::info!("Deprovisioning instance {} (async allowed: {})", instance_id, async_allowed);

        let instance = self.instance(instance_id).await?;
        OperationTracker::<S>::ensure_unlocked(&instance)?;

        let provider = self.provider(&instance.service_id)?;
        let deprovisions_async = provider.deprovisions_async();
        if deprovisions_async && !async_allowed {
            return Err(BrokerError::AsyncRequired);
        }

        let operation_id = provider
            .deprovision(&instance, details)
            .await
            .map_err(BrokerError::Provider)?;

        if !deprovisions_async {
            self.forget_instance(instance_id).await?;
            return Ok(DeprovisionServiceSpec {
                is_async: false,
                operation_data: None,
            });
        }

        let name = operation_id.unwrap_or_else(|| instance_id.clone());
        self.tracker
            .start(
                instance_id,
                OperationType::Deprovision,
                CloudOperation::pending(name.clone(), "DELETE", instance_id.clone()),
            )
            .await?;

        Ok(DeprovisionServiceSpec {
            is_async: true,
            operation_data: Some(name),
        })
    }

    pub async fn bind(&self, instance_id: &Id, binding_id: &Id, details: &BindDetails) -> Result<Binding, BrokerError> {
        log::info!("Binding {} to instance {}", binding_id, instance_id);

        if self.store.binding_exists(binding_id).await.map_err(BrokerError::Store)? {
            return Err(BrokerError::BindingAlreadyExists(binding_id.clone()));
        }

        let instance = self.instance(instance_id).await?;
        let (service, plan) = self.registry.lookup_plan(&instance.service_id, &instance.plan_id)?;
        if !service.bindable {
            return Err(BrokerError::NotBindable(service.name.clone()));
        }
        let provider = self.provider(&service.id)?;

        let vars = service.bind_variables(&instance, binding_id, details, &plan, &self.registry.evaluator())?;
        let binding = provider.bind(&vars).await.map_err(BrokerError::Provider)?;

        self.store
            .save_binding(ServiceBindingCredentials {
                id: generate_id(),
                other_details: serde_json::to_string(&Value::Map(binding.clone()))?,
                service_id: instance.service_id.clone(),
                service_instance_id: instance_id.clone(),
                binding_id: binding_id.clone(),
                created_at: Utc::now(),
            })
            .await
            .map_err(BrokerError::Store)?;

        let credentials = provider
            .build_instance_credentials(&binding, &instance)
            .await
            .map_err(BrokerError::Provider)?;
        Ok(Binding { credentials })
    }

    pub async fn unbind(&self, instance_id: &Id, binding_id: &Id, _details: &UnbindDetails) -> Result<(), BrokerError> {
        log::info!("Unbinding {} from instance {}", binding_id, instance_id);

        let binding = self
            .store
            .get_binding(binding_id)
            .await
            .map_err(BrokerError::Store)?
            .filter(|binding| &binding.service_instance_id == instance_id)
            .ok_or_else(|| BrokerError::BindingDoesNotExist(binding_id.clone()))?;
        let instance = self.instance(instance_id).await?;
        let provider = self.provider(&instance.service_id)?;

        provider.unbind(&instance, &binding).await.map_err(BrokerError::Provider)?;
        self.store.delete_binding(binding_id).await.map_err(BrokerError::Store)?;
        Ok(())
    }

    /// Polls the backend once and reports where the latest operation stands.
    pub async fn last_operation(&self, instance_id: &Id) -> Result<LastOperation, BrokerError> {
        let instance = self.instance(instance_id).await?;
        let provider = self.provider(&instance.service_id)?;
        if !provider.provisions_async() && !provider.deprovisions_async() {
            return Err(BrokerError::SynchronousService);
        }

        let operations = ProviderOperations(provider.clone());
        let outcome = self.tracker.poll(instance_id, &operations, &operations).await?;
        self.complete(instance_id, &outcome, provider.as_ref()).await
    }

    /// Waits on the pending operation in the background, applying the same
    /// completion handling as [`last_operation`](Self::last_operation).
    pub async fn watch_operation(&self, instance_id: &Id) -> Result<PollHandle<LastOperation, BrokerError>, BrokerError> {
        let instance = self.instance(instance_id).await?;
        let provider = self.provider(&instance.service_id)?;
        let broker = self.clone();
        let instance_id = instance_id.clone();

        Ok(PollHandle::spawn(move |cancel| async move {
            let operations = ProviderOperations(provider.clone());
            let outcome = broker
                .tracker
                .wait(&instance_id, &operations, &operations, cancel)
                .await?;
            broker.complete(&instance_id, &outcome, provider.as_ref()).await
        }))
    }

    async fn complete(
        &self,
        instance_id: &Id,
        outcome: &PollOutcome,
        provider: &dyn ServiceProvider,
    ) -> Result<LastOperation, BrokerError> {
        match outcome.state {
            OperationState::Pending => return Ok(LastOperation::new(LastOperationState::InProgress, "")),
            OperationState::Failed => return Ok(LastOperation::new(LastOperationState::Failed, outcome.error.clone())),
            OperationState::Done | OperationState::None => {}
        }

        // only the poll that released the lock handles completion
        if outcome.state == OperationState::Done && !outcome.locked {
            match outcome.operation_type {
                Some(OperationType::Deprovision) => self.forget_instance(instance_id).await?,
                Some(OperationType::Provision) | Some(OperationType::Update) => {
                    self.refresh_details(instance_id, provider).await?
                }
                None => {}
            }
        }
        Ok(LastOperation::new(LastOperationState::Succeeded, ""))
    }

    async fn refresh_details(&self, instance_id: &Id, provider: &dyn ServiceProvider) -> Result<(), BrokerError> {
        let mut instance = self.instance(instance_id).await?;
        provider
            .update_instance_details(&mut instance)
            .await
            .map_err(BrokerError::Provider)?;
        self.store
            .compare_and_save_instance(instance)
            .await
            .map_err(BrokerError::Store)?
            .ok_or_else(|| BrokerError::Tracker(TrackerError::Conflict(instance_id.clone())))?;
        Ok(())
    }

    async fn forget_instance(&self, instance_id: &Id) -> Result<(), BrokerError> {
        self.store.delete_instance(instance_id).await.map_err(BrokerError::Store)?;
        self.store.delete_operation(instance_id).await.map_err(BrokerError::Store)?;
        self.store
            .delete_provision_request(instance_id)
            .await
            .map_err(BrokerError::Store)?;
        log::info!("instance {} removed", instance_id);
        Ok(())
    }

    async fn instance(&self, instance_id: &Id) -> Result<ServiceInstanceDetails, BrokerError> {
        self.store
            .get_instance(instance_id)
            .await
            .map_err(BrokerError::Store)?
            .ok_or_else(|| BrokerError::InstanceDoesNotExist(instance_id.clone()))
    }

    fn provider(&self, service_id: &str) -> Result<Arc<dyn ServiceProvider>, BrokerError> {
        self.providers
            .get(service_id)
            .cloned()
            .ok_or_else(|| BrokerError::NoProvider(service_id.to_string()))
    }
}
