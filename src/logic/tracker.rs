use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::model::{CloudOperation, Id, OperationState, OperationType, ProvisionRequestDetails, ServiceInstanceDetails};
use crate::store::Store;

/// Status of a backend operation as reported by the backend itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationStatusReport {
    pub status: String,
    /// Raw error payload; empty when the operation has not failed.
    pub error: String,
}

impl OperationStatusReport {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            error: String::new(),
        }
    }

    pub fn failed(status: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            error: error.into(),
        }
    }
}

/// Where the tracker asks for the current status of an operation.
///
/// `done_status` is the terminal status the tracker was configured with; a
/// completed operation must report exactly that value.
#[async_trait::async_trait]
pub trait OperationBackend: Send + Sync {
    async fn operation_status(
        &self,
        instance: &ServiceInstanceDetails,
        operation: &CloudOperation,
        done_status: &str,
    ) -> anyhow::Result<OperationStatusReport>;
}

/// Work that must run once after a backend operation completes and before
/// the record is unlocked.
#[async_trait::async_trait]
pub trait FinishingStep: Send + Sync {
    fn requires_finish(&self, operation_type: OperationType) -> bool;

    async fn finish(
        &self,
        instance: &ServiceInstanceDetails,
        request: Option<&ProvisionRequestDetails>,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct TrackerSettings {
    /// Terminal backend status, compared verbatim.
    pub done_status: String,
    pub poll_interval: Duration,
    pub timeout: Option<Duration>,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            done_status: "DONE".to_string(),
            poll_interval: Duration::from_secs(1),
            timeout: Some(Duration::from_secs(3600)),
        }
    }
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("instance {0:?} does not exist")]
    InstanceNotFound(Id),
    #[error("instance {instance_id:?} has a {operation_type} operation in progress")]
    Locked {
        instance_id: Id,
        operation_type: &'static str,
    },
    #[error("instance {0:?} already exists")]
    AlreadyExists(Id),
    #[error("instance {0:?} was modified concurrently")]
    Conflict(Id),
    #[error("no operation recorded for locked instance {0:?}")]
    MissingOperation(Id),
    #[error(transparent)]
    Backend(anyhow::Error),
    #[error(transparent)]
    Finish(anyhow::Error),
    #[error(transparent)]
    Store(anyhow::Error),
    #[error("stopped waiting on instance {0:?}")]
    Cancelled(Id),
    #[error("timed out after {timeout:?} waiting on instance {instance_id:?}")]
    TimedOut { instance_id: Id, timeout: Duration },
    #[error("background poll task failed: {0}")]
    Task(String),
}

/// Result of one poll.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    /// Classification of the latest snapshot.
    pub state: OperationState,
    /// The operation that was tracked, if the record was locked when polled.
    pub operation_type: Option<OperationType>,
    /// Whether the record is still locked after the poll.
    pub locked: bool,
    pub error: String,
}

/// Drives records through None → Pending → Done | Failed → None, persisting
/// the latest backend snapshot for each instance.
pub struct OperationTracker<S: Store + 'static> {
    store: Arc<S>,
    settings: TrackerSettings,
}

impl<S: Store + 'static> Clone for OperationTracker<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<S: Store + 'static> OperationTracker<S> {
    pub fn new(store: Arc<S>, settings: TrackerSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    /// Callers check this before mutating a record.
    pub fn ensure_unlocked(instance: &ServiceInstanceDetails) -> Result<(), TrackerError> {
        match instance.operation_type {
            Some(operation_type) => Err(TrackerError::Locked {
                instance_id: instance.id.clone(),
                operation_type: operation_type.as_str(),
            }),
            None => Ok(()),
        }
    }

    pub fn classify(&self, operation: Option<&CloudOperation>) -> OperationState {
        match operation {
            None => OperationState::None,
            Some(op) if op.status == self.settings.done_status && op.error.is_empty() => OperationState::Done,
            Some(op) if op.status == self.settings.done_status => OperationState::Failed,
            Some(_) => OperationState::Pending,
        }
    }

    /// Stores a new record already locked and records its first snapshot.
    /// Fails with `AlreadyExists` when the id is taken.
    pub async fn track_new(
        &self,
        mut instance: ServiceInstanceDetails,
        operation_type: OperationType,
        operation: CloudOperation,
    ) -> Result<ServiceInstanceDetails, TrackerError> {
        instance.begin_operation(operation_type, operation.name.clone());
        let instance_id = instance.id.clone();
        let saved = self
            .store
            .create_instance(instance)
            .await
            .map_err(TrackerError::Store)?
            .ok_or(TrackerError::AlreadyExists(instance_id))?;
        self.store
            .save_operation(&saved.id, operation)
            .await
            .map_err(TrackerError::Store)?;
        log::info!("tracking {} operation on new instance {}", operation_type.as_str(), saved.id);
        Ok(saved)
    }

    /// Locks an existing record for a new operation.
    pub async fn start(
        &self,
        instance_id: &Id,
        operation_type: OperationType,
        operation: CloudOperation,
    ) -> Result<ServiceInstanceDetails, TrackerError> {
        let mut instance = self.load(instance_id).await?;
        Self::ensure_unlocked(&instance)?;

        instance.begin_operation(operation_type, operation.name.clone());
        let saved = self
            .store
            .compare_and_save_instance(instance)
            .await
            .map_err(TrackerError::Store)?
            .ok_or_else(|| TrackerError::Conflict(instance_id.clone()))?;
        self.store
            .save_operation(instance_id, operation)
            .await
            .map_err(TrackerError::Store)?;
        log::info!("tracking {} operation on instance {}", operation_type.as_str(), instance_id);
        Ok(saved)
    }

    /// Current state without contacting the backend.
    pub async fn state(&self, instance_id: &Id) -> Result<OperationState, TrackerError> {
        let instance = self.load(instance_id).await?;
        if !instance.is_locked() {
            return Ok(OperationState::None);
        }
        let operation = self.snapshot(instance_id).await?;
        match self.classify(operation.as_ref()) {
            OperationState::None => Err(TrackerError::MissingOperation(instance_id.clone())),
            state => Ok(state),
        }
    }

    pub async fn snapshot(&self, instance_id: &Id) -> Result<Option<CloudOperation>, TrackerError> {
        self.store.get_operation(instance_id).await.map_err(TrackerError::Store)
    }

    /// Refreshes the snapshot from the backend and finalizes the record when
    /// the operation reached its terminal status.
    pub async fn poll(
        &self,
        instance_id: &Id,
        backend: &dyn OperationBackend,
        finisher: &dyn FinishingStep,
    ) -> Result<PollOutcome, TrackerError> {
        let instance = self.load(instance_id).await?;
        let snapshot = self.snapshot(instance_id).await?;

        let Some(operation_type) = instance.operation_type else {
            return Ok(PollOutcome {
                state: self.classify(snapshot.as_ref()),
                operation_type: None,
                locked: false,
                error: snapshot.map(|op| op.error).unwrap_or_default(),
            });
        };
        let mut operation = snapshot.ok_or_else(|| TrackerError::MissingOperation(instance_id.clone()))?;

        if self.classify(Some(&operation)) == OperationState::Pending {
            let report = backend
                .operation_status(&instance, &operation, &self.settings.done_status)
                .await
                .map_err(TrackerError::Backend)?;
            if report.status != operation.status || report.error != operation.error {
                log::debug!(
                    "instance {} operation {} moved from {} to {}",
                    instance_id,
                    operation.name,
                    operation.status,
                    report.status
                );
                operation.status = report.status;
                operation.error = report.error;
                self.store
                    .save_operation(instance_id, operation.clone())
                    .await
                    .map_err(TrackerError::Store)?;
            }
        }

        let state = self.classify(Some(&operation));
        match state {
            OperationState::Pending | OperationState::None => {
                return Ok(PollOutcome {
                    state,
                    operation_type: Some(operation_type),
                    locked: true,
                    error: operation.error,
                });
            }
            OperationState::Failed => {
                log::warn!(
                    "{} operation on instance {} failed: {}",
                    operation_type.as_str(),
                    instance_id,
                    operation.error
                );
            }
            OperationState::Done => {
                if finisher.requires_finish(operation_type) {
                    let request = self
                        .store
                        .get_provision_request(instance_id)
                        .await
                        .map_err(TrackerError::Store)?;
                    finisher
                        .finish(&instance, request.as_ref())
                        .await
                        .map_err(TrackerError::Finish)?;
                }
                log::info!("{} operation on instance {} completed", operation_type.as_str(), instance_id);
            }
        }

        self.unlock(instance).await?;
        Ok(PollOutcome {
            state,
            operation_type: Some(operation_type),
            locked: false,
            error: operation.error,
        })
    }

    /// Polls until the record is unlocked, the timeout elapses, or `cancel`
    /// flips to true.
    pub async fn wait(
        &self,
        instance_id: &Id,
        backend: &dyn OperationBackend,
        finisher: &dyn FinishingStep,
        cancel: watch::Receiver<bool>,
    ) -> Result<PollOutcome, TrackerError> {
        let polling = self.poll_until_settled(instance_id, backend, finisher, cancel);
        match self.settings.timeout {
            Some(timeout) => tokio::time::timeout(timeout, polling)
                .await
                .map_err(|_| TrackerError::TimedOut {
                    instance_id: instance_id.clone(),
                    timeout,
                })?,
            None => polling.await,
        }
    }

    pub fn spawn_wait(
        &self,
        instance_id: Id,
        backend: Arc<dyn OperationBackend>,
        finisher: Arc<dyn FinishingStep>,
    ) -> PollHandle<PollOutcome> {
        let tracker = self.clone();
        PollHandle::spawn(move |cancel| async move {
            tracker
                .wait(&instance_id, backend.as_ref(), finisher.as_ref(), cancel)
                .await
        })
    }

    async fn poll_until_settled(
        &self,
        instance_id: &Id,
        backend: &dyn OperationBackend,
        finisher: &dyn FinishingStep,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<PollOutcome, TrackerError> {
        loop {
            if *cancel.borrow() {
                return Err(TrackerError::Cancelled(instance_id.clone()));
            }

            let outcome = self.poll(instance_id, backend, finisher).await?;
            if !outcome.locked {
                return Ok(outcome);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                changed = cancel.changed() => {
                    // a dropped sender counts as cancellation
                    if changed.is_err() || *cancel.borrow() {
                        return Err(TrackerError::Cancelled(instance_id.clone()));
                    }
                }
            }
        }
    }

    async fn unlock(&self, mut instance: ServiceInstanceDetails) -> Result<ServiceInstanceDetails, TrackerError> {
        let id = instance.id.clone();
        instance.clear_operation();
        self.store
            .compare_and_save_instance(instance)
            .await
            .map_err(TrackerError::Store)?
            .ok_or(TrackerError::Conflict(id))
    }

    async fn load(&self, instance_id: &Id) -> Result<ServiceInstanceDetails, TrackerError> {
        self.store
            .get_instance(instance_id)
            .await
            .map_err(TrackerError::Store)?
            .ok_or_else(|| TrackerError::InstanceNotFound(instance_id.clone()))
    }
}

/// A background task that can be told to stop.
pub struct PollHandle<T, E = TrackerError> {
    cancel: watch::Sender<bool>,
    task: JoinHandle<Result<T, E>>,
}

impl<T, E> PollHandle<T, E>
where
    T: Send + 'static,
    E: From<TrackerError> + Send + 'static,
{
    pub fn spawn<F, Fut>(start: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (cancel, receiver) = watch::channel(false);
        Self {
            cancel,
            task: tokio::spawn(start(receiver)),
        }
    }

    pub fn cancel(&self) {
        // the task may already be gone
        let _ = self.cancel.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> Result<T, E> {
        let Self { cancel, task } = self;
        let joined = task.await;
        drop(cancel);
        joined.map_err(|e| E::from(TrackerError::Task(e.to_string())))?
    }
}
