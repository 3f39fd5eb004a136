//! Generic per-kind reconcile control loop: resolves dependencies, invokes
//! the kind-specific actuator, maintains deletion guards, writes status and
//! classifies failures into retry behavior.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cloud::{CloudError, ErrorClass};
use crate::dependency::{Dependency, Readiness, Relation};
use crate::object::{
    ConditionStatus, ConditionType, ManagedObject, ObjectSpec, ResourceKind, upsert_condition,
};
use crate::queue::{ReconcileRequest, WorkQueue};
use crate::router::{spawn_relation_watch, spawn_resync, spawn_self_watch};
use crate::store::{Client, ObjectStore, SetupError, StoreError, join_setup};

/// Typed outcome of one reconcile attempt; drives requeue behavior.
#[derive(Debug)]
pub enum ProgressStatus {
    /// Desired and external state agree; nothing scheduled.
    Done,
    /// A referenced object is missing or not usable. Re-entry is driven by
    /// the watch router, not by polling.
    WaitingForDependency { target: String, reason: String },
    /// A mutating external call was made; re-reconcile immediately to
    /// observe the fresh state.
    NeedsRefresh,
    /// External-side precondition not met yet (import filter matched
    /// nothing); retried on a fixed, unpenalized delay.
    Pending { reason: String },
    /// Requeued with exponential backoff.
    Transient(ReconcileError),
    /// Recorded in a False condition; no automatic retry until the spec or
    /// a watched dependency changes.
    Terminal(CloudError),
}

#[derive(thiserror::Error, Debug)]
pub enum ReconcileError {
    #[error("cloud api: {0}")]
    Cloud(#[from] CloudError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("waiting for {target}: {reason}")]
    Waiting { target: String, reason: String },
    #[error("reconcile deadline exceeded")]
    DeadlineExceeded,
}

/// External state of the resource as last read from the cloud.
#[derive(Clone, Debug)]
pub struct ObservedState {
    pub id: String,
    pub fields: Value,
}

/// Result of converging mutable attributes of an existing resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Convergence {
    Converged,
    Mutated,
}

/// Kind-specific create/read/delete logic against the external cloud. All
/// operations must be idempotent under retry: `observe` implements
/// create-or-adopt lookup (by stable name for resources, by filter for
/// imports), and `delete` treats "already gone" as success at the caller.
#[async_trait]
pub trait Actuator: Send + Sync + 'static {
    type Kind: ResourceKind;

    /// Locate the external resource: by recorded id first, then by the
    /// stable identifying key (resource) or the import filter.
    async fn observe(
        &self,
        obj: &ManagedObject<Self::Kind>,
    ) -> Result<Option<ObservedState>, ReconcileError>;

    /// Create the external resource. Only called for `Resource` specs after
    /// `observe` found nothing to adopt.
    async fn create(
        &self,
        obj: &ManagedObject<Self::Kind>,
    ) -> Result<ObservedState, ReconcileError>;

    /// Converge mutable attributes (tags and the like) of an existing
    /// resource.
    async fn converge(
        &self,
        obj: &ManagedObject<Self::Kind>,
        observed: &ObservedState,
    ) -> Result<Convergence, ReconcileError>;

    /// Remove the external resource. `CloudError::NotFound` is treated as
    /// success by the controller.
    async fn delete(&self, obj: &ManagedObject<Self::Kind>) -> Result<(), ReconcileError>;
}

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub workers: usize,
    pub resync: Duration,
    pub deadline: Duration,
    pub import_retry: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            resync: Duration::from_secs(300),
            deadline: Duration::from_secs(30),
            import_retry: Duration::from_secs(10),
        }
    }
}

pub struct ControllerBuilder<A: Actuator> {
    store: Arc<dyn ObjectStore>,
    actuator: Arc<A>,
    relations: Vec<Arc<dyn Relation<A::Kind>>>,
    cfg: ControllerConfig,
}

impl<A: Actuator> ControllerBuilder<A> {
    pub fn relation<T: ResourceKind>(mut self, dependency: Dependency<A::Kind, T>) -> Self {
        self.relations.push(Arc::new(dependency));
        self
    }

    pub fn config(mut self, cfg: ControllerConfig) -> Self {
        self.cfg = cfg;
        self
    }

    /// Register all relation indexes. Failures are collected and joined so
    /// one bad relation cannot mask the others.
    pub fn build(self) -> Result<Arc<Controller<A>>, SetupError> {
        let mut errors = Vec::new();
        for relation in &self.relations {
            if let Err(error) = relation.register(self.store.as_ref()) {
                errors.push(error);
            }
        }
        join_setup(errors)?;
        Ok(Arc::new(Controller {
            client: Client::new(self.store.clone()),
            store: self.store,
            actuator: self.actuator,
            relations: self.relations,
            queue: Arc::new(WorkQueue::new()),
            cfg: self.cfg,
        }))
    }
}

pub struct Controller<A: Actuator> {
    store: Arc<dyn ObjectStore>,
    client: Client<A::Kind>,
    actuator: Arc<A>,
    relations: Vec<Arc<dyn Relation<A::Kind>>>,
    queue: Arc<WorkQueue>,
    cfg: ControllerConfig,
}

impl<A: Actuator> Controller<A> {
    pub fn builder(store: Arc<dyn ObjectStore>, actuator: A) -> ControllerBuilder<A> {
        Self::builder_shared(store, Arc::new(actuator))
    }

    /// Like `builder` but keeps the caller's handle on the actuator alive.
    pub fn builder_shared(store: Arc<dyn ObjectStore>, actuator: Arc<A>) -> ControllerBuilder<A> {
        ControllerBuilder {
            store,
            actuator,
            relations: Vec::new(),
            cfg: ControllerConfig::default(),
        }
    }

    pub fn queue(&self) -> Arc<WorkQueue> {
        self.queue.clone()
    }

    /// Spawn the controller's tasks: self watch, one watch per relation,
    /// the resync ticker and the worker pool.
    pub fn spawn(self: &Arc<Self>, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        handles.push(spawn_self_watch::<A::Kind>(
            self.store.clone(),
            self.queue.clone(),
            shutdown.clone(),
        ));
        for relation in &self.relations {
            handles.push(spawn_relation_watch::<A::Kind>(
                relation.clone(),
                self.store.clone(),
                self.queue.clone(),
                shutdown.clone(),
            ));
        }
        handles.push(spawn_resync::<A::Kind>(
            self.store.clone(),
            self.queue.clone(),
            self.cfg.resync,
            shutdown.clone(),
        ));
        for _ in 0..self.cfg.workers.max(1) {
            let controller = self.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let request = tokio::select! {
                        _ = shutdown.cancelled() => return,
                        request = controller.queue.next() => request,
                    };
                    controller.process(request).await;
                }
            }));
        }
        handles
    }

    async fn process(&self, request: ReconcileRequest) {
        let progress =
            match tokio::time::timeout(self.cfg.deadline, self.reconcile_once(&request)).await {
                Ok(progress) => progress,
                Err(_) => ProgressStatus::Transient(ReconcileError::DeadlineExceeded),
            };
        self.queue.done(&request);
        match progress {
            ProgressStatus::Done => {
                debug!(%request, "reconciled");
                self.queue.forget(&request);
            }
            ProgressStatus::NeedsRefresh => {
                self.queue.forget(&request);
                self.queue.add(request);
            }
            ProgressStatus::WaitingForDependency { target, reason } => {
                // Woken by the watch router when the dependency transitions.
                debug!(%request, target, reason, "waiting for dependency");
                self.queue.forget(&request);
            }
            ProgressStatus::Pending { reason } => {
                debug!(%request, reason, "pending");
                self.queue.add_after(request, self.cfg.import_retry);
            }
            ProgressStatus::Transient(error) => {
                let delay = self.queue.backoff(request.clone());
                warn!(%request, %error, ?delay, "transient failure; backing off");
            }
            ProgressStatus::Terminal(error) => {
                warn!(%request, %error, "terminal failure; not retrying");
                self.queue.forget(&request);
            }
        }
    }

    /// One reconcile attempt for a key, usable directly for embedding and
    /// tests. Never runs concurrently for the same key when driven through
    /// the queue.
    pub async fn reconcile_once(&self, request: &ReconcileRequest) -> ProgressStatus {
        match self.reconcile_inner(request).await {
            Ok(progress) => progress,
            Err(ReconcileError::Waiting { target, reason }) => {
                let _ = self
                    .write_condition(
                        request,
                        ConditionStatus::False,
                        ConditionStatus::False,
                        "WaitingForDependency",
                        &format!("{target}: {reason}"),
                    )
                    .await;
                ProgressStatus::WaitingForDependency { target, reason }
            }
            // Conflicts are unpenalized: retry immediately against a fresh
            // read.
            Err(ReconcileError::Store(StoreError::VersionConflict)) => ProgressStatus::NeedsRefresh,
            Err(ReconcileError::Cloud(error)) if error.class() == ErrorClass::Terminal => {
                let _ = self
                    .write_condition(
                        request,
                        ConditionStatus::False,
                        ConditionStatus::False,
                        error.reason(),
                        &error.to_string(),
                    )
                    .await;
                ProgressStatus::Terminal(error)
            }
            Err(error) => ProgressStatus::Transient(error),
        }
    }

    async fn reconcile_inner(
        &self,
        request: &ReconcileRequest,
    ) -> Result<ProgressStatus, ReconcileError> {
        let Some(mut obj) = self.client.get(&request.namespace, &request.name).await? else {
            return Ok(ProgressStatus::Done);
        };

        if obj.meta.deletion_requested.is_some() {
            return self.finalize(request, &obj).await;
        }

        // Own the object before touching external state.
        if !obj.meta.finalizers.contains(A::Kind::FINALIZER) {
            match self
                .client
                .mutate(&request.namespace, &request.name, |o| {
                    o.meta.finalizers.insert(A::Kind::FINALIZER.to_string())
                })
                .await?
            {
                Some(owned) => obj = owned,
                None => return Ok(ProgressStatus::Done),
            }
        }

        // Guards first: referenced targets are protected even while we wait
        // for them to become usable.
        for relation in &self.relations {
            relation.sync_guards(self.store.as_ref(), &obj).await?;
        }

        for relation in &self.relations {
            if let Readiness::Waiting { target, reason } =
                relation.readiness(self.store.as_ref(), &obj).await?
            {
                return Err(ReconcileError::Waiting { target, reason });
            }
        }

        match self.actuator.observe(&obj).await? {
            None => match &obj.spec {
                ObjectSpec::Resource(_) => {
                    let created = self.actuator.create(&obj).await?;
                    info!(%request, id = created.id, "created external resource");
                    self.write_status(
                        request,
                        Some(&created),
                        ConditionStatus::False,
                        ConditionStatus::True,
                        "Creating",
                        "external resource created; awaiting observation",
                    )
                    .await?;
                    Ok(ProgressStatus::NeedsRefresh)
                }
                ObjectSpec::Import(_) => {
                    let reason = "no external resource matches the import filter";
                    self.write_condition(
                        request,
                        ConditionStatus::False,
                        ConditionStatus::False,
                        "ImportPending",
                        reason,
                    )
                    .await?;
                    Ok(ProgressStatus::Pending {
                        reason: reason.to_string(),
                    })
                }
            },
            Some(observed) => match self.actuator.converge(&obj, &observed).await? {
                Convergence::Mutated => {
                    self.write_status(
                        request,
                        Some(&observed),
                        ConditionStatus::False,
                        ConditionStatus::True,
                        "Converging",
                        "converging external state",
                    )
                    .await?;
                    Ok(ProgressStatus::NeedsRefresh)
                }
                Convergence::Converged => {
                    self.write_status(
                        request,
                        Some(&observed),
                        ConditionStatus::True,
                        ConditionStatus::False,
                        "Ready",
                        "external resource is available",
                    )
                    .await?;
                    Ok(ProgressStatus::Done)
                }
            },
        }
    }

    /// Deletion path: blocked while any guard record remains; otherwise
    /// delete externally, release guards held on targets, and drop the own
    /// finalizer so the store can purge.
    async fn finalize(
        &self,
        request: &ReconcileRequest,
        obj: &ManagedObject<A::Kind>,
    ) -> Result<ProgressStatus, ReconcileError> {
        if !obj.meta.guards.is_empty() {
            let holders: Vec<&str> = obj
                .meta
                .guards
                .values()
                .flat_map(|record| record.holders.iter().map(String::as_str))
                .collect();
            return Err(ReconcileError::Waiting {
                target: holders.join(", "),
                reason: "dependents still reference this object".to_string(),
            });
        }

        match self.actuator.delete(obj).await {
            Ok(()) => {}
            // Already gone externally: normal completion.
            Err(ReconcileError::Cloud(CloudError::NotFound)) => {}
            Err(error) => return Err(error),
        }

        for relation in &self.relations {
            relation.release_guards(self.store.as_ref(), obj).await?;
        }

        self.client
            .mutate(&request.namespace, &request.name, |o| {
                o.meta.finalizers.remove(A::Kind::FINALIZER)
            })
            .await?;
        info!(%request, "finalized");
        Ok(ProgressStatus::Done)
    }

    async fn write_condition(
        &self,
        request: &ReconcileRequest,
        available: ConditionStatus,
        progressing: ConditionStatus,
        reason: &str,
        message: &str,
    ) -> Result<(), ReconcileError> {
        self.write_status(request, None, available, progressing, reason, message)
            .await
    }

    /// Single conditional patch per attempt touching status; skipped
    /// entirely when nothing changed so no-op reconciles do not churn the
    /// watch feed. `Available` and `Progressing` move together: Progressing
    /// is True only while an external mutation is in flight.
    async fn write_status(
        &self,
        request: &ReconcileRequest,
        observed: Option<&ObservedState>,
        available: ConditionStatus,
        progressing: ConditionStatus,
        reason: &str,
        message: &str,
    ) -> Result<(), ReconcileError> {
        self.client
            .mutate(&request.namespace, &request.name, |obj| {
                let mut changed = false;
                if let Some(observed) = observed {
                    if obj.status.id.as_deref() != Some(observed.id.as_str()) {
                        obj.status.id = Some(observed.id.clone());
                        changed = true;
                    }
                    if obj.status.observed.as_ref() != Some(&observed.fields) {
                        obj.status.observed = Some(observed.fields.clone());
                        changed = true;
                    }
                }
                changed
                    | upsert_condition(
                        &mut obj.status.conditions,
                        ConditionType::Available,
                        available,
                        reason,
                        message,
                    )
                    | upsert_condition(
                        &mut obj.status.conditions,
                        ConditionType::Progressing,
                        progressing,
                        reason,
                        message,
                    )
            })
            .await?;
        Ok(())
    }
}
