//! Generic machinery for reconciling declared cloud-resource objects
//! against external state: typed dependency relations with reverse field
//! indexes, reference-counted deletion guards, transition-gated watch
//! routing, a deduplicating work queue, the per-kind reconcile control loop
//! and the convergent tag-set primitive.

pub mod cloud;
pub mod dependency;
pub mod guard;
pub mod object;
pub mod queue;
pub mod reconcile;
pub mod router;
pub mod store;
pub mod tags;

pub use cloud::{CloudError, ErrorClass};
pub use dependency::{Dependency, Readiness, Relation};
pub use object::{
    Condition, ConditionStatus, ConditionType, ManagedObject, ObjectKey, ObjectMeta, ObjectSpec,
    ObjectStatus, ResourceKind, Version,
};
pub use queue::{ReconcileRequest, WorkQueue};
pub use reconcile::{
    Actuator, Controller, ControllerConfig, Convergence, ObservedState, ProgressStatus,
    ReconcileError,
};
pub use store::{Client, MemoryStore, ObjectStore, SetupError, StoreError, WatchEvent};
pub use tags::{TagReplacer, reconcile_tags};

#[cfg(test)]
mod testkit;

#[cfg(test)]
mod dependency_tests;
