//! Resource kinds managed by the operator and the helpers their actuators
//! share: external-id resolution through the store, observe-by-id-or-query
//! lookup and tag convergence.

pub mod network;
pub mod port;
pub mod project;
pub mod security_group;
pub mod subnet;

use std::sync::Arc;

use cirrus_engine::cloud::CloudError;
use cirrus_engine::object::{ManagedObject, ObjectSpec, ResourceKind};
use cirrus_engine::reconcile::{Convergence, ObservedState, ReconcileError};
use cirrus_engine::store::{Client, ObjectStore};
use cirrus_engine::tags::reconcile_tags;
use serde_json::{Value, json};

use crate::cloud::{CloudApi, CloudQuery};

pub use network::{NetworkActuator, NetworkFilter, NetworkKind, NetworkSpec};
pub use port::{PortActuator, PortAddress, PortFilter, PortKind, PortSpec};
pub use project::{ProjectActuator, ProjectFilter, ProjectKind, ProjectSpec};
pub use security_group::{
    SecurityGroupActuator, SecurityGroupFilter, SecurityGroupKind, SecurityGroupSpec,
};
pub use subnet::{SubnetActuator, SubnetFilter, SubnetKind, SubnetSpec};

/// External id of a referenced object, looked up through the store. The
/// target may not have actuated yet even when the reference resolves, so
/// a missing id surfaces as a wait rather than an error.
pub(crate) async fn resolve_id<K: ResourceKind>(
    store: &Arc<dyn ObjectStore>,
    namespace: &str,
    name: &str,
) -> Result<String, ReconcileError> {
    let client: Client<K> = Client::new(store.clone());
    match client.get(namespace, name).await? {
        Some(obj) => match obj.status.id {
            Some(id) => Ok(id),
            None => Err(ReconcileError::Waiting {
                target: name.to_string(),
                reason: format!("{} has no external id yet", K::KIND),
            }),
        },
        None => Err(ReconcileError::Waiting {
            target: name.to_string(),
            reason: format!("{} does not exist", K::KIND),
        }),
    }
}

pub(crate) fn resource_spec<K: ResourceKind>(
    obj: &ManagedObject<K>,
) -> Result<&K::Resource, ReconcileError> {
    match &obj.spec {
        ObjectSpec::Resource(spec) => Ok(spec),
        ObjectSpec::Import(_) => Err(ReconcileError::Cloud(CloudError::ValidationFailed(
            "import objects carry no resource spec".to_string(),
        ))),
    }
}

/// Flatten a cloud resource into the observed-state form stored in status.
/// Tags are sorted so set-equal external states produce identical status
/// writes.
pub(crate) fn observed_state(resource: &crate::cloud::CloudResource) -> ObservedState {
    let mut fields = match &resource.payload {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    let mut tags = resource.tags.clone();
    tags.sort();
    tags.dedup();
    fields.insert("name".to_string(), json!(resource.name));
    fields.insert("tags".to_string(), json!(tags));
    ObservedState {
        id: resource.id.clone(),
        fields: Value::Object(fields),
    }
}

/// Locate the external resource: by recorded id first, falling back to the
/// query when the id is stale or absent.
pub(crate) async fn observe_resource(
    cloud: &Arc<dyn CloudApi>,
    resource_type: &str,
    id: Option<&str>,
    query: CloudQuery,
) -> Result<Option<ObservedState>, ReconcileError> {
    if let Some(id) = id {
        match cloud.read(resource_type, id).await {
            Ok(resource) => return Ok(Some(observed_state(&resource))),
            Err(CloudError::NotFound) => {}
            Err(error) => return Err(error.into()),
        }
    }
    Ok(cloud
        .find(resource_type, &query)
        .await?
        .map(|resource| observed_state(&resource)))
}

/// Converge the external tag set toward the spec's.
pub(crate) async fn converge_tags(
    cloud: &Arc<dyn CloudApi>,
    resource_type: &str,
    observed: &ObservedState,
    desired: &[String],
) -> Result<Convergence, ReconcileError> {
    let current: Vec<String> = observed
        .fields
        .get("tags")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    Ok(reconcile_tags(
        cloud.as_ref(),
        resource_type,
        &observed.id,
        desired,
        &current,
    )
    .await?)
}

pub(crate) async fn delete_resource(
    cloud: &Arc<dyn CloudApi>,
    resource_type: &str,
    id: Option<&str>,
) -> Result<(), ReconcileError> {
    // Never actuated, nothing to remove.
    let Some(id) = id else { return Ok(()) };
    cloud.delete(resource_type, id).await?;
    Ok(())
}
