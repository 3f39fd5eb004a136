use std::sync::Arc;

use async_trait::async_trait;
use cirrus_engine::dependency::Dependency;
use cirrus_engine::object::{ManagedObject, ObjectSpec, ResourceKind};
use cirrus_engine::reconcile::{Actuator, Convergence, ObservedState, ReconcileError};
use cirrus_engine::store::ObjectStore;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::project::ProjectKind;
use super::{
    converge_tags, delete_resource, observe_resource, observed_state, resolve_id, resource_spec,
};
use crate::cloud::{CloudApi, CloudQuery};

pub const RESOURCE_TYPE: &str = "networks";

pub struct NetworkKind;

impl ResourceKind for NetworkKind {
    const KIND: &'static str = "network";
    const FINALIZER: &'static str = "cirrus.dev/network";
    type Resource = NetworkSpec;
    type Filter = NetworkFilter;
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    #[serde(default)]
    pub project_ref: Option<String>,
    #[serde(default)]
    pub mtu: Option<u32>,
    #[serde(default)]
    pub shared: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkFilter {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn project_refs(network: &ManagedObject<NetworkKind>) -> Vec<String> {
    match &network.spec {
        ObjectSpec::Resource(spec) => spec.project_ref.iter().cloned().collect(),
        ObjectSpec::Import(_) => Vec::new(),
    }
}

pub fn project_relation() -> Dependency<NetworkKind, ProjectKind> {
    Dependency::with_deletion_guard(
        "spec.resource.projectRef",
        project_refs,
        NetworkKind::FINALIZER,
        "network/spec.resource.projectRef",
    )
}

pub struct NetworkActuator {
    store: Arc<dyn ObjectStore>,
    cloud: Arc<dyn CloudApi>,
}

impl NetworkActuator {
    pub fn new(store: Arc<dyn ObjectStore>, cloud: Arc<dyn CloudApi>) -> Self {
        Self { store, cloud }
    }
}

#[async_trait]
impl Actuator for NetworkActuator {
    type Kind = NetworkKind;

    async fn observe(
        &self,
        obj: &ManagedObject<NetworkKind>,
    ) -> Result<Option<ObservedState>, ReconcileError> {
        let query = match &obj.spec {
            ObjectSpec::Resource(_) => CloudQuery::by_name(&obj.meta.name),
            ObjectSpec::Import(filter) => CloudQuery {
                name: filter.name.clone(),
                tags: filter.tags.clone(),
                ..CloudQuery::default()
            },
        };
        observe_resource(&self.cloud, RESOURCE_TYPE, obj.external_id(), query).await
    }

    async fn create(
        &self,
        obj: &ManagedObject<NetworkKind>,
    ) -> Result<ObservedState, ReconcileError> {
        let spec = resource_spec(obj)?;
        let mut payload = serde_json::Map::new();
        if let Some(mtu) = spec.mtu {
            payload.insert("mtu".to_string(), json!(mtu));
        }
        payload.insert("shared".to_string(), json!(spec.shared));
        if let Some(project_ref) = &spec.project_ref {
            let project_id =
                resolve_id::<ProjectKind>(&self.store, &obj.meta.namespace, project_ref).await?;
            payload.insert("projectId".to_string(), json!(project_id));
        }
        let created = self
            .cloud
            .create(RESOURCE_TYPE, &obj.meta.name, Value::Object(payload), &spec.tags)
            .await?;
        Ok(observed_state(&created))
    }

    async fn converge(
        &self,
        obj: &ManagedObject<NetworkKind>,
        observed: &ObservedState,
    ) -> Result<Convergence, ReconcileError> {
        match &obj.spec {
            // Imported resources keep whatever tags they carry externally.
            ObjectSpec::Import(_) => Ok(Convergence::Converged),
            ObjectSpec::Resource(spec) => {
                converge_tags(&self.cloud, RESOURCE_TYPE, observed, &spec.tags).await
            }
        }
    }

    async fn delete(&self, obj: &ManagedObject<NetworkKind>) -> Result<(), ReconcileError> {
        if matches!(obj.spec, ObjectSpec::Import(_)) {
            return Ok(());
        }
        delete_resource(&self.cloud, RESOURCE_TYPE, obj.external_id()).await
    }
}
