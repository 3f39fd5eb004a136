use std::sync::Arc;

use async_trait::async_trait;
use cirrus_engine::object::{ManagedObject, ObjectSpec, ResourceKind};
use cirrus_engine::reconcile::{Actuator, Convergence, ObservedState, ReconcileError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{converge_tags, delete_resource, observe_resource, observed_state, resource_spec};
use crate::cloud::{CloudApi, CloudQuery};

pub const RESOURCE_TYPE: &str = "security-groups";

pub struct SecurityGroupKind;

impl ResourceKind for SecurityGroupKind {
    const KIND: &'static str = "security-group";
    const FINALIZER: &'static str = "cirrus.dev/security-group";
    type Resource = SecurityGroupSpec;
    type Filter = SecurityGroupFilter;
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupSpec {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupFilter {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

pub struct SecurityGroupActuator {
    cloud: Arc<dyn CloudApi>,
}

impl SecurityGroupActuator {
    pub fn new(cloud: Arc<dyn CloudApi>) -> Self {
        Self { cloud }
    }
}

#[async_trait]
impl Actuator for SecurityGroupActuator {
    type Kind = SecurityGroupKind;

    async fn observe(
        &self,
        obj: &ManagedObject<SecurityGroupKind>,
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
        obj: &ManagedObject<SecurityGroupKind>,
    ) -> Result<ObservedState, ReconcileError> {
        let spec = resource_spec(obj)?;
        let mut payload = serde_json::Map::new();
        if let Some(description) = &spec.description {
            payload.insert("description".to_string(), json!(description));
        }
        let created = self
            .cloud
            .create(RESOURCE_TYPE, &obj.meta.name, Value::Object(payload), &spec.tags)
            .await?;
        Ok(observed_state(&created))
    }

    async fn converge(
        &self,
        obj: &ManagedObject<SecurityGroupKind>,
        observed: &ObservedState,
    ) -> Result<Convergence, ReconcileError> {
        match &obj.spec {
            ObjectSpec::Import(_) => Ok(Convergence::Converged),
            ObjectSpec::Resource(spec) => {
                converge_tags(&self.cloud, RESOURCE_TYPE, observed, &spec.tags).await
            }
        }
    }

    async fn delete(&self, obj: &ManagedObject<SecurityGroupKind>) -> Result<(), ReconcileError> {
        if matches!(obj.spec, ObjectSpec::Import(_)) {
            return Ok(());
        }
        delete_resource(&self.cloud, RESOURCE_TYPE, obj.external_id()).await
    }
}
