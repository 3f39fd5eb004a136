use std::sync::Arc;

use async_trait::async_trait;
use cirrus_engine::dependency::Dependency;
use cirrus_engine::object::{ManagedObject, ObjectSpec, ResourceKind};
use cirrus_engine::reconcile::{Actuator, Convergence, ObservedState, ReconcileError};
use cirrus_engine::store::ObjectStore;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::network::NetworkKind;
use super::{
    converge_tags, delete_resource, observe_resource, observed_state, resolve_id, resource_spec,
};
use crate::cloud::{CloudApi, CloudQuery};

pub const RESOURCE_TYPE: &str = "subnets";

pub struct SubnetKind;

impl ResourceKind for SubnetKind {
    const KIND: &'static str = "subnet";
    const FINALIZER: &'static str = "cirrus.dev/subnet";
    type Resource = SubnetSpec;
    type Filter = SubnetFilter;
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    pub network_ref: String,
    pub cidr: String,
    #[serde(default)]
    pub gateway_ip: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetFilter {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub cidr: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn network_refs(subnet: &ManagedObject<SubnetKind>) -> Vec<String> {
    match &subnet.spec {
        ObjectSpec::Resource(spec) => vec![spec.network_ref.clone()],
        ObjectSpec::Import(_) => Vec::new(),
    }
}

pub fn network_relation() -> Dependency<SubnetKind, NetworkKind> {
    Dependency::with_deletion_guard(
        "spec.resource.networkRef",
        network_refs,
        SubnetKind::FINALIZER,
        "subnet/spec.resource.networkRef",
    )
}

pub struct SubnetActuator {
    store: Arc<dyn ObjectStore>,
    cloud: Arc<dyn CloudApi>,
}

impl SubnetActuator {
    pub fn new(store: Arc<dyn ObjectStore>, cloud: Arc<dyn CloudApi>) -> Self {
        Self { store, cloud }
    }
}

#[async_trait]
impl Actuator for SubnetActuator {
    type Kind = SubnetKind;

    async fn observe(
        &self,
        obj: &ManagedObject<SubnetKind>,
    ) -> Result<Option<ObservedState>, ReconcileError> {
        let query = match &obj.spec {
            ObjectSpec::Resource(_) => CloudQuery::by_name(&obj.meta.name),
            ObjectSpec::Import(filter) => {
                let mut query = CloudQuery {
                    name: filter.name.clone(),
                    tags: filter.tags.clone(),
                    ..CloudQuery::default()
                };
                if let Some(cidr) = &filter.cidr {
                    query.fields.insert("cidr".to_string(), json!(cidr));
                }
                query
            }
        };
        observe_resource(&self.cloud, RESOURCE_TYPE, obj.external_id(), query).await
    }

    async fn create(
        &self,
        obj: &ManagedObject<SubnetKind>,
    ) -> Result<ObservedState, ReconcileError> {
        let spec = resource_spec(obj)?;
        let network_id =
            resolve_id::<NetworkKind>(&self.store, &obj.meta.namespace, &spec.network_ref).await?;
        let mut payload = serde_json::Map::new();
        payload.insert("networkId".to_string(), json!(network_id));
        payload.insert("cidr".to_string(), json!(spec.cidr));
        if let Some(gateway_ip) = &spec.gateway_ip {
            payload.insert("gatewayIp".to_string(), json!(gateway_ip));
        }
        let created = self
            .cloud
            .create(RESOURCE_TYPE, &obj.meta.name, Value::Object(payload), &spec.tags)
            .await?;
        Ok(observed_state(&created))
    }

    async fn converge(
        &self,
        obj: &ManagedObject<SubnetKind>,
        observed: &ObservedState,
    ) -> Result<Convergence, ReconcileError> {
        match &obj.spec {
            ObjectSpec::Import(_) => Ok(Convergence::Converged),
            ObjectSpec::Resource(spec) => {
                converge_tags(&self.cloud, RESOURCE_TYPE, observed, &spec.tags).await
            }
        }
    }

    async fn delete(&self, obj: &ManagedObject<SubnetKind>) -> Result<(), ReconcileError> {
        if matches!(obj.spec, ObjectSpec::Import(_)) {
            return Ok(());
        }
        delete_resource(&self.cloud, RESOURCE_TYPE, obj.external_id()).await
    }
}
