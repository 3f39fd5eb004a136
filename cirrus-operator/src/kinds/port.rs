//! Ports are the most connected kind: a port references its network, the
//! subnets of its fixed addresses, its security groups and its project, and
//! import filters may additionally pin the network and project.

use std::sync::Arc;

use async_trait::async_trait;
use cirrus_engine::dependency::Dependency;
use cirrus_engine::object::{ManagedObject, ObjectSpec, ResourceKind};
use cirrus_engine::reconcile::{Actuator, Convergence, ObservedState, ReconcileError};
use cirrus_engine::store::ObjectStore;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::network::NetworkKind;
use super::project::ProjectKind;
use super::security_group::SecurityGroupKind;
use super::subnet::SubnetKind;
use super::{
    converge_tags, delete_resource, observe_resource, observed_state, resolve_id, resource_spec,
};
use crate::cloud::{CloudApi, CloudQuery};

pub const RESOURCE_TYPE: &str = "ports";

pub struct PortKind;

impl ResourceKind for PortKind {
    const KIND: &'static str = "port";
    const FINALIZER: &'static str = "cirrus.dev/port";
    type Resource = PortSpec;
    type Filter = PortFilter;
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortSpec {
    pub network_ref: String,
    #[serde(default)]
    pub project_ref: Option<String>,
    #[serde(default)]
    pub security_group_refs: Vec<String>,
    #[serde(default)]
    pub addresses: Vec<PortAddress>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortAddress {
    pub subnet_ref: String,
    #[serde(default)]
    pub ip: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortFilter {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub network_ref: Option<String>,
    #[serde(default)]
    pub project_ref: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn network_refs(port: &ManagedObject<PortKind>) -> Vec<String> {
    match &port.spec {
        ObjectSpec::Resource(spec) => vec![spec.network_ref.clone()],
        ObjectSpec::Import(_) => Vec::new(),
    }
}

fn network_import_refs(port: &ManagedObject<PortKind>) -> Vec<String> {
    match &port.spec {
        ObjectSpec::Resource(_) => Vec::new(),
        ObjectSpec::Import(filter) => filter.network_ref.iter().cloned().collect(),
    }
}

fn subnet_refs(port: &ManagedObject<PortKind>) -> Vec<String> {
    match &port.spec {
        ObjectSpec::Resource(spec) => spec
            .addresses
            .iter()
            .map(|address| address.subnet_ref.clone())
            .collect(),
        ObjectSpec::Import(_) => Vec::new(),
    }
}

fn security_group_refs(port: &ManagedObject<PortKind>) -> Vec<String> {
    match &port.spec {
        ObjectSpec::Resource(spec) => spec.security_group_refs.clone(),
        ObjectSpec::Import(_) => Vec::new(),
    }
}

fn project_refs(port: &ManagedObject<PortKind>) -> Vec<String> {
    match &port.spec {
        ObjectSpec::Resource(spec) => spec.project_ref.iter().cloned().collect(),
        ObjectSpec::Import(_) => Vec::new(),
    }
}

fn project_import_refs(port: &ManagedObject<PortKind>) -> Vec<String> {
    match &port.spec {
        ObjectSpec::Resource(_) => Vec::new(),
        ObjectSpec::Import(filter) => filter.project_ref.iter().cloned().collect(),
    }
}

pub fn network_relation() -> Dependency<PortKind, NetworkKind> {
    Dependency::with_deletion_guard(
        "spec.resource.networkRef",
        network_refs,
        PortKind::FINALIZER,
        "port/spec.resource.networkRef",
    )
}

/// Import filters pin targets for lookup only; they never guard deletion.
pub fn network_import_relation() -> Dependency<PortKind, NetworkKind> {
    Dependency::new("spec.import.filter.networkRef", network_import_refs)
}

pub fn subnet_relation() -> Dependency<PortKind, SubnetKind> {
    Dependency::with_deletion_guard(
        "spec.resource.addresses.subnetRef",
        subnet_refs,
        PortKind::FINALIZER,
        "port/spec.resource.addresses.subnetRef",
    )
}

pub fn security_group_relation() -> Dependency<PortKind, SecurityGroupKind> {
    Dependency::with_deletion_guard(
        "spec.resource.securityGroupRefs",
        security_group_refs,
        PortKind::FINALIZER,
        "port/spec.resource.securityGroupRefs",
    )
}

pub fn project_relation() -> Dependency<PortKind, ProjectKind> {
    Dependency::with_deletion_guard(
        "spec.resource.projectRef",
        project_refs,
        PortKind::FINALIZER,
        "port/spec.resource.projectRef",
    )
}

pub fn project_import_relation() -> Dependency<PortKind, ProjectKind> {
    Dependency::new("spec.import.filter.projectRef", project_import_refs)
}

pub struct PortActuator {
    store: Arc<dyn ObjectStore>,
    cloud: Arc<dyn CloudApi>,
}

impl PortActuator {
    pub fn new(store: Arc<dyn ObjectStore>, cloud: Arc<dyn CloudApi>) -> Self {
        Self { store, cloud }
    }
}

#[async_trait]
impl Actuator for PortActuator {
    type Kind = PortKind;

    async fn observe(
        &self,
        obj: &ManagedObject<PortKind>,
    ) -> Result<Option<ObservedState>, ReconcileError> {
        let query = match &obj.spec {
            ObjectSpec::Resource(_) => CloudQuery::by_name(&obj.meta.name),
            ObjectSpec::Import(filter) => {
                let mut query = CloudQuery {
                    name: filter.name.clone(),
                    tags: filter.tags.clone(),
                    ..CloudQuery::default()
                };
                if let Some(network_ref) = &filter.network_ref {
                    let network_id =
                        resolve_id::<NetworkKind>(&self.store, &obj.meta.namespace, network_ref)
                            .await?;
                    query.fields.insert("networkId".to_string(), json!(network_id));
                }
                if let Some(project_ref) = &filter.project_ref {
                    let project_id =
                        resolve_id::<ProjectKind>(&self.store, &obj.meta.namespace, project_ref)
                            .await?;
                    query.fields.insert("projectId".to_string(), json!(project_id));
                }
                query
            }
        };
        observe_resource(&self.cloud, RESOURCE_TYPE, obj.external_id(), query).await
    }

    async fn create(&self, obj: &ManagedObject<PortKind>) -> Result<ObservedState, ReconcileError> {
        let spec = resource_spec(obj)?;
        let namespace = &obj.meta.namespace;
        let network_id =
            resolve_id::<NetworkKind>(&self.store, namespace, &spec.network_ref).await?;

        let mut fixed_ips = Vec::new();
        for address in &spec.addresses {
            let subnet_id =
                resolve_id::<SubnetKind>(&self.store, namespace, &address.subnet_ref).await?;
            let mut entry = serde_json::Map::new();
            entry.insert("subnetId".to_string(), json!(subnet_id));
            if let Some(ip) = &address.ip {
                entry.insert("ipAddress".to_string(), json!(ip));
            }
            fixed_ips.push(Value::Object(entry));
        }

        let mut security_group_ids = Vec::new();
        for group_ref in &spec.security_group_refs {
            security_group_ids
                .push(resolve_id::<SecurityGroupKind>(&self.store, namespace, group_ref).await?);
        }

        let mut payload = serde_json::Map::new();
        payload.insert("networkId".to_string(), json!(network_id));
        payload.insert("fixedIps".to_string(), Value::Array(fixed_ips));
        payload.insert("securityGroupIds".to_string(), json!(security_group_ids));
        if let Some(project_ref) = &spec.project_ref {
            let project_id =
                resolve_id::<ProjectKind>(&self.store, namespace, project_ref).await?;
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
        obj: &ManagedObject<PortKind>,
        observed: &ObservedState,
    ) -> Result<Convergence, ReconcileError> {
        match &obj.spec {
            ObjectSpec::Import(_) => Ok(Convergence::Converged),
            ObjectSpec::Resource(spec) => {
                converge_tags(&self.cloud, RESOURCE_TYPE, observed, &spec.tags).await
            }
        }
    }

    async fn delete(&self, obj: &ManagedObject<PortKind>) -> Result<(), ReconcileError> {
        if matches!(obj.spec, ObjectSpec::Import(_)) {
            return Ok(());
        }
        delete_resource(&self.cloud, RESOURCE_TYPE, obj.external_id()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource_port() -> ManagedObject<PortKind> {
        ManagedObject::new(
            "default",
            "p1",
            ObjectSpec::Resource(PortSpec {
                network_ref: "net-1".into(),
                project_ref: Some("proj-1".into()),
                security_group_refs: vec!["sg-1".into(), "sg-2".into()],
                addresses: vec![PortAddress {
                    subnet_ref: "sub-1".into(),
                    ip: None,
                }],
                tags: Vec::new(),
            }),
        )
    }

    fn import_port() -> ManagedObject<PortKind> {
        ManagedObject::new(
            "default",
            "p1",
            ObjectSpec::Import(PortFilter {
                name: Some("p1".into()),
                network_ref: Some("net-1".into()),
                project_ref: None,
                tags: Vec::new(),
            }),
        )
    }

    #[test]
    fn resource_and_import_extractors_are_disjoint() {
        let resource = resource_port();
        let import = import_port();

        assert_eq!(network_refs(&resource), vec!["net-1"]);
        assert!(network_refs(&import).is_empty());

        assert!(network_import_refs(&resource).is_empty());
        assert_eq!(network_import_refs(&import), vec!["net-1"]);

        assert_eq!(subnet_refs(&resource), vec!["sub-1"]);
        assert_eq!(security_group_refs(&resource), vec!["sg-1", "sg-2"]);
        assert_eq!(project_refs(&resource), vec!["proj-1"]);
        assert!(project_import_refs(&import).is_empty());
    }

    #[test]
    fn relations_carry_distinct_index_names() {
        use cirrus_engine::dependency::Relation;

        let names = [
            network_relation().index_name(),
            network_import_relation().index_name(),
            subnet_relation().index_name(),
            security_group_relation().index_name(),
            project_relation().index_name(),
            project_import_relation().index_name(),
        ];
        let unique: std::collections::BTreeSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
    }
}
