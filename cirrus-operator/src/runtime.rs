//! Assembles the store, the cloud backend and one controller per kind, and
//! runs them under a shared cancellation token.

use std::sync::Arc;

use cirrus_engine::reconcile::{Controller, ControllerConfig};
use cirrus_engine::store::{ObjectStore, SetupError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cloud::CloudApi;
use crate::kinds::{
    NetworkActuator, PortActuator, ProjectActuator, SecurityGroupActuator, SubnetActuator, network,
    port, subnet,
};

pub struct Runtime {
    pub store: Arc<dyn ObjectStore>,
    pub projects: Arc<Controller<ProjectActuator>>,
    pub security_groups: Arc<Controller<SecurityGroupActuator>>,
    pub networks: Arc<Controller<NetworkActuator>>,
    pub subnets: Arc<Controller<SubnetActuator>>,
    pub ports: Arc<Controller<PortActuator>>,
}

pub fn build(
    store: Arc<dyn ObjectStore>,
    cloud: Arc<dyn CloudApi>,
    cfg: ControllerConfig,
) -> Result<Runtime, SetupError> {
    let projects = Controller::builder(store.clone(), ProjectActuator::new(cloud.clone()))
        .config(cfg.clone())
        .build()?;

    let security_groups =
        Controller::builder(store.clone(), SecurityGroupActuator::new(cloud.clone()))
            .config(cfg.clone())
            .build()?;

    let networks = Controller::builder(
        store.clone(),
        NetworkActuator::new(store.clone(), cloud.clone()),
    )
    .relation(network::project_relation())
    .config(cfg.clone())
    .build()?;

    let subnets = Controller::builder(
        store.clone(),
        SubnetActuator::new(store.clone(), cloud.clone()),
    )
    .relation(subnet::network_relation())
    .config(cfg.clone())
    .build()?;

    let ports = Controller::builder(
        store.clone(),
        PortActuator::new(store.clone(), cloud.clone()),
    )
    .relation(port::network_relation())
    .relation(port::network_import_relation())
    .relation(port::subnet_relation())
    .relation(port::security_group_relation())
    .relation(port::project_relation())
    .relation(port::project_import_relation())
    .config(cfg)
    .build()?;

    Ok(Runtime {
        store,
        projects,
        security_groups,
        networks,
        subnets,
        ports,
    })
}

impl Runtime {
    pub fn spawn(&self, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        handles.extend(self.projects.spawn(shutdown));
        handles.extend(self.security_groups.spawn(shutdown));
        handles.extend(self.networks.spawn(shutdown));
        handles.extend(self.subnets.spawn(shutdown));
        handles.extend(self.ports.spawn(shutdown));
        info!(tasks = handles.len(), "controllers started");
        handles
    }
}
