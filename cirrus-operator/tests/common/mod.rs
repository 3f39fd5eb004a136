//! Shared harness: full runtime (store, sim cloud, five controllers)
//! running on the test runtime, plus a bounded polling helper.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cirrus_engine::reconcile::ControllerConfig;
use cirrus_engine::store::{Client, MemoryStore, ObjectStore};
use cirrus_operator::cloud::{CloudApi, SimCloud};
use cirrus_operator::kinds::{
    NetworkKind, PortKind, ProjectKind, SecurityGroupKind, SubnetKind,
};
use cirrus_operator::runtime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct Harness {
    pub store: Arc<dyn ObjectStore>,
    pub sim: Arc<SimCloud>,
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

#[allow(dead_code)]
impl Harness {
    pub fn start() -> Self {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        let sim = Arc::new(SimCloud::new());
        let cfg = ControllerConfig {
            workers: 2,
            resync: Duration::from_secs(30),
            deadline: Duration::from_secs(5),
            import_retry: Duration::from_millis(100),
        };
        let cloud: Arc<dyn CloudApi> = sim.clone();
        let built = runtime::build(store.clone(), cloud, cfg).expect("runtime setup");
        let shutdown = CancellationToken::new();
        let handles = built.spawn(&shutdown);
        Self {
            store,
            sim,
            shutdown,
            handles,
        }
    }

    pub fn networks(&self) -> Client<NetworkKind> {
        Client::new(self.store.clone())
    }

    pub fn subnets(&self) -> Client<SubnetKind> {
        Client::new(self.store.clone())
    }

    pub fn ports(&self) -> Client<PortKind> {
        Client::new(self.store.clone())
    }

    pub fn security_groups(&self) -> Client<SecurityGroupKind> {
        Client::new(self.store.clone())
    }

    pub fn projects(&self) -> Client<ProjectKind> {
        Client::new(self.store.clone())
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Poll `check` until it holds, up to ten seconds.
#[allow(dead_code)]
pub async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}
