use std::sync::Arc;

use cirrus_engine::store::{MemoryStore, ObjectStore};
use cirrus_operator::cloud::{CloudApi, SimCloud};
use cirrus_operator::config::CirrusConfig;
use cirrus_operator::{init_tracing, runtime};
use envconfig::Envconfig;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");
    let cfg = CirrusConfig::init_from_env()?.apply_profile_defaults();

    let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
    let cloud: Arc<dyn CloudApi> = Arc::new(SimCloud::new());
    let runtime = runtime::build(store, cloud, cfg.controller_config())?;

    let shutdown = CancellationToken::new();
    let handles = runtime.spawn(&shutdown);
    info!(profile = cfg.profile, namespace = cfg.namespace, "cirrus operator running");

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    shutdown.cancel();
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}
