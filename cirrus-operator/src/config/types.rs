use std::time::Duration;

use cirrus_engine::ControllerConfig;
use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct CirrusConfig {
    #[envconfig(from = "CIRRUS_PROFILE", default = "dev")]
    pub profile: String,

    #[envconfig(from = "CIRRUS_NAMESPACE", default = "default")]
    pub namespace: String,

    /// Worker tasks per controller (profile default: 2 in dev, 8 in full)
    /// Env: CIRRUS_WORKERS
    #[envconfig(from = "CIRRUS_WORKERS")]
    pub workers: Option<usize>,

    /// Full relist interval (profile default: 60s in dev, 300s in full)
    /// Env: CIRRUS_RESYNC_SECS
    #[envconfig(from = "CIRRUS_RESYNC_SECS")]
    pub resync_secs: Option<u64>,

    #[envconfig(from = "CIRRUS_DEADLINE_SECS", default = "30")]
    pub deadline_secs: u64,

    /// Fixed requeue delay while an import filter matches nothing.
    /// Env: CIRRUS_IMPORT_RETRY_SECS
    #[envconfig(from = "CIRRUS_IMPORT_RETRY_SECS", default = "10")]
    pub import_retry_secs: u64,
}

impl CirrusConfig {
    /// Fill unset fields with the selected profile's defaults. Values set
    /// explicitly through the environment are kept as is.
    pub fn apply_profile_defaults(mut self) -> Self {
        let (def_workers, def_resync) = match self.profile.as_str() {
            "full" | "prod" | "production" => (8, 300),
            _ /* dev */ => (2, 60),
        };
        if self.workers.is_none() {
            self.workers = Some(def_workers);
        }
        if self.resync_secs.is_none() {
            self.resync_secs = Some(def_resync);
        }
        self
    }

    pub fn controller_config(&self) -> ControllerConfig {
        let defaults = ControllerConfig::default();
        ControllerConfig {
            workers: self.workers.unwrap_or(defaults.workers),
            resync: self
                .resync_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.resync),
            deadline: Duration::from_secs(self.deadline_secs),
            import_retry: Duration::from_secs(self.import_retry_secs),
        }
    }
}
