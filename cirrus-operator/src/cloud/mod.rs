//! The single seam between actuators and the remote cloud. Everything the
//! controllers do externally goes through [`CloudApi`]; the simulation
//! backend in [`sim`] implements it for development and tests.

mod sim;

use std::collections::BTreeMap;

use async_trait::async_trait;
use cirrus_engine::CloudError;
use cirrus_engine::tags::TagReplacer;
use serde_json::Value;

pub use sim::SimCloud;

/// External resource as returned by the cloud.
#[derive(Clone, Debug, PartialEq)]
pub struct CloudResource {
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
    pub payload: Value,
}

/// Lookup query for `find`: all present parts must match. `tags` is a
/// required subset, `fields` an exact match against top-level payload keys.
#[derive(Clone, Debug, Default)]
pub struct CloudQuery {
    pub name: Option<String>,
    pub tags: Vec<String>,
    pub fields: BTreeMap<String, Value>,
}

impl CloudQuery {
    pub fn by_name(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }
}

/// Remote cloud operations, already classified into [`CloudError`]
/// categories. Bulk tag replacement comes in through the supertrait so the
/// shared tag convergence routine can drive any backend.
#[async_trait]
pub trait CloudApi: TagReplacer + Send + Sync + 'static {
    async fn create(
        &self,
        resource_type: &str,
        name: &str,
        payload: Value,
        tags: &[String],
    ) -> Result<CloudResource, CloudError>;

    async fn read(&self, resource_type: &str, id: &str) -> Result<CloudResource, CloudError>;

    /// First resource matching the query, if any. Multiple matches resolve
    /// to the oldest so adoption stays deterministic.
    async fn find(
        &self,
        resource_type: &str,
        query: &CloudQuery,
    ) -> Result<Option<CloudResource>, CloudError>;

    async fn delete(&self, resource_type: &str, id: &str) -> Result<(), CloudError>;
}
