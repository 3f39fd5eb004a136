//! In-memory cloud used in development and integration tests. Counts every
//! call per (operation, resource type) and can fail the next call of a kind
//! on demand, so tests can assert exactly how often the controllers touched
//! the external side.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use cirrus_engine::CloudError;
use cirrus_engine::tags::TagReplacer;
use serde_json::Value;
use tracing::debug;

use super::{CloudApi, CloudQuery, CloudResource};

#[derive(Default)]
struct SimState {
    // resource type -> id -> resource; BTreeMap keeps find() deterministic.
    resources: HashMap<String, BTreeMap<String, CloudResource>>,
    next_id: u64,
    calls: HashMap<(String, String), u64>,
    fail_next: HashMap<(String, String), CloudError>,
}

#[derive(Default)]
pub struct SimCloud {
    state: Mutex<SimState>,
}

impl SimCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `op` ("create", "read", "find", "delete",
    /// "replace_tags") was invoked for the resource type.
    pub fn calls(&self, op: &str, resource_type: &str) -> u64 {
        let state = self.state.lock().expect("sim lock poisoned");
        state
            .calls
            .get(&(op.to_string(), resource_type.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Fail the next `op` call for the resource type with `error`.
    pub fn fail_next(&self, op: &str, resource_type: &str, error: CloudError) {
        let mut state = self.state.lock().expect("sim lock poisoned");
        state
            .fail_next
            .insert((op.to_string(), resource_type.to_string()), error);
    }

    /// Insert a resource directly, bypassing counters. Used to stage
    /// pre-existing external state for import tests.
    pub fn seed(&self, resource_type: &str, name: &str, payload: Value, tags: &[String]) -> String {
        let mut state = self.state.lock().expect("sim lock poisoned");
        let id = state.allocate_id();
        let resource = CloudResource {
            id: id.clone(),
            name: name.to_string(),
            tags: tags.to_vec(),
            payload,
        };
        state
            .resources
            .entry(resource_type.to_string())
            .or_default()
            .insert(id.clone(), resource);
        id
    }

    pub fn get(&self, resource_type: &str, id: &str) -> Option<CloudResource> {
        let state = self.state.lock().expect("sim lock poisoned");
        state
            .resources
            .get(resource_type)
            .and_then(|m| m.get(id))
            .cloned()
    }

    fn enter(&self, op: &str, resource_type: &str) -> Result<(), CloudError> {
        let mut state = self.state.lock().expect("sim lock poisoned");
        let key = (op.to_string(), resource_type.to_string());
        *state.calls.entry(key.clone()).or_insert(0) += 1;
        match state.fail_next.remove(&key) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl SimState {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("sim-{:04}", self.next_id)
    }
}

fn matches(resource: &CloudResource, query: &CloudQuery) -> bool {
    if let Some(name) = &query.name {
        if resource.name != *name {
            return false;
        }
    }
    let have: BTreeSet<&str> = resource.tags.iter().map(String::as_str).collect();
    if !query.tags.iter().all(|t| have.contains(t.as_str())) {
        return false;
    }
    query
        .fields
        .iter()
        .all(|(key, want)| resource.payload.get(key) == Some(want))
}

#[async_trait]
impl CloudApi for SimCloud {
    async fn create(
        &self,
        resource_type: &str,
        name: &str,
        payload: Value,
        tags: &[String],
    ) -> Result<CloudResource, CloudError> {
        self.enter("create", resource_type)?;
        let mut state = self.state.lock().expect("sim lock poisoned");
        let id = state.allocate_id();
        let resource = CloudResource {
            id: id.clone(),
            name: name.to_string(),
            tags: tags.to_vec(),
            payload,
        };
        state
            .resources
            .entry(resource_type.to_string())
            .or_default()
            .insert(id, resource.clone());
        debug!(resource_type, name, id = resource.id, "sim create");
        Ok(resource)
    }

    async fn read(&self, resource_type: &str, id: &str) -> Result<CloudResource, CloudError> {
        self.enter("read", resource_type)?;
        self.get(resource_type, id).ok_or(CloudError::NotFound)
    }

    async fn find(
        &self,
        resource_type: &str,
        query: &CloudQuery,
    ) -> Result<Option<CloudResource>, CloudError> {
        self.enter("find", resource_type)?;
        let state = self.state.lock().expect("sim lock poisoned");
        Ok(state
            .resources
            .get(resource_type)
            .and_then(|m| m.values().find(|r| matches(r, query)))
            .cloned())
    }

    async fn delete(&self, resource_type: &str, id: &str) -> Result<(), CloudError> {
        self.enter("delete", resource_type)?;
        let mut state = self.state.lock().expect("sim lock poisoned");
        match state
            .resources
            .get_mut(resource_type)
            .and_then(|m| m.remove(id))
        {
            Some(_) => {
                debug!(resource_type, id, "sim delete");
                Ok(())
            }
            None => Err(CloudError::NotFound),
        }
    }
}

#[async_trait]
impl TagReplacer for SimCloud {
    async fn replace_all_tags(
        &self,
        resource_type: &str,
        resource_id: &str,
        tags: &[String],
    ) -> Result<(), CloudError> {
        self.enter("replace_tags", resource_type)?;
        let mut state = self.state.lock().expect("sim lock poisoned");
        match state
            .resources
            .get_mut(resource_type)
            .and_then(|m| m.get_mut(resource_id))
        {
            Some(resource) => {
                resource.tags = tags.to_vec();
                Ok(())
            }
            None => Err(CloudError::NotFound),
        }
    }
}
