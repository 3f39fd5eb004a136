//! Contract for the backing declarative object store: namespaced versioned
//! objects with list+watch and exact-match field indexes. The engine only
//! depends on this trait; `memory` provides the in-process implementation.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::object::{ManagedObject, ObjectKey, ObjectMeta, ResourceKind, Version};

pub mod memory;

pub use memory::MemoryStore;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("object not found")]
    NotFound,
    #[error("object already exists")]
    AlreadyExists,
    #[error("version conflict")]
    VersionConflict,
    #[error("object is marked for deletion; spec is immutable")]
    SpecFrozen,
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Setup-time failure. Registration errors across relations are collected
/// and joined, never short-circuited, so a partial failure cannot silently
/// disable unrelated relations.
#[derive(thiserror::Error, Debug)]
pub enum SetupError {
    #[error("index {name:?} already registered for kind {kind:?}")]
    DuplicateIndex {
        kind: &'static str,
        name: &'static str,
    },
    #[error("{}", fmt_aggregate(.0))]
    Aggregate(Vec<SetupError>),
}

fn fmt_aggregate(errs: &[SetupError]) -> String {
    let msgs: Vec<String> = errs.iter().map(|e| e.to_string()).collect();
    format!("{} setup failures: [{}]", errs.len(), msgs.join("; "))
}

/// Collapse collected setup errors into a single value.
pub fn aggregate(mut errs: Vec<SetupError>) -> SetupError {
    if errs.len() == 1 {
        errs.remove(0)
    } else {
        SetupError::Aggregate(errs)
    }
}

pub fn join_setup(errs: Vec<SetupError>) -> Result<(), SetupError> {
    if errs.is_empty() {
        Ok(())
    } else {
        Err(aggregate(errs))
    }
}

/// An object as stored: raw JSON plus the version token it was read at.
#[derive(Clone, Debug)]
pub struct RawObject {
    pub value: Value,
    pub version: Version,
}

/// Change event carrying before/after snapshots. Routers need the old state
/// to gate on meaningful transitions.
#[derive(Clone, Debug)]
pub enum WatchEvent {
    Applied {
        key: ObjectKey,
        old: Option<RawObject>,
        new: RawObject,
    },
    Deleted {
        key: ObjectKey,
        last: RawObject,
    },
}

impl WatchEvent {
    pub fn key(&self) -> &ObjectKey {
        match self {
            WatchEvent::Applied { key, .. } => key,
            WatchEvent::Deleted { key, .. } => key,
        }
    }
}

pub type IndexExtractor = Arc<dyn Fn(&Value) -> Vec<String> + Send + Sync>;

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn get(&self, key: &ObjectKey) -> Result<Option<RawObject>, StoreError>;
    async fn list(&self, kind: &str) -> Result<Vec<RawObject>, StoreError>;
    /// Exact-match reverse lookup; never a full scan over the population.
    async fn query_index(
        &self,
        kind: &str,
        index: &str,
        value: &str,
    ) -> Result<Vec<RawObject>, StoreError>;
    async fn create(&self, key: ObjectKey, value: Value) -> Result<Version, StoreError>;
    /// Conditional write; fails with `VersionConflict` when `expected` is
    /// stale. Purges the object when it is marked for deletion and the
    /// committed write leaves no finalizers.
    async fn update(
        &self,
        key: &ObjectKey,
        expected: Version,
        value: Value,
    ) -> Result<Version, StoreError>;
    /// Author-side deletion request: stamps the deletion marker, or purges
    /// immediately when no finalizers are held.
    async fn request_deletion(&self, key: &ObjectKey) -> Result<(), StoreError>;
    /// Must be called before any watch subscription that depends on it.
    fn register_index(
        &self,
        kind: &'static str,
        index: &'static str,
        extractor: IndexExtractor,
    ) -> Result<(), SetupError>;
    fn subscribe(&self) -> broadcast::Receiver<WatchEvent>;
}

pub fn raw_meta(value: &Value) -> Result<ObjectMeta, StoreError> {
    let meta = value.get("meta").cloned().unwrap_or(Value::Null);
    Ok(serde_json::from_value(meta)?)
}

/// Typed view over the raw store for one resource kind.
pub struct Client<K: ResourceKind> {
    store: Arc<dyn ObjectStore>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: ResourceKind> Clone for Client<K> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K: ResourceKind> Client<K> {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            _kind: PhantomData,
        }
    }

    fn decode(raw: RawObject) -> Result<ManagedObject<K>, StoreError> {
        let mut obj: ManagedObject<K> = serde_json::from_value(raw.value)?;
        obj.meta.version = raw.version;
        Ok(obj)
    }

    pub async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedObject<K>>, StoreError> {
        let key = ObjectKey::new(K::KIND, namespace, name);
        match self.store.get(&key).await? {
            Some(raw) => Ok(Some(Self::decode(raw)?)),
            None => Ok(None),
        }
    }

    pub async fn list(&self) -> Result<Vec<ManagedObject<K>>, StoreError> {
        let raws = self.store.list(K::KIND).await?;
        raws.into_iter().map(Self::decode).collect()
    }

    pub async fn create(&self, obj: &ManagedObject<K>) -> Result<Version, StoreError> {
        let value = serde_json::to_value(obj)?;
        self.store.create(obj.key(), value).await
    }

    /// Conditional write using the version the object was read at.
    pub async fn update(&self, obj: &ManagedObject<K>) -> Result<Version, StoreError> {
        let value = serde_json::to_value(obj)?;
        self.store.update(&obj.key(), obj.meta.version, value).await
    }

    pub async fn request_deletion(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let key = ObjectKey::new(K::KIND, namespace, name);
        self.store.request_deletion(&key).await
    }

    /// Read-modify-write retried immediately on version conflict. The
    /// closure returns whether it changed anything; an unchanged object is
    /// not written. Returns the final object, or None when it no longer
    /// exists (not an error: mutations against purged objects are moot).
    pub async fn mutate<F>(
        &self,
        namespace: &str,
        name: &str,
        mut f: F,
    ) -> Result<Option<ManagedObject<K>>, StoreError>
    where
        F: FnMut(&mut ManagedObject<K>) -> bool,
    {
        loop {
            let Some(mut obj) = self.get(namespace, name).await? else {
                return Ok(None);
            };
            if !f(&mut obj) {
                return Ok(Some(obj));
            }
            match self.update(&obj).await {
                Ok(version) => {
                    obj.meta.version = version;
                    return Ok(Some(obj));
                }
                Err(StoreError::VersionConflict) => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

/// Kind-agnostic read-modify-write touching only `meta`, used for guard and
/// finalizer patches on targets whose concrete kind the caller does not
/// know. Missing objects are tolerated.
pub async fn mutate_meta<F>(
    store: &dyn ObjectStore,
    key: &ObjectKey,
    mut f: F,
) -> Result<(), StoreError>
where
    F: FnMut(&mut ObjectMeta) -> bool,
{
    loop {
        let Some(raw) = store.get(key).await? else {
            return Ok(());
        };
        let mut meta = raw_meta(&raw.value)?;
        if !f(&mut meta) {
            return Ok(());
        }
        let mut value = raw.value;
        value["meta"] = serde_json::to_value(&meta)?;
        match store.update(key, raw.version, value).await {
            Ok(_) => return Ok(()),
            Err(StoreError::VersionConflict) => continue,
            Err(StoreError::NotFound) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}
