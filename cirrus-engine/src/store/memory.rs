//! In-process implementation of the store contract: versioned JSON objects,
//! maintained reverse indexes, and a broadcast change feed.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::object::ObjectKey;

use super::{
    IndexExtractor, ObjectStore, RawObject, SetupError, StoreError, Version, WatchEvent, raw_meta,
};

const WATCH_CAPACITY: usize = 256;

struct Index {
    extractor: IndexExtractor,
    entries: HashMap<String, BTreeSet<ObjectKey>>,
}

struct Inner {
    objects: HashMap<ObjectKey, RawObject>,
    indexes: HashMap<&'static str, HashMap<&'static str, Index>>,
    next_version: Version,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    tx: broadcast::Sender<WatchEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                objects: HashMap::new(),
                indexes: HashMap::new(),
                next_version: 1,
            }),
            tx,
        }
    }

    fn emit(&self, event: WatchEvent) {
        // No receivers is fine.
        let _ = self.tx.send(event);
    }
}

impl Inner {
    fn reindex(&mut self, key: &ObjectKey, old: Option<&Value>, new: Option<&Value>) {
        let Some(kind_indexes) = self.indexes.get_mut(key.kind) else {
            return;
        };
        for index in kind_indexes.values_mut() {
            if let Some(old) = old {
                for value in (index.extractor)(old) {
                    if let Some(keys) = index.entries.get_mut(&value) {
                        keys.remove(key);
                        if keys.is_empty() {
                            index.entries.remove(&value);
                        }
                    }
                }
            }
            if let Some(new) = new {
                for value in (index.extractor)(new) {
                    index.entries.entry(value).or_default().insert(key.clone());
                }
            }
        }
    }

    fn assign_version(&mut self, value: &mut Value) -> Result<Version, StoreError> {
        let version = self.next_version;
        self.next_version += 1;
        let mut meta = raw_meta(value)?;
        meta.version = version;
        value["meta"] = serde_json::to_value(&meta)?;
        Ok(version)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<RawObject>, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner.objects.get(key).cloned())
    }

    async fn list(&self, kind: &str) -> Result<Vec<RawObject>, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner
            .objects
            .iter()
            .filter(|(k, _)| k.kind == kind)
            .map(|(_, raw)| raw.clone())
            .collect())
    }

    async fn query_index(
        &self,
        kind: &str,
        index: &str,
        value: &str,
    ) -> Result<Vec<RawObject>, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        let keys = inner
            .indexes
            .get(kind)
            .and_then(|m| m.get(index))
            .and_then(|i| i.entries.get(value))
            .cloned()
            .unwrap_or_default();
        Ok(keys
            .iter()
            .filter_map(|k| inner.objects.get(k).cloned())
            .collect())
    }

    async fn create(&self, key: ObjectKey, mut value: Value) -> Result<Version, StoreError> {
        let (event, version) = {
            let mut inner = self.inner.lock().expect("store lock poisoned");
            if inner.objects.contains_key(&key) {
                return Err(StoreError::AlreadyExists);
            }
            let version = inner.assign_version(&mut value)?;
            let mut meta = raw_meta(&value)?;
            if meta.generation == 0 {
                meta.generation = 1;
                value["meta"] = serde_json::to_value(&meta)?;
            }
            let raw = RawObject { value, version };
            inner.reindex(&key, None, Some(&raw.value));
            inner.objects.insert(key.clone(), raw.clone());
            (
                WatchEvent::Applied {
                    key,
                    old: None,
                    new: raw,
                },
                version,
            )
        };
        self.emit(event);
        Ok(version)
    }

    async fn update(
        &self,
        key: &ObjectKey,
        expected: Version,
        mut value: Value,
    ) -> Result<Version, StoreError> {
        let (event, version) = {
            let mut inner = self.inner.lock().expect("store lock poisoned");
            let Some(existing) = inner.objects.get(key).cloned() else {
                return Err(StoreError::NotFound);
            };
            if existing.version != expected {
                return Err(StoreError::VersionConflict);
            }
            let old_meta = raw_meta(&existing.value)?;
            let mut new_meta = raw_meta(&value)?;

            let old_spec = existing.value.get("spec").cloned().unwrap_or(Value::Null);
            let new_spec = value.get("spec").cloned().unwrap_or(Value::Null);
            let spec_changed = old_spec != new_spec;
            if old_meta.deletion_requested.is_some() {
                if spec_changed {
                    return Err(StoreError::SpecFrozen);
                }
                // The deletion marker is irreversible.
                new_meta.deletion_requested = old_meta.deletion_requested.clone();
            }
            new_meta.generation = if spec_changed {
                old_meta.generation + 1
            } else {
                old_meta.generation
            };
            value["meta"] = serde_json::to_value(&new_meta)?;
            let version = inner.assign_version(&mut value)?;
            let raw = RawObject { value, version };

            if new_meta.deletion_requested.is_some() && new_meta.finalizers.is_empty() {
                inner.reindex(key, Some(&existing.value), None);
                inner.objects.remove(key);
                (
                    WatchEvent::Deleted {
                        key: key.clone(),
                        last: raw,
                    },
                    version,
                )
            } else {
                inner.reindex(key, Some(&existing.value), Some(&raw.value));
                inner.objects.insert(key.clone(), raw.clone());
                (
                    WatchEvent::Applied {
                        key: key.clone(),
                        old: Some(existing),
                        new: raw,
                    },
                    version,
                )
            }
        };
        self.emit(event);
        Ok(version)
    }

    async fn request_deletion(&self, key: &ObjectKey) -> Result<(), StoreError> {
        let event = {
            let mut inner = self.inner.lock().expect("store lock poisoned");
            let Some(existing) = inner.objects.get(key).cloned() else {
                return Err(StoreError::NotFound);
            };
            let mut meta = raw_meta(&existing.value)?;
            if meta.deletion_requested.is_some() {
                return Ok(());
            }
            meta.deletion_requested = Some(chrono::Utc::now().to_rfc3339());
            let mut value = existing.value.clone();
            value["meta"] = serde_json::to_value(&meta)?;
            let version = inner.assign_version(&mut value)?;
            let raw = RawObject { value, version };

            if meta.finalizers.is_empty() {
                inner.reindex(key, Some(&existing.value), None);
                inner.objects.remove(key);
                WatchEvent::Deleted {
                    key: key.clone(),
                    last: raw,
                }
            } else {
                inner.reindex(key, Some(&existing.value), Some(&raw.value));
                inner.objects.insert(key.clone(), raw.clone());
                WatchEvent::Applied {
                    key: key.clone(),
                    old: Some(existing),
                    new: raw,
                }
            }
        };
        self.emit(event);
        Ok(())
    }

    fn register_index(
        &self,
        kind: &'static str,
        index: &'static str,
        extractor: IndexExtractor,
    ) -> Result<(), SetupError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let kind_indexes = inner.indexes.entry(kind).or_default();
        if kind_indexes.contains_key(index) {
            return Err(SetupError::DuplicateIndex { kind, name: index });
        }
        let mut entries: HashMap<String, BTreeSet<ObjectKey>> = HashMap::new();
        // Backfill from objects that already exist.
        let existing: Vec<(ObjectKey, Value)> = inner
            .objects
            .iter()
            .filter(|(k, _)| k.kind == kind)
            .map(|(k, raw)| (k.clone(), raw.value.clone()))
            .collect();
        for (key, value) in existing {
            for v in extractor(&value) {
                entries.entry(v).or_default().insert(key.clone());
            }
        }
        inner
            .indexes
            .entry(kind)
            .or_default()
            .insert(index, Index { extractor, entries });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.tx.subscribe()
    }
}
