//! Typed dependency relations between resource kinds. A relation declares
//! how a source kind references a target kind by name, backs that with a
//! store field index for reverse lookup, and optionally enforces a deletion
//! guard on referenced targets.

use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::guard::{GuardSpec, attach_guard, holds_guard, release_guard};
use crate::object::{
    ManagedObject, ObjectKey, ResourceKind, raw_deletion_requested, raw_is_available,
};
use crate::store::{IndexExtractor, ObjectStore, SetupError, StoreError, mutate_meta, raw_meta};

/// Outcome of resolving one relation's references for a source object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Waiting { target: String, reason: String },
}

/// Object-safe facade the controller uses to drive a relation without
/// knowing its target kind.
#[async_trait]
pub trait Relation<S: ResourceKind>: Send + Sync {
    fn index_name(&self) -> &'static str;
    fn target_kind(&self) -> &'static str;
    /// Install the field index. Called once at setup; failures are collected
    /// by the builder and joined across relations.
    fn register(&self, store: &dyn ObjectStore) -> Result<(), SetupError>;
    /// Resolve each referenced target: missing, deleting or not-Available
    /// targets stop the source's reconcile before any external call.
    async fn readiness(
        &self,
        store: &dyn ObjectStore,
        source: &ManagedObject<S>,
    ) -> Result<Readiness, StoreError>;
    /// Bring guard records in line with the source's current reference set:
    /// attach to newly referenced targets, release from dropped ones.
    async fn sync_guards(
        &self,
        store: &dyn ObjectStore,
        source: &ManagedObject<S>,
    ) -> Result<(), StoreError>;
    /// Release every guard this source holds under the relation. Used when
    /// the source itself is deleted.
    async fn release_guards(
        &self,
        store: &dyn ObjectStore,
        source: &ManagedObject<S>,
    ) -> Result<(), StoreError>;
}

/// Declarative relation from source kind `S` to target kind `T`.
pub struct Dependency<S: ResourceKind, T: ResourceKind> {
    index_name: &'static str,
    extractor: fn(&ManagedObject<S>) -> Vec<String>,
    guard: Option<GuardSpec>,
    _target: PhantomData<fn() -> T>,
}

impl<S: ResourceKind, T: ResourceKind> Dependency<S, T> {
    pub fn new(index_name: &'static str, extractor: fn(&ManagedObject<S>) -> Vec<String>) -> Self {
        Self {
            index_name,
            extractor,
            guard: None,
            _target: PhantomData,
        }
    }

    /// A relation that additionally blocks target deletion while sources
    /// reference it. `owner` must be unique per relation (see `GuardSpec`).
    pub fn with_deletion_guard(
        index_name: &'static str,
        extractor: fn(&ManagedObject<S>) -> Vec<String>,
        finalizer: &'static str,
        owner: &'static str,
    ) -> Self {
        Self {
            index_name,
            extractor,
            guard: Some(GuardSpec { finalizer, owner }),
            _target: PhantomData,
        }
    }

    fn referenced_names(&self, source: &ManagedObject<S>) -> BTreeSet<String> {
        (self.extractor)(source).into_iter().collect()
    }

    fn target_key(&self, source: &ManagedObject<S>, name: &str) -> ObjectKey {
        ObjectKey::new(T::KIND, &source.meta.namespace, name)
    }
}

#[async_trait]
impl<S: ResourceKind, T: ResourceKind> Relation<S> for Dependency<S, T> {
    fn index_name(&self) -> &'static str {
        self.index_name
    }

    fn target_kind(&self) -> &'static str {
        T::KIND
    }

    fn register(&self, store: &dyn ObjectStore) -> Result<(), SetupError> {
        let extract = self.extractor;
        let extractor: IndexExtractor = Arc::new(move |value: &Value| {
            let Ok(source) = serde_json::from_value::<ManagedObject<S>>(value.clone()) else {
                return Vec::new();
            };
            let namespace = source.meta.namespace.clone();
            extract(&source)
                .into_iter()
                .map(|name| format!("{namespace}/{name}"))
                .collect()
        });
        store.register_index(S::KIND, self.index_name, extractor)
    }

    async fn readiness(
        &self,
        store: &dyn ObjectStore,
        source: &ManagedObject<S>,
    ) -> Result<Readiness, StoreError> {
        for name in self.referenced_names(source) {
            let key = self.target_key(source, &name);
            match store.get(&key).await? {
                None => {
                    return Ok(Readiness::Waiting {
                        target: name,
                        reason: format!("{} does not exist", T::KIND),
                    });
                }
                Some(raw) => {
                    if raw_deletion_requested(&raw.value) {
                        return Ok(Readiness::Waiting {
                            target: name,
                            reason: format!("{} is being deleted", T::KIND),
                        });
                    }
                    if !raw_is_available(&raw.value) {
                        return Ok(Readiness::Waiting {
                            target: name,
                            reason: format!("{} is not available", T::KIND),
                        });
                    }
                }
            }
        }
        Ok(Readiness::Ready)
    }

    async fn sync_guards(
        &self,
        store: &dyn ObjectStore,
        source: &ManagedObject<S>,
    ) -> Result<(), StoreError> {
        let Some(guard) = self.guard else {
            return Ok(());
        };
        let holder = source.holder_id();
        let desired = self.referenced_names(source);

        for name in &desired {
            let key = self.target_key(source, name);
            mutate_meta(store, &key, |meta| attach_guard(meta, &guard, &holder)).await?;
        }

        // Sweep targets still holding our record but no longer referenced.
        for raw in store.list(T::KIND).await? {
            let meta = raw_meta(&raw.value)?;
            if meta.namespace != source.meta.namespace {
                continue;
            }
            if holds_guard(&meta, &guard, &holder) && !desired.contains(&meta.name) {
                let key = ObjectKey::new(T::KIND, &meta.namespace, &meta.name);
                mutate_meta(store, &key, |meta| release_guard(meta, &guard, &holder)).await?;
            }
        }
        Ok(())
    }

    async fn release_guards(
        &self,
        store: &dyn ObjectStore,
        source: &ManagedObject<S>,
    ) -> Result<(), StoreError> {
        let Some(guard) = self.guard else {
            return Ok(());
        };
        let holder = source.holder_id();
        for raw in store.list(T::KIND).await? {
            let meta = raw_meta(&raw.value)?;
            if meta.namespace != source.meta.namespace {
                continue;
            }
            if holds_guard(&meta, &guard, &holder) {
                let key = ObjectKey::new(T::KIND, &meta.namespace, &meta.name);
                mutate_meta(store, &key, |meta| release_guard(meta, &guard, &holder)).await?;
            }
        }
        Ok(())
    }
}
