//! Routing of store change events into reconcile requests, filtered to
//! meaningful transitions so unrelated churn does not fan out into
//! reconcile storms.

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::dependency::Relation;
use crate::object::{ResourceKind, raw_is_available};
use crate::queue::{ReconcileRequest, WorkQueue};
use crate::store::{ObjectStore, RawObject, WatchEvent, raw_meta};

/// Whether a target event is relevant to sources referencing it: the target
/// became usable, or it disappeared (dependents must observe the missing
/// reference). Anything else is suppressed.
pub fn relevant_to_dependents(event: &WatchEvent) -> bool {
    match event {
        WatchEvent::Deleted { .. } => true,
        WatchEvent::Applied { old, new, .. } => {
            let was = old
                .as_ref()
                .map(|raw| raw_is_available(&raw.value))
                .unwrap_or(false);
            !was && raw_is_available(&new.value)
        }
    }
}

fn meta_field<'a>(value: &'a Value, field: &str) -> Option<&'a Value> {
    value.get("meta").and_then(|m| m.get(field))
}

/// Whether an event on an object of the controller's own kind warrants a
/// reconcile: creation, deletion, spec generation change, the deletion
/// marker appearing, or finalizer/guard movement. Pure status writes are
/// suppressed so the controller does not feed on its own output.
pub fn relevant_to_self(event: &WatchEvent) -> bool {
    match event {
        WatchEvent::Deleted { .. } => true,
        WatchEvent::Applied { old: None, .. } => true,
        WatchEvent::Applied {
            old: Some(old),
            new,
            ..
        } => ["generation", "deletionRequested", "finalizers", "guards"]
            .iter()
            .any(|field| meta_field(&old.value, field) != meta_field(&new.value, field)),
    }
}

fn request_for(kind: &'static str, raw: &RawObject) -> Option<ReconcileRequest> {
    let meta = raw_meta(&raw.value).ok()?;
    Some(ReconcileRequest::new(kind, &meta.namespace, &meta.name))
}

/// Watch a relation's target kind and enqueue the referencing sources on
/// relevant transitions, via the source kind's field index.
pub fn spawn_relation_watch<S: ResourceKind>(
    relation: Arc<dyn Relation<S>>,
    store: Arc<dyn ObjectStore>,
    queue: Arc<WorkQueue>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let mut rx = store.subscribe();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => return,
                received = rx.recv() => received,
            };
            let event = match event {
                Ok(event) => event,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(
                        index = relation.index_name(),
                        missed, "watch lagged; relying on periodic resync"
                    );
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            };
            if event.key().kind != relation.target_kind() {
                continue;
            }
            if !relevant_to_dependents(&event) {
                continue;
            }
            let target = event.key();
            let index_value = format!("{}/{}", target.namespace, target.name);
            let sources = match store
                .query_index(S::KIND, relation.index_name(), &index_value)
                .await
            {
                Ok(sources) => sources,
                Err(error) => {
                    warn!(index = relation.index_name(), %error, "index query failed");
                    continue;
                }
            };
            for raw in &sources {
                if let Some(request) = request_for(S::KIND, raw) {
                    debug!(%request, target = %target, "dependency transition");
                    queue.add(request);
                }
            }
        }
    })
}

/// Watch the controller's own kind.
pub fn spawn_self_watch<K: ResourceKind>(
    store: Arc<dyn ObjectStore>,
    queue: Arc<WorkQueue>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let mut rx = store.subscribe();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => return,
                received = rx.recv() => received,
            };
            let event = match event {
                Ok(event) => event,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(kind = K::KIND, missed, "watch lagged; relying on periodic resync");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            };
            if event.key().kind != K::KIND || !relevant_to_self(&event) {
                continue;
            }
            let key = event.key();
            queue.add(ReconcileRequest::new(K::KIND, &key.namespace, &key.name));
        }
    })
}

/// Bounded periodic resync: a correctness backstop against missed events,
/// not the primary wake mechanism. The first tick fires immediately and
/// doubles as the startup enqueue of pre-existing objects.
pub fn spawn_resync<K: ResourceKind>(
    store: Arc<dyn ObjectStore>,
    queue: Arc<WorkQueue>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }
            match store.list(K::KIND).await {
                Ok(objects) => {
                    for raw in &objects {
                        if let Some(request) = request_for(K::KIND, raw) {
                            queue.add(request);
                        }
                    }
                }
                Err(error) => warn!(kind = K::KIND, %error, "resync list failed"),
            }
        }
    })
}
