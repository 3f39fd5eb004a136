use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::dependency::{Readiness, Relation};
use crate::guard::holds_guard;
use crate::object::ResourceKind;
use crate::queue::WorkQueue;
use crate::router::spawn_relation_watch;
use crate::testkit::*;

#[tokio::test]
async fn readiness_tracks_target_lifecycle() {
    let (_, store) = store();
    let relation = gadget_relation();
    let gadget_client = gadgets(&store);
    let source = widget("w1", &["g1"]);

    // Missing target.
    let readiness = relation.readiness(store.as_ref(), &source).await.unwrap();
    assert!(matches!(readiness, Readiness::Waiting { ref target, .. } if target == "g1"));

    // Present but not available.
    gadget_client.create(&gadget("g1")).await.unwrap();
    let readiness = relation.readiness(store.as_ref(), &source).await.unwrap();
    assert!(matches!(readiness, Readiness::Waiting { .. }));

    mark_available(&gadget_client, "g1").await;
    let readiness = relation.readiness(store.as_ref(), &source).await.unwrap();
    assert_eq!(readiness, Readiness::Ready);

    // Deleting targets are not usable, even while still Available.
    gadget_client
        .mutate("default", "g1", |o| {
            o.meta.finalizers.insert("holder".into());
            true
        })
        .await
        .unwrap();
    gadget_client.request_deletion("default", "g1").await.unwrap();
    let readiness = relation.readiness(store.as_ref(), &source).await.unwrap();
    assert!(matches!(readiness, Readiness::Waiting { .. }));
}

#[tokio::test]
async fn sync_guards_follows_the_reference_set() {
    let (_, store) = store();
    let relation = gadget_relation();
    let gadget_client = gadgets(&store);
    gadget_client.create(&gadget("g1")).await.unwrap();
    gadget_client.create(&gadget("g2")).await.unwrap();

    let source = widget("w1", &["g1", "g2"]);
    relation.sync_guards(store.as_ref(), &source).await.unwrap();

    let guard = crate::guard::GuardSpec {
        finalizer: WidgetKind::FINALIZER,
        owner: "widget/spec.resource.gadget-refs",
    };
    for name in ["g1", "g2"] {
        let meta = gadget_client.get("default", name).await.unwrap().unwrap().meta;
        assert!(holds_guard(&meta, &guard, "default/w1"));
        assert!(meta.finalizers.contains(WidgetKind::FINALIZER));
    }

    // Reference to g2 dropped: its record is released, g1's kept.
    let source = widget("w1", &["g1"]);
    relation.sync_guards(store.as_ref(), &source).await.unwrap();
    let g1 = gadget_client.get("default", "g1").await.unwrap().unwrap().meta;
    let g2 = gadget_client.get("default", "g2").await.unwrap().unwrap().meta;
    assert!(holds_guard(&g1, &guard, "default/w1"));
    assert!(!holds_guard(&g2, &guard, "default/w1"));
    assert!(!g2.finalizers.contains(WidgetKind::FINALIZER));

    // Source going away releases everything.
    relation.release_guards(store.as_ref(), &source).await.unwrap();
    let g1 = gadget_client.get("default", "g1").await.unwrap().unwrap().meta;
    assert!(g1.guards.is_empty());
    assert!(!g1.finalizers.contains(WidgetKind::FINALIZER));
}

#[tokio::test]
async fn concurrent_holders_keep_the_token_until_the_last_release() {
    let (_, store) = store();
    let relation = gadget_relation();
    let gadget_client = gadgets(&store);
    gadget_client.create(&gadget("g1")).await.unwrap();

    let w1 = widget("w1", &["g1"]);
    let w2 = widget("w2", &["g1"]);
    relation.sync_guards(store.as_ref(), &w1).await.unwrap();
    relation.sync_guards(store.as_ref(), &w2).await.unwrap();

    relation.release_guards(store.as_ref(), &w1).await.unwrap();
    let meta = gadget_client.get("default", "g1").await.unwrap().unwrap().meta;
    assert!(meta.finalizers.contains(WidgetKind::FINALIZER));

    relation.release_guards(store.as_ref(), &w2).await.unwrap();
    let meta = gadget_client.get("default", "g1").await.unwrap().unwrap().meta;
    assert!(!meta.finalizers.contains(WidgetKind::FINALIZER));
}

#[tokio::test(start_paused = true)]
async fn unguarded_relation_routes_wakeups_without_touching_guards() {
    let (_, store) = store();
    let relation: Arc<dyn Relation<WidgetKind>> = Arc::new(gadget_import_relation());
    relation.register(store.as_ref()).unwrap();

    let gadget_client = gadgets(&store);
    gadget_client.create(&gadget("g1")).await.unwrap();
    let source = import_widget("w1", "g1");

    // No guard on the relation: syncing and releasing must leave the
    // target's guard records and finalizers alone.
    relation.sync_guards(store.as_ref(), &source).await.unwrap();
    let meta = gadget_client.get("default", "g1").await.unwrap().unwrap().meta;
    assert!(meta.guards.is_empty());
    assert!(meta.finalizers.is_empty());

    relation.release_guards(store.as_ref(), &source).await.unwrap();
    let meta = gadget_client.get("default", "g1").await.unwrap().unwrap().meta;
    assert!(meta.guards.is_empty());
    assert!(meta.finalizers.is_empty());

    // The index still routes usability transitions to the importer.
    let widget_client = widgets(&store);
    widget_client.create(&source).await.unwrap();
    let queue = Arc::new(WorkQueue::new());
    let shutdown = CancellationToken::new();
    let handle = spawn_relation_watch::<WidgetKind>(
        relation,
        store.clone(),
        queue.clone(),
        shutdown.clone(),
    );

    mark_available(&gadget_client, "g1").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(queue.pending_len(), 1);

    shutdown.cancel();
    let _ = handle.await;
}

#[tokio::test(start_paused = true)]
async fn watch_enqueues_dependents_only_on_usability_transitions() {
    let (_, store) = store();
    let relation: Arc<dyn Relation<WidgetKind>> = Arc::new(gadget_relation());
    relation.register(store.as_ref()).unwrap();

    let queue = Arc::new(WorkQueue::new());
    let shutdown = CancellationToken::new();
    let handle = spawn_relation_watch::<WidgetKind>(
        relation,
        store.clone(),
        queue.clone(),
        shutdown.clone(),
    );

    let widget_client = widgets(&store);
    let gadget_client = gadgets(&store);
    widget_client.create(&widget("w1", &["g1"])).await.unwrap();
    gadget_client.create(&gadget("g1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    // Target exists but is not usable yet: nothing enqueued.
    assert_eq!(queue.pending_len(), 0);

    mark_available(&gadget_client, "g1").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(queue.pending_len(), 1);

    // Churn that does not change usability stays suppressed.
    gadget_client
        .mutate("default", "g1", |o| {
            o.status.id = Some("ext-1".into());
            true
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(queue.pending_len(), 1);

    shutdown.cancel();
    let _ = handle.await;
}
