mod common;

use std::time::Duration;

use cirrus_engine::object::{ManagedObject, ObjectSpec};
use cirrus_operator::kinds::{NetworkKind, NetworkSpec};
use common::{Harness, wait_for};

fn tagged_network(name: &str, tags: &[&str]) -> ManagedObject<NetworkKind> {
    ManagedObject::new(
        "default",
        name,
        ObjectSpec::Resource(NetworkSpec {
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..NetworkSpec::default()
        }),
    )
}

async fn set_tags(h: &Harness, name: &str, tags: &[&str]) {
    let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
    h.networks()
        .mutate("default", name, move |obj| {
            if let ObjectSpec::Resource(spec) = &mut obj.spec {
                spec.tags = tags.clone();
                true
            } else {
                false
            }
        })
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn tag_drift_converges_with_a_single_replace() {
    let h = Harness::start();
    let networks = h.networks();
    networks.create(&tagged_network("net-1", &["a", "b"])).await.unwrap();

    wait_for("network to become available", || {
        let networks = networks.clone();
        async move {
            networks
                .get("default", "net-1")
                .await
                .unwrap()
                .is_some_and(|obj| obj.is_available())
        }
    })
    .await;
    // Tags were passed at creation; nothing to converge.
    assert_eq!(h.sim.calls("replace_tags", "networks"), 0);

    let id = networks
        .get("default", "net-1")
        .await
        .unwrap()
        .unwrap()
        .status
        .id
        .unwrap();

    set_tags(&h, "net-1", &["b", "c"]).await;
    wait_for("external tags to converge", || {
        let sim = h.sim.clone();
        let id = id.clone();
        async move {
            sim.get("networks", &id)
                .is_some_and(|r| r.tags == vec!["b".to_string(), "c".to_string()])
        }
    })
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.sim.calls("replace_tags", "networks"), 1);

    // Same set in a different order is not drift.
    set_tags(&h, "net-1", &["c", "b"]).await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(h.sim.calls("replace_tags", "networks"), 1);
    h.stop().await;
}
