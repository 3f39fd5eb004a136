mod common;

use std::time::Duration;

use cirrus_engine::object::{ConditionStatus, ConditionType, ManagedObject, ObjectSpec};
use cirrus_operator::kinds::{NetworkKind, NetworkSpec, PortKind, PortSpec};
use common::{Harness, wait_for};

fn network(name: &str) -> ManagedObject<NetworkKind> {
    ManagedObject::new("default", name, ObjectSpec::Resource(NetworkSpec::default()))
}

fn port(name: &str, network_ref: &str) -> ManagedObject<PortKind> {
    ManagedObject::new(
        "default",
        name,
        ObjectSpec::Resource(PortSpec {
            network_ref: network_ref.to_string(),
            ..PortSpec::default()
        }),
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn port_waits_for_its_network_then_creates_exactly_once() {
    let h = Harness::start();
    let ports = h.ports();
    ports.create(&port("p1", "net-1")).await.unwrap();

    wait_for("port to report the missing network", || {
        let ports = ports.clone();
        async move {
            let Some(obj) = ports.get("default", "p1").await.unwrap() else {
                return false;
            };
            obj.condition(&ConditionType::Available).is_some_and(|c| {
                c.status == ConditionStatus::False
                    && c.reason.as_deref() == Some("WaitingForDependency")
            })
        }
    })
    .await;
    assert_eq!(h.sim.calls("create", "ports"), 0);

    h.networks().create(&network("net-1")).await.unwrap();

    wait_for("port to become available", || {
        let ports = ports.clone();
        async move {
            ports
                .get("default", "p1")
                .await
                .unwrap()
                .is_some_and(|obj| obj.is_available())
        }
    })
    .await;

    let obj = ports.get("default", "p1").await.unwrap().unwrap();
    assert!(obj.status.id.is_some());
    assert_eq!(h.sim.calls("create", "ports"), 1);
    assert_eq!(h.sim.calls("create", "networks"), 1);
    h.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unrelated_network_churn_does_not_drive_port_reconciles() {
    let h = Harness::start();
    h.networks().create(&network("net-1")).await.unwrap();
    let ports = h.ports();
    ports.create(&port("p1", "net-1")).await.unwrap();

    wait_for("port to become available", || {
        let ports = ports.clone();
        async move {
            ports
                .get("default", "p1")
                .await
                .unwrap()
                .is_some_and(|obj| obj.is_available())
        }
    })
    .await;
    // Allow in-flight attempts to settle before taking the baseline.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let baseline: Vec<u64> = ["create", "read", "find", "replace_tags"]
        .iter()
        .map(|op| h.sim.calls(op, "ports"))
        .collect();

    // Spec change on an already-available network: the network reconciles,
    // but its Available condition never leaves True, so no port is woken.
    h.networks()
        .mutate("default", "net-1", |obj| {
            if let ObjectSpec::Resource(spec) = &mut obj.spec {
                spec.mtu = Some(1400);
                true
            } else {
                false
            }
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    let after: Vec<u64> = ["create", "read", "find", "replace_tags"]
        .iter()
        .map(|op| h.sim.calls(op, "ports"))
        .collect();
    assert_eq!(baseline, after);
    h.stop().await;
}
