//! Shared fixtures for engine tests: a widget kind referencing gadgets.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dependency::Dependency;
use crate::object::{
    ConditionStatus, ConditionType, ManagedObject, ObjectSpec, ResourceKind, upsert_condition,
};
use crate::store::{Client, MemoryStore, ObjectStore};

pub struct WidgetKind;
impl ResourceKind for WidgetKind {
    const KIND: &'static str = "widget";
    const FINALIZER: &'static str = "cirrus.dev/widget";
    type Resource = WidgetSpec;
    type Filter = WidgetFilter;
}

pub struct GadgetKind;
impl ResourceKind for GadgetKind {
    const KIND: &'static str = "gadget";
    const FINALIZER: &'static str = "cirrus.dev/gadget";
    type Resource = GadgetSpec;
    type Filter = GadgetFilter;
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetSpec {
    #[serde(default)]
    pub gadget_refs: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetFilter {
    pub name: Option<String>,
    pub gadget_ref: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GadgetSpec {}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GadgetFilter {
    pub name: Option<String>,
}

pub fn widget(name: &str, gadget_refs: &[&str]) -> ManagedObject<WidgetKind> {
    ManagedObject::new(
        "default",
        name,
        ObjectSpec::Resource(WidgetSpec {
            gadget_refs: gadget_refs.iter().map(|s| s.to_string()).collect(),
            tags: Vec::new(),
        }),
    )
}

pub fn import_widget(name: &str, gadget_ref: &str) -> ManagedObject<WidgetKind> {
    ManagedObject::new(
        "default",
        name,
        ObjectSpec::Import(WidgetFilter {
            name: None,
            gadget_ref: Some(gadget_ref.to_string()),
        }),
    )
}

pub fn gadget(name: &str) -> ManagedObject<GadgetKind> {
    ManagedObject::new("default", name, ObjectSpec::Resource(GadgetSpec {}))
}

fn extract_gadget_refs(widget: &ManagedObject<WidgetKind>) -> Vec<String> {
    match &widget.spec {
        ObjectSpec::Resource(spec) => spec.gadget_refs.clone(),
        ObjectSpec::Import(_) => Vec::new(),
    }
}

fn extract_gadget_filter_ref(widget: &ManagedObject<WidgetKind>) -> Vec<String> {
    match &widget.spec {
        ObjectSpec::Resource(_) => Vec::new(),
        ObjectSpec::Import(filter) => filter.gadget_ref.iter().cloned().collect(),
    }
}

pub fn gadget_relation() -> Dependency<WidgetKind, GadgetKind> {
    Dependency::with_deletion_guard(
        "spec.resource.gadget-refs",
        extract_gadget_refs,
        WidgetKind::FINALIZER,
        "widget/spec.resource.gadget-refs",
    )
}

pub fn gadget_import_relation() -> Dependency<WidgetKind, GadgetKind> {
    Dependency::new("spec.import.filter.gadget-ref", extract_gadget_filter_ref)
}

pub fn store() -> (Arc<MemoryStore>, Arc<dyn ObjectStore>) {
    let store = Arc::new(MemoryStore::new());
    (store.clone(), store as Arc<dyn ObjectStore>)
}

pub fn widgets(store: &Arc<dyn ObjectStore>) -> Client<WidgetKind> {
    Client::new(store.clone())
}

pub fn gadgets(store: &Arc<dyn ObjectStore>) -> Client<GadgetKind> {
    Client::new(store.clone())
}

pub async fn mark_available(client: &Client<GadgetKind>, name: &str) {
    client
        .mutate("default", name, |obj| {
            upsert_condition(
                &mut obj.status.conditions,
                ConditionType::Available,
                ConditionStatus::True,
                "Ready",
                "ready",
            )
        })
        .await
        .unwrap()
        .unwrap();
}
