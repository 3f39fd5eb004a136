use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version token assigned by the store on every committed write. Mutations
/// must present the version they read and fail on mismatch.
pub type Version = u64;

/// A resource kind managed by a controller. Implementations are zero-sized
/// markers; the associated types carry the kind-specific spec shapes.
pub trait ResourceKind: Sized + Send + Sync + 'static {
    const KIND: &'static str;
    /// Finalizer token owned by this kind's controller. Deletion guards
    /// placed on targets of guarded relations reuse this token.
    const FINALIZER: &'static str;
    type Resource: Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned;
    type Filter: Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned;
}

/// Store-level identity of an object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: &'static str,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: &'static str, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// One relation's claim on a target object. The target keeps the guard's
/// finalizer token as long as any record carrying that token has holders.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GuardRecord {
    pub finalizer: String,
    /// `namespace/name` keys of source objects currently referencing the
    /// target through this relation.
    pub holders: BTreeSet<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub version: Version,
    /// Bumped by the store whenever the spec changes.
    #[serde(default)]
    pub generation: i64,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub finalizers: BTreeSet<String>,
    /// RFC3339 timestamp. Once set the spec is immutable and the object is
    /// irreversibly moving toward removal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_requested: Option<String>,
    /// Deletion guard records keyed by owner identity (one per relation).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub guards: BTreeMap<String, GuardRecord>,
}

/// Desired state: either a resource this controller manages in the external
/// cloud, or a filter locating a pre-existing external object to import.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound(serialize = "", deserialize = ""), rename_all = "camelCase")]
pub enum ObjectSpec<K: ResourceKind> {
    Resource(K::Resource),
    Import(K::Filter),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "lastTransitionTime", skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionType {
    Available,
    Progressing,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStatus {
    /// External identifier of the cloud resource once observed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Last observed external fields, verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound(serialize = "", deserialize = ""), rename_all = "camelCase")]
pub struct ManagedObject<K: ResourceKind> {
    pub meta: ObjectMeta,
    pub spec: ObjectSpec<K>,
    #[serde(default)]
    pub status: ObjectStatus,
}

impl<K: ResourceKind> ManagedObject<K> {
    pub fn new(namespace: &str, name: &str, spec: ObjectSpec<K>) -> Self {
        Self {
            meta: ObjectMeta {
                namespace: namespace.to_string(),
                name: name.to_string(),
                ..Default::default()
            },
            spec,
            status: ObjectStatus::default(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(K::KIND, &self.meta.namespace, &self.meta.name)
    }

    /// `namespace/name` identity used as a guard holder key and as an index
    /// value.
    pub fn holder_id(&self) -> String {
        format!("{}/{}", self.meta.namespace, self.meta.name)
    }

    pub fn condition(&self, type_: &ConditionType) -> Option<&Condition> {
        self.status.conditions.iter().find(|c| c.type_ == *type_)
    }

    pub fn is_available(&self) -> bool {
        self.condition(&ConditionType::Available)
            .map(|c| c.status == ConditionStatus::True)
            .unwrap_or(false)
    }

    pub fn external_id(&self) -> Option<&str> {
        self.status.id.as_deref()
    }
}

/// Upsert a condition, preserving `lastTransitionTime` unless the status
/// actually flips. Returns false when the stored condition already matches,
/// so callers can skip a no-op write.
pub fn upsert_condition(
    conditions: &mut Vec<Condition>,
    type_: ConditionType,
    status: ConditionStatus,
    reason: &str,
    message: &str,
) -> bool {
    let now = chrono::Utc::now().to_rfc3339();
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        if existing.status == status
            && existing.reason.as_deref() == Some(reason)
            && existing.message.as_deref() == Some(message)
        {
            return false;
        }
        let transitioned = existing.status != status;
        existing.status = status;
        existing.reason = Some(reason.to_string());
        existing.message = Some(message.to_string());
        if transitioned {
            existing.last_transition_time = Some(now);
        }
        return true;
    }
    conditions.push(Condition {
        type_,
        status,
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        last_transition_time: Some(now),
    });
    true
}

/// Availability check on a raw stored value, usable without knowing the
/// concrete kind of the object.
pub fn raw_is_available(value: &Value) -> bool {
    let Some(conditions) = value
        .get("status")
        .and_then(|s| s.get("conditions"))
        .and_then(Value::as_array)
    else {
        return false;
    };
    conditions.iter().any(|c| {
        c.get("type").and_then(Value::as_str) == Some("Available")
            && c.get("status").and_then(Value::as_str) == Some("True")
    })
}

pub fn raw_deletion_requested(value: &Value) -> bool {
    value
        .get("meta")
        .and_then(|m| m.get("deletionRequested"))
        .map(|v| !v.is_null())
        .unwrap_or(false)
}
