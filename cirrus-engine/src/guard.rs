//! Reference-counted deletion protection. A guarded relation records, on
//! each target it references, a `GuardRecord` keyed by the relation's owner
//! identity. The guard's finalizer token stays on the target until no record
//! carrying that token has holders left, so a target's controller cannot
//! delete the external resource while live dependents remain.

use crate::object::ObjectMeta;

/// Guard configuration of one relation. The owner identity must be unique
/// per relation: two relations guarding the same target kind (for example a
/// direct reference and an import-filter reference) would otherwise erase
/// each other's records on release.
#[derive(Clone, Copy, Debug)]
pub struct GuardSpec {
    /// Finalizer token placed on guarded targets.
    pub finalizer: &'static str,
    /// Disambiguation key for this relation's records.
    pub owner: &'static str,
}

/// Record `holder` as referencing the target through this relation.
/// Idempotent. Returns whether the meta changed.
pub fn attach_guard(meta: &mut ObjectMeta, guard: &GuardSpec, holder: &str) -> bool {
    let record = meta.guards.entry(guard.owner.to_string()).or_default();
    if record.finalizer.is_empty() {
        record.finalizer = guard.finalizer.to_string();
    }
    let mut changed = record.holders.insert(holder.to_string());
    changed |= meta.finalizers.insert(guard.finalizer.to_string());
    changed
}

/// Drop `holder` from this relation's record. The finalizer token is removed
/// only when no record under the same token remains. Idempotent. Returns
/// whether the meta changed.
pub fn release_guard(meta: &mut ObjectMeta, guard: &GuardSpec, holder: &str) -> bool {
    let mut changed = false;
    if let Some(record) = meta.guards.get_mut(guard.owner) {
        changed = record.holders.remove(holder);
        if record.holders.is_empty() {
            meta.guards.remove(guard.owner);
            changed = true;
        }
    }
    let token_still_held = meta
        .guards
        .values()
        .any(|r| r.finalizer == guard.finalizer && !r.holders.is_empty());
    if !token_still_held {
        changed |= meta.finalizers.remove(guard.finalizer);
    }
    changed
}

/// Whether `holder` currently holds this relation's guard on the meta.
pub fn holds_guard(meta: &ObjectMeta, guard: &GuardSpec, holder: &str) -> bool {
    meta.guards
        .get(guard.owner)
        .map(|r| r.holders.contains(holder))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NET_REF: GuardSpec = GuardSpec {
        finalizer: "cirrus.dev/port",
        owner: "port/spec.resource.network-ref",
    };
    const NET_FILTER: GuardSpec = GuardSpec {
        finalizer: "cirrus.dev/port",
        owner: "port/spec.import.filter.network-ref",
    };

    #[test]
    fn token_present_iff_some_record_has_holders() {
        let mut meta = ObjectMeta::default();
        assert!(attach_guard(&mut meta, &NET_REF, "default/p1"));
        assert!(meta.finalizers.contains(NET_REF.finalizer));

        // Second holder under the same relation: idempotent token.
        attach_guard(&mut meta, &NET_REF, "default/p2");
        release_guard(&mut meta, &NET_REF, "default/p1");
        assert!(meta.finalizers.contains(NET_REF.finalizer));

        release_guard(&mut meta, &NET_REF, "default/p2");
        assert!(!meta.finalizers.contains(NET_REF.finalizer));
        assert!(meta.guards.is_empty());
    }

    #[test]
    fn releasing_one_relation_does_not_erase_anothers_guard() {
        let mut meta = ObjectMeta::default();
        attach_guard(&mut meta, &NET_REF, "default/p1");
        attach_guard(&mut meta, &NET_FILTER, "default/p1");

        // Same token, distinct owners: one release must not drop the token.
        release_guard(&mut meta, &NET_REF, "default/p1");
        assert!(meta.finalizers.contains(NET_REF.finalizer));

        release_guard(&mut meta, &NET_FILTER, "default/p1");
        assert!(!meta.finalizers.contains(NET_REF.finalizer));
    }

    #[test]
    fn attach_and_release_are_idempotent() {
        let mut meta = ObjectMeta::default();
        assert!(attach_guard(&mut meta, &NET_REF, "default/p1"));
        assert!(!attach_guard(&mut meta, &NET_REF, "default/p1"));
        assert!(release_guard(&mut meta, &NET_REF, "default/p1"));
        assert!(!release_guard(&mut meta, &NET_REF, "default/p1"));
    }
}
