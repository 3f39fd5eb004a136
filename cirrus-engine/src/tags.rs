//! Convergent reconciliation of an unordered tag set against an external
//! resource: compare as sets, and when they differ issue exactly one bulk
//! replace in canonical order. Every actuator that supports tagging reuses
//! this routine.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::cloud::CloudError;
use crate::reconcile::Convergence;

/// Bulk tag replacement on the external cloud.
#[async_trait]
pub trait TagReplacer: Send + Sync {
    async fn replace_all_tags(
        &self,
        resource_type: &str,
        resource_id: &str,
        tags: &[String],
    ) -> Result<(), CloudError>;
}

/// Converge the external tag set toward `desired`. Order and duplication are
/// not drift; a replace call is issued only on set inequality, with the
/// desired tags sorted for determinism. `Mutated` tells the caller to
/// re-observe the resource.
pub async fn reconcile_tags<R: TagReplacer + ?Sized>(
    replacer: &R,
    resource_type: &str,
    resource_id: &str,
    desired: &[String],
    observed: &[String],
) -> Result<Convergence, CloudError> {
    let want: BTreeSet<&str> = desired.iter().map(String::as_str).collect();
    let have: BTreeSet<&str> = observed.iter().map(String::as_str).collect();
    if want == have {
        return Ok(Convergence::Converged);
    }
    // BTreeSet iteration yields the canonical sorted order.
    let tags: Vec<String> = want.into_iter().map(str::to_owned).collect();
    replacer
        .replace_all_tags(resource_type, resource_id, &tags)
        .await?;
    Ok(Convergence::Mutated)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingReplacer {
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl TagReplacer for RecordingReplacer {
        async fn replace_all_tags(
            &self,
            _resource_type: &str,
            _resource_id: &str,
            tags: &[String],
        ) -> Result<(), CloudError> {
            self.calls.lock().unwrap().push(tags.to_vec());
            Ok(())
        }
    }

    fn tags(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn order_is_not_drift() {
        let replacer = RecordingReplacer::default();
        let result = reconcile_tags(
            &replacer,
            "networks",
            "id-1",
            &tags(&["a", "b"]),
            &tags(&["b", "a"]),
        )
        .await
        .unwrap();
        assert!(matches!(result, Convergence::Converged));
        assert!(replacer.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn drift_issues_one_canonical_replace() {
        let replacer = RecordingReplacer::default();
        let result = reconcile_tags(
            &replacer,
            "networks",
            "id-1",
            &tags(&["c", "a"]),
            &tags(&["a", "b"]),
        )
        .await
        .unwrap();
        assert!(matches!(result, Convergence::Mutated));
        let calls = replacer.calls.lock().unwrap();
        assert_eq!(calls.as_slice(), &[tags(&["a", "c"])]);
    }

    #[tokio::test]
    async fn converged_rerun_makes_no_further_calls() {
        let replacer = RecordingReplacer::default();
        let desired = tags(&["a", "c"]);
        let observed = tags(&["a", "b"]);
        reconcile_tags(&replacer, "networks", "id-1", &desired, &observed)
            .await
            .unwrap();
        // After the external side converged, a second run is a no-op.
        reconcile_tags(&replacer, "networks", "id-1", &desired, &desired)
            .await
            .unwrap();
        assert_eq!(replacer.calls.lock().unwrap().len(), 1);
    }
}
