//! Helper functions for common reconciliation patterns
//!
//! Pure decision logic shared by the per-kind reconcilers: the generation
//! gate, finalizer list edits, CronJob drift detection, retention
//! arithmetic and Kubernetes API error classification. Keeping these free
//! of I/O keeps them unit-testable without an API server.

use k8s_openapi::api::batch::v1::CronJob;
use kube::ResourceExt;

use crds::MetadataBackupPolicySpec;

/// Generation gate: whether a resource's spec changed since the last
/// handled attempt.
///
/// Status writes bump `resourceVersion` but not `generation`, so skipping
/// when the observed generation matches keeps status-only updates from
/// re-running convergence. A resource that was never handled has no
/// observed generation and always passes.
pub fn needs_reconcile(observed_generation: Option<i64>, generation: Option<i64>) -> bool {
    match (observed_generation, generation) {
        (Some(observed), Some(current)) => observed != current,
        _ => true,
    }
}

/// Finalizer list with `finalizer` appended, or `None` if it is already
/// present. The returned list is complete and is meant to be written
/// through a merge patch, which replaces the array wholesale.
pub fn with_finalizer(existing: &[String], finalizer: &str) -> Option<Vec<String>> {
    if existing.iter().any(|f| f == finalizer) {
        return None;
    }
    let mut updated = existing.to_vec();
    updated.push(finalizer.to_string());
    Some(updated)
}

/// Finalizer list with `finalizer` removed, or `None` if it was not
/// present.
pub fn without_finalizer(existing: &[String], finalizer: &str) -> Option<Vec<String>> {
    if !existing.iter().any(|f| f == finalizer) {
        return None;
    }
    Some(existing.iter().filter(|f| *f != finalizer).cloned().collect())
}

/// Spec patch correcting a backup CronJob that drifted from its policy,
/// or `None` when schedule and suspend already match.
///
/// Only schedule and suspend are corrected in place; any other change to
/// the policy takes effect through CronJob re-creation.
pub fn cronjob_drift_patch(
    cron: &CronJob,
    policy: &MetadataBackupPolicySpec,
) -> Option<serde_json::Value> {
    let spec = cron.spec.as_ref()?;

    let schedule_drift = spec.schedule != policy.schedule;
    let suspend_drift = spec.suspend.unwrap_or(false) != policy.suspend;

    if !schedule_drift && !suspend_drift {
        return None;
    }

    Some(serde_json::json!({
        "spec": {
            "schedule": policy.schedule,
            "suspend": policy.suspend,
        }
    }))
}

/// Sorts resources oldest first by creation timestamp, name as the
/// tie-break. Two resources created in the same second (common for
/// timer-driven backups) still retire in a stable order.
pub fn sort_oldest_first<K>(items: &mut [K])
where
    K: ResourceExt,
{
    items.sort_by(|a, b| {
        let created_a = a.creation_timestamp().map(|t| t.0);
        let created_b = b.creation_timestamp().map(|t| t.0);
        created_a
            .cmp(&created_b)
            .then_with(|| a.name_any().cmp(&b.name_any()))
    });
}

/// Sorts resources oldest first and returns the ones past the keep
/// window, so the `keep` most recent survive. Empty when the window is
/// not exceeded.
pub fn evict_beyond_window<K>(items: &mut [K], keep: usize) -> &[K]
where
    K: ResourceExt,
{
    if items.len() <= keep {
        return &[];
    }
    sort_oldest_first(items);
    let excess = items.len() - keep;
    &items[..excess]
}

/// How many of `total` resources exceed the retention limit.
pub fn excess_over(total: usize, keep: i64) -> usize {
    let keep = usize::try_from(keep).unwrap_or(0);
    total.saturating_sub(keep)
}

/// Whether a Kubernetes API error is a 404.
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

/// Whether a Kubernetes API error means the object already exists.
///
/// Creating a deterministically-named child that is already there means
/// a previous attempt got through, so callers treat this as success.
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.reason == "AlreadyExists")
}
