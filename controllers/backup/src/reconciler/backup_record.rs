//! MetadataBackupRecord reconciler
//!
//! Every record event runs retention for the record's policy: when the
//! policy's record count exceeds `retainNumBackups`, the oldest records
//! are deleted and a compensating snapshot-delete pod is started for each
//! so the remote repository does not leak snapshots. Records carry no
//! status, so retention is re-run on every event and must be idempotent.

use kube::api::{DeleteParams, ListParams, PostParams};
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crds::MetadataBackupRecord;
use workload::{snapshot_delete_pod, SNAP_DELETION_POD_LABEL};

use super::{Reconciler, RECORD_FINALIZER};
use crate::error::ControllerError;
use crate::reconcile_helpers::{
    evict_beyond_window, excess_over, is_already_exists, is_not_found, sort_oldest_first,
    with_finalizer, without_finalizer,
};

/// Completed snapshot-delete pods kept around for inspection.
const SNAP_DELETE_PODS_KEPT: usize = 3;

impl Reconciler {
    pub async fn reconcile_backup_record(
        &self,
        record: &MetadataBackupRecord,
    ) -> Result<(), ControllerError> {
        let name = record.metadata.name.as_deref().ok_or_else(|| {
            ControllerError::InvalidConfig("MetadataBackupRecord missing name".to_string())
        })?;
        let namespace = record.metadata.namespace.as_deref().unwrap_or("default");
        let resource_key = format!("{}/{}", namespace, name);

        info!("Reconciling MetadataBackupRecord {}/{}", namespace, name);

        let finalizers = record.metadata.finalizers.as_deref().unwrap_or(&[]);

        if record.metadata.deletion_timestamp.is_some() {
            if let Some(remaining) = without_finalizer(finalizers, RECORD_FINALIZER) {
                self.patch_finalizers(&self.record_api, name, &remaining)
                    .await?;
            }
            return Ok(());
        }

        if let Some(updated) = with_finalizer(finalizers, RECORD_FINALIZER) {
            self.patch_finalizers(&self.record_api, name, &updated)
                .await?;
            // First observation of this backup. Counting at finalizer
            // registration keeps re-reconciles from double counting.
            self.metrics.backups_recorded.inc();
        }

        let policy = match self.policy_api.get(&record.spec.policy).await {
            Ok(p) => p,
            Err(e) if is_not_found(&e) => {
                warn!(
                    "Policy {} for record {}/{} not found, no retention processing",
                    record.spec.policy, namespace, name
                );
                return Ok(());
            }
            Err(e) => return Err(ControllerError::Kube(e)),
        };

        // Records carry no server-side index over spec.policy; list the
        // namespace and filter here.
        let mut records: Vec<MetadataBackupRecord> = self
            .record_api
            .list(&ListParams::default())
            .await?
            .items
            .into_iter()
            .filter(|r| r.spec.policy == record.spec.policy)
            .collect();

        sort_oldest_first(&mut records);

        let excess = excess_over(records.len(), policy.spec.retain_num_backups);
        debug!(
            "Policy {} has {} records, retention {}, {} to retire",
            record.spec.policy,
            records.len(),
            policy.spec.retain_num_backups,
            excess
        );
        if excess == 0 {
            self.reset_error(&resource_key);
            return Ok(());
        }

        let location = match self.location_api.get(&policy.spec.destination).await {
            Ok(loc) => loc,
            Err(e) if is_not_found(&e) => {
                return Err(ControllerError::LocationNotFound(format!(
                    "{}/{} referenced by policy {}",
                    namespace, policy.spec.destination, record.spec.policy
                )));
            }
            Err(e) => return Err(ControllerError::Kube(e)),
        };

        for retired in &records[..excess] {
            let retired_name = retired.name_any();
            info!(
                "Retiring backup record {}/{} (snapshot {})",
                namespace, retired_name, retired.spec.snapshot_id
            );

            // Record first, then the compensating snapshot delete. A crash
            // between the two orphans the remote snapshot; the window is
            // accepted.
            match self
                .record_api
                .delete(&retired_name, &DeleteParams::default())
                .await
            {
                Ok(_) => {}
                Err(e) if is_not_found(&e) => {
                    debug!("Record {}/{} already gone", namespace, retired_name);
                }
                Err(e) => {
                    warn!("Failed to delete record {}/{}: {}", namespace, retired_name, e);
                    continue;
                }
            }

            let pod = snapshot_delete_pod(
                &location,
                &retired_name,
                namespace,
                &retired.spec.snapshot_id,
                &self.images,
            );

            match self.pod_api.create(&PostParams::default(), &pod).await {
                Ok(created) => {
                    info!(
                        "Started snapshot delete pod {}/{}",
                        namespace,
                        created.metadata.name.as_deref().unwrap_or_default()
                    );
                }
                Err(e) if is_already_exists(&e) => {
                    debug!(
                        "Snapshot delete pod for {} already exists",
                        retired.spec.snapshot_id
                    );
                }
                Err(e) => return Err(ControllerError::Kube(e)),
            }

            self.metrics.records_retired.inc();
        }

        self.cleanup_old_snap_delete_pods(namespace).await;

        self.reset_error(&resource_key);
        Ok(())
    }

    /// Deletes completed snapshot-delete pods past the keep window.
    /// Best-effort; a failed cleanup retries on the next record event.
    async fn cleanup_old_snap_delete_pods(&self, namespace: &str) {
        let selector = format!("{}=true", SNAP_DELETION_POD_LABEL);
        let lp = ListParams::default().labels(&selector);

        let mut pods = match self.pod_api.list(&lp).await {
            Ok(list) => list.items,
            Err(e) => {
                warn!("Unable to list snapshot delete pods: {}", e);
                return;
            }
        };

        debug!("{} snapshot delete pods in {}", pods.len(), namespace);
        for pod in evict_beyond_window(&mut pods, SNAP_DELETE_PODS_KEPT) {
            let pod_name = pod.name_any();
            match self.pod_api.delete(&pod_name, &DeleteParams::default()).await {
                Ok(_) => info!("Deleted old snapshot delete pod {}/{}", namespace, pod_name),
                Err(e) if is_not_found(&e) => {}
                Err(e) => warn!("Unable to delete pod {}/{}: {}", namespace, pod_name, e),
            }
        }
    }
}
