//! MetadataRestore reconciler
//!
//! Custom resources cannot expose imperative subresources, so creating a
//! MetadataRestore stands in for a "restore" call: exactly one restore
//! pod is started per generation. A retry after a failed attempt (spec
//! edit bumps the generation) deletes the previous pod before starting a
//! fresh one, since the pod name is deterministic.

use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::Resource;
use tracing::{debug, info, warn};

use crds::{MetadataRestore, RestoreState};
use workload::{restore_pod, restore_pod_name};

use super::{Reconciler, RESTORE_FINALIZER};
use crate::error::ControllerError;
use crate::reconcile_helpers::{
    is_already_exists, is_not_found, needs_reconcile, with_finalizer, without_finalizer,
};

impl Reconciler {
    pub async fn reconcile_metadata_restore(
        &self,
        restore: &MetadataRestore,
    ) -> Result<(), ControllerError> {
        let name = restore.metadata.name.as_deref().ok_or_else(|| {
            ControllerError::InvalidConfig("MetadataRestore missing name".to_string())
        })?;
        let namespace = restore.metadata.namespace.as_deref().unwrap_or("default");
        let resource_key = format!("{}/{}", namespace, name);

        info!("Reconciling MetadataRestore {}/{}", namespace, name);

        let finalizers = restore.metadata.finalizers.as_deref().unwrap_or(&[]);

        if restore.metadata.deletion_timestamp.is_some() {
            if let Some(remaining) = without_finalizer(finalizers, RESTORE_FINALIZER) {
                self.patch_finalizers(&self.restore_api, name, &remaining)
                    .await?;
            }
            return Ok(());
        }

        // One restore trigger per generation.
        let observed = restore.status.as_ref().and_then(|s| s.observed_generation);
        if !needs_reconcile(observed, restore.metadata.generation) {
            debug!(
                "MetadataRestore {}/{} generation unchanged, skipping",
                namespace, name
            );
            return Ok(());
        }

        if let Some(updated) = with_finalizer(finalizers, RESTORE_FINALIZER) {
            self.patch_finalizers(&self.restore_api, name, &updated)
                .await?;
        }

        // Resolve the record and its location. A bad reference cannot be
        // fixed by retrying, so it is terminal for this generation.
        let record = match self.record_api.get(&restore.spec.record_name).await {
            Ok(r) => r,
            Err(e) if is_not_found(&e) => {
                let error_msg = format!("Backup record {} not found", restore.spec.record_name);
                warn!("MetadataRestore {}/{}: {}", namespace, name, error_msg);
                self.write_restore_status(
                    name,
                    namespace,
                    RestoreState::Failed,
                    Some(error_msg),
                    restore.metadata.generation,
                )
                .await;
                return Ok(());
            }
            Err(e) => return Err(ControllerError::Kube(e)),
        };

        // The backup worker stamps the location on the record; older
        // records resolve through their policy instead.
        let location_name = match &record.spec.backup_location {
            Some(loc) => loc.clone(),
            None => match self.policy_api.get(&record.spec.policy).await {
                Ok(policy) => policy.spec.destination,
                Err(e) if is_not_found(&e) => {
                    let error_msg = format!(
                        "Record {} names no backup location and policy {} is gone",
                        restore.spec.record_name, record.spec.policy
                    );
                    warn!("MetadataRestore {}/{}: {}", namespace, name, error_msg);
                    self.write_restore_status(
                        name,
                        namespace,
                        RestoreState::Failed,
                        Some(error_msg),
                        restore.metadata.generation,
                    )
                    .await;
                    return Ok(());
                }
                Err(e) => return Err(ControllerError::Kube(e)),
            },
        };

        let location = match self.location_api.get(&location_name).await {
            Ok(loc) => loc,
            Err(e) if is_not_found(&e) => {
                let error_msg = format!("BackupLocation {} not found", location_name);
                warn!("MetadataRestore {}/{}: {}", namespace, name, error_msg);
                self.write_restore_status(
                    name,
                    namespace,
                    RestoreState::Failed,
                    Some(error_msg),
                    restore.metadata.generation,
                )
                .await;
                return Ok(());
            }
            Err(e) => return Err(ControllerError::Kube(e)),
        };

        // The pod name is deterministic; a leftover pod from the previous
        // generation is replaced, not reused.
        let pod_name = restore_pod_name(name);
        match self.pod_api.delete(&pod_name, &DeleteParams::default()).await {
            Ok(_) => info!("Replaced previous restore pod {}/{}", namespace, pod_name),
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(ControllerError::Kube(e)),
        }

        let mut pod = restore_pod(restore, &restore.spec.record_name, &location, &self.images)?;
        let owner = restore.controller_owner_ref(&()).ok_or_else(|| {
            ControllerError::InvalidConfig(format!(
                "MetadataRestore {}/{} has no owner identity",
                namespace, name
            ))
        })?;
        pod.metadata.owner_references = Some(vec![owner]);

        match self.pod_api.create(&PostParams::default(), &pod).await {
            Ok(_) => {
                info!("Started restore pod {}/{}", namespace, pod_name);
                self.metrics.restores_triggered.inc();
            }
            Err(e) if is_already_exists(&e) => {
                // The previous pod's deletion has not finished yet; the
                // requeue will replace it.
                warn!(
                    "Restore pod {}/{} still terminating, will retry",
                    namespace, pod_name
                );
                return Err(ControllerError::Kube(e));
            }
            Err(e) => {
                let error_msg = format!("Failed to start restore pod: {}", e);
                warn!("MetadataRestore {}/{}: {}", namespace, name, error_msg);
                // No observed generation so the retry is not gated out.
                self.write_restore_status(name, namespace, RestoreState::Failed, Some(error_msg), None)
                    .await;
                return Err(ControllerError::Kube(e));
            }
        }

        // Best-effort; the restore worker overwrites this with the
        // terminal state.
        self.write_restore_status(
            name,
            namespace,
            RestoreState::Triggered,
            None,
            restore.metadata.generation,
        )
        .await;

        self.reset_error(&resource_key);
        Ok(())
    }

    async fn write_restore_status(
        &self,
        name: &str,
        namespace: &str,
        state: RestoreState,
        error: Option<String>,
        observed_generation: Option<i64>,
    ) {
        let patch = Self::restore_status_patch(state, error, observed_generation);
        let pp = PatchParams::default();
        if let Err(e) = self
            .restore_api
            .patch_status(name, &pp, &Patch::Merge(&patch))
            .await
        {
            warn!(
                "Failed to update MetadataRestore {}/{} status: {}",
                namespace, name, e
            );
        }
    }
}
