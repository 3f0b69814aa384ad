//! MetadataBackupPolicy reconciler
//!
//! Keeps one backup CronJob per policy: creates it when missing and
//! corrects schedule or suspend drift in place. The CronJob is owned by
//! the policy so garbage collection removes it on policy deletion, and
//! the watcher subscribes to owned CronJobs, so a deleted or edited
//! CronJob wakes this loop. Convergence therefore runs on every event;
//! only the status write is gated on the generation.

use kube::api::{Patch, PatchParams, PostParams};
use kube::Resource;
use tracing::{info, warn};

use crds::MetadataBackupPolicy;
use workload::{backup_cronjob, backup_cronjob_name};

use super::{Reconciler, POLICY_FINALIZER};
use crate::error::ControllerError;
use crate::reconcile_helpers::{
    cronjob_drift_patch, is_already_exists, is_not_found, needs_reconcile, with_finalizer,
    without_finalizer,
};

impl Reconciler {
    pub async fn reconcile_backup_policy(
        &self,
        policy: &MetadataBackupPolicy,
    ) -> Result<(), ControllerError> {
        let name = policy.metadata.name.as_deref().ok_or_else(|| {
            ControllerError::InvalidConfig("MetadataBackupPolicy missing name".to_string())
        })?;
        let namespace = policy.metadata.namespace.as_deref().unwrap_or("default");
        let resource_key = format!("{}/{}", namespace, name);

        info!("Reconciling MetadataBackupPolicy {}/{}", namespace, name);

        let finalizers = policy.metadata.finalizers.as_deref().unwrap_or(&[]);

        if policy.metadata.deletion_timestamp.is_some() {
            if let Some(remaining) = without_finalizer(finalizers, POLICY_FINALIZER) {
                info!(
                    "MetadataBackupPolicy {}/{} deleted, releasing finalizer",
                    namespace, name
                );
                self.patch_finalizers(&self.policy_api, name, &remaining)
                    .await?;
            }
            return Ok(());
        }

        if let Some(updated) = with_finalizer(finalizers, POLICY_FINALIZER) {
            self.patch_finalizers(&self.policy_api, name, &updated)
                .await?;
        }

        let cron_name = backup_cronjob_name(name);

        match self.cronjob_api.get(&cron_name).await {
            Ok(cron) => {
                // CronJob exists; only schedule and suspend are corrected
                // in place.
                if let Some(drift) = cronjob_drift_patch(&cron, &policy.spec) {
                    info!(
                        "Backup CronJob {}/{} drifted from policy, correcting",
                        namespace, cron_name
                    );
                    let pp = PatchParams::default();
                    self.cronjob_api
                        .patch(&cron_name, &pp, &Patch::Merge(&drift))
                        .await?;
                }
            }
            Err(e) if is_not_found(&e) => {
                self.create_backup_cronjob(policy, name, namespace, &cron_name)
                    .await?;
            }
            Err(e) => return Err(ControllerError::Kube(e)),
        }

        let observed = policy.status.as_ref().and_then(|s| s.observed_generation);
        if needs_reconcile(observed, policy.metadata.generation) {
            self.write_policy_status(name, namespace, policy.metadata.generation)
                .await;
        }

        self.reset_error(&resource_key);
        Ok(())
    }

    async fn create_backup_cronjob(
        &self,
        policy: &MetadataBackupPolicy,
        name: &str,
        namespace: &str,
        cron_name: &str,
    ) -> Result<(), ControllerError> {
        let location = match self.location_api.get(&policy.spec.destination).await {
            Ok(loc) => loc,
            Err(e) if is_not_found(&e) => {
                // Dangling destination stays broken until someone edits a
                // resource; parking beats a requeue storm.
                return Err(ControllerError::LocationNotFound(format!(
                    "{}/{} referenced by policy {}",
                    namespace, policy.spec.destination, name
                )));
            }
            Err(e) => return Err(ControllerError::Kube(e)),
        };

        let mut cron = backup_cronjob(policy, &location, &self.images)?;
        let owner = policy.controller_owner_ref(&()).ok_or_else(|| {
            ControllerError::InvalidConfig(format!(
                "MetadataBackupPolicy {}/{} has no owner identity",
                namespace, name
            ))
        })?;
        cron.metadata.owner_references = Some(vec![owner]);

        // The backup worker reports the terminal outcome; the controller
        // only marks that the recurring job is being set up.
        self.write_policy_backup_status(name, namespace, "Initializing")
            .await;

        info!("Creating backup CronJob {}/{}", namespace, cron_name);
        match self.cronjob_api.create(&PostParams::default(), &cron).await {
            Ok(_) => Ok(()),
            Err(e) if is_already_exists(&e) => {
                info!("Backup CronJob {}/{} already exists", namespace, cron_name);
                Ok(())
            }
            Err(e) => Err(ControllerError::Kube(e)),
        }
    }

    async fn write_policy_status(&self, name: &str, namespace: &str, generation: Option<i64>) {
        let patch = Self::policy_status_patch(generation);
        let pp = PatchParams::default();
        if let Err(e) = self
            .policy_api
            .patch_status(name, &pp, &Patch::Merge(&patch))
            .await
        {
            warn!(
                "Failed to update MetadataBackupPolicy {}/{} status: {}",
                namespace, name, e
            );
        }
    }

    async fn write_policy_backup_status(&self, name: &str, namespace: &str, backup_status: &str) {
        let patch = Self::policy_backup_status_patch(backup_status);
        let pp = PatchParams::default();
        if let Err(e) = self
            .policy_api
            .patch_status(name, &pp, &Patch::Merge(&patch))
            .await
        {
            warn!(
                "Failed to update MetadataBackupPolicy {}/{} backup status: {}",
                namespace, name, e
            );
        }
    }
}
