//! BackupLocation reconciler
//!
//! Converges a BackupLocation by launching a one-shot pod that runs
//! `restic init` against the location's bucket. The init worker reports
//! the terminal state back through the status subresource; the controller
//! only records that an attempt was started for this generation.

use kube::api::{Patch, PatchParams, PostParams};
use kube::Resource;
use tracing::{debug, info, warn};

use crds::{BackupLocation, InitState};
use workload::repo_init_pod;

use super::{Reconciler, LOCATION_FINALIZER};
use crate::error::ControllerError;
use crate::reconcile_helpers::{is_already_exists, needs_reconcile, with_finalizer, without_finalizer};

impl Reconciler {
    pub async fn reconcile_backup_location(
        &self,
        location: &BackupLocation,
    ) -> Result<(), ControllerError> {
        let name = location
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ControllerError::InvalidConfig("BackupLocation missing name".to_string()))?;
        let namespace = location.metadata.namespace.as_deref().unwrap_or("default");
        let resource_key = format!("{}/{}", namespace, name);

        info!("Reconciling BackupLocation {}/{}", namespace, name);

        let finalizers = location.metadata.finalizers.as_deref().unwrap_or(&[]);

        // Deletion runs before the generation gate; deleting a resource
        // does not bump its generation.
        if location.metadata.deletion_timestamp.is_some() {
            if let Some(remaining) = without_finalizer(finalizers, LOCATION_FINALIZER) {
                info!("BackupLocation {}/{} deleted, releasing finalizer", namespace, name);
                self.patch_finalizers(&self.location_api, name, &remaining)
                    .await?;
            }
            return Ok(());
        }

        // One init attempt per generation.
        let observed = location.status.as_ref().and_then(|s| s.observed_generation);
        if !needs_reconcile(observed, location.metadata.generation) {
            debug!(
                "BackupLocation {}/{} generation unchanged, skipping",
                namespace, name
            );
            return Ok(());
        }

        if let Some(updated) = with_finalizer(finalizers, LOCATION_FINALIZER) {
            self.patch_finalizers(&self.location_api, name, &updated)
                .await?;
        }

        let mut pod = repo_init_pod(location, &self.images)?;
        let owner = location.controller_owner_ref(&()).ok_or_else(|| {
            ControllerError::InvalidConfig(format!("BackupLocation {}/{} has no owner identity", namespace, name))
        })?;
        pod.metadata.owner_references = Some(vec![owner]);

        match self.pod_api.create(&PostParams::default(), &pod).await {
            Ok(created) => {
                info!(
                    "Started repo init pod {}/{}",
                    namespace,
                    created.metadata.name.as_deref().unwrap_or_default()
                );
                self.metrics.repo_inits_started.inc();
            }
            Err(e) if is_already_exists(&e) => {
                // A previous attempt for this generation got through.
                info!("Repo init pod for {}/{} already exists", namespace, name);
            }
            Err(e) => {
                let error_msg = format!("Failed to start repo init pod: {}", e);
                warn!("BackupLocation {}/{}: {}", namespace, name, error_msg);
                self.write_location_status(name, namespace, InitState::Failed, Some(error_msg), None)
                    .await;
                return Err(ControllerError::Kube(e));
            }
        }

        // Best-effort: a lost status write means one redundant init
        // attempt next reconcile, which restic rejects as already
        // initialized.
        self.write_location_status(
            name,
            namespace,
            InitState::Initializing,
            None,
            location.metadata.generation,
        )
        .await;

        self.reset_error(&resource_key);
        Ok(())
    }

    async fn write_location_status(
        &self,
        name: &str,
        namespace: &str,
        state: InitState,
        error: Option<String>,
        observed_generation: Option<i64>,
    ) {
        let patch = Self::location_status_patch(state, error, observed_generation);
        let pp = PatchParams::default();
        if let Err(e) = self
            .location_api
            .patch_status(name, &pp, &Patch::Merge(&patch))
            .await
        {
            warn!(
                "Failed to update BackupLocation {}/{} status: {}",
                namespace, name, e
            );
        }
    }
}
