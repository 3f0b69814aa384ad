//! Reconciliation logic for the Metadr CRDs.
//!
//! One submodule per resource kind:
//! - `backup_location`: repository initialization for BackupLocations
//! - `backup_policy`: backup CronJob creation and drift correction
//! - `backup_record`: retention for MetadataBackupRecords
//! - `metadata_restore`: one-shot restore triggering

pub mod backup_location;
pub mod backup_policy;
pub mod backup_record;
pub mod metadata_restore;

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Patch, PatchParams};
use kube::Api;
use serde::de::DeserializeOwned;
use tracing::warn;

use crds::{BackupLocation, InitState, MetadataBackupPolicy, MetadataBackupRecord, MetadataRestore, RestoreState};
use workload::Images;

use crate::backoff::FibonacciBackoff;
use crate::error::ControllerError;
use crate::metrics::Metrics;

/// Finalizer on BackupLocation resources.
pub(crate) const LOCATION_FINALIZER: &str = "backuplocation.finalizers.metadr.io";

/// Finalizer on MetadataBackupPolicy resources.
pub(crate) const POLICY_FINALIZER: &str = "policy.finalizers.metadr.io";

/// Finalizer on MetadataBackupRecord resources.
pub(crate) const RECORD_FINALIZER: &str = "record.finalizers.metadr.io";

/// Finalizer on MetadataRestore resources.
pub(crate) const RESTORE_FINALIZER: &str = "restore.finalizers.metadr.io";

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(1, 10), // 1 minute min, 10 minutes max
            error_count: 0,
        }
    }

    fn increment_error(&mut self) {
        self.error_count += 1;
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Reconciles Metadr resources.
pub struct Reconciler {
    pub(crate) location_api: Api<BackupLocation>,
    pub(crate) policy_api: Api<MetadataBackupPolicy>,
    pub(crate) record_api: Api<MetadataBackupRecord>,
    pub(crate) restore_api: Api<MetadataRestore>,
    pub(crate) pod_api: Api<Pod>,
    pub(crate) cronjob_api: Api<CronJob>,
    pub(crate) images: Images,
    pub(crate) metrics: Arc<Metrics>,
    /// Error count tracking per resource (namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        location_api: Api<BackupLocation>,
        policy_api: Api<MetadataBackupPolicy>,
        record_api: Api<MetadataBackupRecord>,
        restore_api: Api<MetadataRestore>,
        pod_api: Api<Pod>,
        cronjob_api: Api<CronJob>,
        images: Images,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            location_api,
            policy_api,
            record_api,
            restore_api,
            pod_api,
            cronjob_api,
            images,
            metrics,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Helper to create a BackupLocation status patch.
    ///
    /// CRD validation schemas expect PascalCase enum values ("Pending",
    /// "Initializing", etc.), so the JSON is built by hand to match.
    pub(crate) fn location_status_patch(
        state: InitState,
        error: Option<String>,
        observed_generation: Option<i64>,
    ) -> serde_json::Value {
        let state_str = match state {
            InitState::Pending => "Pending",
            InitState::Initializing => "Initializing",
            InitState::Initialized => "Initialized",
            InitState::Failed => "Failed",
        };

        serde_json::json!({
            "status": {
                "initState": state_str,
                "initErrorMessage": error,
                "initTime": chrono::Utc::now(),
                "observedGeneration": observed_generation,
            }
        })
    }

    /// Helper to create a MetadataBackupPolicy status patch. The
    /// controller only owns the observed generation; backup outcome
    /// fields are written by the backup worker.
    pub(crate) fn policy_status_patch(observed_generation: Option<i64>) -> serde_json::Value {
        serde_json::json!({
            "status": {
                "observedGeneration": observed_generation,
            }
        })
    }

    /// Helper to create a patch for the backupStatus field alone. The
    /// controller stamps "Initializing" while setting up the recurring
    /// job; the backup worker owns the terminal value, so the patch must
    /// not touch any other status field.
    pub(crate) fn policy_backup_status_patch(backup_status: &str) -> serde_json::Value {
        serde_json::json!({
            "status": {
                "backupStatus": backup_status,
            }
        })
    }

    /// Helper to create a MetadataRestore status patch with PascalCase state.
    pub(crate) fn restore_status_patch(
        state: RestoreState,
        error: Option<String>,
        observed_generation: Option<i64>,
    ) -> serde_json::Value {
        let state_str = match state {
            RestoreState::Pending => "Pending",
            RestoreState::Triggered => "Triggered",
            RestoreState::Succeeded => "Succeeded",
            RestoreState::Failed => "Failed",
        };

        serde_json::json!({
            "status": {
                "restoreState": state_str,
                "restoreErrorMessage": error,
                "restoreTime": chrono::Utc::now(),
                "observedGeneration": observed_generation,
            }
        })
    }

    /// Writes a complete finalizer list through a merge patch. JSON merge
    /// patches replace arrays wholesale, so the caller passes the full
    /// recomputed list.
    pub(crate) async fn patch_finalizers<K>(
        &self,
        api: &Api<K>,
        name: &str,
        finalizers: &[String],
    ) -> Result<K, ControllerError>
    where
        K: Clone + DeserializeOwned + Debug,
    {
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers,
            }
        });
        let pp = PatchParams::default();
        api.patch(name, &pp, &Patch::Merge(&patch))
            .await
            .map_err(ControllerError::Kube)
    }

    /// Get the Fibonacci backoff duration for a resource based on its error count
    ///
    /// Returns (backoff_seconds, error_count)
    pub fn get_backoff_for_resource(&self, resource_key: &str) -> (u64, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(resource_key.to_string())
                    .or_insert_with(BackoffState::new);
                let backoff_seconds = state.backoff.next_backoff_seconds();
                let error_count = state.error_count;
                (backoff_seconds, error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                (60, 0) // 60 seconds default
            }
        }
    }

    /// Increment error count for a resource
    pub fn increment_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            let state = states
                .entry(resource_key.to_string())
                .or_insert_with(BackoffState::new);
            state.increment_error();
        }
    }

    /// Reset error count for a resource (on successful reconciliation)
    pub fn reset_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(resource_key) {
                state.reset();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_status_patch_shape() {
        let patch = Reconciler::location_status_patch(InitState::Initializing, None, Some(2));

        assert_eq!(patch["status"]["initState"], "Initializing");
        assert_eq!(patch["status"]["observedGeneration"], 2);
        assert!(patch["status"]["initErrorMessage"].is_null());
        assert!(patch["status"]["initTime"].is_string());
    }

    #[test]
    fn test_location_status_patch_failure_carries_message() {
        let patch = Reconciler::location_status_patch(
            InitState::Failed,
            Some("credentials Secret missing".to_string()),
            Some(1),
        );

        assert_eq!(patch["status"]["initState"], "Failed");
        assert_eq!(
            patch["status"]["initErrorMessage"],
            "credentials Secret missing"
        );
    }

    #[test]
    fn test_restore_status_patch_shape() {
        let patch = Reconciler::restore_status_patch(RestoreState::Triggered, None, Some(5));

        assert_eq!(patch["status"]["restoreState"], "Triggered");
        assert_eq!(patch["status"]["observedGeneration"], 5);
        assert!(patch["status"]["restoreErrorMessage"].is_null());
    }

    #[test]
    fn test_policy_status_patch_shape() {
        let patch = Reconciler::policy_status_patch(Some(7));
        assert_eq!(patch["status"]["observedGeneration"], 7);
    }

    #[test]
    fn test_policy_backup_status_patch_touches_only_backup_status() {
        let patch = Reconciler::policy_backup_status_patch("Initializing");

        assert_eq!(patch["status"]["backupStatus"], "Initializing");
        // Merge patches overwrite every key they carry; worker-owned
        // fields and the observed generation must stay absent.
        assert!(patch["status"].get("observedGeneration").is_none());
        assert!(patch["status"].get("backupTime").is_none());
    }
}
