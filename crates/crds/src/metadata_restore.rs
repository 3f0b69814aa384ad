//! MetadataRestore CRD
//!
//! Creating one triggers a full restore of a recorded backup into a
//! persistent volume claim. Custom subresources are not available for
//! custom resources, so resource creation stands in for a "/restore" call.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "metadr.io",
    version = "v1alpha1",
    kind = "MetadataRestore",
    namespaced,
    status = "MetadataRestoreStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRestoreSpec {
    /// Name of the MetadataBackupRecord to restore from
    pub record_name: String,

    /// Name of the PersistentVolumeClaim the data is restored into
    pub pvc_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRestoreStatus {
    /// Generation last handled by the controller; exactly one restore
    /// workload is started per generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Restore progress
    pub restore_state: RestoreState,

    /// Error message if the restore could not be triggered or failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_error_message: Option<String>,

    /// When the restore attempt was started or finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// Restore progress state.
///
/// The controller writes `Triggered` and `Failed`; the restore worker
/// reports the terminal `Succeeded`/`Failed` through the status path.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum RestoreState {
    /// Not processed yet
    #[default]
    Pending,

    /// Restore workload started
    Triggered,

    /// Restore finished successfully
    Succeeded,

    /// Restore failed
    Failed,
}
