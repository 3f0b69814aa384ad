//! MetadataBackupRecord CRD
//!
//! One record per completed backup run, created by the backup worker.
//! The record controller consumes these for retention accounting; the
//! record itself carries no status subtree.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "metadr.io",
    version = "v1alpha1",
    kind = "MetadataBackupRecord",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct MetadataBackupRecordSpec {
    /// Snapshot identifier in the remote repository
    pub snapshot_id: String,

    /// Name of the MetadataBackupPolicy this backup was taken for
    pub policy: String,

    /// Name of the BackupLocation the snapshot lives in. Stamped by the
    /// backup worker so restores keep working after the policy is deleted;
    /// when absent, the location is resolved through the policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_location: Option<String>,
}
