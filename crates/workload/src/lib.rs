//! Metadr Workload Templates
//!
//! Pure builders for the pods and CronJobs the backup controllers launch:
//! repository initialization, recurring backups, snapshot deletion and
//! restores. No I/O happens here; the controllers own creation, ownership
//! wiring and error handling.

pub mod backup;
pub mod maintenance;
pub mod repo;
pub mod restore;

pub use backup::backup_cronjob;
pub use maintenance::{repo_init_pod, snapshot_delete_pod};
pub use repo::RepoAccess;
pub use restore::restore_pod;

use kube::core::ObjectMeta;
use thiserror::Error;

/// Label put on snapshot-deletion pods so cleanup can find them.
pub const SNAP_DELETION_POD_LABEL: &str = "metadr.io/snap-deletion-pod";

/// Label naming the workload type on restore pods.
pub const WORKLOAD_TYPE_LABEL: &str = "metadr.io/type";

/// Label naming the backup record a restore pod reads from.
pub const RESTORE_RECORD_LABEL: &str = "metadr.io/restore-record";

/// Container images the templates are built around.
#[derive(Debug, Clone)]
pub struct Images {
    /// Image running plain restic commands (repo init, snapshot delete)
    pub restic: String,

    /// Backup/restore worker image carrying the metadr utility
    pub util: String,
}

/// Errors from template construction.
#[derive(Error, Debug)]
pub enum TemplateError {
    /// The source resource has no name or namespace in its metadata.
    /// Resources read back from the API server always carry both.
    #[error("{kind} resource is missing metadata.{field}")]
    IncompleteMetadata {
        /// Resource kind
        kind: &'static str,
        /// `name` or `namespace`
        field: &'static str,
    },
}

/// Name of the one-shot pod initializing a location's repository.
pub fn repo_init_pod_name(location: &str) -> String {
    format!("{location}-init-pod")
}

/// Name of the CronJob running a policy's recurring backup.
pub fn backup_cronjob_name(policy: &str) -> String {
    format!("{policy}-backup-cronjob")
}

/// Name of the pod deleting one snapshot from the remote repository.
pub fn snapshot_delete_pod_name(record: &str, snapshot_id: &str) -> String {
    format!("{record}-snapdel-pod-{snapshot_id}")
}

/// Name of the pod carrying out a restore.
pub fn restore_pod_name(restore: &str) -> String {
    format!("{restore}-mr")
}

pub(crate) fn object_name<'a>(
    meta: &'a ObjectMeta,
    kind: &'static str,
) -> Result<&'a str, TemplateError> {
    meta.name
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or(TemplateError::IncompleteMetadata {
            kind,
            field: "name",
        })
}

pub(crate) fn object_namespace<'a>(
    meta: &'a ObjectMeta,
    kind: &'static str,
) -> Result<&'a str, TemplateError> {
    meta.namespace
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or(TemplateError::IncompleteMetadata {
            kind,
            field: "namespace",
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_workload_names() {
        assert_eq!(repo_init_pod_name("nightly-loc"), "nightly-loc-init-pod");
        assert_eq!(
            backup_cronjob_name("nightly-policy"),
            "nightly-policy-backup-cronjob"
        );
        assert_eq!(
            snapshot_delete_pod_name("nightly-backup-1", "abc123"),
            "nightly-backup-1-snapdel-pod-abc123"
        );
        assert_eq!(restore_pod_name("dr-restore"), "dr-restore-mr");
    }

    #[test]
    fn test_object_name_rejects_missing_or_empty() {
        let mut meta = ObjectMeta::default();
        assert!(object_name(&meta, "BackupLocation").is_err());

        meta.name = Some(String::new());
        assert!(object_name(&meta, "BackupLocation").is_err());

        meta.name = Some("loc".to_string());
        assert_eq!(object_name(&meta, "BackupLocation").unwrap(), "loc");
    }
}
