//! MetadataBackupPolicy CRD
//!
//! Declares a recurring metadata backup: where it goes, when it runs and
//! how many completed backups to keep.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Option key selecting the node label that marks master nodes.
pub const MASTER_NODE_LABEL_OPTION: &str = "master-node-label-name";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "metadr.io",
    version = "v1alpha1",
    kind = "MetadataBackupPolicy",
    namespaced,
    status = "MetadataBackupPolicyStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MetadataBackupPolicySpec {
    /// Name of the BackupLocation resource backups are written to
    pub destination: String,

    /// Host directory with cluster certificates. Optional; when absent,
    /// certificates are not backed up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certs_dir: Option<String>,

    /// etcd client endpoint
    #[serde(default = "default_etcd_endpoint")]
    pub etcd_endpoint: String,

    /// Name of the Secret with etcd client certificates
    #[serde(default = "default_etcd_creds")]
    pub etcd_creds: String,

    /// Cron schedule, same syntax as a CronJob schedule
    pub schedule: String,

    /// Free-form key=value options
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,

    /// How many completed backups to keep; older ones are retired
    #[serde(default = "default_retain_num_backups")]
    pub retain_num_backups: i64,

    /// Pause the recurring backup without deleting the policy
    #[serde(default)]
    pub suspend: bool,
}

fn default_etcd_endpoint() -> String {
    "https://127.0.0.1:2379".to_string()
}

fn default_etcd_creds() -> String {
    "etcd-creds".to_string()
}

fn default_retain_num_backups() -> i64 {
    120
}

impl MetadataBackupPolicySpec {
    /// Node label marking the nodes backup pods must run on.
    ///
    /// Defaults to the well-known control-plane label; an entry in the
    /// options map overrides it. Empty override values are ignored.
    pub fn master_node_label(&self) -> &str {
        match self.options.get(MASTER_NODE_LABEL_OPTION) {
            Some(val) if !val.is_empty() => val,
            _ => "node-role.kubernetes.io/master",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct MetadataBackupPolicyStatus {
    /// Generation last handled by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Outcome of the most recent backup run, reported by the backup worker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_status: Option<String>,

    /// When the most recent backup run finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_time: Option<String>,
}
