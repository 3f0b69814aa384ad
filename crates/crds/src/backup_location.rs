//! BackupLocation CRD
//!
//! Describes a remote object-store repository where cluster metadata
//! backups are kept. Creating one triggers a one-shot repository
//! initialization workload.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "metadr.io",
    version = "v1alpha1",
    kind = "BackupLocation",
    namespaced,
    status = "BackupLocationStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct BackupLocationSpec {
    /// S3-compatible endpoint URL
    pub url: String,

    /// Bucket holding the repository
    pub bucket_name: String,

    /// Name of the Secret with `access_key`, `secret_key` and
    /// `restic_repo_password` entries
    pub credentials: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct BackupLocationStatus {
    /// Repository initialization state
    pub init_state: InitState,

    /// Error message if initialization failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_error_message: Option<String>,

    /// When the init attempt was started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_time: Option<chrono::DateTime<chrono::Utc>>,

    /// Generation last handled by the controller; an init workload is
    /// started at most once per generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Repository initialization state.
///
/// The controller moves a location to `Initializing` when it starts the
/// init workload; the worker reports `Initialized` or `Failed` back
/// through the status subresource.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum InitState {
    /// No init attempt made yet
    #[default]
    Pending,

    /// Init workload started, completion not yet observed
    Initializing,

    /// Repository initialized
    Initialized,

    /// Init attempt failed
    Failed,
}
