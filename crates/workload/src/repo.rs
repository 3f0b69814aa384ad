//! Repository access contract shared by every workload template: the restic
//! endpoint string and the credential environment sourced from the
//! location's Secret.

use crds::BackupLocation;
use k8s_openapi::api::core::v1::{EnvVar, EnvVarSource, SecretKeySelector};

/// Secret key holding the S3 access key.
pub const ACCESS_KEY_SECRET_KEY: &str = "access_key";

/// Secret key holding the S3 secret key.
pub const SECRET_KEY_SECRET_KEY: &str = "secret_key";

/// Secret key holding the restic repository password.
pub const RESTIC_PASSWORD_SECRET_KEY: &str = "restic_repo_password";

/// How a workload reaches the remote restic repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoAccess {
    /// restic repository endpoint, `s3:<url>/<bucket>`
    pub endpoint: String,

    /// Name of the Secret with access key, secret key and repo password
    pub credentials_secret: String,
}

impl RepoAccess {
    /// Derives repository access from a backup location's spec.
    pub fn from_location(location: &BackupLocation) -> Self {
        Self {
            endpoint: format!("s3:{}/{}", location.spec.url, location.spec.bucket_name),
            credentials_secret: location.spec.credentials.clone(),
        }
    }

    /// Credential environment every repository-touching container gets:
    /// `AWS_ACCESS_KEY`, `AWS_SECRET_KEY` and `RESTIC_PASSWORD`, each
    /// sourced from the credentials Secret.
    pub fn credential_env(&self) -> Vec<EnvVar> {
        vec![
            secret_env("AWS_ACCESS_KEY", &self.credentials_secret, ACCESS_KEY_SECRET_KEY),
            secret_env("AWS_SECRET_KEY", &self.credentials_secret, SECRET_KEY_SECRET_KEY),
            secret_env(
                "RESTIC_PASSWORD",
                &self.credentials_secret,
                RESTIC_PASSWORD_SECRET_KEY,
            ),
        ]
    }
}

/// Environment variable sourced from one key of a Secret.
pub fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Plain-value environment variable.
pub fn literal_env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}
