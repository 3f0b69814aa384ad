//! Controller-specific error types.
//!
//! This module defines error types specific to the unified backup
//! controller that are not covered by upstream library errors, and the
//! retryability classification the watcher error policy acts on.

use kube::Error as KubeError;
use thiserror::Error;
use workload::TemplateError;

/// Errors that can occur in the backup controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Workload template could not be built
    #[error("Workload template error: {0}")]
    Template(#[from] TemplateError),

    /// BackupLocation referenced by another resource does not exist
    #[error("BackupLocation not found: {0}")]
    LocationNotFound(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Whether a retry can fix this error without a spec change.
    ///
    /// API and transport errors are transient, so the watcher requeues
    /// them with backoff. A dangling reference or bad configuration stays
    /// broken until someone edits a resource, so those park until the
    /// next watch event instead of churning the API server.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kube(_) | Self::Watch(_) | Self::Metrics(_) => true,
            Self::Template(_) | Self::LocationNotFound(_) | Self::InvalidConfig(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dangling_reference_is_not_retryable() {
        let err = ControllerError::LocationNotFound("nightly-loc".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_invalid_config_is_not_retryable() {
        let err = ControllerError::InvalidConfig("BACKUP_UTIL_IMAGE is not set".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_watch_error_is_retryable() {
        let err = ControllerError::Watch("stream closed".to_string());
        assert!(err.is_retryable());
    }
}
