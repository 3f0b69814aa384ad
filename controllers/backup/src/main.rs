//! Metadr backup controller
//!
//! Unified controller for the Metadr CRDs:
//! - BackupLocation: Initializes restic repositories on S3 targets
//! - MetadataBackupPolicy: Creates and corrects the backup CronJob
//! - MetadataBackupRecord: Enforces the per-policy retention limit
//! - MetadataRestore: Triggers one-shot restore pods
//!
//! The controller converges child workloads (pods and CronJobs) toward
//! the state declared by the CRs and reports progress through their
//! status subresources.

mod backoff;
mod controller;
mod error;
mod metrics;
mod reconcile_helpers;
mod reconciler;
mod watcher;

#[cfg(test)]
mod reconcile_helpers_test;
#[cfg(test)]
mod test_utils;

use std::env;
use std::net::SocketAddr;

use tracing::info;

use workload::Images;

use crate::controller::Controller;
use crate::error::ControllerError;

const DEFAULT_RESTIC_IMAGE: &str = "restic/restic";

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt::init();

    info!("Starting Metadr backup controller");

    // Load configuration from environment variables
    let namespace = env::var("WATCH_NAMESPACE").unwrap_or_else(|_| "default".to_string());
    let util_image = env::var("BACKUP_UTIL_IMAGE").map_err(|_| {
        ControllerError::InvalidConfig(
            "BACKUP_UTIL_IMAGE environment variable is required".to_string(),
        )
    })?;
    let restic_image =
        env::var("RESTIC_IMAGE").unwrap_or_else(|_| DEFAULT_RESTIC_IMAGE.to_string());
    let metrics_addr: SocketAddr = env::var("METRICS_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()
        .map_err(|e| ControllerError::InvalidConfig(format!("METRICS_ADDR is invalid: {}", e)))?;

    info!("Configuration:");
    info!("  Namespace: {}", namespace);
    info!("  Backup util image: {}", util_image);
    info!("  Restic image: {}", restic_image);
    info!("  Metrics address: {}", metrics_addr);

    let images = Images {
        restic: restic_image,
        util: util_image,
    };

    // Initialize and run controller
    let controller = Controller::new(namespace, images, metrics_addr).await?;
    controller.run().await?;

    Ok(())
}
