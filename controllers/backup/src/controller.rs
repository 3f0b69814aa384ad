//! Main controller implementation.
//!
//! This module contains the `Controller` struct that orchestrates
//! reconciliation and resource watching for the Metadr backup controller.
//!
//! The controller manages four CRD types:
//! - BackupLocation: Initializes restic repositories on backup targets
//! - MetadataBackupPolicy: Creates and corrects the backup CronJob
//! - MetadataBackupRecord: Enforces the retention limit per policy
//! - MetadataRestore: Triggers one-shot restore pods

use std::net::SocketAddr;
use std::sync::Arc;

use kube::{Api, Client};
use tokio::task::JoinHandle;
use tracing::info;

use crds::{BackupLocation, MetadataBackupPolicy, MetadataBackupRecord, MetadataRestore};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::Pod;
use workload::Images;

use crate::error::ControllerError;
use crate::metrics::{self, Metrics};
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;

/// Main controller for Metadr backup resource management.
pub struct Controller {
    location_watcher: JoinHandle<Result<(), ControllerError>>,
    policy_watcher: JoinHandle<Result<(), ControllerError>>,
    record_watcher: JoinHandle<Result<(), ControllerError>>,
    restore_watcher: JoinHandle<Result<(), ControllerError>>,
    metrics_server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(
        namespace: String,
        images: Images,
        metrics_addr: SocketAddr,
    ) -> Result<Self, ControllerError> {
        info!("Initializing Metadr backup controller");

        let kube_client = Client::try_default()
            .await
            .map_err(ControllerError::Kube)?;

        let ns = namespace.as_str();
        let location_api: Api<BackupLocation> = Api::namespaced(kube_client.clone(), ns);
        let policy_api: Api<MetadataBackupPolicy> = Api::namespaced(kube_client.clone(), ns);
        let record_api: Api<MetadataBackupRecord> = Api::namespaced(kube_client.clone(), ns);
        let restore_api: Api<MetadataRestore> = Api::namespaced(kube_client.clone(), ns);
        let pod_api: Api<Pod> = Api::namespaced(kube_client.clone(), ns);
        let cronjob_api: Api<CronJob> = Api::namespaced(kube_client.clone(), ns);

        let controller_metrics = Arc::new(Metrics::new()?);

        let reconciler = Reconciler::new(
            location_api.clone(),
            policy_api.clone(),
            record_api.clone(),
            restore_api.clone(),
            pod_api.clone(),
            cronjob_api.clone(),
            images,
            controller_metrics.clone(),
        );

        let reconciler_arc = Arc::new(reconciler);

        let watcher_instance = Arc::new(Watcher::new(
            reconciler_arc,
            location_api,
            policy_api,
            record_api,
            restore_api,
            pod_api,
            cronjob_api,
        ));

        // Start all watchers in background tasks
        let location_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_backup_locations().await })
        };

        let policy_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_backup_policies().await })
        };

        let record_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_backup_records().await })
        };

        let restore_watcher = {
            let watcher = watcher_instance;
            tokio::spawn(async move { watcher.watch_metadata_restores().await })
        };

        let metrics_server = {
            let server_metrics = controller_metrics.clone();
            tokio::spawn(async move { metrics::serve(metrics_addr, server_metrics).await })
        };

        Ok(Self {
            location_watcher,
            policy_watcher,
            record_watcher,
            restore_watcher,
            metrics_server,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Metadr backup controller running");

        // Wait for any watcher to exit (they should run forever)
        tokio::select! {
            result = &mut self.location_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("BackupLocation watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("BackupLocation watcher error: {}", e)))?;
            }
            result = &mut self.policy_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("MetadataBackupPolicy watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("MetadataBackupPolicy watcher error: {}", e)))?;
            }
            result = &mut self.record_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("MetadataBackupRecord watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("MetadataBackupRecord watcher error: {}", e)))?;
            }
            result = &mut self.restore_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("MetadataRestore watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("MetadataRestore watcher error: {}", e)))?;
            }
            result = &mut self.metrics_server => {
                result.map_err(|e| ControllerError::Watch(format!("metrics server panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("metrics server error: {}", e)))?;
            }
        }

        Ok(())
    }
}
