//! Kubernetes resource watchers.
//!
//! This module handles watching the Metadr CRDs for changes and
//! triggering reconciliation using kube_runtime::Controller.
//!
//! All watchers use a generic `run_controller()` helper that handles the
//! reconcile loop with automatic reconnection and a backoff-aware error
//! policy. Kinds with owned child workloads subscribe to those children
//! too, so a deleted or edited child wakes the owning reconciler.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::{Api, ResourceExt};
use kube_runtime::{
    controller::{Action, Config as ControllerConfig},
    watcher, Controller,
};
use tracing::{debug, error, info};

use crds::{BackupLocation, MetadataBackupPolicy, MetadataBackupRecord, MetadataRestore};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::Pod;

use crate::error::ControllerError;
use crate::reconciler::Reconciler;

/// Generic watcher helper over kube_runtime::Controller.
async fn watch_resource<K, F>(
    api: Api<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &str,
) -> Result<(), ControllerError>
where
    K: kube::Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Action, ControllerError>> + Send>> + Send + Sync + Clone + 'static,
{
    let controller = Controller::new(api, watcher::Config::default());
    run_controller(controller, reconciler, reconcile_fn, resource_name).await
}

/// Like `watch_resource`, but also subscribes to a child kind the
/// resource owns, so child deletion or drift triggers the parent's
/// reconcile through its owner reference.
async fn watch_owned_resource<K, C, F>(
    api: Api<K>,
    child_api: Api<C>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &str,
) -> Result<(), ControllerError>
where
    K: kube::Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    C: kube::Resource<DynamicType = ()> + Clone + Send + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    F: Fn(Arc<Reconciler>, Arc<K>) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Action, ControllerError>> + Send>> + Send + Sync + Clone + 'static,
{
    let controller =
        Controller::new(api, watcher::Config::default()).owns(child_api, watcher::Config::default());
    run_controller(controller, reconciler, reconcile_fn, resource_name).await
}

/// Runs a configured Controller until its stream ends.
///
/// The Controller handles reconnection and event batching; this wrapper
/// adds the error policy shared by every kind: retryable errors requeue
/// with the per-resource Fibonacci backoff, anything else parks until
/// the next watch event (a dangling reference cannot be fixed by
/// retrying, only by someone editing a resource).
async fn run_controller<K, F>(
    controller: Controller<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &str,
) -> Result<(), ControllerError>
where
    K: kube::Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Action, ControllerError>> + Send>> + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = |obj: Arc<K>, err: &ControllerError, ctx: Arc<Reconciler>| {
        let resource_key = format!(
            "{}/{}",
            obj.namespace().unwrap_or_else(|| "default".to_string()),
            obj.name_any()
        );

        if err.is_retryable() {
            ctx.increment_error(&resource_key);
            let (backoff_seconds, error_count) = ctx.get_backoff_for_resource(&resource_key);
            error!(
                "Reconciliation error for {} {} (attempt {}), requeue in {}s: {}",
                resource_name, resource_key, error_count, backoff_seconds, err
            );
            Action::requeue(Duration::from_secs(backoff_seconds))
        } else {
            error!(
                "Reconciliation error for {} {} cannot be retried, waiting for change: {}",
                resource_name, resource_key, err
            );
            Action::await_change()
        }
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        let resource_name = resource_name.to_string();
        async move {
            debug!("Reconciling {} {:?}", resource_name, obj.name_any());

            match reconcile_fn(ctx, obj).await {
                Ok(action) => Ok(action),
                Err(e) => {
                    error!("Reconciliation failed for {}: {}", resource_name, e);
                    Err(e)
                }
            }
        }
    };

    // Debounce batches the event bursts a status write causes; the
    // concurrency cap bounds API load across the four watchers.
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(5))
        .concurrency(3);

    controller
        .with_config(controller_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            if let Err(e) = res {
                error!("Controller error for {}: {}", resource_name, e);
            }
        })
        .await;

    Ok(())
}

/// Watches the Metadr CRDs for changes.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    location_api: Api<BackupLocation>,
    policy_api: Api<MetadataBackupPolicy>,
    record_api: Api<MetadataBackupRecord>,
    restore_api: Api<MetadataRestore>,
    pod_api: Api<Pod>,
    cronjob_api: Api<CronJob>,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        reconciler: Arc<Reconciler>,
        location_api: Api<BackupLocation>,
        policy_api: Api<MetadataBackupPolicy>,
        record_api: Api<MetadataBackupRecord>,
        restore_api: Api<MetadataRestore>,
        pod_api: Api<Pod>,
        cronjob_api: Api<CronJob>,
    ) -> Self {
        Self {
            reconciler,
            location_api,
            policy_api,
            record_api,
            restore_api,
            pod_api,
            cronjob_api,
        }
    }

    /// Starts watching BackupLocation resources and their init pods.
    pub async fn watch_backup_locations(&self) -> Result<(), ControllerError> {
        watch_owned_resource(
            self.location_api.clone(),
            self.pod_api.clone(),
            self.reconciler.clone(),
            |reconciler, resource| {
                Box::pin(async move {
                    match reconciler.reconcile_backup_location(&*resource).await {
                        Ok(()) => Ok(Action::await_change()),
                        Err(e) => Err(e),
                    }
                })
            },
            "BackupLocation",
        )
        .await
    }

    /// Starts watching MetadataBackupPolicy resources and their CronJobs.
    pub async fn watch_backup_policies(&self) -> Result<(), ControllerError> {
        watch_owned_resource(
            self.policy_api.clone(),
            self.cronjob_api.clone(),
            self.reconciler.clone(),
            |reconciler, resource| {
                Box::pin(async move {
                    match reconciler.reconcile_backup_policy(&*resource).await {
                        Ok(()) => Ok(Action::await_change()),
                        Err(e) => Err(e),
                    }
                })
            },
            "MetadataBackupPolicy",
        )
        .await
    }

    /// Starts watching MetadataBackupRecord resources.
    ///
    /// Snapshot-delete pods carry no owner reference, so records watch
    /// only themselves; pod cleanup runs inside the retention pass.
    pub async fn watch_backup_records(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.record_api.clone(),
            self.reconciler.clone(),
            |reconciler, resource| {
                Box::pin(async move {
                    match reconciler.reconcile_backup_record(&*resource).await {
                        Ok(()) => Ok(Action::await_change()),
                        Err(e) => Err(e),
                    }
                })
            },
            "MetadataBackupRecord",
        )
        .await
    }

    /// Starts watching MetadataRestore resources and their restore pods.
    pub async fn watch_metadata_restores(&self) -> Result<(), ControllerError> {
        watch_owned_resource(
            self.restore_api.clone(),
            self.pod_api.clone(),
            self.reconciler.clone(),
            |reconciler, resource| {
                Box::pin(async move {
                    match reconciler.reconcile_metadata_restore(&*resource).await {
                        Ok(()) => Ok(Action::await_change()),
                        Err(e) => Err(e),
                    }
                })
            },
            "MetadataRestore",
        )
        .await
    }
}
