//! Prometheus metrics for the backup controller.
//!
//! One counter per side effect the control loop actually drives:
//! repository inits started, backups observed, records retired by
//! retention and restores triggered. Served over HTTP together with a
//! liveness endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use tracing::info;

use crate::error::ControllerError;

/// Counters tracking the controller's side effects.
#[derive(Debug)]
pub struct Metrics {
    /// Repository init pods started for BackupLocations
    pub repo_inits_started: IntCounter,
    /// Backup records observed for the first time
    pub backups_recorded: IntCounter,
    /// Backup records deleted by retention
    pub records_retired: IntCounter,
    /// Restore pods started for MetadataRestores
    pub restores_triggered: IntCounter,
    registry: Registry,
}

impl Metrics {
    /// Creates the registry and registers all counters.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let repo_inits_started = IntCounter::new(
            "metadr_repo_inits_started_total",
            "Number of repository init pods started",
        )?;
        registry.register(Box::new(repo_inits_started.clone()))?;

        let backups_recorded = IntCounter::new(
            "metadr_backups_recorded_total",
            "Number of metadata backup records observed",
        )?;
        registry.register(Box::new(backups_recorded.clone()))?;

        let records_retired = IntCounter::new(
            "metadr_backup_records_retired_total",
            "Number of metadata backup records deleted by retention",
        )?;
        registry.register(Box::new(records_retired.clone()))?;

        let restores_triggered = IntCounter::new(
            "metadr_restores_triggered_total",
            "Number of restore pods started",
        )?;
        registry.register(Box::new(restores_triggered.clone()))?;

        Ok(Self {
            repo_inits_started,
            backups_recorded,
            records_retired,
            restores_triggered,
            registry,
        })
    }

    /// Renders the registry in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| prometheus::Error::Msg(format!("metrics are not valid UTF-8: {e}")))
    }
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> Result<String, StatusCode> {
    metrics
        .render()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn healthz_handler() -> &'static str {
    "ok"
}

/// Serves `/metrics` and `/healthz` until the process exits.
pub async fn serve(addr: SocketAddr, metrics: Arc<Metrics>) -> Result<(), ControllerError> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(metrics);

    info!("Serving metrics on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ControllerError::Watch(format!("Failed to bind metrics server: {e}")))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| ControllerError::Watch(format!("Metrics server error: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_show_up_in_rendered_output() {
        let metrics = Metrics::new().unwrap();
        metrics.repo_inits_started.inc();
        metrics.records_retired.inc();
        metrics.records_retired.inc();

        let rendered = metrics.render().unwrap();
        assert!(rendered.contains("metadr_repo_inits_started_total 1"));
        assert!(rendered.contains("metadr_backup_records_retired_total 2"));
        assert!(rendered.contains("metadr_backups_recorded_total 0"));
        assert!(rendered.contains("metadr_restores_triggered_total 0"));
    }
}
