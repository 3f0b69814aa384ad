//! Test utilities for unit testing reconcilers
//!
//! This module provides helpers for creating test resources.

#[cfg(test)]
use crds::*;
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
#[cfg(test)]
use kube::core::ObjectMeta;

/// Helper to create a test MetadataBackupPolicy with serde defaults applied
#[cfg(test)]
pub fn test_policy(name: &str, namespace: &str) -> MetadataBackupPolicy {
    let spec: MetadataBackupPolicySpec = serde_json::from_value(serde_json::json!({
        "destination": "nightly-loc",
        "schedule": "0 2 * * *",
    }))
    .expect("static policy spec must deserialize");

    MetadataBackupPolicy {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            generation: Some(1),
            ..Default::default()
        },
        spec,
        status: None,
    }
}

/// Helper to create a test MetadataBackupRecord with a creation timestamp
#[cfg(test)]
pub fn test_record_created_at(
    name: &str,
    namespace: &str,
    policy: &str,
    snapshot_id: &str,
    created: &str,
) -> MetadataBackupRecord {
    let timestamp = created
        .parse::<chrono::DateTime<chrono::Utc>>()
        .expect("static timestamp must parse");

    MetadataBackupRecord {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            creation_timestamp: Some(Time(timestamp)),
            ..Default::default()
        },
        spec: MetadataBackupRecordSpec {
            snapshot_id: snapshot_id.to_string(),
            policy: policy.to_string(),
            backup_location: None,
        },
    }
}
