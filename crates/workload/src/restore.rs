//! Restore pod template.
//!
//! The restore worker pulls a recorded snapshot out of the repository and
//! unpacks it into the PVC named by the MetadataRestore spec. It reports
//! its outcome back through the MetadataRestore status, which is why the
//! pod learns its own name through the downward API.

use std::collections::BTreeMap;

use crds::{BackupLocation, MetadataRestore};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, ObjectFieldSelector, PersistentVolumeClaimVolumeSource, Pod,
    PodSpec, Volume, VolumeMount,
};
use kube::core::ObjectMeta;

use crate::repo::literal_env;
use crate::{
    Images, RESTORE_RECORD_LABEL, RepoAccess, TemplateError, WORKLOAD_TYPE_LABEL, object_name,
    object_namespace, restore_pod_name,
};

/// Where the restored data lands inside the worker container.
const RESTORE_DEST_DIR: &str = "/restore";

/// Pod restoring the snapshot behind `record_name` into the restore's PVC.
pub fn restore_pod(
    restore: &MetadataRestore,
    record_name: &str,
    location: &BackupLocation,
    images: &Images,
) -> Result<Pod, TemplateError> {
    let name = object_name(&restore.metadata, "MetadataRestore")?;
    let namespace = object_namespace(&restore.metadata, "MetadataRestore")?;
    let access = RepoAccess::from_location(location);

    let labels = BTreeMap::from([
        (WORKLOAD_TYPE_LABEL.to_string(), "restore".to_string()),
        (RESTORE_RECORD_LABEL.to_string(), record_name.to_string()),
    ]);

    let mut env: Vec<EnvVar> = vec![EnvVar {
        name: "MY_POD_NAME".to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: "metadata.name".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }];
    env.extend(access.credential_env());
    env.extend([
        literal_env("MDR_RESTORE_NAME", name),
        literal_env("RESTIC_REPO", access.endpoint.clone()),
        literal_env("MDR_RESTORE_DEST", RESTORE_DEST_DIR),
    ]);

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(restore_pod_name(name)),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PodSpec {
            restart_policy: Some("Never".to_string()),
            volumes: Some(vec![Volume {
                name: "restore-target".to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: restore.spec.pvc_name.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            containers: vec![Container {
                name: name.to_string(),
                image: Some(images.util.clone()),
                volume_mounts: Some(vec![VolumeMount {
                    name: "restore-target".to_string(),
                    mount_path: RESTORE_DEST_DIR.to_string(),
                    ..Default::default()
                }]),
                env: Some(env),
                args: Some(vec!["restore".to_string()]),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{BackupLocationSpec, MetadataRestoreSpec};

    fn images() -> Images {
        Images {
            restic: "restic/restic".to_string(),
            util: "metadr/util:1.0".to_string(),
        }
    }

    fn location() -> BackupLocation {
        let mut loc = BackupLocation::new(
            "nightly-loc",
            BackupLocationSpec {
                url: "http://minio:9000".to_string(),
                bucket_name: "meta".to_string(),
                credentials: "creds".to_string(),
            },
        );
        loc.metadata.namespace = Some("backups".to_string());
        loc
    }

    fn restore() -> MetadataRestore {
        let mut mr = MetadataRestore::new(
            "dr-restore",
            MetadataRestoreSpec {
                record_name: "nightly-rec-7".to_string(),
                pvc_name: "restore-pvc".to_string(),
            },
        );
        mr.metadata.namespace = Some("backups".to_string());
        mr
    }

    #[test]
    fn test_restore_pod_shape() {
        let pod = restore_pod(&restore(), "nightly-rec-7", &location(), &images()).unwrap();

        assert_eq!(pod.metadata.name.as_deref(), Some("dr-restore-mr"));
        let labels = pod.metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get(WORKLOAD_TYPE_LABEL), Some(&"restore".to_string()));
        assert_eq!(
            labels.get(RESTORE_RECORD_LABEL),
            Some(&"nightly-rec-7".to_string())
        );

        let spec = pod.spec.unwrap();
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));

        let pvc = spec.volumes.as_ref().unwrap()[0]
            .persistent_volume_claim
            .as_ref()
            .unwrap();
        assert_eq!(pvc.claim_name, "restore-pvc");

        let mounts = spec.containers[0].volume_mounts.as_ref().unwrap();
        assert_eq!(mounts[0].mount_path, "/restore");
    }

    #[test]
    fn test_restore_pod_env_contract() {
        let pod = restore_pod(&restore(), "nightly-rec-7", &location(), &images()).unwrap();
        let spec = pod.spec.unwrap();
        let env = spec.containers[0].env.as_ref().unwrap();

        let names: Vec<&str> = env.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "MY_POD_NAME",
                "AWS_ACCESS_KEY",
                "AWS_SECRET_KEY",
                "RESTIC_PASSWORD",
                "MDR_RESTORE_NAME",
                "RESTIC_REPO",
                "MDR_RESTORE_DEST",
            ]
        );

        let my_pod = env.iter().find(|e| e.name == "MY_POD_NAME").unwrap();
        let field_ref = my_pod
            .value_from
            .as_ref()
            .and_then(|src| src.field_ref.as_ref())
            .unwrap();
        assert_eq!(field_ref.field_path, "metadata.name");

        let dest = env.iter().find(|e| e.name == "MDR_RESTORE_DEST").unwrap();
        assert_eq!(dest.value.as_deref(), Some("/restore"));
    }
}
