//! One-shot repository maintenance pods: `restic init` for a fresh
//! location and `restic forget --prune` for snapshots retired by
//! retention.

use std::collections::BTreeMap;

use crds::BackupLocation;
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec};
use kube::core::ObjectMeta;

use crate::{
    Images, RepoAccess, SNAP_DELETION_POD_LABEL, TemplateError, object_name, object_namespace,
    repo_init_pod_name, snapshot_delete_pod_name,
};

/// Pod initializing the restic repository behind a backup location.
///
/// Runs `restic -r <endpoint> init` once; restic fails the run itself if
/// the repository already exists.
pub fn repo_init_pod(location: &BackupLocation, images: &Images) -> Result<Pod, TemplateError> {
    let name = object_name(&location.metadata, "BackupLocation")?;
    let namespace = object_namespace(&location.metadata, "BackupLocation")?;
    let access = RepoAccess::from_location(location);

    let labels = BTreeMap::from([("app".to_string(), name.to_string())]);

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(repo_init_pod_name(name)),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: format!("{name}-init"),
                image: Some(images.restic.clone()),
                args: Some(vec![
                    "-r".to_string(),
                    access.endpoint.clone(),
                    "init".to_string(),
                ]),
                env: Some(access.credential_env()),
                ..Default::default()
            }],
            restart_policy: Some("Never".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Pod deleting one snapshot from the remote repository after its backup
/// record was retired by retention.
///
/// Takes the record name and namespace as plain values since the record is
/// already gone by the time this pod is built. The pod is labeled so the
/// keep-window cleanup can list it later; it carries no owner reference
/// for the same reason.
pub fn snapshot_delete_pod(
    location: &BackupLocation,
    record_name: &str,
    namespace: &str,
    snapshot_id: &str,
    images: &Images,
) -> Pod {
    let access = RepoAccess::from_location(location);

    let labels = BTreeMap::from([(SNAP_DELETION_POD_LABEL.to_string(), "true".to_string())]);

    Pod {
        metadata: ObjectMeta {
            name: Some(snapshot_delete_pod_name(record_name, snapshot_id)),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: format!("{record_name}-del"),
                image: Some(images.restic.clone()),
                args: Some(vec![
                    "-r".to_string(),
                    access.endpoint.clone(),
                    "forget".to_string(),
                    "--prune".to_string(),
                    snapshot_id.to_string(),
                ]),
                env: Some(access.credential_env()),
                ..Default::default()
            }],
            restart_policy: Some("Never".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::BackupLocationSpec;

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

    #[test]
    fn test_repo_init_pod_shape() {
        let pod = repo_init_pod(&location(), &images()).unwrap();

        assert_eq!(pod.metadata.name.as_deref(), Some("nightly-loc-init-pod"));
        assert_eq!(pod.metadata.namespace.as_deref(), Some("backups"));
        assert_eq!(
            pod.metadata.labels.as_ref().unwrap().get("app"),
            Some(&"nightly-loc".to_string())
        );

        let spec = pod.spec.unwrap();
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));

        let container = &spec.containers[0];
        assert_eq!(container.image.as_deref(), Some("restic/restic"));
        assert_eq!(
            container.args.as_ref().unwrap(),
            &["-r", "s3:http://minio:9000/meta", "init"]
        );
        assert_eq!(container.env.as_ref().unwrap().len(), 3);
    }

    #[test]
    fn test_repo_init_pod_requires_namespace() {
        let mut loc = location();
        loc.metadata.namespace = None;
        assert!(repo_init_pod(&loc, &images()).is_err());
    }

    #[test]
    fn test_snapshot_delete_pod_shape() {
        let pod = snapshot_delete_pod(&location(), "rec-1", "backups", "abc123", &images());

        assert_eq!(pod.metadata.name.as_deref(), Some("rec-1-snapdel-pod-abc123"));
        assert_eq!(
            pod.metadata.labels.as_ref().unwrap().get(SNAP_DELETION_POD_LABEL),
            Some(&"true".to_string())
        );
        assert!(pod.metadata.owner_references.is_none());

        let spec = pod.spec.unwrap();
        assert_eq!(
            spec.containers[0].args.as_ref().unwrap(),
            &["-r", "s3:http://minio:9000/meta", "forget", "--prune", "abc123"]
        );
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
    }
}
