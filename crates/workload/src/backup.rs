//! Recurring backup CronJob template.
//!
//! The job pod snapshots etcd and (optionally) cluster certificates on a
//! master node, then pushes the snapshot to the location's restic
//! repository. Scheduling, suspension and retention inputs all come from
//! the policy spec.

use crds::{BackupLocation, MetadataBackupPolicy};
use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Container, EmptyDirVolumeSource, EnvVar, HostPathVolumeSource, NodeAffinity,
    NodeSelector, NodeSelectorRequirement, NodeSelectorTerm, PodSpec, PodTemplateSpec,
    SecretVolumeSource, Toleration, Volume, VolumeMount,
};
use kube::core::ObjectMeta;

use crate::repo::literal_env;
use crate::{Images, RepoAccess, TemplateError, backup_cronjob_name, object_name, object_namespace};

/// Where the backup container assembles the snapshot before upload.
const BACKUP_SRC_DIR: &str = "/data";

/// Where the etcd client certificates land inside the backup container.
const ETCD_CREDS_DIR: &str = "/etcd_creds";

/// CronJob running a policy's recurring backup.
///
/// Schedule and suspend mirror the policy spec; the pod template pins the
/// job to a master node (host network, label affinity, NoSchedule
/// toleration) so it can reach the local etcd endpoint.
pub fn backup_cronjob(
    policy: &MetadataBackupPolicy,
    location: &BackupLocation,
    images: &Images,
) -> Result<CronJob, TemplateError> {
    let name = object_name(&policy.metadata, "MetadataBackupPolicy")?;
    let namespace = object_namespace(&policy.metadata, "MetadataBackupPolicy")?;
    let access = RepoAccess::from_location(location);

    let mut env: Vec<EnvVar> = access.credential_env();
    env.extend([
        literal_env("MDR_POLICY_NAME", name),
        literal_env("ETCD_ENDPOINT", policy.spec.etcd_endpoint.clone()),
        literal_env("ETCD_CREDS_DIR", ETCD_CREDS_DIR),
        literal_env("ETCD_SNAP_PATH", format!("{BACKUP_SRC_DIR}/etcd-snapshot.db")),
        literal_env("RESTIC_REPO", access.endpoint.clone()),
        literal_env("BACKUP_SRC", BACKUP_SRC_DIR),
    ]);

    let mut volumes = vec![
        Volume {
            name: "target-dir".to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
        Volume {
            name: "etcd-creds".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(policy.spec.etcd_creds.clone()),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];

    let mut volume_mounts = vec![
        VolumeMount {
            name: "target-dir".to_string(),
            mount_path: BACKUP_SRC_DIR.to_string(),
            ..Default::default()
        },
        VolumeMount {
            name: "etcd-creds".to_string(),
            mount_path: ETCD_CREDS_DIR.to_string(),
            ..Default::default()
        },
    ];

    // Certificates are only backed up when the policy names a host
    // directory holding them.
    if let Some(certs_dir) = &policy.spec.certs_dir {
        volumes.push(Volume {
            name: "certs-dir".to_string(),
            host_path: Some(HostPathVolumeSource {
                path: certs_dir.clone(),
                type_: Some("Directory".to_string()),
            }),
            ..Default::default()
        });
        volume_mounts.push(VolumeMount {
            name: "certs-dir".to_string(),
            mount_path: "/certs_dir".to_string(),
            ..Default::default()
        });
        env.push(literal_env("CERTS_SRC_DIR", "/certs_dir"));
        env.push(literal_env(
            "CERTS_DEST_DIR",
            format!("{BACKUP_SRC_DIR}/certificates"),
        ));
    }

    let pod_spec = PodSpec {
        restart_policy: Some("Never".to_string()),
        host_network: Some(true),
        affinity: Some(master_node_affinity(policy.spec.master_node_label())),
        tolerations: Some(vec![Toleration {
            operator: Some("Exists".to_string()),
            effect: Some("NoSchedule".to_string()),
            ..Default::default()
        }]),
        volumes: Some(volumes),
        containers: vec![Container {
            name: format!("{name}-backup"),
            image: Some(images.util.clone()),
            volume_mounts: Some(volume_mounts),
            env: Some(env),
            args: Some(vec!["backup".to_string()]),
            ..Default::default()
        }],
        ..Default::default()
    };

    Ok(CronJob {
        metadata: ObjectMeta {
            name: Some(backup_cronjob_name(name)),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(CronJobSpec {
            schedule: policy.spec.schedule.clone(),
            suspend: Some(policy.spec.suspend),
            concurrency_policy: Some("Forbid".to_string()),
            job_template: JobTemplateSpec {
                metadata: Some(ObjectMeta {
                    name: Some(format!("{name}-backup-job")),
                    namespace: Some(namespace.to_string()),
                    ..Default::default()
                }),
                spec: Some(JobSpec {
                    template: PodTemplateSpec {
                        metadata: Some(ObjectMeta {
                            name: Some(format!("{name}-backup-pod-template")),
                            namespace: Some(namespace.to_string()),
                            ..Default::default()
                        }),
                        spec: Some(pod_spec),
                    },
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Node affinity requiring the given label to exist, which pins the
/// backup pod to a master node.
fn master_node_affinity(label: &str) -> Affinity {
    Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: vec![NodeSelectorTerm {
                    match_expressions: Some(vec![NodeSelectorRequirement {
                        key: label.to_string(),
                        operator: "Exists".to_string(),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }],
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{BackupLocationSpec, MASTER_NODE_LABEL_OPTION, MetadataBackupPolicySpec};

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

    fn policy() -> MetadataBackupPolicy {
        let spec: MetadataBackupPolicySpec = serde_json::from_value(serde_json::json!({
            "destination": "nightly-loc",
            "schedule": "0 2 * * *",
        }))
        .unwrap();
        let mut policy = MetadataBackupPolicy::new("nightly", spec);
        policy.metadata.namespace = Some("backups".to_string());
        policy
    }

    fn job_pod_spec(cron: &CronJob) -> PodSpec {
        cron.spec
            .as_ref()
            .unwrap()
            .job_template
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .clone()
            .unwrap()
    }

    #[test]
    fn test_cronjob_mirrors_schedule_and_suspend() {
        let mut policy = policy();
        policy.spec.suspend = true;

        let cron = backup_cronjob(&policy, &location(), &images()).unwrap();
        let spec = cron.spec.as_ref().unwrap();

        assert_eq!(cron.metadata.name.as_deref(), Some("nightly-backup-cronjob"));
        assert_eq!(spec.schedule, "0 2 * * *");
        assert_eq!(spec.suspend, Some(true));
        assert_eq!(spec.concurrency_policy.as_deref(), Some("Forbid"));
    }

    #[test]
    fn test_backup_pod_env_contract() {
        let cron = backup_cronjob(&policy(), &location(), &images()).unwrap();
        let pod_spec = job_pod_spec(&cron);

        assert_eq!(pod_spec.host_network, Some(true));
        assert_eq!(pod_spec.restart_policy.as_deref(), Some("Never"));

        let env = pod_spec.containers[0].env.as_ref().unwrap();
        let names: Vec<&str> = env.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "AWS_ACCESS_KEY",
                "AWS_SECRET_KEY",
                "RESTIC_PASSWORD",
                "MDR_POLICY_NAME",
                "ETCD_ENDPOINT",
                "ETCD_CREDS_DIR",
                "ETCD_SNAP_PATH",
                "RESTIC_REPO",
                "BACKUP_SRC",
            ]
        );

        let repo = env.iter().find(|e| e.name == "RESTIC_REPO").unwrap();
        assert_eq!(repo.value.as_deref(), Some("s3:http://minio:9000/meta"));
        let endpoint = env.iter().find(|e| e.name == "ETCD_ENDPOINT").unwrap();
        assert_eq!(endpoint.value.as_deref(), Some("https://127.0.0.1:2379"));
    }

    #[test]
    fn test_certs_dir_adds_volume_and_env() {
        let mut policy = policy();
        policy.spec.certs_dir = Some("/etc/kubernetes/pki".to_string());

        let cron = backup_cronjob(&policy, &location(), &images()).unwrap();
        let pod_spec = job_pod_spec(&cron);

        let volumes = pod_spec.volumes.as_ref().unwrap();
        let certs = volumes.iter().find(|v| v.name == "certs-dir").unwrap();
        assert_eq!(
            certs.host_path.as_ref().unwrap().path,
            "/etc/kubernetes/pki"
        );

        let env = pod_spec.containers[0].env.as_ref().unwrap();
        assert!(env.iter().any(|e| e.name == "CERTS_SRC_DIR"));
        assert!(env.iter().any(|e| e.name == "CERTS_DEST_DIR"));
    }

    #[test]
    fn test_certs_omitted_without_certs_dir() {
        let cron = backup_cronjob(&policy(), &location(), &images()).unwrap();
        let pod_spec = job_pod_spec(&cron);

        assert_eq!(pod_spec.volumes.as_ref().unwrap().len(), 2);
        let env = pod_spec.containers[0].env.as_ref().unwrap();
        assert!(!env.iter().any(|e| e.name.starts_with("CERTS_")));
    }

    #[test]
    fn test_master_node_affinity_honors_option() {
        let mut policy = policy();
        policy.spec.options.insert(
            MASTER_NODE_LABEL_OPTION.to_string(),
            "node-role.kubernetes.io/control-plane".to_string(),
        );

        let cron = backup_cronjob(&policy, &location(), &images()).unwrap();
        let pod_spec = job_pod_spec(&cron);

        let term = &pod_spec
            .affinity
            .unwrap()
            .node_affinity
            .unwrap()
            .required_during_scheduling_ignored_during_execution
            .unwrap()
            .node_selector_terms[0];
        let requirement = &term.match_expressions.as_ref().unwrap()[0];
        assert_eq!(requirement.key, "node-role.kubernetes.io/control-plane");
        assert_eq!(requirement.operator, "Exists");
    }
}
