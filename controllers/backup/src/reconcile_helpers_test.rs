//! Unit tests for reconcile_helpers module

#[cfg(test)]
mod tests {
    use crate::reconcile_helpers::*;
    use crate::test_utils::*;
    use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec};
    use kube::core::ErrorResponse;

    fn cron(schedule: &str, suspend: bool) -> CronJob {
        CronJob {
            spec: Some(CronJobSpec {
                schedule: schedule.to_string(),
                suspend: Some(suspend),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_needs_reconcile_first_observation() {
        // Never-handled resources always pass the gate
        assert!(needs_reconcile(None, Some(1)));
        assert!(needs_reconcile(None, None));
    }

    #[test]
    fn test_needs_reconcile_skips_handled_generation() {
        assert!(!needs_reconcile(Some(3), Some(3)));
    }

    #[test]
    fn test_needs_reconcile_passes_on_spec_change() {
        assert!(needs_reconcile(Some(3), Some(4)));
    }

    #[test]
    fn test_with_finalizer_appends_once() {
        let existing = vec!["other.finalizers.example.com".to_string()];
        let updated = with_finalizer(&existing, "backuplocation.finalizers.metadr.io").unwrap();
        assert_eq!(
            updated,
            vec![
                "other.finalizers.example.com".to_string(),
                "backuplocation.finalizers.metadr.io".to_string(),
            ]
        );

        // Second call is a no-op
        assert!(with_finalizer(&updated, "backuplocation.finalizers.metadr.io").is_none());
    }

    #[test]
    fn test_without_finalizer_preserves_others() {
        let existing = vec![
            "other.finalizers.example.com".to_string(),
            "backuplocation.finalizers.metadr.io".to_string(),
        ];
        let updated = without_finalizer(&existing, "backuplocation.finalizers.metadr.io").unwrap();
        assert_eq!(updated, vec!["other.finalizers.example.com".to_string()]);

        assert!(without_finalizer(&updated, "backuplocation.finalizers.metadr.io").is_none());
    }

    #[test]
    fn test_cronjob_drift_patch_none_when_in_sync() {
        let policy = test_policy("nightly", "backups").spec;
        let cron = cron(&policy.schedule, policy.suspend);
        assert!(cronjob_drift_patch(&cron, &policy).is_none());
    }

    #[test]
    fn test_cronjob_drift_patch_corrects_schedule() {
        let policy = test_policy("nightly", "backups").spec;
        let cron = cron("*/5 * * * *", policy.suspend);

        let patch = cronjob_drift_patch(&cron, &policy).unwrap();
        assert_eq!(patch["spec"]["schedule"], policy.schedule);
        assert_eq!(patch["spec"]["suspend"], policy.suspend);
    }

    #[test]
    fn test_cronjob_drift_patch_corrects_suspend() {
        let mut policy = test_policy("nightly", "backups").spec;
        policy.suspend = true;
        let cron = cron(&policy.schedule, false);

        let patch = cronjob_drift_patch(&cron, &policy).unwrap();
        assert_eq!(patch["spec"]["suspend"], true);
    }

    #[test]
    fn test_cronjob_drift_missing_suspend_reads_as_false() {
        let policy = test_policy("nightly", "backups").spec;
        let mut cron = cron(&policy.schedule, false);
        if let Some(spec) = cron.spec.as_mut() {
            spec.suspend = None;
        }
        assert!(cronjob_drift_patch(&cron, &policy).is_none());
    }

    #[test]
    fn test_sort_oldest_first_by_timestamp_then_name() {
        let mut records = vec![
            test_record_created_at("rec-c", "backups", "nightly", "snap-c", "2026-08-02T02:00:00Z"),
            test_record_created_at("rec-b", "backups", "nightly", "snap-b", "2026-08-01T02:00:00Z"),
            test_record_created_at("rec-a", "backups", "nightly", "snap-a", "2026-08-01T02:00:00Z"),
        ];

        sort_oldest_first(&mut records);

        let names: Vec<String> = records
            .iter()
            .map(|r| r.metadata.name.clone().unwrap_or_default())
            .collect();
        // Same-second creations tie-break by name
        assert_eq!(names, ["rec-a", "rec-b", "rec-c"]);
    }

    #[test]
    fn test_evict_beyond_window_selects_oldest() {
        let mut records = vec![
            test_record_created_at("del-4", "backups", "nightly", "snap-4", "2026-08-04T02:00:00Z"),
            test_record_created_at("del-1", "backups", "nightly", "snap-1", "2026-08-01T02:00:00Z"),
            test_record_created_at("del-5", "backups", "nightly", "snap-5", "2026-08-05T02:00:00Z"),
            test_record_created_at("del-2", "backups", "nightly", "snap-2", "2026-08-02T02:00:00Z"),
            test_record_created_at("del-3", "backups", "nightly", "snap-3", "2026-08-03T02:00:00Z"),
        ];

        let evicted: Vec<String> = evict_beyond_window(&mut records, 3)
            .iter()
            .map(|r| r.metadata.name.clone().unwrap_or_default())
            .collect();

        // Exactly the two oldest go; the three most recent stay
        assert_eq!(evicted, ["del-1", "del-2"]);
    }

    #[test]
    fn test_evict_beyond_window_empty_within_window() {
        let mut records = vec![
            test_record_created_at("del-1", "backups", "nightly", "snap-1", "2026-08-01T02:00:00Z"),
            test_record_created_at("del-2", "backups", "nightly", "snap-2", "2026-08-02T02:00:00Z"),
        ];
        assert!(evict_beyond_window(&mut records, 3).is_empty());

        let mut exact: Vec<crds::MetadataBackupRecord> = (1..=3)
            .map(|i| {
                test_record_created_at(
                    &format!("del-{i}"),
                    "backups",
                    "nightly",
                    &format!("snap-{i}"),
                    "2026-08-01T02:00:00Z",
                )
            })
            .collect();
        assert!(evict_beyond_window(&mut exact, 3).is_empty());
    }

    #[test]
    fn test_excess_over_retention() {
        assert_eq!(excess_over(120, 120), 0);
        assert_eq!(excess_over(121, 120), 1);
        assert_eq!(excess_over(5, 120), 0);
        assert_eq!(excess_over(5, 0), 5);
    }

    #[test]
    fn test_error_classification() {
        let not_found = kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "pods \"x\" not found".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        });
        assert!(is_not_found(&not_found));
        assert!(!is_already_exists(&not_found));

        let already_exists = kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "pods \"x\" already exists".to_string(),
            reason: "AlreadyExists".to_string(),
            code: 409,
        });
        assert!(is_already_exists(&already_exists));
        assert!(!is_not_found(&already_exists));
    }
}
