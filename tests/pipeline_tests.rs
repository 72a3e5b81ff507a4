//! End-to-end lifecycle scenarios over a running in-process pipeline.

mod test_harness;

use std::time::Duration;

use gas_pipeline::job::{JobStatus, UserRole};
use gas_pipeline::queue::{self, SubmissionMessage};
use gas_pipeline::storage::{ObjectStore, RetrievalTier};
use gas_pipeline::worker::StepOutcome;
use test_harness::*;

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_premium_job_completes_and_stays_hot() {
    let running = RunningPipeline::start().await;
    let pipeline = &running.pipeline;
    pipeline.register_user("alice", UserRole::PremiumUser).await;

    let record = pipeline
        .submit_job("alice", "J1.vcf", b"chr1\t100\n".to_vec())
        .await
        .unwrap();
    assert_eq!(record.job_status, JobStatus::Pending);

    assert_eventually(
        || async { running.status(&record.job_id).await == Some(JobStatus::Completed) },
        TIMEOUT,
        "job never completed",
    )
    .await;

    let done = running.record(&record.job_id).await;
    assert_eq!(done.result_key.as_deref(), Some("J1.annot.vcf"));
    assert!(done.results_archive_id.is_none());
    let key = format!("gas/alice/{}~J1.annot.vcf", record.job_id);
    assert!(pipeline.objects.exists("gas-results", &key).await.unwrap());
    assert!(!running
        .jobs_dir
        .path()
        .join(format!("id_{}", record.job_id))
        .exists());

    running.stop().await;
}

#[tokio::test]
async fn test_free_job_is_archived_after_window() {
    let running = RunningPipeline::start().await;
    let pipeline = &running.pipeline;
    pipeline.register_user("bob", UserRole::FreeUser).await;

    let record = pipeline
        .submit_job("bob", "J2.vcf", b"chr2\t200\n".to_vec())
        .await
        .unwrap();

    assert_eventually(
        || async { running.record(&record.job_id).await.results_archive_id.is_some() },
        TIMEOUT,
        "result never archived",
    )
    .await;

    let archived = running.record(&record.job_id).await;
    assert_eq!(archived.job_status, JobStatus::Completed);
    assert!(archived.result_key.is_none());
    let key = format!("gas/bob/{}~J2.annot.vcf", record.job_id);
    assert!(!pipeline.objects.exists("gas-results", &key).await.unwrap());
    assert_eq!(pipeline.vault.archive_count().await, 1);

    running.stop().await;
}

#[tokio::test]
async fn test_upgrade_restores_archived_result() {
    let running = RunningPipeline::start().await;
    let pipeline = &running.pipeline;
    pipeline.register_user("carol", UserRole::FreeUser).await;

    let record = pipeline
        .submit_job("carol", "J3.vcf", b"chr3\t300\n".to_vec())
        .await
        .unwrap();
    assert_eventually(
        || async { running.record(&record.job_id).await.results_archive_id.is_some() },
        TIMEOUT,
        "result never archived",
    )
    .await;

    assert_eq!(pipeline.upgrade_user("carol").await.unwrap(), 1);

    assert_eventually(
        || async { running.record(&record.job_id).await.result_key.is_some() },
        TIMEOUT,
        "result never restored",
    )
    .await;

    let restored = running.record(&record.job_id).await;
    assert_eq!(restored.result_key.as_deref(), Some("J3.annot.vcf"));
    assert!(restored.results_archive_id.is_none());
    let key = format!("gas/carol/{}~J3.annot.vcf", record.job_id);
    assert_eq!(
        pipeline.objects.get_bytes("gas-results", &key).await.unwrap(),
        b"chr3\t300\n"
    );
    assert_eq!(pipeline.vault.archive_count().await, 0);

    running.stop().await;
}

#[tokio::test]
async fn test_upgrade_falls_back_to_standard_retrieval() {
    let running = RunningPipeline::start().await;
    let pipeline = &running.pipeline;
    pipeline.register_user("erin", UserRole::FreeUser).await;
    pipeline.vault.reject_tier(RetrievalTier::Expedited).await;

    let record = pipeline
        .submit_job("erin", "J5.vcf", b"chr5\n".to_vec())
        .await
        .unwrap();
    assert_eventually(
        || async { running.record(&record.job_id).await.results_archive_id.is_some() },
        TIMEOUT,
        "result never archived",
    )
    .await;

    pipeline.upgrade_user("erin").await.unwrap();

    assert_eventually(
        || async { running.record(&record.job_id).await.result_key.is_some() },
        TIMEOUT,
        "result never restored",
    )
    .await;
    let tiers: Vec<RetrievalTier> = pipeline
        .vault
        .retrieval_requests()
        .await
        .into_iter()
        .map(|r| r.tier)
        .collect();
    assert_eq!(tiers, vec![RetrievalTier::Expedited, RetrievalTier::Standard]);

    running.stop().await;
}

#[tokio::test]
async fn test_upgrade_inside_window_cancels_archive() {
    let running =
        RunningPipeline::start_with(|config| config.with_archive_window(Duration::from_secs(1)))
            .await;
    let pipeline = &running.pipeline;
    pipeline.register_user("dave", UserRole::FreeUser).await;

    let record = pipeline
        .submit_job("dave", "J4.vcf", b"chr4\n".to_vec())
        .await
        .unwrap();
    assert_eventually(
        || async { running.status(&record.job_id).await == Some(JobStatus::Completed) },
        TIMEOUT,
        "job never completed",
    )
    .await;

    assert_eq!(pipeline.upgrade_user("dave").await.unwrap(), 0);

    assert_eventually(
        || async {
            pipeline
                .ledger
                .count("archive", "role_check", StepOutcome::Skipped)
                .await
                == 1
        },
        TIMEOUT,
        "archive request never handled",
    )
    .await;

    let record = running.record(&record.job_id).await;
    assert_eq!(record.result_key.as_deref(), Some("J4.annot.vcf"));
    assert!(record.results_archive_id.is_none());
    assert_eq!(pipeline.vault.archive_count().await, 0);

    running.stop().await;
}

#[tokio::test]
async fn test_redelivered_submission_does_not_rerun_job() {
    let running = RunningPipeline::start().await;
    let pipeline = &running.pipeline;
    pipeline.register_user("alice", UserRole::PremiumUser).await;

    let record = pipeline
        .submit_job("alice", "J1.vcf", b"x\n".to_vec())
        .await
        .unwrap();
    assert_eventually(
        || async { running.status(&record.job_id).await == Some(JobStatus::Completed) },
        TIMEOUT,
        "job never completed",
    )
    .await;
    let first = running.record(&record.job_id).await;

    let duplicate = SubmissionMessage {
        job_id: record.job_id.clone(),
        user_id: record.user_id.clone(),
        input_file_name: record.input_file_name.clone(),
        input_bucket: record.input_bucket.clone(),
        input_key: record.input_key.clone(),
        user_role: UserRole::PremiumUser,
    };
    queue::publish(pipeline.queues.requests.as_ref(), &duplicate, Duration::ZERO)
        .await
        .unwrap();

    assert_eventually(
        || async {
            pipeline
                .ledger
                .count("request", "mark_running", StepOutcome::Skipped)
                .await
                == 1
        },
        TIMEOUT,
        "duplicate never handled",
    )
    .await;

    assert_eq!(running.record(&record.job_id).await, first);
    assert_eq!(
        pipeline
            .ledger
            .count("runner", "complete", StepOutcome::Succeeded)
            .await,
        1
    );

    running.stop().await;
}

#[tokio::test]
async fn test_submission_for_unknown_user_is_rejected() {
    let running = RunningPipeline::start().await;

    assert!(running
        .pipeline
        .submit_job("nobody", "J1.vcf", b"x\n".to_vec())
        .await
        .is_err());
    assert!(running.pipeline.queues.requests.is_empty().await);

    running.stop().await;
}
