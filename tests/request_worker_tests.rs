mod test_harness;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use gas_pipeline::job::{JobRecord, JobStatus, UserRole};
use gas_pipeline::queue::{self, InMemoryQueue, ReceivedMessage};
use gas_pipeline::storage::ObjectStore;
use gas_pipeline::store::JobStore;
use gas_pipeline::worker::{
    Disposition, MessageHandler, PollLoop, RequestWorker, StepOutcome, TaskLauncher, TaskReport,
    TaskRunner,
};
use test_harness::*;

fn request_worker(fx: &Fixture) -> (RequestWorker, mpsc::UnboundedReceiver<TaskReport>) {
    let runner = TaskRunner::new(&fx.config, &fx.backends(), fx.archive_queue.clone());
    let (launcher, reports) = TaskLauncher::new(runner);
    (
        RequestWorker::new(&fx.config, &fx.backends(), launcher),
        reports,
    )
}

async fn next_report(reports: &mut mpsc::UnboundedReceiver<TaskReport>) -> TaskReport {
    tokio::time::timeout(Duration::from_secs(10), reports.recv())
        .await
        .expect("no task report within timeout")
        .expect("report channel closed")
}

#[tokio::test]
async fn test_submission_runs_annotation_to_completion() {
    let fx = Fixture::new();
    let (worker, mut reports) = request_worker(&fx);
    let record = fx
        .seed_pending("u1", "j1", "sample.vcf", b"line1\nline2\n")
        .await;

    let disposition = worker
        .handle(&delivery("gas-job-requests", &submission_for(&record, UserRole::FreeUser)))
        .await;
    assert_eq!(disposition, Disposition::Acknowledge);

    let report = next_report(&mut reports).await;
    assert_eq!(report.job_id, "j1");
    assert!(report.annotated);
    assert!(report.results_uploaded);
    assert!(report.completed);
    assert!(report.archive_scheduled);
    assert!(report.scratch_removed);

    let stored = fx.jobs.get("j1").await.unwrap().unwrap();
    assert_eq!(stored.job_status, JobStatus::Completed);
    assert_eq!(stored.result_key.as_deref(), Some("sample.annot.vcf"));
    assert_eq!(stored.log_key.as_deref(), Some("sample.vcf.count.log"));
    assert_eq!(stored.results_bucket.as_deref(), Some(RESULTS_BUCKET));

    let result = fx
        .objects
        .get_bytes(RESULTS_BUCKET, "gas/u1/j1~sample.annot.vcf")
        .await
        .unwrap();
    assert_eq!(result, b"line1\nline2\n");
    let log = fx
        .objects
        .get_bytes(RESULTS_BUCKET, "gas/u1/j1~sample.vcf.count.log")
        .await
        .unwrap();
    assert_eq!(String::from_utf8(log).unwrap().trim(), "2");

    assert!(!fx.jobs_dir.path().join("id_j1").exists());
    assert_eq!(fx.archive_queue.len().await, 1);
}

#[tokio::test]
async fn test_premium_submission_schedules_no_archive() {
    let fx = Fixture::new();
    let (worker, mut reports) = request_worker(&fx);
    let record = fx.seed_pending("u2", "j2", "sample.vcf", b"x\n").await;

    worker
        .handle(&delivery(
            "gas-job-requests",
            &submission_for(&record, UserRole::PremiumUser),
        ))
        .await;

    let report = next_report(&mut reports).await;
    assert!(report.completed);
    assert!(!report.archive_scheduled);
    assert!(fx.archive_queue.is_empty().await);
}

#[tokio::test]
async fn test_duplicate_delivery_launches_once() {
    let fx = Fixture::new();
    let (worker, mut reports) = request_worker(&fx);
    let record = fx.seed_pending("u1", "j1", "sample.vcf", b"x\n").await;
    let message = delivery("gas-job-requests", &submission_for(&record, UserRole::FreeUser));

    assert_eq!(worker.handle(&message).await, Disposition::Acknowledge);
    assert_eq!(worker.handle(&message).await, Disposition::Acknowledge);

    next_report(&mut reports).await;
    let second = tokio::time::timeout(Duration::from_millis(500), reports.recv()).await;
    assert!(second.is_err(), "a second annotation task was launched");

    assert_eq!(
        fx.ledger
            .count("request", "mark_running", StepOutcome::Succeeded)
            .await,
        1
    );
    assert_eq!(
        fx.ledger
            .count("request", "mark_running", StepOutcome::Skipped)
            .await,
        1
    );
}

#[tokio::test]
async fn test_job_already_running_is_left_alone() {
    let fx = Fixture::new();
    let (worker, mut reports) = request_worker(&fx);
    let record = fx.seed_pending("u1", "j1", "sample.vcf", b"x\n").await;
    fx.jobs
        .transition_status("j1", JobStatus::Pending, JobStatus::Running)
        .await
        .unwrap();

    let disposition = worker
        .handle(&delivery("gas-job-requests", &submission_for(&record, UserRole::FreeUser)))
        .await;

    assert_eq!(disposition, Disposition::Acknowledge);
    assert!(tokio::time::timeout(Duration::from_millis(300), reports.recv())
        .await
        .is_err());
    assert_eq!(
        fx.jobs.get("j1").await.unwrap().unwrap().job_status,
        JobStatus::Running
    );
    assert!(!fx.jobs_dir.path().join("id_j1").exists());
}

#[tokio::test]
async fn test_malformed_submission_is_acknowledged() {
    let fx = Fixture::new();
    let (worker, _reports) = request_worker(&fx);

    let message = ReceivedMessage {
        message_id: "m".to_string(),
        receipt: "r".to_string(),
        body: "not json".to_string(),
        receive_count: 1,
    };

    assert_eq!(worker.handle(&message).await, Disposition::Acknowledge);
    assert_eq!(
        fx.ledger.count("request", "decode", StepOutcome::Failed).await,
        1
    );
}

#[tokio::test]
async fn test_input_name_with_path_is_rejected() {
    let fx = Fixture::new();
    let (worker, _reports) = request_worker(&fx);
    let mut record = fx.seed_pending("u1", "j1", "sample.vcf", b"x\n").await;
    record.input_file_name = "../escape.vcf".to_string();

    let disposition = worker
        .handle(&delivery("gas-job-requests", &submission_for(&record, UserRole::FreeUser)))
        .await;

    assert_eq!(disposition, Disposition::Acknowledge);
    assert_eq!(
        fx.jobs.get("j1").await.unwrap().unwrap().job_status,
        JobStatus::Pending
    );
}

async fn record_without_input(fx: &Fixture) -> JobRecord {
    let record = JobRecord::with_submit_time(
        "j9",
        "u1",
        "missing.vcf",
        INPUTS_BUCKET,
        fx.key("u1", "j9", "missing.vcf"),
        1_700_000_000,
    );
    fx.jobs.create(record.clone()).await.unwrap();
    record
}

#[tokio::test]
async fn test_staging_failure_is_acknowledged_by_default() {
    let fx = Fixture::new();
    let (worker, _reports) = request_worker(&fx);
    let record = record_without_input(&fx).await;

    let disposition = worker
        .handle(&delivery("gas-job-requests", &submission_for(&record, UserRole::FreeUser)))
        .await;

    assert_eq!(disposition, Disposition::Acknowledge);
    assert_eq!(
        fx.jobs.get("j9").await.unwrap().unwrap().job_status,
        JobStatus::Pending
    );
    assert_eq!(fx.ledger.count("request", "stage", StepOutcome::Failed).await, 1);

    let leftovers = std::fs::read_dir(fx.jobs_dir.path()).unwrap().count();
    assert_eq!(leftovers, 0, "staging directory was not cleaned up");
}

#[tokio::test]
async fn test_staging_failure_can_be_retained() {
    let mut fx = Fixture::new();
    fx.config.ack_on_staging_failure = false;
    let (worker, _reports) = request_worker(&fx);
    let record = record_without_input(&fx).await;

    let disposition = worker
        .handle(&delivery("gas-job-requests", &submission_for(&record, UserRole::FreeUser)))
        .await;

    assert_eq!(disposition, Disposition::Retain);
}

#[tokio::test]
async fn test_poll_loop_deletes_acknowledged_messages() {
    let fx = Fixture::new();
    let (worker, mut reports) = request_worker(&fx);
    let record = fx.seed_pending("u1", "j1", "sample.vcf", b"x\n").await;

    let requests = Arc::new(InMemoryQueue::new("gas-job-requests"));
    queue::publish(
        requests.as_ref(),
        &submission_for(&record, UserRole::FreeUser),
        Duration::ZERO,
    )
    .await
    .unwrap();

    let poller = PollLoop::new(requests.clone(), worker, &fx.config);
    assert_eq!(poller.poll_once().await.unwrap(), 1);
    assert!(requests.is_empty().await);

    next_report(&mut reports).await;
}

#[tokio::test]
async fn test_poll_loop_keeps_retained_messages_in_flight() {
    let mut fx = Fixture::new();
    fx.config.ack_on_staging_failure = false;
    let (worker, _reports) = request_worker(&fx);
    let record = record_without_input(&fx).await;

    let requests = Arc::new(InMemoryQueue::new("gas-job-requests"));
    queue::publish(
        requests.as_ref(),
        &submission_for(&record, UserRole::FreeUser),
        Duration::ZERO,
    )
    .await
    .unwrap();

    let poller = PollLoop::new(requests.clone(), worker, &fx.config);
    assert_eq!(poller.poll_once().await.unwrap(), 1);
    assert_eq!(requests.in_flight_len().await, 1);
}

#[tokio::test]
async fn test_empty_poll_returns_after_wait_time() {
    let fx = Fixture::new();
    let (worker, _reports) = request_worker(&fx);
    let requests = Arc::new(InMemoryQueue::new("gas-job-requests"));
    let poller = PollLoop::new(requests, worker, &fx.config);

    let started = tokio::time::Instant::now();
    assert_eq!(poller.poll_once().await.unwrap(), 0);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_input_store_is_not_modified() {
    let fx = Fixture::new();
    let (worker, mut reports) = request_worker(&fx);
    let record = fx.seed_pending("u1", "j1", "sample.vcf", b"x\n").await;

    worker
        .handle(&delivery("gas-job-requests", &submission_for(&record, UserRole::FreeUser)))
        .await;
    next_report(&mut reports).await;

    assert!(fx
        .objects
        .exists(INPUTS_BUCKET, &record.input_key)
        .await
        .unwrap());
}
