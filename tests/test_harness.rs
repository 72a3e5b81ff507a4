//! Test harness for pipeline integration tests.
//!
//! Provides a fake annotation program, fixtures over the in-memory backends,
//! and polling helpers for asynchronous assertions.

#![allow(dead_code)]

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use gas_pipeline::accounts::InMemoryAccounts;
use gas_pipeline::config::PipelineConfig;
use gas_pipeline::job::{result_file_name, Completion, JobRecord, JobStatus, StorageKey, UserRole};
use gas_pipeline::local::LocalPipeline;
use gas_pipeline::queue::{Envelope, InMemoryQueue, ReceivedMessage, SubmissionMessage};
use gas_pipeline::storage::{ColdStore, InMemoryObjectStore, InMemoryVault, ObjectStore};
use gas_pipeline::store::{InMemoryJobStore, JobStore};
use gas_pipeline::worker::{Backends, OutcomeLedger};

/// Shell script standing in for the annotation program. Copies the input to
/// `<stem>.annot.vcf` and writes its line count to `<stem>.vcf.count.log`.
pub const FAKE_ANNOTATOR: &str =
    r#"in="$1"; stem="${in%.vcf}"; cp "$in" "$stem.annot.vcf" && wc -l < "$in" > "$stem.vcf.count.log""#;

/// Annotator that produces no output files.
pub const FAILING_ANNOTATOR: &str = "echo annotation failed >&2; exit 1";

pub const INPUTS_BUCKET: &str = "gas-inputs";
pub const RESULTS_BUCKET: &str = "gas-results";
pub const VAULT: &str = "gas-vault";
pub const PREFIX: &str = "gas";

/// Config with a shell annotator, short long-polls and no archive delay.
pub fn test_config(jobs_dir: &Path, script: &str) -> PipelineConfig {
    PipelineConfig::new()
        .with_annotator(
            "sh",
            vec!["-c".to_string(), script.to_string(), "annotator".to_string()],
        )
        .with_jobs_dir(jobs_dir)
        .with_wait_time(Duration::from_millis(100))
        .with_archive_window(Duration::ZERO)
}

/// In-memory backends plus a scratch root, for driving single workers.
pub struct Fixture {
    pub config: PipelineConfig,
    pub jobs: Arc<InMemoryJobStore>,
    pub objects: Arc<InMemoryObjectStore>,
    pub vault: Arc<InMemoryVault>,
    pub accounts: Arc<InMemoryAccounts>,
    pub ledger: Arc<OutcomeLedger>,
    pub archive_queue: Arc<InMemoryQueue>,
    pub restore_queue: Arc<InMemoryQueue>,
    pub jobs_dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_script(FAKE_ANNOTATOR)
    }

    pub fn with_script(script: &str) -> Self {
        let jobs_dir = tempfile::tempdir().unwrap();
        let config = test_config(jobs_dir.path(), script);
        let restore_queue = Arc::new(InMemoryQueue::new(config.queues.restore.clone()));

        Self {
            jobs: Arc::new(InMemoryJobStore::new()),
            objects: Arc::new(InMemoryObjectStore::new()),
            vault: Arc::new(InMemoryVault::new().with_completion_queue(restore_queue.clone())),
            accounts: Arc::new(InMemoryAccounts::new()),
            ledger: Arc::new(OutcomeLedger::new()),
            archive_queue: Arc::new(InMemoryQueue::new(config.queues.archive.clone())),
            restore_queue,
            config,
            jobs_dir,
        }
    }

    pub fn backends(&self) -> Backends {
        Backends {
            jobs: self.jobs.clone(),
            objects: self.objects.clone(),
            vault: self.vault.clone(),
            accounts: self.accounts.clone(),
            ledger: self.ledger.clone(),
        }
    }

    pub fn key(&self, user_id: &str, job_id: &str, filename: &str) -> String {
        StorageKey::new(PREFIX, user_id, job_id, filename)
            .unwrap()
            .to_string()
    }

    /// Upload an input and create its PENDING record.
    pub async fn seed_pending(
        &self,
        user_id: &str,
        job_id: &str,
        input_file_name: &str,
        contents: &[u8],
    ) -> JobRecord {
        let key = self.key(user_id, job_id, input_file_name);
        self.objects
            .put_bytes(INPUTS_BUCKET, &key, contents.to_vec())
            .await
            .unwrap();
        let record = JobRecord::with_submit_time(
            job_id,
            user_id,
            input_file_name,
            INPUTS_BUCKET,
            key,
            1_700_000_000,
        );
        self.jobs.create(record.clone()).await.unwrap();
        record
    }

    /// A COMPLETED job whose result sits in hot storage.
    pub async fn seed_completed(
        &self,
        user_id: &str,
        job_id: &str,
        input_file_name: &str,
        result: &[u8],
    ) -> JobRecord {
        self.seed_pending(user_id, job_id, input_file_name, b"#input")
            .await;
        let result_name = result_file_name(input_file_name);
        self.objects
            .put_bytes(
                RESULTS_BUCKET,
                &self.key(user_id, job_id, &result_name),
                result.to_vec(),
            )
            .await
            .unwrap();
        self.jobs
            .transition_status(job_id, JobStatus::Pending, JobStatus::Running)
            .await
            .unwrap();
        self.jobs
            .complete(
                job_id,
                &Completion {
                    results_bucket: RESULTS_BUCKET.to_string(),
                    result_key: result_name,
                    log_key: format!("{}.count.log", input_file_name),
                    complete_time: 1_700_000_100,
                },
            )
            .await
            .unwrap();
        self.jobs.get(job_id).await.unwrap().unwrap()
    }

    /// A COMPLETED job whose result lives only in the vault. Returns the
    /// record and its archive id.
    pub async fn seed_archived(
        &self,
        user_id: &str,
        job_id: &str,
        input_file_name: &str,
        result: &[u8],
    ) -> (JobRecord, String) {
        self.seed_completed(user_id, job_id, input_file_name, result)
            .await;
        let result_key = self.key(user_id, job_id, &result_file_name(input_file_name));
        self.objects.delete(RESULTS_BUCKET, &result_key).await.unwrap();

        let archive_id = self.vault.upload_archive(VAULT, result.to_vec()).await.unwrap();
        self.jobs.set_archive_id(job_id, &archive_id).await.unwrap();
        self.jobs.clear_result_key(job_id).await.unwrap();
        (self.jobs.get(job_id).await.unwrap().unwrap(), archive_id)
    }
}

pub fn submission_for(record: &JobRecord, role: UserRole) -> SubmissionMessage {
    SubmissionMessage {
        job_id: record.job_id.clone(),
        user_id: record.user_id.clone(),
        input_file_name: record.input_file_name.clone(),
        input_bucket: record.input_bucket.clone(),
        input_key: record.input_key.clone(),
        user_role: role,
    }
}

/// Wrap a payload the way a publisher would and present it as a delivery.
pub fn delivery<T: serde::Serialize>(topic: &str, payload: &T) -> ReceivedMessage {
    ReceivedMessage {
        message_id: "msg-1".to_string(),
        receipt: "receipt-1".to_string(),
        body: Envelope::wrap(topic, payload).unwrap().to_body().unwrap(),
        receive_count: 1,
    }
}

/// A [`LocalPipeline`] running in the background.
pub struct RunningPipeline {
    pub pipeline: Arc<LocalPipeline>,
    pub jobs_dir: TempDir,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl RunningPipeline {
    pub async fn start() -> Self {
        Self::start_with(|config| config).await
    }

    pub async fn start_with<F>(configure: F) -> Self
    where
        F: FnOnce(PipelineConfig) -> PipelineConfig,
    {
        let jobs_dir = tempfile::tempdir().unwrap();
        let config = configure(test_config(jobs_dir.path(), FAKE_ANNOTATOR));
        let pipeline = Arc::new(LocalPipeline::new(&config));

        let shutdown = CancellationToken::new();
        let running = pipeline.clone();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            running.run(token).await;
        });

        Self {
            pipeline,
            jobs_dir,
            shutdown,
            handle,
        }
    }

    pub async fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.pipeline
            .jobs
            .get(job_id)
            .await
            .unwrap()
            .map(|r| r.job_status)
    }

    pub async fn record(&self, job_id: &str) -> JobRecord {
        self.pipeline.jobs.get(job_id).await.unwrap().unwrap()
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("pipeline did not stop")
            .unwrap();
    }
}

/// Wait for a condition to become true with timeout
pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_duration: Duration,
    poll_interval: Duration,
) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(50)).await;
    assert!(result, "{}", message);
}
