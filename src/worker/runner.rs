use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::job::{log_file_name, result_file_name, Completion, StorageKey, UserRole};
use crate::queue::{self, ArchiveRequest, MessageQueue};
use crate::storage::ObjectStore;
use crate::store::JobStore;
use crate::worker::{Annotator, Backends, OutcomeLedger, StepOutcome};

const WORKER: &str = "runner";

/// One job handed from the request worker to a runner.
#[derive(Debug, Clone)]
pub struct AnnotationTask {
    pub job_id: String,
    pub user_id: String,
    /// Role at submission time; decides whether an archive trigger is sent.
    pub user_role: UserRole,
    pub input_file_name: String,
    pub input_key: String,
    /// Per-job scratch directory holding the staged input. Removed when the
    /// task ends.
    pub scratch_dir: PathBuf,
}

impl AnnotationTask {
    pub fn input_path(&self) -> PathBuf {
        self.scratch_dir.join(&self.input_file_name)
    }
}

/// What happened to each step of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub job_id: String,
    pub annotated: bool,
    pub results_uploaded: bool,
    pub completed: bool,
    pub archive_scheduled: bool,
    pub scratch_removed: bool,
}

impl TaskReport {
    fn new(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            annotated: false,
            results_uploaded: false,
            completed: false,
            archive_scheduled: false,
            scratch_removed: false,
        }
    }
}

/// Scratch directory removed on every exit path. `remove` does it
/// asynchronously; dropping without `remove` falls back to a blocking delete.
struct ScratchDir {
    path: PathBuf,
    removed: bool,
}

impl ScratchDir {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            removed: false,
        }
    }

    async fn remove(mut self) -> bool {
        self.removed = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove scratch directory"
                );
                false
            }
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if !self.removed {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}

/// Runs one annotation job from staged input to completed record.
///
/// Every step after the annotator runs regardless of how earlier steps went:
/// the record is marked COMPLETED even when uploads fail, and the outcome of
/// each step is returned in a [`TaskReport`].
pub struct TaskRunner {
    annotator: Annotator,
    jobs: Arc<dyn JobStore>,
    objects: Arc<dyn ObjectStore>,
    ledger: Arc<OutcomeLedger>,
    archive_queue: Arc<dyn MessageQueue>,
    results_bucket: String,
    key_prefix: String,
    archive_delay: Duration,
}

impl TaskRunner {
    pub fn new(
        config: &PipelineConfig,
        backends: &Backends,
        archive_queue: Arc<dyn MessageQueue>,
    ) -> Self {
        Self {
            annotator: Annotator::new(config.annotator.clone()),
            jobs: backends.jobs.clone(),
            objects: backends.objects.clone(),
            ledger: backends.ledger.clone(),
            archive_queue,
            results_bucket: config.storage.results_bucket.clone(),
            key_prefix: config.storage.key_prefix.clone(),
            archive_delay: config.archive.free_user_window,
        }
    }

    pub async fn run(&self, task: AnnotationTask) -> TaskReport {
        let scratch = ScratchDir::new(task.scratch_dir.clone());
        let mut report = TaskReport::new(&task.job_id);
        let input_path = task.input_path();

        report.annotated = match self.annotator.annotate(&task.job_id, &input_path).await {
            Ok(run) => run.succeeded(),
            Err(e) => {
                tracing::error!(job_id = %task.job_id, error = %e, "Failed to start annotator");
                false
            }
        };
        self.ledger
            .record(WORKER, "annotate", StepOutcome::from(report.annotated))
            .await;

        let result_name = result_file_name(&task.input_file_name);
        let log_name = log_file_name(&task.input_file_name);

        let result_uploaded = self.upload(&task, &input_path, &result_name).await;
        let log_uploaded = self.upload(&task, &input_path, &log_name).await;
        report.results_uploaded = result_uploaded && log_uploaded;
        self.ledger
            .record(WORKER, "upload_results", StepOutcome::from(report.results_uploaded))
            .await;

        let completion = Completion {
            results_bucket: self.results_bucket.clone(),
            result_key: result_name.clone(),
            log_key: log_name,
            complete_time: Utc::now().timestamp(),
        };
        report.completed = match self.jobs.complete(&task.job_id, &completion).await {
            Ok(()) => {
                tracing::info!(job_id = %task.job_id, "Job marked COMPLETED");
                true
            }
            Err(e) => {
                tracing::error!(job_id = %task.job_id, error = %e, "Failed to mark job COMPLETED");
                false
            }
        };
        self.ledger
            .record(WORKER, "complete", StepOutcome::from(report.completed))
            .await;

        if task.user_role.is_free() {
            report.archive_scheduled = self.schedule_archive(&task, &result_name).await;
            self.ledger
                .record(WORKER, "schedule_archive", StepOutcome::from(report.archive_scheduled))
                .await;
        } else {
            self.ledger
                .record(WORKER, "schedule_archive", StepOutcome::Skipped)
                .await;
        }

        report.scratch_removed = scratch.remove().await;

        tracing::info!(
            job_id = %task.job_id,
            annotated = report.annotated,
            uploaded = report.results_uploaded,
            completed = report.completed,
            archive_scheduled = report.archive_scheduled,
            "Annotation task finished"
        );
        report
    }

    /// Output keys are rebuilt from the configured prefix, never taken from
    /// the submission's input key, so archive and restore find them.
    fn output_key(&self, task: &AnnotationTask, filename: &str) -> Result<StorageKey> {
        StorageKey::new(
            self.key_prefix.clone(),
            task.user_id.clone(),
            task.job_id.clone(),
            filename,
        )
    }

    async fn upload(&self, task: &AnnotationTask, input_path: &Path, filename: &str) -> bool {
        let local = input_path.with_file_name(filename);
        let key = match self.output_key(task, filename) {
            Ok(key) => key.to_string(),
            Err(e) => {
                tracing::error!(job_id = %task.job_id, file = filename, error = %e, "Cannot build result key");
                return false;
            }
        };

        match self
            .objects
            .put_file(&self.results_bucket, &key, &local)
            .await
        {
            Ok(()) => {
                tracing::debug!(job_id = %task.job_id, bucket = %self.results_bucket, key = %key, "Uploaded output");
                true
            }
            Err(e) => {
                tracing::error!(
                    job_id = %task.job_id,
                    file = %local.display(),
                    error = %e,
                    "Failed to upload output"
                );
                false
            }
        }
    }

    async fn schedule_archive(&self, task: &AnnotationTask, result_name: &str) -> bool {
        let request = ArchiveRequest {
            user_id: task.user_id.clone(),
            job_id: task.job_id.clone(),
            results_bucket: self.results_bucket.clone(),
            result_key: result_name.to_string(),
        };
        match queue::publish(self.archive_queue.as_ref(), &request, self.archive_delay).await {
            Ok(message_id) => {
                tracing::info!(
                    job_id = %task.job_id,
                    message_id = %message_id,
                    delay_secs = self.archive_delay.as_secs(),
                    "Archive scheduled"
                );
                true
            }
            Err(e) => {
                tracing::error!(job_id = %task.job_id, error = %e, "Failed to schedule archive");
                false
            }
        }
    }
}

/// Spawns runners off the polling path and collects their reports.
///
/// Tasks are tracked so shutdown can wait for in-flight annotations.
#[derive(Clone)]
pub struct TaskLauncher {
    runner: Arc<TaskRunner>,
    tracker: TaskTracker,
    reports: mpsc::UnboundedSender<TaskReport>,
}

impl TaskLauncher {
    pub fn new(runner: TaskRunner) -> (Self, mpsc::UnboundedReceiver<TaskReport>) {
        let (reports, rx) = mpsc::unbounded_channel();
        let launcher = Self {
            runner: Arc::new(runner),
            tracker: TaskTracker::new(),
            reports,
        };
        (launcher, rx)
    }

    /// Start a task and return immediately.
    pub fn launch(&self, task: AnnotationTask) {
        tracing::debug!(job_id = %task.job_id, "Launching annotation task");
        let runner = self.runner.clone();
        let reports = self.reports.clone();
        self.tracker.spawn(async move {
            let report = runner.run(task).await;
            if reports.send(report).is_err() {
                tracing::debug!("Task report dropped, receiver closed");
            }
        });
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every launched task to finish. Closes the tracker for good,
    /// so any number of callers can wait at once; tasks launched afterwards
    /// still run and are waited for by later calls.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
