use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::job::JobStatus;
use crate::queue::{Envelope, ReceivedMessage, SubmissionMessage};
use crate::storage::ObjectStore;
use crate::store::JobStore;
use crate::worker::{
    AnnotationTask, Backends, Disposition, MessageHandler, OutcomeLedger, StepOutcome,
    TaskLauncher,
};

const WORKER: &str = "request";

/// Turns submission messages into running annotation tasks.
///
/// For each message: stage the input into a private staging directory, move
/// the record from PENDING to RUNNING, and only if that move won rename the
/// staging directory to `<jobs_dir>/id_<job_id>/` and launch the task.
/// A redelivered submission finds the job already RUNNING and leaves the
/// running task's files alone.
pub struct RequestWorker {
    jobs: Arc<dyn JobStore>,
    objects: Arc<dyn ObjectStore>,
    ledger: Arc<OutcomeLedger>,
    launcher: TaskLauncher,
    jobs_dir: PathBuf,
    ack_on_staging_failure: bool,
}

impl RequestWorker {
    pub fn new(config: &PipelineConfig, backends: &Backends, launcher: TaskLauncher) -> Self {
        Self {
            jobs: backends.jobs.clone(),
            objects: backends.objects.clone(),
            ledger: backends.ledger.clone(),
            launcher,
            jobs_dir: config.annotator.jobs_dir.clone(),
            ack_on_staging_failure: config.ack_on_staging_failure,
        }
    }

    pub fn launcher(&self) -> &TaskLauncher {
        &self.launcher
    }

    fn scratch_dir(&self, job_id: &str) -> PathBuf {
        self.jobs_dir.join(format!("id_{}", job_id))
    }

    fn staging_dir(&self, job_id: &str) -> PathBuf {
        self.jobs_dir
            .join(format!(".staging-{}-{}", job_id, Uuid::new_v4().simple()))
    }

    /// Move the staged input to its final scratch directory. Falls back to
    /// running from the staging directory if the rename fails.
    async fn promote(&self, job_id: &str, staged: PathBuf) -> PathBuf {
        let scratch = self.scratch_dir(job_id);
        Self::discard_scratch(&scratch).await;
        match tokio::fs::rename(&staged, &scratch).await {
            Ok(()) => scratch,
            Err(e) => {
                tracing::warn!(
                    job_id,
                    path = %staged.display(),
                    error = %e,
                    "Failed to move staged input, running from staging directory"
                );
                staged
            }
        }
    }

    /// True when the record exists and has already left PENDING.
    async fn already_started(&self, job_id: &str) -> bool {
        matches!(
            self.jobs.get(job_id).await,
            Ok(Some(record)) if record.job_status != JobStatus::Pending
        )
    }

    async fn stage(&self, submission: &SubmissionMessage, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        self.objects
            .download_to(
                &submission.input_bucket,
                &submission.input_key,
                &dir.join(&submission.input_file_name),
            )
            .await
    }

    async fn discard_scratch(dir: &Path) {
        if let Err(e) = tokio::fs::remove_dir_all(dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %dir.display(), error = %e, "Failed to remove scratch directory");
            }
        }
    }

    /// Only a bare file name may be joined onto the scratch directory.
    fn is_plain_file_name(name: &str) -> bool {
        let path = Path::new(name);
        path.file_name().map(|f| f == path.as_os_str()).unwrap_or(false)
    }
}

#[async_trait]
impl MessageHandler for RequestWorker {
    fn name(&self) -> &'static str {
        WORKER
    }

    async fn handle(&self, message: &ReceivedMessage) -> Disposition {
        let submission: SubmissionMessage = match Envelope::decode(&message.body) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(
                    message_id = %message.message_id,
                    error = %e,
                    "Discarding malformed submission"
                );
                self.ledger.record(WORKER, "decode", StepOutcome::Failed).await;
                return Disposition::Acknowledge;
            }
        };
        let job_id = submission.job_id.as_str();

        if !Self::is_plain_file_name(&submission.input_file_name) {
            tracing::error!(
                job_id,
                input_file_name = %submission.input_file_name,
                "Discarding submission with an unusable input file name"
            );
            self.ledger.record(WORKER, "decode", StepOutcome::Failed).await;
            return Disposition::Acknowledge;
        }

        if self.already_started(job_id).await {
            tracing::info!(job_id, "Job is no longer PENDING, ignoring duplicate submission");
            self.ledger.record(WORKER, "mark_running", StepOutcome::Skipped).await;
            return Disposition::Acknowledge;
        }

        let dir = self.staging_dir(job_id);
        if let Err(e) = self.stage(&submission, &dir).await {
            tracing::error!(
                job_id,
                bucket = %submission.input_bucket,
                key = %submission.input_key,
                error = %e,
                "Failed to stage input"
            );
            self.ledger.record(WORKER, "stage", StepOutcome::Failed).await;
            Self::discard_scratch(&dir).await;
            return if self.ack_on_staging_failure {
                Disposition::Acknowledge
            } else {
                Disposition::Retain
            };
        }
        self.ledger.record(WORKER, "stage", StepOutcome::Succeeded).await;

        match self
            .jobs
            .transition_status(job_id, JobStatus::Pending, JobStatus::Running)
            .await
        {
            Ok(true) => {
                self.ledger.record(WORKER, "mark_running", StepOutcome::Succeeded).await;
                let scratch_dir = self.promote(job_id, dir).await;
                self.launcher.launch(AnnotationTask {
                    job_id: submission.job_id.clone(),
                    user_id: submission.user_id.clone(),
                    user_role: submission.user_role,
                    input_file_name: submission.input_file_name.clone(),
                    input_key: submission.input_key.clone(),
                    scratch_dir,
                });
                tracing::info!(job_id, user_id = %submission.user_id, "Annotation launched");
            }
            Ok(false) => {
                tracing::info!(job_id, "Job is no longer PENDING, skipping launch");
                self.ledger.record(WORKER, "mark_running", StepOutcome::Skipped).await;
                Self::discard_scratch(&dir).await;
            }
            Err(e) => {
                tracing::error!(job_id, error = %e, "Failed to mark job RUNNING");
                self.ledger.record(WORKER, "mark_running", StepOutcome::Failed).await;
                Self::discard_scratch(&dir).await;
            }
        }

        Disposition::Acknowledge
    }
}
