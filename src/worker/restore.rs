use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tempfile::TempDir;

use crate::config::PipelineConfig;
use crate::job::{restored_result_name, StorageKey};
use crate::queue::{ReceivedMessage, RetrievalNotification};
use crate::storage::{ColdStore, ObjectStore};
use crate::store::JobStore;
use crate::worker::{Backends, Disposition, MessageHandler, OutcomeLedger, StepOutcome};

const WORKER: &str = "restore";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RestoreOutcome {
    /// The retrieval output could not be read.
    OutputUnavailable,
    /// The owning record could not be looked up.
    LookupFailed,
    /// No record of this user references the archive.
    NoMatchingJob,
    /// Neither the direct nor the file upload reached hot storage.
    UploadFailed { job_id: String },
    Restored {
        job_id: String,
        result_key: String,
        record_updated: bool,
        archive_deleted: bool,
    },
}

/// Reply to a push invocation of [`RestoreHandler::invoke`]. `body` is JSON
/// text: the serialized [`RestoreOutcome`], or `{"error": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationResponse {
    pub status_code: u16,
    pub body: String,
}

/// Copies a finished retrieval back into hot storage and points the owning
/// record at it.
///
/// The record and archive are only touched after the hot copy is in place;
/// until then the archive stays the only copy.
pub struct RestoreHandler {
    jobs: Arc<dyn JobStore>,
    objects: Arc<dyn ObjectStore>,
    vault: Arc<dyn ColdStore>,
    ledger: Arc<OutcomeLedger>,
    vault_name: String,
    results_bucket: String,
    key_prefix: String,
}

impl RestoreHandler {
    pub fn new(config: &PipelineConfig, backends: &Backends) -> Self {
        Self {
            jobs: backends.jobs.clone(),
            objects: backends.objects.clone(),
            vault: backends.vault.clone(),
            ledger: backends.ledger.clone(),
            vault_name: config.storage.vault_name.clone(),
            results_bucket: config.storage.results_bucket.clone(),
            key_prefix: config.storage.key_prefix.clone(),
        }
    }

    pub async fn restore(&self, notification: &RetrievalNotification) -> RestoreOutcome {
        let archive_id = notification.archive_id.as_str();
        let user_id = notification.user_id();

        let bytes = match self
            .vault
            .retrieval_output(&self.vault_name, &notification.job_id)
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(
                    archive_id,
                    retrieval_job_id = %notification.job_id,
                    error = %e,
                    "Failed to read retrieval output"
                );
                self.ledger.record(WORKER, "fetch", StepOutcome::Failed).await;
                return RestoreOutcome::OutputUnavailable;
            }
        };
        self.ledger.record(WORKER, "fetch", StepOutcome::Succeeded).await;

        // Dropped at the end of this call, taking the buffered copy with it.
        let buffer = Self::buffer(&bytes).await;

        let record = match self.jobs.find_by_archive_id(user_id, archive_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::warn!(archive_id, user_id, "No matching job for restored archive");
                self.ledger.record(WORKER, "lookup", StepOutcome::Skipped).await;
                return RestoreOutcome::NoMatchingJob;
            }
            Err(e) => {
                tracing::error!(archive_id, user_id, error = %e, "Failed to look up archive owner");
                self.ledger.record(WORKER, "lookup", StepOutcome::Failed).await;
                return RestoreOutcome::LookupFailed;
            }
        };
        let job_id = record.job_id.clone();

        let result_name = restored_result_name(&record.input_file_name);
        let bucket = record
            .results_bucket
            .clone()
            .unwrap_or_else(|| self.results_bucket.clone());
        let key = match StorageKey::new(
            self.key_prefix.clone(),
            record.user_id.clone(),
            record.job_id.clone(),
            result_name.clone(),
        ) {
            Ok(key) => key.to_string(),
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Cannot build result key");
                self.ledger.record(WORKER, "upload", StepOutcome::Failed).await;
                return RestoreOutcome::UploadFailed { job_id };
            }
        };

        let buffered = buffer.as_ref().map(|(_, path)| path.as_path());
        if !self.upload(&job_id, &bucket, &key, bytes, buffered).await {
            self.ledger.record(WORKER, "upload", StepOutcome::Failed).await;
            return RestoreOutcome::UploadFailed { job_id };
        }
        self.ledger.record(WORKER, "upload", StepOutcome::Succeeded).await;
        tracing::info!(job_id = %job_id, bucket = %bucket, key = %key, "Result restored to hot storage");

        let record_updated = match self.jobs.restore_result_key(&job_id, &result_name).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to update restored record");
                false
            }
        };
        self.step("update_record", record_updated).await;

        let archive_deleted = match self.vault.delete_archive(&self.vault_name, archive_id).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(job_id = %job_id, archive_id, error = %e, "Failed to delete archive");
                false
            }
        };
        self.step("delete_archive", archive_deleted).await;

        RestoreOutcome::Restored {
            job_id,
            result_key: result_name,
            record_updated,
            archive_deleted,
        }
    }

    /// Entry point for push-delivered completion events. Any decodable event
    /// is answered with 200, whatever happened to the individual steps.
    pub async fn invoke(&self, event: &str) -> InvocationResponse {
        match RetrievalNotification::from_event(event) {
            Ok(notification) => {
                let outcome = self.restore(&notification).await;
                InvocationResponse {
                    status_code: 200,
                    body: serde_json::to_string(&outcome).unwrap_or_default(),
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Undecodable retrieval event");
                self.ledger.record(WORKER, "decode", StepOutcome::Failed).await;
                InvocationResponse {
                    status_code: 400,
                    body: serde_json::json!({ "error": e.to_string() }).to_string(),
                }
            }
        }
    }

    /// Write the retrieved bytes to a scoped temporary file, kept as a
    /// second upload source.
    async fn buffer(bytes: &[u8]) -> Option<(TempDir, PathBuf)> {
        let dir = match tempfile::Builder::new().prefix("gas-restore-").tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to create restore buffer");
                return None;
            }
        };
        let path = dir.path().join("retrieved");
        match tokio::fs::write(&path, bytes).await {
            Ok(()) => Some((dir, path)),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to buffer retrieval output");
                None
            }
        }
    }

    async fn upload(
        &self,
        job_id: &str,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        buffered: Option<&Path>,
    ) -> bool {
        let err = match self.objects.put_bytes(bucket, key, bytes).await {
            Ok(()) => return true,
            Err(e) => e,
        };
        let Some(path) = buffered else {
            tracing::error!(job_id, bucket, key, error = %err, "Failed to upload restored result");
            return false;
        };

        tracing::warn!(job_id, error = %err, "Direct upload failed, retrying from buffered file");
        match self.objects.put_file(bucket, key, path).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(job_id, bucket, key, error = %e, "Failed to upload restored result");
                false
            }
        }
    }

    async fn step(&self, step: &'static str, ok: bool) {
        self.ledger.record(WORKER, step, ok.into()).await;
    }
}

#[async_trait]
impl MessageHandler for RestoreHandler {
    fn name(&self) -> &'static str {
        WORKER
    }

    async fn handle(&self, message: &ReceivedMessage) -> Disposition {
        let response = self.invoke(&message.body).await;
        tracing::debug!(
            message_id = %message.message_id,
            status_code = response.status_code,
            "Retrieval event handled"
        );
        Disposition::Acknowledge
    }
}
