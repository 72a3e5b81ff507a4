use std::sync::Arc;

use async_trait::async_trait;

use crate::accounts::AccountDirectory;
use crate::config::PipelineConfig;
use crate::job::{StorageKey, UserRole};
use crate::queue::{ArchiveRequest, Envelope, ReceivedMessage};
use crate::storage::{ColdStore, ObjectStore};
use crate::store::JobStore;
use crate::worker::{Backends, Disposition, MessageHandler, OutcomeLedger, StepOutcome};

const WORKER: &str = "archive";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// The user is no longer on the free tier.
    NotFreeUser(UserRole),
    /// The user's role could not be read.
    RoleUnavailable,
    /// No record for the job, or it could not be read.
    RecordUnavailable,
    /// The record has no hot result left to move.
    AlreadyArchived,
    /// Reading the hot copy or writing the cold copy failed; nothing was
    /// changed.
    ColdUploadFailed,
    /// The cold copy exists. The remaining steps are reported individually.
    Archived {
        archive_id: String,
        archive_id_recorded: bool,
        result_key_cleared: bool,
        hot_deleted: bool,
    },
}

/// Moves a free user's completed result from hot storage into the vault.
///
/// The user's role is re-read first: an upgrade between completion and the
/// archive trigger cancels the move. Once the cold copy exists the record and
/// hot object are updated step by step; a failing step is logged and the rest
/// still run.
pub struct ArchiveWorker {
    accounts: Arc<dyn AccountDirectory>,
    jobs: Arc<dyn JobStore>,
    objects: Arc<dyn ObjectStore>,
    vault: Arc<dyn ColdStore>,
    ledger: Arc<OutcomeLedger>,
    vault_name: String,
    key_prefix: String,
}

impl ArchiveWorker {
    pub fn new(config: &PipelineConfig, backends: &Backends) -> Self {
        Self {
            accounts: backends.accounts.clone(),
            jobs: backends.jobs.clone(),
            objects: backends.objects.clone(),
            vault: backends.vault.clone(),
            ledger: backends.ledger.clone(),
            vault_name: config.storage.vault_name.clone(),
            key_prefix: config.storage.key_prefix.clone(),
        }
    }

    pub async fn archive(&self, request: &ArchiveRequest) -> ArchiveOutcome {
        let job_id = request.job_id.as_str();

        match self.accounts.role(&request.user_id).await {
            Ok(UserRole::FreeUser) => {}
            Ok(role) => {
                tracing::info!(job_id, user_id = %request.user_id, role = %role, "User is not on the free tier, skipping archive");
                self.ledger.record(WORKER, "role_check", StepOutcome::Skipped).await;
                return ArchiveOutcome::NotFreeUser(role);
            }
            Err(e) => {
                tracing::error!(job_id, user_id = %request.user_id, error = %e, "Failed to read user role");
                self.ledger.record(WORKER, "role_check", StepOutcome::Failed).await;
                return ArchiveOutcome::RoleUnavailable;
            }
        }

        let record = match self.jobs.get(job_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::warn!(job_id, "No record for archive request");
                self.ledger.record(WORKER, "load_record", StepOutcome::Failed).await;
                return ArchiveOutcome::RecordUnavailable;
            }
            Err(e) => {
                tracing::error!(job_id, error = %e, "Failed to read job record");
                self.ledger.record(WORKER, "load_record", StepOutcome::Failed).await;
                return ArchiveOutcome::RecordUnavailable;
            }
        };

        let Some(result_key) = record.result_key.clone() else {
            tracing::info!(job_id, "Result already archived");
            self.ledger.record(WORKER, "load_record", StepOutcome::Skipped).await;
            return ArchiveOutcome::AlreadyArchived;
        };

        let bucket = record
            .results_bucket
            .clone()
            .unwrap_or_else(|| request.results_bucket.clone());
        let key = match StorageKey::new(
            self.key_prefix.clone(),
            record.user_id.clone(),
            record.job_id.clone(),
            result_key,
        ) {
            Ok(key) => key.to_string(),
            Err(e) => {
                tracing::error!(job_id, error = %e, "Cannot build result key");
                self.ledger.record(WORKER, "cold_upload", StepOutcome::Failed).await;
                return ArchiveOutcome::ColdUploadFailed;
            }
        };

        let archive_id = match self.copy_to_vault(job_id, &bucket, &key).await {
            Some(id) => id,
            None => {
                self.ledger.record(WORKER, "cold_upload", StepOutcome::Failed).await;
                return ArchiveOutcome::ColdUploadFailed;
            }
        };
        self.ledger.record(WORKER, "cold_upload", StepOutcome::Succeeded).await;
        tracing::info!(job_id, archive_id = %archive_id, "Result copied to vault");

        let archive_id_recorded = match self.jobs.set_archive_id(job_id, &archive_id).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(job_id, archive_id = %archive_id, error = %e, "Failed to record archive id");
                false
            }
        };
        self.step("record_archive_id", archive_id_recorded).await;

        let result_key_cleared = match self.jobs.clear_result_key(job_id).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(job_id, error = %e, "Failed to clear result key");
                false
            }
        };
        self.step("clear_result_key", result_key_cleared).await;

        let hot_deleted = match self.objects.delete(&bucket, &key).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(job_id, bucket = %bucket, key = %key, error = %e, "Failed to delete hot result");
                false
            }
        };
        self.step("hot_delete", hot_deleted).await;

        ArchiveOutcome::Archived {
            archive_id,
            archive_id_recorded,
            result_key_cleared,
            hot_deleted,
        }
    }

    async fn copy_to_vault(&self, job_id: &str, bucket: &str, key: &str) -> Option<String> {
        let bytes = match self.objects.get_bytes(bucket, key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(job_id, bucket, key, error = %e, "Failed to read hot result");
                return None;
            }
        };
        match self.vault.upload_archive(&self.vault_name, bytes).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!(job_id, vault = %self.vault_name, error = %e, "Failed to upload archive");
                None
            }
        }
    }

    async fn step(&self, step: &'static str, ok: bool) {
        self.ledger.record(WORKER, step, ok.into()).await;
    }
}

#[async_trait]
impl MessageHandler for ArchiveWorker {
    fn name(&self) -> &'static str {
        WORKER
    }

    async fn handle(&self, message: &ReceivedMessage) -> Disposition {
        match Envelope::decode::<ArchiveRequest>(&message.body) {
            Ok(request) => {
                let outcome = self.archive(&request).await;
                tracing::debug!(job_id = %request.job_id, outcome = ?outcome, "Archive request handled");
            }
            Err(e) => {
                tracing::error!(message_id = %message.message_id, error = %e, "Discarding malformed archive request");
                self.ledger.record(WORKER, "decode", StepOutcome::Failed).await;
            }
        }
        Disposition::Acknowledge
    }
}
