use std::sync::Arc;

use async_trait::async_trait;

use crate::accounts::AccountDirectory;
use crate::config::PipelineConfig;
use crate::job::UserRole;
use crate::queue::{Envelope, ReceivedMessage, ThawRequest};
use crate::storage::{ColdStore, RetrievalRequest, RetrievalTier};
use crate::worker::{Backends, Disposition, MessageHandler, OutcomeLedger, StepOutcome};

const WORKER: &str = "thaw";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThawOutcome {
    /// Only premium users get their archives back.
    NotPremiumUser(UserRole),
    RoleUnavailable,
    Started {
        tier: RetrievalTier,
        retrieval_job_id: String,
    },
    /// Both tiers refused the retrieval.
    Failed,
}

/// Starts cold-tier retrieval of an archived result after a user upgrades.
///
/// Expedited retrieval is tried first. If the vault refuses it, exactly one
/// Standard request follows; a refused Standard request is logged and the
/// message is dropped.
pub struct ThawWorker {
    accounts: Arc<dyn AccountDirectory>,
    vault: Arc<dyn ColdStore>,
    ledger: Arc<OutcomeLedger>,
    vault_name: String,
    notification_topic: String,
}

impl ThawWorker {
    pub fn new(config: &PipelineConfig, backends: &Backends) -> Self {
        Self {
            accounts: backends.accounts.clone(),
            vault: backends.vault.clone(),
            ledger: backends.ledger.clone(),
            vault_name: config.storage.vault_name.clone(),
            notification_topic: config.queues.restore.clone(),
        }
    }

    pub async fn thaw(&self, request: &ThawRequest) -> ThawOutcome {
        let archive_id = request.archive_id.as_str();

        match self.accounts.role(&request.user_id).await {
            Ok(UserRole::PremiumUser) => {}
            Ok(role) => {
                tracing::info!(archive_id, user_id = %request.user_id, role = %role, "User is not premium, skipping retrieval");
                self.ledger.record(WORKER, "role_check", StepOutcome::Skipped).await;
                return ThawOutcome::NotPremiumUser(role);
            }
            Err(e) => {
                tracing::error!(archive_id, user_id = %request.user_id, error = %e, "Failed to read user role");
                self.ledger.record(WORKER, "role_check", StepOutcome::Failed).await;
                return ThawOutcome::RoleUnavailable;
            }
        }

        for tier in [RetrievalTier::Expedited, RetrievalTier::Standard] {
            let step = match tier {
                RetrievalTier::Expedited => "expedited",
                RetrievalTier::Standard => "standard",
            };
            let retrieval = RetrievalRequest {
                archive_id: request.archive_id.clone(),
                tier,
                description: request.user_id.clone(),
                notification_topic: self.notification_topic.clone(),
            };

            match self.vault.initiate_retrieval(&self.vault_name, &retrieval).await {
                Ok(retrieval_job_id) => {
                    tracing::info!(
                        archive_id,
                        user_id = %request.user_id,
                        tier = %tier,
                        retrieval_job_id = %retrieval_job_id,
                        "Retrieval started"
                    );
                    self.ledger.record(WORKER, step, StepOutcome::Succeeded).await;
                    return ThawOutcome::Started {
                        tier,
                        retrieval_job_id,
                    };
                }
                Err(e) => {
                    tracing::warn!(archive_id, tier = %tier, error = %e, "Retrieval request refused");
                    self.ledger.record(WORKER, step, StepOutcome::Failed).await;
                }
            }
        }

        tracing::error!(archive_id, user_id = %request.user_id, "Could not start retrieval at any tier");
        ThawOutcome::Failed
    }
}

#[async_trait]
impl MessageHandler for ThawWorker {
    fn name(&self) -> &'static str {
        WORKER
    }

    async fn handle(&self, message: &ReceivedMessage) -> Disposition {
        match Envelope::decode::<ThawRequest>(&message.body) {
            Ok(request) => {
                let outcome = self.thaw(&request).await;
                tracing::debug!(archive_id = %request.archive_id, outcome = ?outcome, "Thaw request handled");
            }
            Err(e) => {
                tracing::error!(message_id = %message.message_id, error = %e, "Discarding malformed thaw request");
                self.ledger.record(WORKER, "decode", StepOutcome::Failed).await;
            }
        }
        Disposition::Acknowledge
    }
}
