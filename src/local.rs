use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::accounts::{AccountDirectory, InMemoryAccounts};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::job::{JobRecord, StorageKey, UserRole};
use crate::queue::{self, InMemoryQueue, MessageQueue, SubmissionMessage, ThawRequest};
use crate::status::{run_status_server, StatusState};
use crate::storage::{InMemoryObjectStore, InMemoryVault, ObjectStore};
use crate::store::{InMemoryJobStore, JobStore};
use crate::worker::{
    ArchiveWorker, Backends, OutcomeLedger, PollLoop, RequestWorker, RestoreHandler, TaskLauncher,
    TaskReport, TaskRunner, ThawWorker,
};

/// The pipeline's four queues.
#[derive(Clone)]
pub struct LocalQueues {
    pub requests: Arc<InMemoryQueue>,
    pub archive: Arc<InMemoryQueue>,
    pub thaw: Arc<InMemoryQueue>,
    pub restore: Arc<InMemoryQueue>,
}

/// The web tier's side of the pipeline: accepting uploads and handling
/// upgrades. Everything past the first queue belongs to the workers.
pub struct Frontend {
    jobs: Arc<dyn JobStore>,
    objects: Arc<dyn ObjectStore>,
    accounts: Arc<dyn AccountDirectory>,
    requests: Arc<dyn MessageQueue>,
    thaw: Arc<dyn MessageQueue>,
    inputs_bucket: String,
    key_prefix: String,
}

impl Frontend {
    /// Store the input, create the PENDING record and publish the
    /// submission, carrying the user's role as of now.
    pub async fn submit_job(
        &self,
        user_id: &str,
        input_file_name: &str,
        contents: Vec<u8>,
    ) -> Result<JobRecord> {
        let role = self.accounts.role(user_id).await?;
        if input_file_name.contains(['/', '\\']) {
            return Err(PipelineError::InvalidStorageKey(format!(
                "input file name {:?} must not contain a path",
                input_file_name
            )));
        }
        let job_id = Uuid::new_v4().to_string();
        let key = StorageKey::new(
            self.key_prefix.clone(),
            user_id,
            job_id.clone(),
            input_file_name,
        )?
        .to_string();

        self.objects
            .put_bytes(&self.inputs_bucket, &key, contents)
            .await?;

        let record = JobRecord::new_pending(
            job_id.clone(),
            user_id,
            input_file_name,
            self.inputs_bucket.clone(),
            key.clone(),
        );
        self.jobs.create(record.clone()).await?;

        let submission = SubmissionMessage {
            job_id: job_id.clone(),
            user_id: user_id.to_string(),
            input_file_name: input_file_name.to_string(),
            input_bucket: self.inputs_bucket.clone(),
            input_key: key,
            user_role: role,
        };
        queue::publish(self.requests.as_ref(), &submission, Duration::ZERO).await?;

        tracing::info!(job_id = %job_id, user_id, role = %role, "Job submitted");
        Ok(record)
    }

    /// Make the user premium and request a thaw for each archived result.
    /// Returns the number of thaw requests published.
    pub async fn upgrade_user(&self, user_id: &str) -> Result<usize> {
        self.accounts
            .update_role(user_id, UserRole::PremiumUser)
            .await?;

        let mut published = 0;
        for record in self.jobs.list_by_user(user_id).await? {
            let Some(archive_id) = record.results_archive_id else {
                continue;
            };
            let request = ThawRequest {
                user_id: user_id.to_string(),
                archive_id,
            };
            queue::publish(self.thaw.as_ref(), &request, Duration::ZERO).await?;
            published += 1;
        }

        tracing::info!(user_id, thaw_requests = published, "User upgraded to premium");
        Ok(published)
    }
}

/// Whole pipeline in one process, over in-memory backends.
///
/// Holds the concrete backends so callers (and tests) can seed and inspect
/// them; the workers only ever see them through their traits.
pub struct LocalPipeline {
    config: PipelineConfig,
    pub queues: LocalQueues,
    pub jobs: Arc<InMemoryJobStore>,
    pub objects: Arc<InMemoryObjectStore>,
    pub vault: Arc<InMemoryVault>,
    pub accounts: Arc<InMemoryAccounts>,
    pub ledger: Arc<OutcomeLedger>,
    frontend: Arc<Frontend>,
    launcher: TaskLauncher,
    reports: Mutex<Option<mpsc::UnboundedReceiver<TaskReport>>>,
}

impl LocalPipeline {
    pub fn new(config: &PipelineConfig) -> Self {
        let queues = LocalQueues {
            requests: Arc::new(InMemoryQueue::new(config.queues.requests.clone())),
            archive: Arc::new(InMemoryQueue::new(config.queues.archive.clone())),
            thaw: Arc::new(InMemoryQueue::new(config.queues.thaw.clone())),
            restore: Arc::new(InMemoryQueue::new(config.queues.restore.clone())),
        };
        let jobs = Arc::new(InMemoryJobStore::new());
        let objects = Arc::new(InMemoryObjectStore::new());
        let vault = Arc::new(InMemoryVault::new().with_completion_queue(queues.restore.clone()));
        let accounts = Arc::new(InMemoryAccounts::new());
        let ledger = Arc::new(OutcomeLedger::new());

        let backends = Backends {
            jobs: jobs.clone(),
            objects: objects.clone(),
            vault: vault.clone(),
            accounts: accounts.clone(),
            ledger: ledger.clone(),
        };

        let frontend = Arc::new(Frontend {
            jobs: jobs.clone(),
            objects: objects.clone(),
            accounts: accounts.clone(),
            requests: queues.requests.clone(),
            thaw: queues.thaw.clone(),
            inputs_bucket: config.storage.inputs_bucket.clone(),
            key_prefix: config.storage.key_prefix.clone(),
        });

        let runner = TaskRunner::new(config, &backends, queues.archive.clone());
        let (launcher, reports) = TaskLauncher::new(runner);

        Self {
            config: config.clone(),
            queues,
            jobs,
            objects,
            vault,
            accounts,
            ledger,
            frontend,
            launcher,
            reports: Mutex::new(Some(reports)),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
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

    pub fn frontend(&self) -> Arc<Frontend> {
        self.frontend.clone()
    }

    pub fn launcher(&self) -> &TaskLauncher {
        &self.launcher
    }

    /// Take the stream of finished task reports. While it is taken, `run`
    /// does not log reports itself.
    pub async fn take_reports(&self) -> Option<mpsc::UnboundedReceiver<TaskReport>> {
        self.reports.lock().await.take()
    }

    pub async fn register_user(&self, user_id: &str, role: UserRole) {
        self.accounts.set_role(user_id, role).await;
    }

    pub async fn submit_job(
        &self,
        user_id: &str,
        input_file_name: &str,
        contents: Vec<u8>,
    ) -> Result<JobRecord> {
        self.frontend
            .submit_job(user_id, input_file_name, contents)
            .await
    }

    pub async fn upgrade_user(&self, user_id: &str) -> Result<usize> {
        self.frontend.upgrade_user(user_id).await
    }

    pub fn status_state(&self) -> StatusState {
        StatusState {
            jobs: self.jobs.clone(),
            ledger: self.ledger.clone(),
            frontend: self.frontend.clone(),
        }
    }

    /// Run every worker until `shutdown` fires, then wait for in-flight
    /// annotation tasks.
    ///
    /// Starts:
    /// 1. The request, archive, thaw and restore polling loops
    /// 2. A reporter that logs finished annotation tasks
    /// 3. The status API, if an address is configured
    pub async fn run(&self, shutdown: CancellationToken) {
        let backends = self.backends();
        let mut handles = Vec::new();

        let requests = PollLoop::new(
            self.queues.requests.clone(),
            RequestWorker::new(&self.config, &backends, self.launcher.clone()),
            &self.config,
        );
        let token = shutdown.clone();
        handles.push(tokio::spawn(async move { requests.run(token).await }));

        let archive = PollLoop::new(
            self.queues.archive.clone(),
            ArchiveWorker::new(&self.config, &backends),
            &self.config,
        );
        let token = shutdown.clone();
        handles.push(tokio::spawn(async move { archive.run(token).await }));

        let thaw = PollLoop::new(
            self.queues.thaw.clone(),
            ThawWorker::new(&self.config, &backends),
            &self.config,
        );
        let token = shutdown.clone();
        handles.push(tokio::spawn(async move { thaw.run(token).await }));

        let restore = PollLoop::new(
            self.queues.restore.clone(),
            RestoreHandler::new(&self.config, &backends),
            &self.config,
        );
        let token = shutdown.clone();
        handles.push(tokio::spawn(async move { restore.run(token).await }));

        if let Some(mut reports) = self.take_reports().await {
            let token = shutdown.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        report = reports.recv() => match report {
                            Some(report) => tracing::debug!(report = ?report, "Task report"),
                            None => break,
                        },
                    }
                }
            }));
        }

        if let Some(addr) = self.config.status_addr {
            let state = self.status_state();
            let token = shutdown.clone();
            handles.push(tokio::spawn(async move {
                run_status_server(addr, state, token).await;
            }));
        }

        tracing::info!("Pipeline started");

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Pipeline task panicked");
            }
        }

        tracing::info!(in_flight = self.launcher.in_flight(), "Waiting for annotation tasks");
        self.launcher.wait().await;
        tracing::info!("Pipeline stopped");
    }
}
