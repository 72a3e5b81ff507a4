use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::queue::{publish, MessageQueue, RetrievalNotification};
use crate::storage::{ColdStore, ObjectStore, RetrievalRequest, RetrievalTier};

/// Consume one unit from a failure budget.
fn take_failure(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Hot object store held in process memory.
///
/// Uploads can be made to fail a given number of times, separately for byte
/// uploads and file uploads.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<(String, String), Vec<u8>>>,
    byte_upload_failures: AtomicUsize,
    file_upload_failures: AtomicUsize,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_byte_uploads(&self, times: usize) {
        self.byte_upload_failures.store(times, Ordering::SeqCst);
    }

    pub fn fail_file_uploads(&self, times: usize) {
        self.file_upload_failures.store(times, Ordering::SeqCst);
    }

    pub async fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .read()
            .await
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    async fn insert(&self, bucket: &str, key: &str, bytes: Vec<u8>) {
        self.objects
            .write()
            .await
            .insert((bucket.to_string(), key.to_string()), bytes);
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put_bytes(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<()> {
        if take_failure(&self.byte_upload_failures) {
            return Err(PipelineError::Backend(format!(
                "upload of {}/{} rejected",
                bucket, key
            )));
        }
        self.insert(bucket, key, bytes).await;
        Ok(())
    }

    async fn put_file(&self, bucket: &str, key: &str, path: &Path) -> Result<()> {
        if take_failure(&self.file_upload_failures) {
            return Err(PipelineError::Backend(format!(
                "file upload of {}/{} rejected",
                bucket, key
            )));
        }
        let bytes = tokio::fs::read(path).await?;
        self.insert(bucket, key, bytes).await;
        Ok(())
    }

    async fn get_bytes(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| PipelineError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.objects
            .write()
            .await
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        Ok(self
            .objects
            .read()
            .await
            .contains_key(&(bucket.to_string(), key.to_string())))
    }
}

#[derive(Debug, Clone)]
struct RetrievalJob {
    vault: String,
    bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct VaultState {
    /// (vault, archive id) -> bytes
    archives: HashMap<(String, String), Vec<u8>>,
    jobs: HashMap<String, RetrievalJob>,
    /// Every initiation attempt, accepted or not, in order.
    requests: Vec<RetrievalRequest>,
}

/// Cold vault held in process memory.
///
/// When a completion queue is attached, each accepted retrieval publishes a
/// [`RetrievalNotification`] to it after the tier's simulated latency.
pub struct InMemoryVault {
    state: RwLock<VaultState>,
    rejected_tiers: RwLock<HashSet<RetrievalTier>>,
    upload_failures: AtomicUsize,
    completions: Option<Arc<dyn MessageQueue>>,
    expedited_latency: Duration,
    standard_latency: Duration,
}

impl Default for InMemoryVault {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryVault {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(VaultState::default()),
            rejected_tiers: RwLock::new(HashSet::new()),
            upload_failures: AtomicUsize::new(0),
            completions: None,
            expedited_latency: Duration::ZERO,
            standard_latency: Duration::ZERO,
        }
    }

    pub fn with_completion_queue(mut self, queue: Arc<dyn MessageQueue>) -> Self {
        self.completions = Some(queue);
        self
    }

    pub fn with_latency(mut self, expedited: Duration, standard: Duration) -> Self {
        self.expedited_latency = expedited;
        self.standard_latency = standard;
        self
    }

    /// Reject every future retrieval request for `tier`.
    pub async fn reject_tier(&self, tier: RetrievalTier) {
        self.rejected_tiers.write().await.insert(tier);
    }

    pub async fn accept_tier(&self, tier: RetrievalTier) {
        self.rejected_tiers.write().await.remove(&tier);
    }

    pub fn fail_uploads(&self, times: usize) {
        self.upload_failures.store(times, Ordering::SeqCst);
    }

    pub async fn archive_count(&self) -> usize {
        self.state.read().await.archives.len()
    }

    pub async fn archive_bytes(&self, vault: &str, archive_id: &str) -> Option<Vec<u8>> {
        self.state
            .read()
            .await
            .archives
            .get(&(vault.to_string(), archive_id.to_string()))
            .cloned()
    }

    pub async fn retrieval_requests(&self) -> Vec<RetrievalRequest> {
        self.state.read().await.requests.clone()
    }

    fn latency(&self, tier: RetrievalTier) -> Duration {
        match tier {
            RetrievalTier::Expedited => self.expedited_latency,
            RetrievalTier::Standard => self.standard_latency,
        }
    }
}

#[async_trait]
impl ColdStore for InMemoryVault {
    async fn upload_archive(&self, vault: &str, bytes: Vec<u8>) -> Result<String> {
        if take_failure(&self.upload_failures) {
            return Err(PipelineError::Backend(format!(
                "archive upload to {} rejected",
                vault
            )));
        }
        let archive_id = Uuid::new_v4().to_string();
        self.state
            .write()
            .await
            .archives
            .insert((vault.to_string(), archive_id.clone()), bytes);
        Ok(archive_id)
    }

    async fn initiate_retrieval(&self, vault: &str, request: &RetrievalRequest) -> Result<String> {
        let rejected = self.rejected_tiers.read().await.contains(&request.tier);

        let job_id = {
            let mut state = self.state.write().await;
            state.requests.push(request.clone());

            if rejected {
                return Err(PipelineError::RetrievalRejected {
                    tier: request.tier.to_string(),
                    reason: "insufficient capacity".to_string(),
                });
            }

            let bytes = state
                .archives
                .get(&(vault.to_string(), request.archive_id.clone()))
                .cloned()
                .ok_or_else(|| PipelineError::ArchiveNotFound(request.archive_id.clone()))?;

            let job_id = Uuid::new_v4().to_string();
            state.jobs.insert(
                job_id.clone(),
                RetrievalJob {
                    vault: vault.to_string(),
                    bytes,
                },
            );
            job_id
        };

        if let Some(queue) = &self.completions {
            let notification = RetrievalNotification {
                job_id: job_id.clone(),
                archive_id: request.archive_id.clone(),
                job_description: request.description.clone(),
                status_code: Some("Succeeded".to_string()),
                tier: Some(request.tier.to_string()),
            };
            publish(queue.as_ref(), &notification, self.latency(request.tier)).await?;
        }

        Ok(job_id)
    }

    async fn retrieval_output(&self, vault: &str, retrieval_job_id: &str) -> Result<Vec<u8>> {
        let state = self.state.read().await;
        match state.jobs.get(retrieval_job_id) {
            Some(job) if job.vault == vault => Ok(job.bytes.clone()),
            _ => Err(PipelineError::RetrievalJobNotFound(
                retrieval_job_id.to_string(),
            )),
        }
    }

    async fn delete_archive(&self, vault: &str, archive_id: &str) -> Result<()> {
        self.state
            .write()
            .await
            .archives
            .remove(&(vault.to_string(), archive_id.to_string()))
            .map(|_| ())
            .ok_or_else(|| PipelineError::ArchiveNotFound(archive_id.to_string()))
    }
}
