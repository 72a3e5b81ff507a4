use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{PipelineError, Result};
use crate::job::{Completion, JobRecord, JobStatus};
use crate::store::JobStore;

#[derive(Debug, Default)]
struct Tables {
    jobs: HashMap<String, JobRecord>,
    /// `(user_id, submit_time, job_id)`
    by_user: BTreeSet<(String, i64, String)>,
}

/// Job store held in process memory, for local runs and tests.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    tables: RwLock<Tables>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tables.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tables.read().await.jobs.is_empty()
    }

    async fn update<F>(&self, job_id: &str, apply: F) -> Result<()>
    where
        F: FnOnce(&mut JobRecord) + Send,
    {
        let mut tables = self.tables.write().await;
        let record = tables
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))?;
        apply(record);
        Ok(())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, record: JobRecord) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.jobs.contains_key(&record.job_id) {
            return Err(PipelineError::JobExists(record.job_id));
        }
        tables.by_user.insert((
            record.user_id.clone(),
            record.submit_time,
            record.job_id.clone(),
        ));
        tables.jobs.insert(record.job_id.clone(), record);
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>> {
        Ok(self.tables.read().await.jobs.get(job_id).cloned())
    }

    async fn transition_status(
        &self,
        job_id: &str,
        expected: JobStatus,
        next: JobStatus,
    ) -> Result<bool> {
        if !expected.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: expected,
                to: next,
            });
        }

        let mut tables = self.tables.write().await;
        let record = tables
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))?;

        if record.job_status != expected {
            return Ok(false);
        }
        record.job_status = next;
        Ok(true)
    }

    async fn complete(&self, job_id: &str, completion: &Completion) -> Result<()> {
        let completion = completion.clone();
        self.update(job_id, move |record| {
            record.results_bucket = Some(completion.results_bucket);
            record.result_key = Some(completion.result_key);
            record.log_key = Some(completion.log_key);
            record.complete_time = Some(completion.complete_time);
            record.job_status = JobStatus::Completed;
        })
        .await
    }

    async fn set_archive_id(&self, job_id: &str, archive_id: &str) -> Result<()> {
        let archive_id = archive_id.to_string();
        self.update(job_id, move |record| {
            record.results_archive_id = Some(archive_id);
        })
        .await
    }

    async fn clear_result_key(&self, job_id: &str) -> Result<()> {
        self.update(job_id, |record| {
            record.result_key = None;
        })
        .await
    }

    async fn restore_result_key(&self, job_id: &str, result_key: &str) -> Result<()> {
        let result_key = result_key.to_string();
        self.update(job_id, move |record| {
            record.result_key = Some(result_key);
            record.results_archive_id = None;
        })
        .await
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<JobRecord>> {
        let tables = self.tables.read().await;
        let start = (user_id.to_string(), i64::MIN, String::new());
        Ok(tables
            .by_user
            .range(start..)
            .take_while(|(user, _, _)| user == user_id)
            .filter_map(|(_, _, job_id)| tables.jobs.get(job_id).cloned())
            .collect())
    }
}
