//! Job record store.
//!
//! Every worker reads and writes job state through [`JobStore`]. There is no
//! lock over a record: the only concurrency primitive is
//! [`JobStore::transition_status`], a compare-and-swap on `job_status`.
//! All other writes are overwrites and safe to repeat.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::job::{Completion, JobRecord, JobStatus};

pub use memory::InMemoryJobStore;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new record. Fails if `job_id` is taken.
    async fn create(&self, record: JobRecord) -> Result<()>;

    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>>;

    /// Move `job_status` from `expected` to `next` only if the record is
    /// currently at `expected`. Returns `Ok(false)` and leaves the record
    /// untouched on a mismatch.
    async fn transition_status(
        &self,
        job_id: &str,
        expected: JobStatus,
        next: JobStatus,
    ) -> Result<bool>;

    /// Unconditional final write of the task runner.
    async fn complete(&self, job_id: &str, completion: &Completion) -> Result<()>;

    async fn set_archive_id(&self, job_id: &str, archive_id: &str) -> Result<()>;

    async fn clear_result_key(&self, job_id: &str) -> Result<()>;

    /// Put a restored result back: sets `result_key` and drops
    /// `results_archive_id` in one write.
    async fn restore_result_key(&self, job_id: &str, result_key: &str) -> Result<()>;

    /// A user's records ordered by `submit_time` (secondary index).
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<JobRecord>>;

    /// Resolve the record that owns `archive_id` through the user index.
    async fn find_by_archive_id(
        &self,
        user_id: &str,
        archive_id: &str,
    ) -> Result<Option<JobRecord>> {
        Ok(self
            .list_by_user(user_id)
            .await?
            .into_iter()
            .find(|r| r.results_archive_id.as_deref() == Some(archive_id)))
    }
}
