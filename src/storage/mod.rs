//! Object storage: the hot object store for job inputs and outputs, and the
//! cold vault that archived results move into.
//!
//! Objects in the vault are not readable directly. A retrieval job has to be
//! initiated first; the vault announces completion asynchronously and the
//! bytes can then be read from the finished job.

pub mod memory;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use memory::{InMemoryObjectStore, InMemoryVault};

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_bytes(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<()>;

    /// Upload a local file.
    async fn put_file(&self, bucket: &str, key: &str, path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(path).await?;
        self.put_bytes(bucket, key, bytes).await
    }

    async fn get_bytes(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// Download an object into a local file, replacing it if present.
    async fn download_to(&self, bucket: &str, key: &str, dest: &Path) -> Result<()> {
        let bytes = self.get_bytes(bucket, key).await?;
        tokio::fs::write(dest, bytes).await?;
        Ok(())
    }

    /// Deleting a missing object is not an error.
    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool>;
}

/// Retrieval speed requested from the cold tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetrievalTier {
    Expedited,
    Standard,
}

impl std::fmt::Display for RetrievalTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetrievalTier::Expedited => write!(f, "Expedited"),
            RetrievalTier::Standard => write!(f, "Standard"),
        }
    }
}

/// Parameters of an archive-retrieval job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalRequest {
    pub archive_id: String,
    pub tier: RetrievalTier,
    /// Echoed back in the completion notification; holds the owning user id.
    pub description: String,
    /// Where the completion notification is delivered.
    pub notification_topic: String,
}

#[async_trait]
pub trait ColdStore: Send + Sync {
    /// Store bytes in the vault, returning the new archive id.
    async fn upload_archive(&self, vault: &str, bytes: Vec<u8>) -> Result<String>;

    /// Start a retrieval job, returning its id.
    async fn initiate_retrieval(&self, vault: &str, request: &RetrievalRequest) -> Result<String>;

    /// Bytes of a finished retrieval job.
    async fn retrieval_output(&self, vault: &str, retrieval_job_id: &str) -> Result<Vec<u8>>;

    async fn delete_archive(&self, vault: &str, archive_id: &str) -> Result<()>;
}
