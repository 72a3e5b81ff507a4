//! User account lookups.
//!
//! A user's role can change between job submission and the moment a worker
//! acts on the job, so privileged actions re-read the role here rather than
//! trusting the role carried in a message.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{PipelineError, Result};
use crate::job::UserRole;

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Current role of `user_id`.
    async fn role(&self, user_id: &str) -> Result<UserRole>;

    /// Change the role of an existing user.
    async fn update_role(&self, user_id: &str, role: UserRole) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryAccounts {
    roles: RwLock<HashMap<String, UserRole>>,
}

impl InMemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_role(&self, user_id: impl Into<String>, role: UserRole) {
        self.roles.write().await.insert(user_id.into(), role);
    }
}

#[async_trait]
impl AccountDirectory for InMemoryAccounts {
    async fn role(&self, user_id: &str) -> Result<UserRole> {
        self.roles
            .read()
            .await
            .get(user_id)
            .copied()
            .ok_or_else(|| PipelineError::UserNotFound(user_id.to_string()))
    }

    async fn update_role(&self, user_id: &str, role: UserRole) -> Result<()> {
        match self.roles.write().await.get_mut(user_id) {
            Some(current) => {
                *current = role;
                Ok(())
            }
            None => Err(PipelineError::UserNotFound(user_id.to_string())),
        }
    }
}
