use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Lifecycle state of an annotation job.
///
/// The order of the variants is the lifecycle order; a job only ever moves
/// forward, one step at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
}

impl JobStatus {
    /// Valid forward transitions. `Running -> Completed` and
    /// `Pending -> Completed` are both allowed because the task runner's
    /// final write is unconditional and may land before the request worker's
    /// `Pending -> Running` write.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Completed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "RUNNING" => Ok(JobStatus::Running),
            "COMPLETED" => Ok(JobStatus::Completed),
            other => Err(PipelineError::UnknownStatus(other.to_string())),
        }
    }
}

/// Account tier of the submitting user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    FreeUser,
    PremiumUser,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            UserRole::FreeUser => "free_user",
            UserRole::PremiumUser => "premium_user",
        }
    }

    pub fn is_free(self) -> bool {
        self == UserRole::FreeUser
    }

    pub fn is_premium(self) -> bool {
        self == UserRole::PremiumUser
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free_user" => Ok(UserRole::FreeUser),
            "premium_user" => Ok(UserRole::PremiumUser),
            other => Err(PipelineError::UnknownRole(other.to_string())),
        }
    }
}

/// Durable state of one annotation job, keyed by `job_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub user_id: String,
    pub input_file_name: String,
    pub input_bucket: String,
    pub input_key: String,
    /// Epoch seconds.
    pub submit_time: i64,
    pub job_status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results_bucket: Option<String>,
    /// Result file name. Absent while the result sits in the cold tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_key: Option<String>,
    /// Present only while the result sits in the cold tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results_archive_id: Option<String>,
}

impl JobRecord {
    pub fn new_pending(
        job_id: impl Into<String>,
        user_id: impl Into<String>,
        input_file_name: impl Into<String>,
        input_bucket: impl Into<String>,
        input_key: impl Into<String>,
    ) -> Self {
        Self::with_submit_time(
            job_id,
            user_id,
            input_file_name,
            input_bucket,
            input_key,
            Utc::now().timestamp(),
        )
    }

    pub fn with_submit_time(
        job_id: impl Into<String>,
        user_id: impl Into<String>,
        input_file_name: impl Into<String>,
        input_bucket: impl Into<String>,
        input_key: impl Into<String>,
        submit_time: i64,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            user_id: user_id.into(),
            input_file_name: input_file_name.into(),
            input_bucket: input_bucket.into(),
            input_key: input_key.into(),
            submit_time,
            job_status: JobStatus::Pending,
            complete_time: None,
            results_bucket: None,
            result_key: None,
            log_key: None,
            results_archive_id: None,
        }
    }

    pub fn is_archived(&self) -> bool {
        self.results_archive_id.is_some()
    }
}

/// Fields written by the task runner's final update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub results_bucket: String,
    pub result_key: String,
    pub log_key: String,
    pub complete_time: i64,
}
