use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Names of the queues each worker consumes or publishes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    /// Submission events, consumed by the request worker.
    pub requests: String,
    /// Archival triggers, published by the task runner.
    pub archive: String,
    /// Restore requests, published on tier upgrade.
    pub thaw: String,
    /// Cold-storage retrieval completion notifications.
    pub restore: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            requests: "gas-job-requests".to_string(),
            archive: "gas-archive".to_string(),
            thaw: "gas-thaw".to_string(),
            restore: "gas-restore".to_string(),
        }
    }
}

/// Long-poll limits shared by every polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    /// Maximum messages taken per receive call.
    pub max_messages: usize,
    /// Upper bound on how long a receive call waits for messages.
    pub wait_time: Duration,
    /// Pause after a failed receive before polling again.
    pub error_backoff: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            max_messages: 10,
            wait_time: Duration::from_secs(20),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Where job inputs and results live in hot and cold storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub inputs_bucket: String,
    pub results_bucket: String,
    /// Leading component of every object key.
    pub key_prefix: String,
    /// Cold-tier vault holding archived results.
    pub vault_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            inputs_bucket: "gas-inputs".to_string(),
            results_bucket: "gas-results".to_string(),
            key_prefix: "gas".to_string(),
            vault_name: "gas-vault".to_string(),
        }
    }
}

/// The external annotation program.
///
/// The program is invoked as `<program> <args...> <input path>` and must
/// leave `<stem>.annot.vcf` and `<stem>.vcf.count.log` beside the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatorConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Root of the per-job scratch directories.
    pub jobs_dir: PathBuf,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("anntools"),
            args: Vec::new(),
            jobs_dir: PathBuf::from("jobs"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveConfig {
    /// How long a free user's results stay hot after completion before the
    /// archive trigger becomes visible to the archive worker.
    pub free_user_window: Duration,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            free_user_window: Duration::from_secs(300),
        }
    }
}

/// Process-wide configuration, built once at startup and handed to each
/// worker constructor by reference.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub queues: QueueNames,
    pub polling: PollSettings,
    pub storage: StorageConfig,
    pub annotator: AnnotatorConfig,
    pub archive: ArchiveConfig,
    /// Acknowledge a submission even when its input could not be staged.
    /// The job then stays PENDING forever; `false` leaves the message for
    /// redelivery instead.
    pub ack_on_staging_failure: bool,
    /// Address of the HTTP status API, if enabled.
    pub status_addr: Option<SocketAddr>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queues: QueueNames::default(),
            polling: PollSettings::default(),
            storage: StorageConfig::default(),
            annotator: AnnotatorConfig::default(),
            archive: ArchiveConfig::default(),
            ack_on_staging_failure: true,
            status_addr: None,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_annotator(mut self, program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        self.annotator.program = program.into();
        self.annotator.args = args;
        self
    }

    pub fn with_jobs_dir(mut self, jobs_dir: impl Into<PathBuf>) -> Self {
        self.annotator.jobs_dir = jobs_dir.into();
        self
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.polling.wait_time = wait_time;
        self
    }

    pub fn with_archive_window(mut self, window: Duration) -> Self {
        self.archive.free_user_window = window;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.storage.key_prefix = prefix.into();
        self
    }
}
