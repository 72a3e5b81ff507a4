//! Job record model shared by every worker.
//!
//! - [`JobRecord`]: the durable per-job state all workers pivot on
//! - [`JobStatus`] / [`UserRole`]: closed enums parsed from their wire strings
//! - [`StorageKey`]: the `<prefix>/<user_id>/<job_id>~<filename>` object key

pub mod key;
pub mod record;

pub use key::{log_file_name, restored_result_name, result_file_name, StorageKey};
pub use record::{Completion, JobRecord, JobStatus, UserRole};
