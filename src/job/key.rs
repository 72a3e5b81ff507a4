use std::fmt;

use crate::error::{PipelineError, Result};

/// Separator between the job id and the file name. Consumers split on it to
/// recover both halves, so neither the prefix nor the ids may contain it.
pub const JOB_FILE_SEPARATOR: char = '~';

/// Object key joining the record store and the object store:
/// `<prefix>/<user_id>/<job_id>~<filename>`.
///
/// An empty prefix yields `<user_id>/<job_id>~<filename>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey {
    pub prefix: String,
    pub user_id: String,
    pub job_id: String,
    pub filename: String,
}

impl StorageKey {
    /// Build a key, rejecting components that would not survive a parse.
    pub fn new(
        prefix: impl Into<String>,
        user_id: impl Into<String>,
        job_id: impl Into<String>,
        filename: impl Into<String>,
    ) -> Result<Self> {
        let key = Self {
            prefix: prefix.into().trim_end_matches('/').to_string(),
            user_id: user_id.into(),
            job_id: job_id.into(),
            filename: filename.into(),
        };
        key.validate()?;
        Ok(key)
    }

    fn validate(&self) -> Result<()> {
        if self.prefix.contains(JOB_FILE_SEPARATOR) || self.prefix.starts_with('/') {
            return Err(PipelineError::InvalidStorageKey(format!(
                "prefix {:?} must not contain '~' or start with '/'",
                self.prefix
            )));
        }
        for (name, value) in [("user_id", &self.user_id), ("job_id", &self.job_id)] {
            if value.is_empty() || value.contains('/') || value.contains(JOB_FILE_SEPARATOR) {
                return Err(PipelineError::InvalidStorageKey(format!(
                    "{} {:?} must be non-empty without '/' or '~'",
                    name, value
                )));
            }
        }
        if self.filename.is_empty() {
            return Err(PipelineError::InvalidStorageKey(
                "filename must be non-empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Split a key back into its components. The first `~` ends the job id;
    /// everything after it is the file name.
    pub fn parse(raw: &str) -> Result<Self> {
        let (path, filename) = raw
            .split_once(JOB_FILE_SEPARATOR)
            .ok_or_else(|| PipelineError::InvalidStorageKey(raw.to_string()))?;

        let mut parts = path.rsplitn(3, '/');
        let job_id = parts.next().unwrap_or_default();
        let user_id = parts
            .next()
            .ok_or_else(|| PipelineError::InvalidStorageKey(raw.to_string()))?;
        let prefix = parts.next().unwrap_or_default();

        Self::new(prefix, user_id, job_id, filename)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.prefix.is_empty() {
            write!(f, "{}/", self.prefix)?;
        }
        write!(
            f,
            "{}/{}{}{}",
            self.user_id, self.job_id, JOB_FILE_SEPARATOR, self.filename
        )
    }
}

fn vcf_stem(input_file_name: &str) -> &str {
    input_file_name
        .strip_suffix(".vcf")
        .unwrap_or(input_file_name)
}

/// `<name>.vcf` -> `<name>.annot.vcf`
pub fn result_file_name(input_file_name: &str) -> String {
    format!("{}.annot.vcf", vcf_stem(input_file_name))
}

/// `<name>.vcf` -> `<name>.vcf.count.log`
pub fn log_file_name(input_file_name: &str) -> String {
    format!("{}.vcf.count.log", vcf_stem(input_file_name))
}

/// Result name rebuilt from the original input name by inserting `.annot.`
/// before the extension: `J1.vcf` -> `J1.annot.vcf`.
pub fn restored_result_name(input_file_name: &str) -> String {
    match input_file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}.annot.{}", stem, ext),
        _ => format!("{}.annot", input_file_name),
    }
}
