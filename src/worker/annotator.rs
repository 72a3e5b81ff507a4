use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

use crate::config::AnnotatorConfig;
use crate::error::Result;

/// How one run of the annotation program went.
#[derive(Debug)]
pub struct AnnotationRun {
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
    pub stderr: Option<String>,
}

impl AnnotationRun {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs the external annotation program against a staged input file.
///
/// The program writes its outputs beside the input; it is started with the
/// input's directory as its working directory.
#[derive(Debug, Clone)]
pub struct Annotator {
    config: AnnotatorConfig,
}

impl Annotator {
    pub fn new(config: AnnotatorConfig) -> Self {
        Self { config }
    }

    /// Run the program to completion. An `Err` means it could not be
    /// started; a non-zero exit is reported through [`AnnotationRun`].
    pub async fn annotate(&self, job_id: &str, input: &Path) -> Result<AnnotationRun> {
        tracing::info!(
            job_id,
            program = %self.config.program.display(),
            input = %input.display(),
            "Running annotator"
        );

        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .arg(input)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = input.parent() {
            command.current_dir(dir);
        }

        let started = Instant::now();
        let output = command.output().await?;
        let elapsed = started.elapsed();

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let run = AnnotationRun {
            exit_code: output.status.code(),
            elapsed,
            stderr: if stderr.is_empty() { None } else { Some(stderr) },
        };

        if run.succeeded() {
            tracing::info!(
                job_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "Annotation finished"
            );
        } else {
            tracing::warn!(
                job_id,
                exit_code = ?run.exit_code,
                elapsed_ms = elapsed.as_millis() as u64,
                stderr = run.stderr.as_deref().unwrap_or(""),
                "Annotator exited with an error"
            );
        }

        Ok(run)
    }
}
