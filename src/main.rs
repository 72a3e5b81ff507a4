use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use gas_pipeline::config::PipelineConfig;
use gas_pipeline::job::UserRole;
use gas_pipeline::local::LocalPipeline;
use gas_pipeline::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "gas-pipeline")]
#[command(version)]
#[command(about = "Job lifecycle workers for a genomic annotation service")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run every worker in one process over in-memory backends
    Serve(ServeArgs),
}

// =============================================================================
// Serve Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Port for the HTTP status API (optional)
    #[arg(long, env = "GAS_STATUS_PORT")]
    status_port: Option<u16>,

    /// Annotation program, invoked as `<program> <args...> <input>`
    #[arg(long, env = "GAS_ANNOTATOR", default_value = "anntools")]
    annotator: PathBuf,

    /// Extra argument passed to the annotator before the input path (repeatable)
    #[arg(long = "annotator-arg", allow_hyphen_values = true)]
    annotator_args: Vec<String>,

    /// Root directory for per-job scratch space
    #[arg(long, env = "GAS_JOBS_DIR", default_value = "jobs")]
    jobs_dir: PathBuf,

    /// Leading component of every object key
    #[arg(long, env = "GAS_KEY_PREFIX", default_value = "gas")]
    key_prefix: String,

    #[arg(long, env = "GAS_INPUTS_BUCKET", default_value = "gas-inputs")]
    inputs_bucket: String,

    #[arg(long, env = "GAS_RESULTS_BUCKET", default_value = "gas-results")]
    results_bucket: String,

    #[arg(long, env = "GAS_VAULT", default_value = "gas-vault")]
    vault: String,

    /// Seconds a free user's result stays hot before archival
    #[arg(long, env = "GAS_ARCHIVE_WINDOW_SECS", default_value = "300")]
    archive_window_secs: u64,

    /// Long-poll wait per receive call, in seconds
    #[arg(long, env = "GAS_WAIT_TIME_SECS", default_value = "20")]
    wait_time_secs: u64,

    /// Maximum messages taken per receive call
    #[arg(long, env = "GAS_MAX_MESSAGES", default_value = "10")]
    max_messages: usize,

    /// Leave submissions whose input could not be staged for redelivery
    /// instead of acknowledging them
    #[arg(long, env = "GAS_RETAIN_ON_STAGING_FAILURE")]
    retain_on_staging_failure: bool,

    /// Users to register at startup (repeatable, format: "id:role")
    /// Example: --user alice:free_user --user bob:premium_user
    #[arg(long = "user")]
    users: Vec<String>,
}

fn parse_users(users: &[String]) -> Vec<(String, UserRole)> {
    users
        .iter()
        .filter_map(|user| match user.trim().split_once(':') {
            Some((id, role)) if !id.is_empty() => match role.parse::<UserRole>() {
                Ok(role) => Some((id.to_string(), role)),
                Err(e) => {
                    tracing::warn!(user = %user, error = %e, "Ignoring user with unknown role");
                    None
                }
            },
            _ => {
                tracing::warn!(user = %user, "Invalid user format, expected id:role");
                None
            }
        })
        .collect()
}

fn build_config(args: &ServeArgs) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    let mut config = PipelineConfig::new()
        .with_annotator(args.annotator.clone(), args.annotator_args.clone())
        .with_jobs_dir(args.jobs_dir.clone())
        .with_key_prefix(args.key_prefix.clone())
        .with_wait_time(Duration::from_secs(args.wait_time_secs))
        .with_archive_window(Duration::from_secs(args.archive_window_secs));

    config.storage.inputs_bucket = args.inputs_bucket.clone();
    config.storage.results_bucket = args.results_bucket.clone();
    config.storage.vault_name = args.vault.clone();
    config.polling.max_messages = args.max_messages;
    config.ack_on_staging_failure = !args.retain_on_staging_failure;
    config.status_addr = match args.status_port {
        Some(p) => Some(format!("0.0.0.0:{}", p).parse::<SocketAddr>()?),
        None => None,
    };

    Ok(config)
}

// =============================================================================
// Serve Implementation
// =============================================================================

async fn run_serve(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = build_config(&args)?;
    tokio::fs::create_dir_all(&config.annotator.jobs_dir).await?;

    tracing::info!(
        annotator = %config.annotator.program.display(),
        jobs_dir = %config.annotator.jobs_dir.display(),
        status_addr = ?config.status_addr,
        archive_window_secs = config.archive.free_user_window.as_secs(),
        "Starting gas-pipeline"
    );

    let pipeline = LocalPipeline::new(&config);
    for (user_id, role) in parse_users(&args.users) {
        tracing::info!(user_id = %user_id, role = %role, "Registering user");
        pipeline.register_user(&user_id, role).await;
    }

    let shutdown = install_shutdown_handler();
    pipeline.run(shutdown).await;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Serve(serve_args) => run_serve(serve_args).await,
    }
}
