use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::error::PipelineError;
use crate::job::JobRecord;
use crate::local::Frontend;
use crate::store::JobStore;
use crate::worker::OutcomeLedger;

#[derive(Clone)]
pub struct StatusState {
    pub jobs: Arc<dyn JobStore>,
    pub ledger: Arc<OutcomeLedger>,
    pub frontend: Arc<Frontend>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Deserialize)]
struct SubmitJobRequest {
    user_id: String,
    input_file_name: String,
    /// Raw input file contents.
    contents: String,
}

#[derive(Serialize)]
struct SubmitJobResponse {
    job_id: String,
    input_key: String,
}

#[derive(Serialize)]
struct UpgradeResponse {
    user_id: String,
    thaw_requests: usize,
}

fn error_status(error: &PipelineError) -> StatusCode {
    match error {
        PipelineError::JobNotFound(_) | PipelineError::UserNotFound(_) => StatusCode::NOT_FOUND,
        PipelineError::InvalidStorageKey(_) | PipelineError::JobExists(_) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: PipelineError) -> (StatusCode, Json<ErrorResponse>) {
    (
        error_status(&error),
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

pub fn router(state: StatusState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/outcomes", get(outcomes_handler))
        .route("/api/jobs", post(submit_job_handler))
        .route("/api/jobs/{job_id}", get(get_job_handler))
        .route("/api/users/{user_id}/jobs", get(list_user_jobs_handler))
        .route("/api/users/{user_id}/upgrade", post(upgrade_handler))
        .layer(cors)
        .with_state(state)
}

/// Serve the status API until `shutdown` fires.
pub async fn run_status_server(addr: SocketAddr, state: StatusState, shutdown: CancellationToken) {
    tracing::info!(addr = %addr, "Starting status server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind status server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
    {
        tracing::error!(error = %e, "Status server failed");
    }
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn outcomes_handler(State(state): State<StatusState>) -> impl IntoResponse {
    Json(state.ledger.snapshot().await)
}

async fn get_job_handler(
    State(state): State<StatusState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobRecord>, (StatusCode, Json<ErrorResponse>)> {
    match state.jobs.get(&job_id).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(error_response(PipelineError::JobNotFound(job_id))),
        Err(e) => Err(error_response(e)),
    }
}

async fn list_user_jobs_handler(
    State(state): State<StatusState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<JobRecord>>, (StatusCode, Json<ErrorResponse>)> {
    state
        .jobs
        .list_by_user(&user_id)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn submit_job_handler(
    State(state): State<StatusState>,
    Json(payload): Json<SubmitJobRequest>,
) -> impl IntoResponse {
    match state
        .frontend
        .submit_job(
            &payload.user_id,
            &payload.input_file_name,
            payload.contents.into_bytes(),
        )
        .await
    {
        Ok(record) => (
            StatusCode::CREATED,
            Json(SubmitJobResponse {
                job_id: record.job_id,
                input_key: record.input_key,
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(user_id = %payload.user_id, error = %e, "Job submission rejected");
            error_response(e).into_response()
        }
    }
}

async fn upgrade_handler(
    State(state): State<StatusState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    match state.frontend.upgrade_user(&user_id).await {
        Ok(thaw_requests) => (
            StatusCode::OK,
            Json(UpgradeResponse {
                user_id,
                thaw_requests,
            }),
        )
            .into_response(),
        Err(e) => error_response(e).into_response(),
    }
}
