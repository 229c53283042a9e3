use anyhow::{Context, Result};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::background_jobs::JobInfo;
use crate::corpus::{CorpusRegistry, UnitSnapshot};
use crate::media::{AnswerSubmission, PipelineError};
use crate::user::{Play, Share, UserRecord};
use tower_http::services::ServeDir;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use super::{log_requests, metrics, state::*};

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub hash: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

#[derive(Serialize)]
struct ComposedVideo {
    token: String,
    video: String,
}

#[derive(Serialize)]
struct CorpusStatus {
    units: Vec<UnitSnapshot>,
    jobs: Vec<JobInfo>,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

impl PipelineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::BadInput(_) => StatusCode::BAD_REQUEST,
            PipelineError::UserNotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::NoCandidateAvailable(_) | PipelineError::ShuttingDown => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            PipelineError::TranscodeFailed(_)
            | PipelineError::ComposeFailed(_)
            | PipelineError::ProcessLaunchFailed { .. }
            | PipelineError::ProcessFailed { .. } => StatusCode::BAD_GATEWAY,
            PipelineError::Io(_) | PipelineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed with {}: {}", status, self);
        } else {
            debug!("Request rejected with {}: {}", status, self);
        }
        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
    };
    Json(stats)
}

async fn submit_answers(
    State(pipeline): State<GuardedMediaPipeline>,
    Json(submission): Json<AnswerSubmission>,
) -> Result<Json<UserRecord>, PipelineError> {
    Ok(Json(pipeline.submit(submission).await?))
}

async fn get_user(
    State(pipeline): State<GuardedMediaPipeline>,
    Path(id): Path<String>,
) -> Result<Json<UserRecord>, PipelineError> {
    Ok(Json(pipeline.get_user(&id)?))
}

async fn list_users(
    State(pipeline): State<GuardedMediaPipeline>,
    Path((query, min, max)): Path<(String, usize, usize)>,
) -> Result<Json<Vec<UserRecord>>, PipelineError> {
    Ok(Json(pipeline.list_users(&query, min, max)?))
}

async fn post_play(
    State(pipeline): State<GuardedMediaPipeline>,
    Json(play): Json<Play>,
) -> Result<StatusCode, PipelineError> {
    pipeline.record_play(&play)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn post_share(
    State(pipeline): State<GuardedMediaPipeline>,
    Json(share): Json<Share>,
) -> Result<StatusCode, PipelineError> {
    pipeline.record_share(&share)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn compose_video(
    State(pipeline): State<GuardedMediaPipeline>,
    Path(token): Path<String>,
) -> Result<Json<ComposedVideo>, PipelineError> {
    let video = pipeline.compose_video(&token).await?;
    let video = video
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Json(ComposedVideo { token, video }))
}

async fn get_corpus(
    State(registry): State<CorpusRegistry>,
    State(scheduler_handle): State<OptionalSchedulerHandle>,
) -> impl IntoResponse {
    let jobs = match scheduler_handle {
        Some(handle) => handle.list_jobs().await,
        None => Vec::new(),
    };
    Json(CorpusStatus {
        units: registry.snapshot(),
        jobs,
    })
}

async fn get_job(
    State(scheduler_handle): State<OptionalSchedulerHandle>,
    Path(job_id): Path<String>,
) -> Response {
    let job = match scheduler_handle {
        Some(handle) => handle.get_job(&job_id).await,
        None => None,
    };
    match job {
        Some(job) => Json(job).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub fn make_app(state: ServerState) -> Router {
    let music_routes: Router = Router::new()
        .route("/", post(submit_answers))
        .route("/play", post(post_play))
        .route("/share", post(post_share))
        .route("/video/{token}", get(compose_video))
        .route("/{id}", get(get_user))
        .route("/{query}/{min}/{max}", get(list_users))
        .with_state(state.clone());

    let corpus_routes: Router = Router::new()
        .route("/", get(get_corpus))
        .route("/jobs/{id}", get(get_job))
        .with_state(state.clone());

    let home_router: Router = match state.config.frontend_dir_path.clone() {
        Some(frontend_path) => {
            let static_files_service =
                ServeDir::new(frontend_path).append_index_html_on_directories(true);
            Router::new().fallback_service(static_files_service)
        }
        None => Router::new()
            .route("/", get(home))
            .with_state(state.clone()),
    };

    home_router
        .nest("/v1/music", music_routes)
        .nest("/v1/corpus", corpus_routes)
        .layer(middleware::from_fn_with_state(state, log_requests))
}

pub fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics::metrics_handler))
}

/// Serves the API on `listener` and the metrics on `metrics_listener` until
/// `shutdown_token` is cancelled or either server fails.
pub async fn serve(
    state: ServerState,
    listener: TcpListener,
    metrics_listener: TcpListener,
    shutdown_token: CancellationToken,
) -> Result<()> {
    let app = make_app(state);
    let api = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_token.clone().cancelled_owned());
    let metrics = axum::serve(metrics_listener, make_metrics_app())
        .with_graceful_shutdown(shutdown_token.cancelled_owned());

    tokio::try_join!(
        async { api.await.context("API server failed") },
        async { metrics.await.context("Metrics server failed") },
    )?;
    Ok(())
}

pub async fn run_server(state: ServerState, shutdown_token: CancellationToken) -> Result<()> {
    let port = state.config.port;
    let metrics_port = state.config.metrics_port;

    let listener = TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    let metrics_listener = TcpListener::bind(format!("0.0.0.0:{}", metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;

    info!("Ready to serve at port {}!", port);
    info!("Metrics available at port {}!", metrics_port);

    serve(state, listener, metrics_listener, shutdown_token).await
}
