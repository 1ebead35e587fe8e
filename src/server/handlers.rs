use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;

use crate::headline::HeadlineExtractor;
use crate::settings;

use super::jobs::{self, JobStore};
use super::models::{ErrorResponse, JobAccepted, JobRequest, JobState, JobStatus};
use super::state::ServerState;

type ApiError = (StatusCode, Json<ErrorResponse>);

pub async fn run_server(
    settings: settings::Settings,
    extractor: Arc<HeadlineExtractor>,
    addr: String,
) -> Result<()> {
    tokio::fs::create_dir_all(&settings.runs_dir)
        .await
        .with_context(|| format!("failed to create runs dir: {}", settings.runs_dir.display()))?;
    match settings.input_root.as_deref() {
        Some(root) => tracing::info!(root = %root.display(), "job path inputs confined"),
        None => tracing::info!("job path inputs disabled; uploads only"),
    }
    let state = Arc::new(ServerState {
        jobs: JobStore::new(settings.runs_dir.clone()),
        settings,
        extractor,
    });
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| "failed to bind server address")?;
    tracing::info!(addr = %addr, "job server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

pub(crate) fn router(state: Arc<ServerState>) -> Router {
    let body_limit = state.settings.max_upload_bytes;
    Router::new()
        .route("/health", get(health))
        .route("/jobs", post(submit_job))
        .route("/jobs/:id", get(job_status))
        .route("/jobs/:id/result", get(job_result))
        .route("/jobs/:id/log", get(job_log))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(axum::middleware::from_fn(cors_middleware))
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn cors_middleware(req: Request<Body>, next: Next) -> Result<Response<Body>, StatusCode> {
    if req.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return Ok(response);
    }
    let mut response = next.run(req).await;
    apply_cors_headers(response.headers_mut());
    Ok(response)
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("content-type,authorization"),
    );
}

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

async fn submit_job(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<JobRequest>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    if payload.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "one of paths, dir, manifest or images is required",
        ));
    }

    if let Err(err) = jobs::check_request_paths(&payload, state.settings.input_root.as_deref()) {
        return Err(api_error(StatusCode::BAD_REQUEST, format!("{err:#}")));
    }

    let id = state
        .jobs
        .create_job()
        .await
        .map_err(|err| api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}")))?;
    let uploaded = match state.jobs.store_uploads(&id, &payload.images).await {
        Ok(records) => records,
        Err(err) => {
            let message = format!("{err:#}");
            state.jobs.append_log(&id, &format!("job rejected: {message}")).await;
            if let Err(err) = state
                .jobs
                .write_status(&id, JobStatus::failed(message.clone()))
                .await
            {
                tracing::warn!(job = %id, "failed to mark rejected job: {err:#}");
            }
            return Err(api_error(StatusCode::BAD_REQUEST, message));
        }
    };

    tracing::info!(job = %id, uploads = uploaded.len(), "job accepted");
    let job_state = state.clone();
    let job_id = id.clone();
    tokio::spawn(async move {
        jobs::run_job(job_state.as_ref(), job_id, payload, uploaded).await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(JobAccepted {
            status_url: jobs::status_url(&id),
            result_url: jobs::result_url(&id),
            job_id: id,
        }),
    ))
}

async fn job_status(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<JobStatus>, ApiError> {
    match state.jobs.read_status(&id).await {
        Ok(Some(status)) => Ok(Json(status)),
        Ok(None) => Err(api_error(StatusCode::NOT_FOUND, "job not found")),
        Err(err) => Err(api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("{err:#}"),
        )),
    }
}

async fn job_result(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Response<Body>, ApiError> {
    let status = match state.jobs.read_status(&id).await {
        Ok(Some(status)) => status,
        Ok(None) => return Err(api_error(StatusCode::NOT_FOUND, "job not found")),
        Err(err) => {
            return Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("{err:#}"),
            ))
        }
    };
    match status.status {
        JobState::Done => {}
        JobState::Error => {
            return Err(api_error(
                StatusCode::CONFLICT,
                status.error.unwrap_or_else(|| "job failed".to_string()),
            ))
        }
        JobState::Queued | JobState::Running => {
            return Err(api_error(StatusCode::CONFLICT, "job is not finished"))
        }
    }

    let bytes = tokio::fs::read(state.jobs.result_path(&id))
        .await
        .map_err(|err| {
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to read job result: {}", err),
            )
        })?;
    let disposition = format!("attachment; filename=\"headlines-{}.csv\"", id);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/csv; charset=utf-8")
        .header(header::CONTENT_DISPOSITION, disposition)
        .body(Body::from(bytes))
        .map_err(|err| api_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))
}

async fn job_log(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Response<Body>, ApiError> {
    if state.jobs.job_dir(&id).await.is_none() {
        return Err(api_error(StatusCode::NOT_FOUND, "job not found"));
    }
    let text = tokio::fs::read_to_string(state.jobs.log_path(&id))
        .await
        .unwrap_or_default();
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(text))
        .map_err(|err| api_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))
}
