//! Route handlers.

use std::convert::Infallible;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
        HeaderValue, StatusCode,
    },
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use mixtape::{CancelReceipt, JobProgressEvent, JobSnapshot, SubmitReceipt};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Build the API router with all endpoints.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/jobs", post(submit_job))
        .route("/api/jobs/{id}", get(job_status))
        .route("/api/jobs/{id}/cancel", post(cancel_job))
        .route("/api/jobs/{id}/events", get(job_events))
        .route("/api/jobs/{id}/download/{filename}", get(download_archive))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub active_job: Option<String>,
    pub queued_jobs: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let queue = state.mixtape.queue();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.start_time.elapsed().as_secs(),
        active_job: queue.active_job().map(|job| job.id().to_string()),
        queued_jobs: queue.pending_len(),
    })
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub url: String,
}

async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> ApiResult<(StatusCode, Json<SubmitReceipt>)> {
    if request.url.trim().is_empty() {
        return Err(ApiError::bad_request("url is required"));
    }
    let receipt = state.mixtape.submit(&request.url).await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobSnapshot>> {
    Ok(Json(state.mixtape.status(&id)?))
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CancelReceipt>> {
    Ok(Json(state.mixtape.cancel(&id)?))
}

/// Server-sent events for one job: a `snapshot` event first, then one named
/// event per progress update. The stream closes after the terminal event or
/// when the server shuts down.
async fn job_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let (snapshot, events) = state.mixtape.subscribe(&id)?;

    let first = Event::default()
        .event("snapshot")
        .json_data(&snapshot)
        .map_err(|e| ApiError::internal(format!("Failed to encode snapshot: {}", e)))?;

    let updates = events.filter_map(|event| async move { to_sse(&event) });
    let stream = stream::once(async move { first })
        .chain(updates)
        .map(Ok::<_, Infallible>)
        .take_until(state.shutdown.cancelled_owned());

    Ok(Sse::new(stream))
}

fn to_sse(event: &JobProgressEvent) -> Option<Event> {
    match Event::default().event(event.kind.as_str()).json_data(event) {
        Ok(sse) => Some(sse),
        Err(e) => {
            tracing::warn!("Dropping unencodable event for job {}: {}", event.job_id, e);
            None
        }
    }
}

async fn download_archive(
    State(state): State<AppState>,
    Path((id, filename)): Path<(String, String)>,
) -> ApiResult<Response> {
    let path = state.mixtape.archive_for_download(&id, &filename)?;
    let file = tokio::fs::File::open(&path).await.map_err(|e| {
        tracing::warn!("Archive for job {} vanished before download: {}", id, e);
        ApiError::not_found(format!("No archive available for job '{}'", id))
    })?;

    let disposition = HeaderValue::from_str(&content_disposition(&filename))
        .map_err(|e| ApiError::internal(format!("Invalid header value: {}", e)))?;
    let headers = [
        (CONTENT_TYPE, HeaderValue::from_static("application/zip")),
        (CONTENT_DISPOSITION, disposition),
    ];
    let body = Body::from_stream(ReaderStream::new(file));
    Ok((headers, body).into_response())
}

/// `attachment` disposition with an ASCII fallback name and the exact
/// UTF-8 name in `filename*`.
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let mut encoded = String::with_capacity(filename.len() * 3);
    for byte in filename.bytes() {
        if byte.is_ascii_alphanumeric() || b"-._~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback, encoded
    )
}
