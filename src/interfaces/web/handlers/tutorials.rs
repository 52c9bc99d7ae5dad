use std::path::{Path, PathBuf};

use axum::{
    Json,
    extract::{Path as UrlPath, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use flate2::{Compression, write::GzEncoder};
use serde_json::json;
use tracing::error;

use super::super::AppState;
use crate::core::jobs::JobState;
use crate::core::jobs::orchestrator::SubmitRequest;

/// POST /api/tutorials: the submission gate. Rejections happen here,
/// synchronously, with no task id ever issued.
pub(crate) async fn create_tutorial(
    State(state): State<AppState>,
    Json(payload): Json<SubmitRequest>,
) -> impl IntoResponse {
    match state.orchestrator.submit(payload).await {
        Ok(task_id) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "task_id": task_id,
                "status_url": format!("/api/tutorials/{task_id}/status"),
                "results_url": format!("/api/tutorials/{task_id}/download"),
            })),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

/// GET /api/tutorials/{task_id}/status: pure job-store read.
pub(crate) async fn tutorial_status(
    UrlPath(task_id): UrlPath<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let Some(job) = state.orchestrator.status(&task_id).await else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "task not found" })),
        );
    };

    let body = match job.state {
        JobState::Processing => json!({
            "task_id": task_id,
            "status": job.state.as_str(),
        }),
        JobState::Completed => json!({
            "task_id": task_id,
            "status": job.state.as_str(),
            "output_directory": job.output_ref.as_deref().unwrap_or(Path::new("")),
        }),
        JobState::Failed => json!({
            "task_id": task_id,
            "status": job.state.as_str(),
            "error_details": job.error_detail.as_deref().unwrap_or("unknown failure"),
        }),
    };
    (StatusCode::OK, Json(body))
}

/// GET /api/tutorials/{task_id}/download: tar.gz of the finished
/// document set. Not available until the job completes.
pub(crate) async fn download_tutorial(
    UrlPath(task_id): UrlPath<String>,
    State(state): State<AppState>,
) -> axum::response::Response {
    let not_found = || {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "tutorial not found or not yet complete" })),
        )
            .into_response()
    };

    let Some(job) = state.orchestrator.status(&task_id).await else {
        return not_found();
    };
    let Some(output_dir) = (job.state == JobState::Completed)
        .then_some(job.output_ref)
        .flatten()
    else {
        return not_found();
    };

    let archive = tokio::task::spawn_blocking(move || archive_dir(&output_dir)).await;
    match archive {
        Ok(Ok(bytes)) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/gzip".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{task_id}_tutorial.tar.gz\""),
                ),
            ],
            bytes,
        )
            .into_response(),
        Ok(Err(e)) => {
            error!(task_id = %task_id, "failed to package tutorial: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("failed to package tutorial: {e}") })),
            )
                .into_response()
        }
        Err(join_err) => {
            error!(task_id = %task_id, "archive task failed: {join_err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "failed to package tutorial" })),
            )
                .into_response()
        }
    }
}

/// In-memory tar.gz of a directory's contents, rooted at the archive top
/// level.
fn archive_dir(dir: &PathBuf) -> std::io::Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(".", dir)?;
    builder.into_inner()?.finish()
}
