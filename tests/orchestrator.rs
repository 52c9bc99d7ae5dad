//! Job lifecycle integration tests: state machine visible through the
//! orchestrator and the HTTP API, with stub pipelines standing in for
//! live LLM traffic.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::util::ServiceExt;

use codetrail::core::jobs::JobState;
use codetrail::core::jobs::orchestrator::{Orchestrator, SubmitRequest};
use codetrail::core::llm::LlmGateway;
use codetrail::core::llm::cache::ResponseCache;
use codetrail::core::llm::registry::ProviderRegistry;
use codetrail::core::pipeline::{GenerationPipeline, TutorialPipeline, TutorialRequest};
use codetrail::interfaces::web::build_router;

/// Writes a minimal document set and succeeds.
struct OkPipeline;

#[async_trait]
impl GenerationPipeline for OkPipeline {
    async fn run(
        &self,
        request: &TutorialRequest,
        _gateway: &LlmGateway,
        output_dir: &Path,
    ) -> Result<PathBuf> {
        let project_dir = output_dir.join(request.project_label());
        tokio::fs::create_dir_all(&project_dir).await?;
        tokio::fs::write(project_dir.join("index.md"), "# Tutorial\n").await?;
        tokio::fs::write(project_dir.join("01_intro.md"), "# Chapter 1\n").await?;
        Ok(project_dir)
    }
}

struct FailPipeline;

#[async_trait]
impl GenerationPipeline for FailPipeline {
    async fn run(
        &self,
        _request: &TutorialRequest,
        _gateway: &LlmGateway,
        _output_dir: &Path,
    ) -> Result<PathBuf> {
        bail!("abstraction identification produced an empty list")
    }
}

/// Stays in flight until told to finish, so tests can observe
/// `processing`.
struct GatedPipeline {
    release: tokio::sync::Semaphore,
}

#[async_trait]
impl GenerationPipeline for GatedPipeline {
    async fn run(
        &self,
        request: &TutorialRequest,
        gateway: &LlmGateway,
        output_dir: &Path,
    ) -> Result<PathBuf> {
        let _permit = self.release.acquire().await?;
        OkPipeline.run(request, gateway, output_dir).await
    }
}

async fn test_gateway(dir: &Path) -> Arc<LlmGateway> {
    let cache = ResponseCache::load(dir.join("llm_cache.json")).await;
    Arc::new(LlmGateway::new(ProviderRegistry::load(), cache, "gemini"))
}

async fn orchestrator_with(
    pipeline: Arc<dyn GenerationPipeline>,
    dir: &Path,
) -> Arc<Orchestrator> {
    let gateway = test_gateway(dir).await;
    Arc::new(Orchestrator::new(gateway, pipeline, dir.join("web_outputs")))
}

fn url_request() -> SubmitRequest {
    SubmitRequest {
        repo_url: Some("https://github.com/example/demo".to_string()),
        ..Default::default()
    }
}

async fn poll_until_terminal(orchestrator: &Orchestrator, task_id: &str) -> JobState {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let job = orchestrator.status(task_id).await.expect("job exists");
            if job.state.is_terminal() {
                return job.state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job reached a terminal state in time")
}

#[tokio::test]
async fn successful_job_completes_with_output_and_marker() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator_with(Arc::new(OkPipeline), dir.path()).await;

    let task_id = orchestrator.submit(url_request()).await.unwrap();
    assert_eq!(poll_until_terminal(&orchestrator, &task_id).await, JobState::Completed);

    let job = orchestrator.status(&task_id).await.unwrap();
    let output = job.output_ref.expect("completed job has an output ref");
    assert!(output.join("index.md").exists());
    assert!(job.error_detail.is_none());

    let job_dir = dir.path().join("web_outputs").join(&task_id);
    assert!(job_dir.join("_SUCCESS").exists());
    assert!(!job_dir.join("_FAILED").exists());
}

#[tokio::test]
async fn failed_job_records_detail_and_failure_markers() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator_with(Arc::new(FailPipeline), dir.path()).await;

    let task_id = orchestrator.submit(url_request()).await.unwrap();
    assert_eq!(poll_until_terminal(&orchestrator, &task_id).await, JobState::Failed);

    let job = orchestrator.status(&task_id).await.unwrap();
    let detail = job.error_detail.expect("failed job has detail");
    assert!(detail.contains("empty list"));
    assert!(job.output_ref.is_none());

    let job_dir = dir.path().join("web_outputs").join(&task_id);
    assert!(job_dir.join("_FAILED").exists());
    let logged = std::fs::read_to_string(job_dir.join("error.log")).unwrap();
    assert!(logged.contains("empty list"));
}

#[tokio::test]
async fn state_is_monotonic_processing_then_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Arc::new(GatedPipeline {
        release: tokio::sync::Semaphore::new(0),
    });
    let orchestrator = orchestrator_with(pipeline.clone(), dir.path()).await;

    let task_id = orchestrator.submit(url_request()).await.unwrap();
    for _ in 0..5 {
        let job = orchestrator.status(&task_id).await.unwrap();
        assert_eq!(job.state, JobState::Processing);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    pipeline.release.add_permits(1);
    assert_eq!(poll_until_terminal(&orchestrator, &task_id).await, JobState::Completed);

    // Terminal state never reverts.
    for _ in 0..5 {
        let job = orchestrator.status(&task_id).await.unwrap();
        assert_eq!(job.state, JobState::Completed);
    }
}

#[tokio::test]
async fn unknown_ids_are_not_found_not_failed() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator_with(Arc::new(OkPipeline), dir.path()).await;
    assert!(orchestrator.status(&uuid::Uuid::new_v4().to_string()).await.is_none());
}

#[tokio::test]
async fn wait_for_completion_joins_outstanding_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator_with(Arc::new(OkPipeline), dir.path()).await;

    let a = orchestrator.submit(url_request()).await.unwrap();
    let b = orchestrator.submit(url_request()).await.unwrap();
    orchestrator.wait_for_completion().await;

    assert!(orchestrator.status(&a).await.unwrap().state.is_terminal());
    assert!(orchestrator.status(&b).await.unwrap().state.is_terminal());
}

#[tokio::test]
async fn real_pipeline_fails_cleanly_on_unreachable_repository() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator_with(Arc::new(TutorialPipeline::new()), dir.path()).await;

    let missing = dir.path().join("no-such-checkout");
    let task_id = orchestrator
        .submit(SubmitRequest {
            local_dir: Some(missing.to_string_lossy().to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(poll_until_terminal(&orchestrator, &task_id).await, JobState::Failed);
    let detail = orchestrator
        .status(&task_id)
        .await
        .unwrap()
        .error_detail
        .unwrap();
    assert!(!detail.is_empty());
    assert!(detail.contains("does not exist"));
}

// --- HTTP surface ---

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 16 * 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn submit_poll_download_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator_with(Arc::new(OkPipeline), dir.path()).await;
    let app = build_router(orchestrator.clone(), 0);

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/tutorials",
            serde_json::json!({ "repo_url": "https://github.com/example/demo" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let accepted = json_body(response).await;
    let task_id = accepted["task_id"].as_str().unwrap().to_string();
    let status_url = accepted["status_url"].as_str().unwrap().to_string();
    let results_url = accepted["results_url"].as_str().unwrap().to_string();

    poll_until_terminal(&orchestrator, &task_id).await;

    let response = app.clone().oneshot(get(&status_url)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status = json_body(response).await;
    assert_eq!(status["status"], "completed");
    assert!(status["output_directory"].as_str().is_some());

    let response = app.oneshot(get(&results_url)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/gzip"
    );
    let bytes = axum::body::to_bytes(response.into_body(), 16 * 1024 * 1024)
        .await
        .unwrap();
    assert!(!bytes.is_empty(), "archive must be non-empty");
}

#[tokio::test]
async fn submission_without_repository_reference_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator_with(Arc::new(OkPipeline), dir.path()).await;
    let app = build_router(orchestrator.clone(), 0);

    let response = app
        .clone()
        .oneshot(post_json("/api/tutorials", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("repository reference"));

    // No job record exists for any fresh id.
    let probe = uuid::Uuid::new_v4().to_string();
    let response = app
        .oneshot(get(&format!("/api/tutorials/{probe}/status")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn failed_job_reports_error_details_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator_with(Arc::new(FailPipeline), dir.path()).await;
    let app = build_router(orchestrator.clone(), 0);

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/tutorials",
            serde_json::json!({ "repo_url": "https://github.com/example/demo" }),
        ))
        .await
        .unwrap();
    let task_id = json_body(response).await["task_id"]
        .as_str()
        .unwrap()
        .to_string();
    poll_until_terminal(&orchestrator, &task_id).await;

    let response = app
        .clone()
        .oneshot(get(&format!("/api/tutorials/{task_id}/status")))
        .await
        .unwrap();
    let status = json_body(response).await;
    assert_eq!(status["status"], "failed");
    assert!(!status["error_details"].as_str().unwrap().is_empty());

    // A failed job has no archive to download.
    let response = app
        .oneshot(get(&format!("/api/tutorials/{task_id}/download")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn download_before_completion_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Arc::new(GatedPipeline {
        release: tokio::sync::Semaphore::new(0),
    });
    let orchestrator = orchestrator_with(pipeline.clone(), dir.path()).await;
    let app = build_router(orchestrator.clone(), 0);

    let task_id = orchestrator.submit(url_request()).await.unwrap();
    let response = app
        .oneshot(get(&format!("/api/tutorials/{task_id}/download")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    pipeline.release.add_permits(1);
    poll_until_terminal(&orchestrator, &task_id).await;
}

#[tokio::test]
async fn security_headers_are_present_on_responses() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator_with(Arc::new(OkPipeline), dir.path()).await;
    let app = build_router(orchestrator, 0);

    let probe = uuid::Uuid::new_v4().to_string();
    let response = app
        .oneshot(get(&format!("/api/tutorials/{probe}/status")))
        .await
        .unwrap();
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
    assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
}
