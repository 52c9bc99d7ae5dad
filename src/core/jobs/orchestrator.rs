use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::{Job, JobStore};
use crate::core::llm::LlmGateway;
use crate::core::pipeline::{
    DEFAULT_EXCLUDE_PATTERNS, DEFAULT_INCLUDE_PATTERNS, DEFAULT_MAX_ABSTRACTIONS,
    DEFAULT_MAX_FILE_SIZE, GenerationPipeline, RepoSource, TutorialRequest,
};

/// A submission rejected before any job record exists. Distinct from a job
/// failure: the caller never receives a task id.
#[derive(Debug, Error)]
#[error("invalid request: {0}")]
pub struct ValidationError(pub String);

/// Raw client submission as it arrives over the wire.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub local_dir: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub include_patterns: Option<Vec<String>>,
    #[serde(default)]
    pub exclude_patterns: Option<Vec<String>>,
    #[serde(default)]
    pub max_file_size: Option<i64>,
    #[serde(default)]
    pub max_abstractions: Option<i64>,
    #[serde(default)]
    pub use_cache: Option<bool>,
    #[serde(default)]
    pub github_token: Option<String>,
}

impl SubmitRequest {
    /// Synchronous validation gate. A repository reference is mandatory,
    /// numeric limits must be positive, and pattern lists that trim down
    /// to nothing are dropped so the defaults apply.
    pub fn validate(self) -> Result<TutorialRequest, ValidationError> {
        let source = match (
            non_empty(self.repo_url.as_deref()),
            non_empty(self.local_dir.as_deref()),
        ) {
            (Some(url), _) => RepoSource::Url(url.to_string()),
            (None, Some(dir)) => RepoSource::LocalDir(PathBuf::from(dir)),
            (None, None) => {
                return Err(ValidationError(
                    "repository reference is required: set repo_url or local_dir".to_string(),
                ));
            }
        };

        let max_file_size = match self.max_file_size {
            None => DEFAULT_MAX_FILE_SIZE,
            Some(v) if v >= 1 => v as u64,
            Some(v) => {
                return Err(ValidationError(format!(
                    "max_file_size must be a positive integer, got {v}"
                )));
            }
        };

        let max_abstractions = match self.max_abstractions {
            None => DEFAULT_MAX_ABSTRACTIONS,
            Some(v) if v >= 1 => v as usize,
            Some(v) => {
                return Err(ValidationError(format!(
                    "max_abstractions must be a positive integer, got {v}"
                )));
            }
        };

        let include_patterns = normalize_patterns(self.include_patterns)
            .unwrap_or_else(|| to_owned(DEFAULT_INCLUDE_PATTERNS));
        let exclude_patterns = normalize_patterns(self.exclude_patterns)
            .unwrap_or_else(|| to_owned(DEFAULT_EXCLUDE_PATTERNS));

        let language = non_empty(self.language.as_deref())
            .map(|s| s.to_string())
            .unwrap_or_else(|| "english".to_string());

        let github_token = non_empty(self.github_token.as_deref())
            .map(|s| s.to_string())
            .or_else(|| std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()));

        Ok(TutorialRequest {
            source,
            project_name: self.project_name,
            language,
            include_patterns,
            exclude_patterns,
            max_file_size,
            max_abstractions,
            use_cache: self.use_cache.unwrap_or(true),
            github_token,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// Trim entries and drop blanks; a list left empty means "use defaults".
fn normalize_patterns(patterns: Option<Vec<String>>) -> Option<Vec<String>> {
    let normalized: Vec<String> = patterns?
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    (!normalized.is_empty()).then_some(normalized)
}

fn to_owned(patterns: &[&str]) -> Vec<String> {
    patterns.iter().map(|s| s.to_string()).collect()
}

/// Accepts generation requests, runs each in its own background task, and
/// answers status polls. One task per submission; callers own the decision
/// not to flood it.
pub struct Orchestrator {
    store: JobStore,
    gateway: Arc<LlmGateway>,
    pipeline: Arc<dyn GenerationPipeline>,
    output_root: PathBuf,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<LlmGateway>,
        pipeline: Arc<dyn GenerationPipeline>,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store: JobStore::new(),
            gateway,
            pipeline,
            output_root: output_root.into(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Validate, record, schedule. Returns the task id without waiting on
    /// any pipeline work.
    pub async fn submit(&self, raw: SubmitRequest) -> Result<String, ValidationError> {
        let request = raw.validate()?;
        let job = self.store.create(request.clone()).await;
        let job_dir = self.output_root.join(&job.id);
        info!(task_id = %job.id, "tutorial generation job accepted");

        let store = self.store.clone();
        let gateway = self.gateway.clone();
        let pipeline = self.pipeline.clone();
        let task_id = job.id.clone();
        let handle = tokio::spawn(async move {
            run_generation_task(store, gateway, pipeline, task_id, job_dir, request).await;
        });
        self.handles.lock().await.push(handle);

        Ok(job.id)
    }

    /// Pure store read; `None` means the id was never issued here.
    pub async fn status(&self, task_id: &str) -> Option<Job> {
        self.store.get(task_id).await
    }

    /// Await all background jobs spawned so far. Used for graceful
    /// shutdown; the public API exposes no cancellation.
    pub async fn wait_for_completion(&self) {
        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

/// The single conversion point from pipeline failure to job failure.
/// Nothing thrown in here may escape and take the serving process down.
async fn run_generation_task(
    store: JobStore,
    gateway: Arc<LlmGateway>,
    pipeline: Arc<dyn GenerationPipeline>,
    task_id: String,
    job_dir: PathBuf,
    request: TutorialRequest,
) {
    let result = {
        let job_dir = job_dir.clone();
        let pipeline_task = tokio::spawn(async move {
            tokio::fs::create_dir_all(&job_dir).await.map_err(|e| {
                anyhow!("creating job directory {}: {e}", job_dir.display())
            })?;
            pipeline.run(&request, &gateway, &job_dir).await
        });
        match pipeline_task.await {
            Ok(result) => result,
            Err(join_error) => Err(anyhow!("generation task panicked: {join_error}")),
        }
    };

    match result {
        Ok(output_dir) => {
            if let Err(e) = tokio::fs::write(job_dir.join("_SUCCESS"), b"").await {
                warn!(task_id = %task_id, "failed to write success marker: {e}");
            }
            match store.complete(&task_id, output_dir.clone()).await {
                Ok(_) => info!(
                    task_id = %task_id,
                    output = %output_dir.display(),
                    "tutorial generation completed"
                ),
                Err(e) => error!(task_id = %task_id, "failed to record completion: {e}"),
            }
        }
        Err(e) => {
            let detail = format!("{e:#}");
            // Failure markers sit beside any partial output for post-mortems.
            if let Err(io_err) = tokio::fs::create_dir_all(&job_dir).await {
                warn!(task_id = %task_id, "failed to create job directory for markers: {io_err}");
            }
            if let Err(io_err) = tokio::fs::write(job_dir.join("_FAILED"), b"").await {
                warn!(task_id = %task_id, "failed to write failure marker: {io_err}");
            }
            if let Err(io_err) = tokio::fs::write(job_dir.join("error.log"), &detail).await {
                warn!(task_id = %task_id, "failed to write error log: {io_err}");
            }
            match store.fail(&task_id, detail.clone()).await {
                Ok(_) => error!(task_id = %task_id, "tutorial generation failed: {detail}"),
                Err(store_err) => {
                    error!(task_id = %task_id, "failed to record failure: {store_err}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_repository_reference_is_rejected() {
        let err = SubmitRequest::default().validate().unwrap_err();
        assert!(err.0.contains("repository reference"));
    }

    #[test]
    fn blank_repo_url_is_rejected() {
        let raw = SubmitRequest {
            repo_url: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(raw.validate().is_err());
    }

    #[test]
    fn non_positive_limits_are_rejected() {
        let raw = SubmitRequest {
            repo_url: Some("https://github.com/a/b".to_string()),
            max_file_size: Some(0),
            ..Default::default()
        };
        assert!(raw.validate().is_err());

        let raw = SubmitRequest {
            repo_url: Some("https://github.com/a/b".to_string()),
            max_abstractions: Some(-3),
            ..Default::default()
        };
        assert!(raw.validate().is_err());
    }

    #[test]
    fn defaults_apply_to_an_url_only_request() {
        let raw = SubmitRequest {
            repo_url: Some("https://github.com/a/b".to_string()),
            ..Default::default()
        };
        let request = raw.validate().unwrap();
        assert_eq!(request.language, "english");
        assert!(request.use_cache);
        assert_eq!(request.max_file_size, DEFAULT_MAX_FILE_SIZE);
        assert_eq!(request.max_abstractions, DEFAULT_MAX_ABSTRACTIONS);
        assert_eq!(request.include_patterns.len(), DEFAULT_INCLUDE_PATTERNS.len());
    }

    #[test]
    fn whitespace_only_pattern_lists_fall_back_to_defaults() {
        let raw = SubmitRequest {
            repo_url: Some("https://github.com/a/b".to_string()),
            include_patterns: Some(vec!["  ".to_string(), String::new()]),
            exclude_patterns: Some(vec![" tests/* ".to_string()]),
            ..Default::default()
        };
        let request = raw.validate().unwrap();
        assert_eq!(request.include_patterns.len(), DEFAULT_INCLUDE_PATTERNS.len());
        assert_eq!(request.exclude_patterns, vec!["tests/*".to_string()]);
    }

    #[test]
    fn local_dir_is_accepted_when_no_url_is_given() {
        let raw = SubmitRequest {
            local_dir: Some("/srv/checkout".to_string()),
            ..Default::default()
        };
        let request = raw.validate().unwrap();
        assert_eq!(
            request.source,
            RepoSource::LocalDir(PathBuf::from("/srv/checkout"))
        );
    }
}
