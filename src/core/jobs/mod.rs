pub mod orchestrator;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use thiserror::Error;
use tokio::sync::RwLock;

use crate::core::pipeline::TutorialRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Progress is binary: a job leaves `Processing` exactly once and never
/// re-enters it.
pub fn can_transition(from: JobState, to: JobState) -> bool {
    match from {
        JobState::Processing => matches!(to, JobState::Completed | JobState::Failed),
        JobState::Completed | JobState::Failed => false,
    }
}

/// One tutorial-generation task. Owned by the store; the background task
/// mutates it only through `JobStore::update`.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub state: JobState,
    pub request: TutorialRequest,
    /// Set only once the job completes.
    pub output_ref: Option<PathBuf>,
    /// Set only once the job fails.
    pub error_detail: Option<String>,
    pub created_at: SystemTime,
}

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("job '{0}' not found")]
    NotFound(String),
    #[error("illegal job transition {from:?} -> {to:?}")]
    IllegalTransition { from: JobState, to: JobState },
}

/// In-memory job table. Records live for the lifetime of the process;
/// volume is operator-driven, so no eviction.
#[derive(Clone, Default)]
pub struct JobStore {
    inner: Arc<RwLock<HashMap<String, Job>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, request: TutorialRequest) -> Job {
        let job = Job {
            id: uuid::Uuid::new_v4().to_string(),
            state: JobState::Processing,
            request,
            output_ref: None,
            error_detail: None,
            created_at: SystemTime::now(),
        };
        self.inner
            .write()
            .await
            .insert(job.id.clone(), job.clone());
        job
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        self.inner.read().await.get(id).cloned()
    }

    /// Apply a mutation atomically. Rejects any state change that the
    /// state machine forbids, so a terminal record can never be rewritten.
    pub async fn update<F>(&self, id: &str, mutate: F) -> Result<Job, JobStoreError>
    where
        F: FnOnce(&mut Job),
    {
        let mut table = self.inner.write().await;
        let current = table
            .get(id)
            .ok_or_else(|| JobStoreError::NotFound(id.to_string()))?;

        let mut updated = current.clone();
        mutate(&mut updated);

        if updated.state != current.state && !can_transition(current.state, updated.state) {
            return Err(JobStoreError::IllegalTransition {
                from: current.state,
                to: updated.state,
            });
        }
        if current.state.is_terminal() {
            return Err(JobStoreError::IllegalTransition {
                from: current.state,
                to: updated.state,
            });
        }

        table.insert(id.to_string(), updated.clone());
        Ok(updated)
    }

    pub async fn complete(&self, id: &str, output_ref: PathBuf) -> Result<Job, JobStoreError> {
        self.update(id, |job| {
            job.state = JobState::Completed;
            job.output_ref = Some(output_ref);
        })
        .await
    }

    pub async fn fail(&self, id: &str, error_detail: String) -> Result<Job, JobStoreError> {
        self.update(id, |job| {
            job.state = JobState::Failed;
            job.error_detail = Some(error_detail);
        })
        .await
    }
}
