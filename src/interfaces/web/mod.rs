mod handlers;
mod router;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::core::jobs::orchestrator::Orchestrator;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) orchestrator: Arc<Orchestrator>,
}

/// The JSON API plus the embedded single-page front end.
pub struct ApiServer {
    orchestrator: Arc<Orchestrator>,
    host: String,
    port: u16,
}

impl ApiServer {
    pub fn new(orchestrator: Arc<Orchestrator>, host: impl Into<String>, port: u16) -> Self {
        Self {
            orchestrator,
            host: host.into(),
            port,
        }
    }

    pub async fn serve(self) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let app = build_router(self.orchestrator, self.port);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        info!("codetrail running at http://{addr}");
        axum::serve(listener, app).await.context("serving API")?;
        Ok(())
    }
}

/// Router construction is public so integration tests can drive the API
/// in-process without binding a socket.
pub fn build_router(orchestrator: Arc<Orchestrator>, port: u16) -> axum::Router {
    router::build_api_router(AppState { orchestrator }, port)
}
