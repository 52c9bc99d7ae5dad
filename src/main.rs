use std::sync::Arc;

use anyhow::Result;

use codetrail::core::config::AppConfig;
use codetrail::core::jobs::orchestrator::Orchestrator;
use codetrail::core::llm::LlmGateway;
use codetrail::core::llm::cache::ResponseCache;
use codetrail::core::llm::registry::ProviderRegistry;
use codetrail::core::pipeline::TutorialPipeline;
use codetrail::interfaces::web::ApiServer;
use codetrail::logging;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("codetrail failed: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = AppConfig::load(".").await?;
    logging::init(&config.storage.log_dir)?;

    let registry = ProviderRegistry::load().with_overrides(config.providers.clone());
    let cache = ResponseCache::load(&config.storage.cache_file).await;
    let gateway = Arc::new(LlmGateway::new(
        registry,
        cache,
        config.active_provider.clone(),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        gateway,
        Arc::new(TutorialPipeline::new()),
        config.storage.output_dir.clone(),
    ));

    ApiServer::new(orchestrator, config.server.host.clone(), config.server.port)
        .serve()
        .await
}
