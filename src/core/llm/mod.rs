pub mod adapters;
pub mod cache;
pub mod registry;

use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use adapters::WireRequest;
use cache::ResponseCache;
use registry::ProviderRegistry;

/// Audit trail target; `logging::init` routes this to the call log file.
pub const AUDIT_TARGET: &str = "llm_audit";

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider configuration: {0}")]
    Config(String),
    #[error("LLM call failed after {attempts} attempt(s): {detail}")]
    Transport { attempts: u32, detail: String },
    #[error("malformed provider response: {0}")]
    Parse(String),
}

impl LlmError {
    fn kind(&self) -> &'static str {
        match self {
            LlmError::Config(_) => "config",
            LlmError::Transport { .. } => "transport",
            LlmError::Parse(_) => "parse",
        }
    }
}

enum CallFailure {
    Retryable(String),
    Fatal(String),
}

/// The single choke point for all LLM traffic: cache lookup, provider
/// resolution, wire translation, HTTP with bounded retry, response
/// parsing, and write-through caching. Pipeline stages never talk to a
/// provider directly.
pub struct LlmGateway {
    registry: ProviderRegistry,
    cache: ResponseCache,
    client: reqwest::Client,
    active_provider: String,
}

impl LlmGateway {
    pub fn new(
        registry: ProviderRegistry,
        cache: ResponseCache,
        active_provider: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build gateway HTTP client");

        Self {
            registry,
            cache,
            client,
            active_provider: active_provider.into(),
        }
    }

    pub fn active_provider(&self) -> &str {
        &self.active_provider
    }

    /// Dispatch a prompt to the configured active provider.
    pub async fn call(&self, prompt: &str, use_cache: bool) -> Result<String, LlmError> {
        let provider = self.active_provider.clone();
        self.call_with_provider(prompt, &provider, use_cache).await
    }

    /// Dispatch a prompt to a named provider. A cache hit short-circuits
    /// everything downstream, including credential resolution.
    pub async fn call_with_provider(
        &self,
        prompt: &str,
        provider: &str,
        use_cache: bool,
    ) -> Result<String, LlmError> {
        let fp = fingerprint(prompt);

        if use_cache
            && let Some(hit) = self.cache.get(prompt).await
        {
            info!(
                target: AUDIT_TARGET,
                prompt = %fp,
                provider = provider,
                cache = "hit",
                outcome = "ok",
                "llm call"
            );
            return Ok(hit);
        }

        let result = self.dispatch(prompt, provider).await;

        match &result {
            Ok((response, model)) => {
                if use_cache {
                    self.cache.put(prompt, response).await;
                    if let Err(e) = self.cache.flush().await {
                        warn!("failed to persist llm cache: {e}");
                    }
                }
                info!(
                    target: AUDIT_TARGET,
                    prompt = %fp,
                    provider = provider,
                    model = %model,
                    cache = "miss",
                    outcome = "ok",
                    response_len = response.len(),
                    "llm call"
                );
            }
            Err(e) => {
                info!(
                    target: AUDIT_TARGET,
                    prompt = %fp,
                    provider = provider,
                    cache = "miss",
                    outcome = e.kind(),
                    detail = %e,
                    "llm call"
                );
            }
        }

        result.map(|(response, _)| response)
    }

    /// Persist the response cache, pruning expired entries.
    pub async fn flush_cache(&self) -> std::io::Result<()> {
        self.cache.flush().await
    }

    /// Returns the response text plus the resolved model name for the
    /// audit trail.
    async fn dispatch(&self, prompt: &str, provider: &str) -> Result<(String, String), LlmError> {
        let resolved = self.registry.resolve(provider)?;
        let wire = adapters::build_request(&resolved, prompt);
        let body = self.execute_with_retry(&wire, provider).await?;
        let text = adapters::parse_response(resolved.profile.kind, &body)?;
        Ok((text, resolved.model))
    }

    async fn execute_with_retry(
        &self,
        wire: &WireRequest,
        provider: &str,
    ) -> Result<Vec<u8>, LlmError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.execute_once(wire).await {
                Ok(body) => return Ok(body),
                Err(CallFailure::Fatal(detail)) => {
                    return Err(LlmError::Transport {
                        attempts: attempt,
                        detail,
                    });
                }
                Err(CallFailure::Retryable(detail)) if attempt < MAX_ATTEMPTS => {
                    warn!(
                        provider = provider,
                        attempt = attempt,
                        "retryable provider failure: {detail}"
                    );
                    tokio::time::sleep(RETRY_BASE_DELAY * attempt).await;
                }
                Err(CallFailure::Retryable(detail)) => {
                    return Err(LlmError::Transport {
                        attempts: attempt,
                        detail,
                    });
                }
            }
        }
    }

    async fn execute_once(&self, wire: &WireRequest) -> Result<Vec<u8>, CallFailure> {
        let mut request = self.client.post(&wire.url).json(&wire.body);
        for (name, value) in &wire.headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CallFailure::Retryable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| CallFailure::Retryable(e.to_string()))?;
            return Ok(bytes.to_vec());
        }

        let body = response.text().await.unwrap_or_default();
        let detail = if body.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {}", truncate(&body, 300))
        };

        if status == reqwest::StatusCode::REQUEST_TIMEOUT
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error()
        {
            Err(CallFailure::Retryable(detail))
        } else {
            // 4xx auth/usage errors will not heal on retry.
            Err(CallFailure::Fatal(detail))
        }
    }
}

/// Stable, loggable stand-in for the prompt text: hash plus length. The
/// audit trail must not reproduce repository contents verbatim.
fn fingerprint(prompt: &str) -> String {
    let mut hasher = DefaultHasher::new();
    prompt.hash(&mut hasher);
    format!("{:016x}/{}", hasher.finish(), prompt.len())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
