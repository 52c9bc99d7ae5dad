mod anthropic;
mod gemini;
mod openai;

use super::LlmError;
use super::registry::{AuthType, ProviderKind, ResolvedProvider};

/// A provider call ready to execute: adapters translate a prompt into this
/// shape, and the gateway owns the actual HTTP round trip.
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: serde_json::Value,
}

pub fn build_request(resolved: &ResolvedProvider, prompt: &str) -> WireRequest {
    match resolved.profile.kind {
        ProviderKind::Gemini => gemini::build_request(resolved, prompt),
        ProviderKind::Openai | ProviderKind::Openrouter => openai::build_request(resolved, prompt),
        ProviderKind::Anthropic => anthropic::build_request(resolved, prompt),
    }
}

/// Extract the generated text from a 2xx response body. Shape mismatches
/// are `LlmError::Parse`; retrying would reproduce the same body.
pub fn parse_response(kind: ProviderKind, body: &[u8]) -> Result<String, LlmError> {
    match kind {
        ProviderKind::Gemini => gemini::parse_response(body),
        ProviderKind::Openai | ProviderKind::Openrouter => openai::parse_response(body),
        ProviderKind::Anthropic => anthropic::parse_response(body),
    }
}

/// Endpoint template with the model substituted, plus the query-string key
/// when the provider authenticates that way.
pub(crate) fn resolve_url(resolved: &ResolvedProvider) -> String {
    let base = resolved.profile.endpoint.replace("{model}", &resolved.model);
    match resolved.profile.auth.auth_type {
        AuthType::QueryParam => {
            let param = resolved
                .profile
                .auth
                .param_name
                .as_deref()
                .unwrap_or("key");
            format!("{base}?{param}={}", resolved.api_key)
        }
        AuthType::Bearer | AuthType::Header => base,
    }
}

pub(crate) fn auth_headers(resolved: &ResolvedProvider) -> Vec<(String, String)> {
    match resolved.profile.auth.auth_type {
        AuthType::Bearer => vec![(
            "Authorization".to_string(),
            format!("Bearer {}", resolved.api_key),
        )],
        AuthType::Header => {
            let name = resolved
                .profile
                .auth
                .header_name
                .as_deref()
                .unwrap_or("x-api-key");
            vec![(name.to_string(), resolved.api_key.clone())]
        }
        AuthType::QueryParam => Vec::new(),
    }
}
