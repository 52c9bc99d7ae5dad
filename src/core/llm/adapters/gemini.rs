use serde::{Deserialize, Serialize};

use super::{LlmError, WireRequest, auth_headers, resolve_url};
use crate::core::llm::registry::ResolvedProvider;

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiResContent,
}

#[derive(Deserialize)]
struct GeminiResContent {
    parts: Vec<GeminiResPart>,
}

#[derive(Deserialize)]
struct GeminiResPart {
    text: String,
}

pub(super) fn build_request(resolved: &ResolvedProvider, prompt: &str) -> WireRequest {
    let req = GeminiRequest {
        contents: vec![GeminiContent {
            role: "user".to_string(),
            parts: vec![GeminiPart {
                text: prompt.to_string(),
            }],
        }],
    };

    WireRequest {
        url: resolve_url(resolved),
        headers: auth_headers(resolved),
        body: serde_json::to_value(req).expect("gemini request serializes"),
    }
}

pub(super) fn parse_response(body: &[u8]) -> Result<String, LlmError> {
    let parsed: GeminiResponse = serde_json::from_slice(body)
        .map_err(|e| LlmError::Parse(format!("gemini response: {e}")))?;
    parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content.parts.into_iter().next())
        .map(|p| p.text)
        .ok_or_else(|| LlmError::Parse("gemini response has no candidates".to_string()))
}
