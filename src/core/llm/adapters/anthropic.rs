use serde::{Deserialize, Serialize};

use super::{LlmError, WireRequest, auth_headers, resolve_url};
use crate::core::llm::registry::ResolvedProvider;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<Thinking>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct Thinking {
    #[serde(rename = "type")]
    kind: &'static str,
    budget_tokens: u32,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

pub(super) fn build_request(resolved: &ResolvedProvider, prompt: &str) -> WireRequest {
    let params = &resolved.profile.params;
    let req = MessagesRequest {
        model: &resolved.model,
        max_tokens: params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        messages: vec![Message {
            role: "user",
            content: prompt,
        }],
        thinking: params.thinking_budget.map(|budget_tokens| Thinking {
            kind: "enabled",
            budget_tokens,
        }),
    };

    let mut headers = auth_headers(resolved);
    headers.push((
        "anthropic-version".to_string(),
        ANTHROPIC_VERSION.to_string(),
    ));

    WireRequest {
        url: resolve_url(resolved),
        headers,
        body: serde_json::to_value(req).expect("messages request serializes"),
    }
}

/// With extended thinking enabled the text block is not first, so take the
/// first block that actually carries text.
pub(super) fn parse_response(body: &[u8]) -> Result<String, LlmError> {
    let parsed: MessagesResponse = serde_json::from_slice(body)
        .map_err(|e| LlmError::Parse(format!("anthropic response: {e}")))?;
    parsed
        .content
        .into_iter()
        .find(|block| block.kind == "text")
        .and_then(|block| block.text)
        .ok_or_else(|| LlmError::Parse("anthropic response has no text block".to_string()))
}
