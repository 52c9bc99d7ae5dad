use serde::{Deserialize, Serialize};

use super::{LlmError, WireRequest, auth_headers, resolve_url};
use crate::core::llm::registry::{ProviderKind, ResolvedProvider};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    /// OpenAI o-series parameter name.
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'a str>,
    /// OpenRouter keeps the classic parameter name.
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageOwned,
}

#[derive(Deserialize)]
struct ChatMessageOwned {
    content: String,
}

/// Shared by the OpenAI and OpenRouter families; the parameters each wire
/// format accepts differ, so unsupported ones are omitted rather than
/// forwarded.
pub(super) fn build_request(resolved: &ResolvedProvider, prompt: &str) -> WireRequest {
    let params = &resolved.profile.params;
    let is_openai = resolved.profile.kind == ProviderKind::Openai;

    let req = ChatRequest {
        model: &resolved.model,
        messages: vec![ChatMessage {
            role: "user",
            content: prompt,
        }],
        max_completion_tokens: if is_openai { params.max_tokens } else { None },
        reasoning_effort: if is_openai {
            params.reasoning_effort.as_deref()
        } else {
            None
        },
        max_tokens: if is_openai { None } else { params.max_tokens },
    };

    WireRequest {
        url: resolve_url(resolved),
        headers: auth_headers(resolved),
        body: serde_json::to_value(req).expect("chat request serializes"),
    }
}

pub(super) fn parse_response(body: &[u8]) -> Result<String, LlmError> {
    let parsed: ChatResponse = serde_json::from_slice(body)
        .map_err(|e| LlmError::Parse(format!("chat completions response: {e}")))?;
    parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| LlmError::Parse("chat completions response has no choices".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::llm::registry::ProviderRegistry;

    #[test]
    fn extracts_first_choice_content() {
        let body = br#"{"choices":[{"message":{"content":"hi there"}}]}"#;
        assert_eq!(parse_response(body).unwrap(), "hi there");
    }

    #[test]
    fn empty_choices_is_a_parse_error() {
        assert!(matches!(
            parse_response(br#"{"choices":[]}"#),
            Err(LlmError::Parse(_))
        ));
    }

    #[test]
    fn openai_uses_o_series_parameter_names() {
        let profile = ProviderRegistry::load().get("openai").unwrap().clone();
        let resolved = ResolvedProvider {
            model: profile.default_model.clone(),
            api_key: "k".to_string(),
            profile,
        };
        let wire = build_request(&resolved, "p");
        assert_eq!(wire.body["max_completion_tokens"], 4000);
        assert_eq!(wire.body["reasoning_effort"], "medium");
        assert!(wire.body.get("max_tokens").is_none());
    }
}
