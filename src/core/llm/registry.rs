use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::LlmError;

const PROVIDERS_JSON: &str = include_str!("providers.json");

/// Built-in provider table plus any profiles layered on from the user config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRegistry {
    pub providers: Vec<ProviderProfile>,
}

/// One configured LLM backend. Secrets are referenced by environment
/// variable name and read at resolution time, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderProfile {
    /// Filled from the table key when layered in from user config.
    #[serde(default)]
    pub name: String,
    pub kind: ProviderKind,
    pub key_env: String,
    #[serde(default)]
    pub model_env: Option<String>,
    pub default_model: String,
    /// URL template; may contain a `{model}` placeholder.
    pub endpoint: String,
    pub auth: AuthConfig,
    #[serde(default)]
    pub params: GenerationParams,
}

/// Wire-protocol family, resolved once at load time. Several profiles may
/// share a kind (e.g. multiple `openrouter` model presets) while keeping
/// their own credential/model resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Gemini,
    Openai,
    Anthropic,
    Openrouter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(rename = "type")]
    pub auth_type: AuthType,
    /// Query parameter name for the API key (query_param type only).
    #[serde(default)]
    pub param_name: Option<String>,
    /// Header name carrying the raw API key (header type only).
    #[serde(default)]
    pub header_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    Bearer,
    QueryParam,
    Header,
}

/// Provider-specific generation parameters. Adapters forward only the
/// parameters their wire format understands.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub thinking_budget: Option<u32>,
    #[serde(default)]
    pub reasoning_effort: Option<String>,
}

/// A profile with its model and credential resolved from the environment.
#[derive(Debug, Clone)]
pub struct ResolvedProvider {
    pub profile: ProviderProfile,
    pub model: String,
    pub api_key: String,
}

impl ProviderRegistry {
    pub fn load() -> Self {
        serde_json::from_str(PROVIDERS_JSON).expect("providers.json is invalid")
    }

    /// Layer user-configured profiles over the built-in table. A profile
    /// with a known name replaces the built-in entry; unknown names extend
    /// the table.
    pub fn with_overrides(mut self, overrides: HashMap<String, ProviderProfile>) -> Self {
        for (name, mut profile) in overrides {
            profile.name = name;
            match self.providers.iter_mut().find(|p| p.name == profile.name) {
                Some(existing) => *existing = profile,
                None => self.providers.push(profile),
            }
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&ProviderProfile> {
        let normalized = name.to_lowercase();
        self.providers.iter().find(|p| p.name == normalized)
    }

    /// Look up a profile and resolve its model and credential. Model: the
    /// `model_env` variable when set and non-empty, else the default.
    /// Credential: the `key_env` variable, required.
    pub fn resolve(&self, name: &str) -> Result<ResolvedProvider, LlmError> {
        let profile = self
            .get(name)
            .ok_or_else(|| LlmError::Config(format!("unknown provider '{name}'")))?;

        let model = profile
            .model_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| profile.default_model.clone());

        let api_key = std::env::var(&profile.key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                LlmError::Config(format!(
                    "missing credential for provider '{}': set {}",
                    profile.name, profile.key_env
                ))
            })?;

        Ok(ResolvedProvider {
            profile: profile.clone(),
            model,
            api_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_parses_and_contains_all_families() {
        let registry = ProviderRegistry::load();
        assert_eq!(registry.get("gemini").unwrap().kind, ProviderKind::Gemini);
        assert_eq!(registry.get("openai").unwrap().kind, ProviderKind::Openai);
        assert_eq!(
            registry.get("anthropic").unwrap().kind,
            ProviderKind::Anthropic
        );
        let scout = registry.get("openrouter_llama_scout").unwrap();
        let qwen = registry.get("openrouter_qwen_coder").unwrap();
        assert_eq!(scout.kind, ProviderKind::Openrouter);
        assert_eq!(qwen.kind, ProviderKind::Openrouter);
        // Family variants share one wire protocol but keep their own models.
        assert_ne!(scout.default_model, qwen.default_model);
    }

    #[test]
    fn unknown_provider_is_a_config_error() {
        let registry = ProviderRegistry::load();
        let err = registry.resolve("no_such_provider").unwrap_err();
        assert!(matches!(err, LlmError::Config(_)));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = ProviderRegistry::load();
        assert!(registry.get("Gemini").is_some());
    }

    #[test]
    fn overrides_replace_and_extend() {
        let mut custom = ProviderRegistry::load().get("openai").unwrap().clone();
        custom.default_model = "gpt-test".to_string();

        let mut extra = custom.clone();
        extra.endpoint = "http://127.0.0.1:1/v1/chat/completions".to_string();

        let mut overrides = HashMap::new();
        overrides.insert("openai".to_string(), custom);
        overrides.insert("local_stub".to_string(), extra);

        let registry = ProviderRegistry::load().with_overrides(overrides);
        assert_eq!(registry.get("openai").unwrap().default_model, "gpt-test");
        assert!(registry.get("local_stub").is_some());
    }

    #[test]
    fn model_env_override_wins_when_set() {
        // Process-global env var; use a name no other test touches.
        let mut profile = ProviderRegistry::load().get("openai").unwrap().clone();
        profile.name = "env_probe".to_string();
        profile.model_env = Some("CODETRAIL_TEST_MODEL_PROBE".to_string());
        profile.key_env = "CODETRAIL_TEST_KEY_PROBE".to_string();

        let mut overrides = HashMap::new();
        overrides.insert("env_probe".to_string(), profile);
        let registry = ProviderRegistry::load().with_overrides(overrides);

        unsafe {
            std::env::set_var("CODETRAIL_TEST_MODEL_PROBE", "probe-model");
            std::env::set_var("CODETRAIL_TEST_KEY_PROBE", "probe-key");
        }
        let resolved = registry.resolve("env_probe").unwrap();
        assert_eq!(resolved.model, "probe-model");
        assert_eq!(resolved.api_key, "probe-key");
    }
}
