//! 后端预设（均走 OpenAI 兼容端点）
//!
//! 每个预设给出 base_url、API Key 环境变量与获取 Key 的地址；未知后端按 `<PROVIDER>_API_KEY`
//! 读取 Key，且必须在配置中给出 base_url。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::llm::{CompletionGateway, LlmClient, LlmError, MockLlmClient, OpenAiClient, RetryConfig};

/// 单个后端预设
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderPreset {
    pub name: &'static str,
    /// None 表示使用 async-openai 默认（api.openai.com）
    pub base_url: Option<&'static str>,
    pub api_key_env: &'static str,
    pub requires_key: bool,
    pub setup_hint: &'static str,
}

pub const PROVIDERS: &[ProviderPreset] = &[
    ProviderPreset {
        name: "openai",
        base_url: None,
        api_key_env: "OPENAI_API_KEY",
        requires_key: true,
        setup_hint: "Get your API key at https://platform.openai.com/api-keys",
    },
    ProviderPreset {
        name: "deepseek",
        base_url: Some("https://api.deepseek.com"),
        api_key_env: "DEEPSEEK_API_KEY",
        requires_key: true,
        setup_hint: "Get your API key at https://platform.deepseek.com/api_keys",
    },
    ProviderPreset {
        name: "anthropic",
        base_url: Some("https://api.anthropic.com/v1"),
        api_key_env: "ANTHROPIC_API_KEY",
        requires_key: true,
        setup_hint: "Get your API key at https://console.anthropic.com/settings/keys",
    },
    ProviderPreset {
        name: "google",
        base_url: Some("https://generativelanguage.googleapis.com/v1beta/openai"),
        api_key_env: "GEMINI_API_KEY",
        requires_key: true,
        setup_hint: "Get your API key at https://makersuite.google.com/app/apikey",
    },
    ProviderPreset {
        name: "groq",
        base_url: Some("https://api.groq.com/openai/v1"),
        api_key_env: "GROQ_API_KEY",
        requires_key: true,
        setup_hint: "Get your API key at https://console.groq.com/keys",
    },
    ProviderPreset {
        name: "mistral",
        base_url: Some("https://api.mistral.ai/v1"),
        api_key_env: "MISTRAL_API_KEY",
        requires_key: true,
        setup_hint: "Get your API key at https://console.mistral.ai/api-keys",
    },
    ProviderPreset {
        name: "cohere",
        base_url: Some("https://api.cohere.ai/compatibility/v1"),
        api_key_env: "COHERE_API_KEY",
        requires_key: true,
        setup_hint: "Get your API key at https://dashboard.cohere.com/api-keys",
    },
    ProviderPreset {
        name: "openrouter",
        base_url: Some("https://openrouter.ai/api/v1"),
        api_key_env: "OPENROUTER_API_KEY",
        requires_key: true,
        setup_hint: "Get your API key at https://openrouter.ai/keys",
    },
    ProviderPreset {
        name: "ollama",
        base_url: Some("http://localhost:11434/v1"),
        api_key_env: "OLLAMA_API_KEY",
        requires_key: false,
        setup_hint: "Start a local server with `ollama serve`",
    },
];

/// 按名称查找预设（不区分大小写）
pub fn provider_preset(name: &str) -> Option<&'static ProviderPreset> {
    PROVIDERS.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}

/// 解析 API Key：优先显式传入，其次环境变量
pub fn resolve_api_key(provider: &str, explicit: Option<&str>) -> Option<String> {
    if let Some(k) = explicit.filter(|k| !k.trim().is_empty()) {
        return Some(k.to_string());
    }
    let env_var = provider_preset(provider)
        .map(|p| p.api_key_env.to_string())
        .unwrap_or_else(|| format!("{}_API_KEY", provider.to_uppercase()));
    std::env::var(env_var).ok().filter(|k| !k.trim().is_empty())
}

/// 根据配置创建客户端：OpenAI 兼容后端外包一层 CompletionGateway
///
/// Key 缺失（ollama 除外）时返回 Authentication 错误；provider = "mock" 时使用离线 Mock。
pub fn create_llm_from_config(cfg: &AppConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    let provider = cfg.llm.provider.to_lowercase();
    if provider == "mock" {
        tracing::warn!("Using Mock LLM, replies are echoes");
        return Ok(Arc::new(MockLlmClient::new()));
    }
    let preset = provider_preset(&provider);

    let base_url = cfg
        .llm
        .base_url
        .clone()
        .or_else(|| preset.and_then(|p| p.base_url.map(String::from)));
    if preset.is_none() && base_url.is_none() {
        return Err(LlmError::Completion(format!(
            "unknown provider '{provider}' needs llm.base_url"
        )));
    }

    let requires_key = preset.map(|p| p.requires_key).unwrap_or(true);
    let api_key = match resolve_api_key(&provider, None) {
        Some(k) => k,
        None if !requires_key => provider.clone(),
        None => return Err(LlmError::authentication(provider)),
    };

    tracing::info!(provider = %provider, model = %cfg.llm.model, "Using LLM backend");
    let client = OpenAiClient::new(&provider, base_url.as_deref(), &cfg.llm.model, &api_key)
        .with_defaults(cfg.llm.completion_options());

    Ok(Arc::new(CompletionGateway::new(
        Arc::new(client),
        RetryConfig::from(&cfg.llm.retry),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_lookup_is_case_insensitive() {
        let p = provider_preset("DeepSeek").unwrap();
        assert_eq!(p.base_url, Some("https://api.deepseek.com"));
        assert!(provider_preset("acme").is_none());
    }

    #[test]
    fn test_explicit_key_wins() {
        assert_eq!(
            resolve_api_key("openai", Some("sk-test")),
            Some("sk-test".to_string())
        );
    }

    #[test]
    fn test_unknown_provider_without_base_url_fails() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "acme-nonexistent".into();
        assert!(create_llm_from_config(&cfg).is_err());
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "ollama".into();
        cfg.llm.model = "llama3".into();
        assert!(create_llm_from_config(&cfg).is_ok());
    }

    #[test]
    fn test_mock_provider_is_offline() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "Mock".into();
        let llm = create_llm_from_config(&cfg).unwrap();
        assert_eq!(llm.token_usage(), (0, 0, 0));
    }
}
