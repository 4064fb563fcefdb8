//! 错误恢复提示
//!
//! 核心层只保证错误类型可检查；这里把 AgentError 映射为面向用户的补救建议（供 CLI 等调用方展示）。

use crate::core::AgentError;
use crate::llm::{provider_preset, LlmError};

/// 调用方根据错误类型应采取的动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 稍后重试（限流）
    Wait { seconds: Option<u64> },
    /// 检查网络后重试
    CheckConnection,
    /// 配置 API Key
    ConfigureKey { provider: String },
    /// 直接重试或终止当前轮
    Abort,
}

/// 语义化错误恢复：将错误映射为动作与提示文本
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn action(&self, err: &AgentError) -> RecoveryAction {
        match err.llm() {
            Some(LlmError::RateLimited { retry_after }) => RecoveryAction::Wait {
                seconds: retry_after.map(|d| d.as_secs_f64().ceil() as u64),
            },
            Some(LlmError::Network(_)) => RecoveryAction::CheckConnection,
            Some(LlmError::Authentication { provider }) => RecoveryAction::ConfigureKey {
                provider: provider.clone(),
            },
            _ => RecoveryAction::Abort,
        }
    }

    /// 面向用户的提示文本
    pub fn hint(&self, err: &AgentError) -> String {
        match self.action(err) {
            RecoveryAction::Wait { seconds: Some(s) } => {
                format!("Rate limit exceeded. Try again in {s} seconds.")
            }
            RecoveryAction::Wait { seconds: None } => {
                "Rate limit exceeded. Please wait a moment and try again.".to_string()
            }
            RecoveryAction::CheckConnection => format!(
                "Network error: {err}\nCheck your internet connection and try again."
            ),
            RecoveryAction::ConfigureKey { provider } => {
                let (hint, env_var) = match provider_preset(&provider) {
                    Some(p) => (p.setup_hint.to_string(), p.api_key_env.to_string()),
                    None => (
                        format!("Set up your {provider} API key"),
                        format!("{}_API_KEY", provider.to_uppercase()),
                    ),
                };
                format!(
                    "No API key found for {provider}.\nTo set up:\n  1. {hint}\n  2. export {env_var}=YOUR_KEY"
                )
            }
            RecoveryAction::Abort => format!(
                "Request failed: {err}\nThis might be a temporary issue. Try again."
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_recovery_rate_limit_rounds_up() {
        let engine = RecoveryEngine::new();
        let err = AgentError::from(LlmError::RateLimited {
            retry_after: Some(Duration::from_millis(1500)),
        });
        assert_eq!(engine.action(&err), RecoveryAction::Wait { seconds: Some(2) });
        assert!(engine.hint(&err).contains("2 seconds"));
    }

    #[test]
    fn test_recovery_auth_mentions_env_var() {
        let engine = RecoveryEngine::new();
        let err = AgentError::from(LlmError::authentication("deepseek"));
        let hint = engine.hint(&err);
        assert!(hint.contains("DEEPSEEK_API_KEY"));
        assert!(hint.contains("platform.deepseek.com"));
    }

    #[test]
    fn test_recovery_unknown_provider_falls_back() {
        let engine = RecoveryEngine::new();
        let err = AgentError::from(LlmError::authentication("acme"));
        assert!(engine.hint(&err).contains("ACME_API_KEY"));
    }

    #[test]
    fn test_recovery_network() {
        let engine = RecoveryEngine::new();
        let err = AgentError::from(LlmError::Network("connection reset".into()));
        assert_eq!(engine.action(&err), RecoveryAction::CheckConnection);
    }

    #[test]
    fn test_recovery_executor_error_aborts() {
        let engine = RecoveryEngine::new();
        let err = AgentError::StepLimitExceeded {
            agent: "dialogue",
            limit: 25,
        };
        assert_eq!(engine.action(&err), RecoveryAction::Abort);
    }
}
