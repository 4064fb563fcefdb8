//! LLM 调用错误分类
//!
//! 只看错误文本（不看各家私有错误码）：限流、网络、鉴权与其它。CompletionGateway 据此决定是否重试。

use std::time::Duration;

use thiserror::Error;

/// 补全服务错误（四类）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    /// 限流；retry_after 为服务端给出的建议等待时间
    #[error("Rate limit exceeded{}", .retry_after.map(|d| format!(". Retry after {:.1}s", d.as_secs_f64())).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    #[error("Network error: {0}")]
    Network(String),

    /// 未配置或无效的 API Key；provider 为出问题的后端名
    #[error("No valid API key configured for provider: {provider}")]
    Authentication { provider: String },

    #[error("Completion failed: {0}")]
    Completion(String),
}

impl LlmError {
    pub fn authentication(provider: impl Into<String>) -> Self {
        Self::Authentication {
            provider: provider.into(),
        }
    }

    /// 限流与网络错误可重试；鉴权与其它错误立即失败
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Network(_))
    }

    /// 按错误文本分类
    pub fn classify(provider: &str, message: &str) -> Self {
        let lower = message.to_lowercase();

        if (lower.contains("rate") && lower.contains("limit")) || lower.contains("429") {
            return Self::RateLimited {
                retry_after: parse_retry_after(&lower),
            };
        }

        if ["connection", "timeout", "timed out", "network", "dns error"]
            .iter()
            .any(|k| lower.contains(k))
        {
            return Self::Network(message.to_string());
        }

        if (lower.contains("api") && lower.contains("key"))
            || lower.contains("unauthorized")
            || lower.contains("authentication")
            || lower.contains("401")
        {
            return Self::authentication(provider);
        }

        Self::Completion(message.to_string())
    }
}

/// 从 "retry after 2.5s" / "retry-after: 3" / "try again in 20s" 一类文本中取秒数
fn parse_retry_after(lower: &str) -> Option<Duration> {
    for marker in ["retry-after:", "retry after", "try again in"] {
        if let Some(idx) = lower.find(marker) {
            let rest = lower[idx + marker.len()..].trim_start();
            let num: String = rest
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            // 超出 Duration 范围的数值视为没有给出
            if let Some(wait) = num
                .parse::<f64>()
                .ok()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            {
                return Some(wait);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limit_with_retry_after() {
        let err = LlmError::classify("openai", "Rate limit reached. Please retry after 2.5s");
        assert_eq!(
            err,
            LlmError::RateLimited {
                retry_after: Some(Duration::from_millis(2500))
            }
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_rate_limit_without_hint() {
        let err = LlmError::classify("openai", "rate_limit_exceeded");
        assert_eq!(err, LlmError::RateLimited { retry_after: None });
    }

    #[test]
    fn test_classify_network() {
        let err = LlmError::classify("deepseek", "error sending request: connection refused");
        assert!(matches!(err, LlmError::Network(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_authentication_keeps_provider() {
        let err = LlmError::classify("groq", "Incorrect API key provided");
        assert_eq!(err, LlmError::authentication("groq"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_classify_generic() {
        let err = LlmError::classify("openai", "model overloaded with context");
        assert!(matches!(err, LlmError::Completion(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_overflowing_retry_after_is_ignored() {
        let err = LlmError::classify(
            "openai",
            "Rate limit reached, retry after 99999999999999999999999 seconds",
        );
        assert_eq!(err, LlmError::RateLimited { retry_after: None });
    }

    #[test]
    fn test_classify_bare_status_codes() {
        assert_eq!(
            LlmError::classify("openai", "HTTP 429 Too Many Requests"),
            LlmError::RateLimited { retry_after: None }
        );
        assert!(matches!(
            LlmError::classify("openai", "dns error: failed to lookup address"),
            LlmError::Network(_)
        ));
    }

    #[test]
    fn test_rate_limit_message_mentions_wait() {
        let err = LlmError::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(err.to_string(), "Rate limit exceeded. Retry after 3.0s");
    }
}
