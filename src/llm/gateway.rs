//! 补全网关：重试、退避与错误分类
//!
//! 包装任意 LlmClient：
//! - 限流：按服务端 retry_after 等待，否则按指数退避等待，然后重试
//! - 网络：仅在还有剩余次数时按指数退避重试
//! - 鉴权 / 其它：立即失败
//!
//! 重试计数与退避延迟都是单次调用内的局部变量，网关可被多个任务并发共享。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::RetrySection;
use crate::llm::{ChunkStream, Completion, CompletionOptions, LlmClient, LlmError};
use crate::memory::Message;

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// 总尝试次数（含首次）
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl From<&RetrySection> for RetryConfig {
    fn from(s: &RetrySection) -> Self {
        Self {
            max_attempts: s.max_attempts.max(1),
            initial_delay: Duration::from_millis(s.initial_delay_ms),
            // 退避倍数至少为 1，NaN 与负数都退回 1
            multiplier: if s.multiplier.is_finite() && s.multiplier >= 1.0 {
                s.multiplier
            } else {
                1.0
            },
        }
    }
}

/// 某次失败后的决定
enum Decision {
    RetryAfter(Duration),
    Fail,
}

impl RetryConfig {
    fn decide(&self, err: &LlmError, attempt: u32, delay: Duration) -> Decision {
        let has_more = attempt + 1 < self.max_attempts;
        match err {
            LlmError::RateLimited { retry_after } if has_more => {
                Decision::RetryAfter(retry_after.unwrap_or(delay))
            }
            LlmError::Network(_) if has_more => Decision::RetryAfter(delay),
            _ => Decision::Fail,
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::try_from_secs_f64(delay.as_secs_f64() * self.multiplier)
            .unwrap_or(Duration::MAX)
    }
}

/// 带重试的 LLM 网关，对外仍是 LlmClient
pub struct CompletionGateway {
    inner: Arc<dyn LlmClient>,
    retry: RetryConfig,
}

impl CompletionGateway {
    pub fn new(inner: Arc<dyn LlmClient>, retry: RetryConfig) -> Self {
        Self { inner, retry }
    }
}

#[async_trait]
impl LlmClient for CompletionGateway {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<Completion, LlmError> {
        let mut delay = self.retry.initial_delay;
        let mut attempt = 0;
        loop {
            match self.inner.complete(messages, options).await {
                Ok(completion) => return Ok(completion),
                Err(err) => match self.retry.decide(&err, attempt, delay) {
                    Decision::RetryAfter(wait) => {
                        tracing::warn!(
                            attempt = attempt + 1,
                            max_attempts = self.retry.max_attempts,
                            wait_ms = wait.as_millis() as u64,
                            "completion failed, retrying: {}",
                            err
                        );
                        tokio::time::sleep(wait).await;
                        delay = self.retry.next_delay(delay);
                        attempt += 1;
                    }
                    Decision::Fail => return Err(err),
                },
            }
        }
    }

    /// 只对建立流的过程重试；流开始后出现的错误原样交给消费者
    async fn complete_stream(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<ChunkStream, LlmError> {
        let mut delay = self.retry.initial_delay;
        let mut attempt = 0;
        loop {
            match self.inner.complete_stream(messages, options).await {
                Ok(stream) => return Ok(stream),
                Err(err) => match self.retry.decide(&err, attempt, delay) {
                    Decision::RetryAfter(wait) => {
                        tracing::warn!(
                            attempt = attempt + 1,
                            wait_ms = wait.as_millis() as u64,
                            "stream setup failed, retrying: {}",
                            err
                        );
                        tokio::time::sleep(wait).await;
                        delay = self.retry.next_delay(delay);
                        attempt += 1;
                    }
                    Decision::Fail => return Err(err),
                },
            }
        }
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use futures_util::StreamExt;

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_rate_limit_then_success() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_error(LlmError::RateLimited {
            retry_after: Some(Duration::from_millis(1)),
        });
        mock.push_reply("ok");
        let gateway = CompletionGateway::new(mock.clone(), fast_retry());

        let out = gateway
            .complete(&[Message::user("hi")], &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(out.content, "ok");
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_network_exhausts_attempts() {
        let mock = Arc::new(MockLlmClient::new());
        for _ in 0..5 {
            mock.push_error(LlmError::Network("connection reset".into()));
        }
        let gateway = CompletionGateway::new(mock.clone(), fast_retry());

        let err = gateway
            .complete(&[Message::user("hi")], &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Network(_)));
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_authentication_is_not_retried() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_error(LlmError::authentication("openai"));
        mock.push_reply("never");
        let gateway = CompletionGateway::new(mock.clone(), fast_retry());

        let err = gateway
            .complete(&[Message::user("hi")], &CompletionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, LlmError::authentication("openai"));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_generic_failure_is_not_retried() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_error(LlmError::Completion("bad request".into()));
        let gateway = CompletionGateway::new(mock.clone(), fast_retry());

        let err = gateway
            .complete(&[Message::user("hi")], &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Completion(_)));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_stream_setup_is_retried() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_error(LlmError::Network("timed out".into()));
        mock.push_reply("streamed reply");
        let gateway = CompletionGateway::new(mock.clone(), fast_retry());

        let stream = gateway
            .complete_stream(&[Message::user("hi")], &CompletionOptions::default())
            .await
            .unwrap();
        let chunks: Vec<_> = stream.collect().await;
        let text: String = chunks.into_iter().map(|c| c.unwrap().content).collect();
        assert_eq!(text, "streamed reply");
    }

    #[test]
    fn test_backoff_doubles() {
        let cfg = fast_retry();
        assert_eq!(cfg.next_delay(Duration::from_millis(4)), Duration::from_millis(8));
    }

    #[test]
    fn test_invalid_multiplier_from_config_falls_back() {
        for multiplier in [-2.0, f64::NAN, 0.5, f64::INFINITY] {
            let cfg = RetryConfig::from(&RetrySection {
                max_attempts: 3,
                initial_delay_ms: 10,
                multiplier,
            });
            assert_eq!(cfg.multiplier, 1.0);
            assert_eq!(
                cfg.next_delay(Duration::from_millis(10)),
                Duration::from_millis(10)
            );
        }
    }

    #[test]
    fn test_backoff_saturates_instead_of_overflowing() {
        let cfg = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 1e300,
        };
        assert_eq!(cfg.next_delay(Duration::from_secs(10)), Duration::MAX);
        assert_eq!(cfg.next_delay(Duration::MAX), Duration::MAX);
    }
}
