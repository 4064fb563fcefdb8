//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 OpenAI、DeepSeek、Groq、本地 Ollama 等。
//! 错误统一经 LlmError::classify 分类，重试交给 CompletionGateway。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::StreamExt;

use crate::llm::{
    ChunkStream, Completion, CompletionOptions, LlmClient, LlmError, StreamChunk, Usage,
};
use crate::memory::{Message, Role};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：持有 Client、后端名与 model 名
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    provider: String,
    model: String,
    defaults: CompletionOptions,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(provider: &str, base_url: Option<&str>, model: &str, api_key: &str) -> Self {
        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };

        Self {
            client: Client::with_config(config),
            provider: provider.to_string(),
            model: model.to_string(),
            defaults: CompletionOptions::default(),
            usage: TokenUsage::new(),
        }
    }

    /// 设置默认 temperature / max_tokens（单次调用参数优先）
    pub fn with_defaults(mut self, defaults: CompletionOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn classify(&self, err: impl std::fmt::Display) -> LlmError {
        LlmError::classify(&self.provider, &err.to_string())
    }

    fn to_openai_messages(
        &self,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        messages
            .iter()
            .map(|m| {
                let msg = match m.role {
                    Role::System => ChatCompletionRequestSystemMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::System),
                    Role::User => ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::User),
                    Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::Assistant),
                };
                msg.map_err(|e| LlmError::Completion(e.to_string()))
            })
            .collect()
    }

    fn build_request(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<CreateChatCompletionRequest, LlmError> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model)
            .messages(self.to_openai_messages(messages)?);
        if let Some(t) = options.temperature.or(self.defaults.temperature) {
            args.temperature(t);
        }
        if let Some(n) = options.max_tokens.or(self.defaults.max_tokens) {
            args.max_completion_tokens(n);
        }
        args.build().map_err(|e| LlmError::Completion(e.to_string()))
    }
}

/// FinishReason 序列化为 snake_case 字符串（stop / length / ...）
fn finish_reason_str<T: serde::Serialize>(reason: &T) -> Option<String> {
    serde_json::to_value(reason)
        .ok()
        .and_then(|v| v.as_str().map(String::from))
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<Completion, LlmError> {
        let request = self.build_request(messages, options)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| self.classify(e))?;

        let usage = response.usage.as_ref().map(|u| {
            let usage = Usage {
                prompt_tokens: u.prompt_tokens as u64,
                completion_tokens: u.completion_tokens as u64,
                total_tokens: u.total_tokens as u64,
            };
            self.usage.add(usage.prompt_tokens, usage.completion_tokens);
            usage
        });

        let choice = response.choices.first();
        let content = choice
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        let finish_reason = choice
            .and_then(|c| c.finish_reason.as_ref())
            .and_then(finish_reason_str);

        Ok(Completion {
            content,
            model: response.model,
            usage,
            finish_reason,
        })
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<ChunkStream, LlmError> {
        let request = self.build_request(messages, options)?;

        let upstream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e| self.classify(e))?;

        let provider = self.provider.clone();
        let chunks = upstream.filter_map(move |item| {
            let out = match item {
                Ok(resp) => resp.choices.first().and_then(|choice| {
                    let content = choice.delta.content.clone().unwrap_or_default();
                    let finish_reason = choice.finish_reason.as_ref().and_then(finish_reason_str);
                    if content.is_empty() && finish_reason.is_none() {
                        None
                    } else {
                        Some(Ok(StreamChunk {
                            content,
                            finish_reason,
                        }))
                    }
                }),
                Err(e) => Some(Err(LlmError::classify(&provider, &e.to_string()))),
            };
            futures_util::future::ready(out)
        });

        Ok(Box::pin(chunks))
    }
}
