//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock / 重试网关）实现 LlmClient：complete（非流式）、complete_stream（流式分片）。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};

use crate::llm::LlmError;
use crate::memory::Message;

/// 单次调用的可选参数；为 None 时使用客户端默认值
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// 单次调用的 token 统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// 非流式补全结果
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub usage: Option<Usage>,
    pub finish_reason: Option<String>,
}

/// 流式分片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub content: String,
    pub finish_reason: Option<String>,
}

/// 分片流：长度只受模型输出限制；消费者可随时丢弃以取消
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, LlmError>> + Send>>;

/// LLM 客户端 trait：非流式完成与流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<Completion, LlmError>;

    /// 流式完成，返回分片流
    async fn complete_stream(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<ChunkStream, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
