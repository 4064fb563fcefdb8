//! LLM 层：客户端抽象、错误分类、重试网关与实现（OpenAI 兼容 / Mock）

pub mod error;
pub mod gateway;
pub mod mock;
pub mod openai;
pub mod provider;
pub mod traits;

pub use error::LlmError;
pub use gateway::{CompletionGateway, RetryConfig};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use provider::{
    create_llm_from_config, provider_preset, resolve_api_key, ProviderPreset, PROVIDERS,
};
pub use traits::{ChunkStream, Completion, CompletionOptions, LlmClient, StreamChunk, Usage};
