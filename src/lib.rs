//! Theoria - 学术写作智能体
//!
//! 模块划分：
//! - **agents**: 对话、文献检索、LaTeX 编辑三个智能体与编排器
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与错误恢复提示
//! - **llm**: LLM 客户端抽象、错误分类、重试网关与实现（OpenAI 兼容 / Mock）
//! - **memory**: 消息原语与会话存储
//! - **observability**: 日志初始化
//! - **workflow**: 阶段图声明与执行器

pub mod agents;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod workflow;

pub use agents::{
    DialogueAgent, DialogueState, EditAgent, EditState, Orchestrator, OrchestratorState,
    SearchAgent, SearchState, TextStream,
};
pub use crate::config::{load_config, AppConfig};
pub use crate::core::AgentError;
