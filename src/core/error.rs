//! Agent 错误类型
//!
//! LLM 四类错误透明包装后原样穿过阶段体与执行器；其余为执行器与本地 I/O 错误。

use thiserror::Error;

use crate::llm::LlmError;

/// 智能体运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// 路由给出了未声明的边
    #[error("{agent}: invalid transition {from} -> {to}")]
    InvalidTransition {
        agent: &'static str,
        from: String,
        to: String,
    },

    /// 单次运行执行的阶段数超过上限
    #[error("{agent}: step limit {limit} exceeded")]
    StepLimitExceeded { agent: &'static str, limit: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session store error: {0}")]
    Session(String),
}

impl AgentError {
    /// 若为补全服务错误则返回其分类
    pub fn llm(&self) -> Option<&LlmError> {
        match self {
            Self::Llm(e) => Some(e),
            _ => None,
        }
    }
}
