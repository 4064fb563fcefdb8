//! 对话原语：消息与角色
//!
//! 所有智能体的状态都持有一段只增不减的消息序列；单条消息创建后不再修改。

use std::fmt;

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

/// 拼接一次请求：system 提示 + 历史 + 可选的阶段指令（指令不写回历史）
pub fn compose_request(
    system: String,
    history: &[Message],
    instruction: Option<String>,
) -> Vec<Message> {
    let mut out = Vec::with_capacity(history.len() + 2);
    out.push(Message::system(system));
    out.extend(history.iter().cloned());
    if let Some(instruction) = instruction {
        out.push(Message::user(instruction));
    }
    out
}
