//! 会话存储抽象层
//!
//! 会话以 id 为键保存消息与去掉消息后的状态快照（JSON）。提供内存与文件两种实现；
//! 智能体本身不依赖存储，由调用方在轮次之间自行 save / load。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;

use crate::core::AgentError;
use crate::memory::Message;

/// 一次保存的会话快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub messages: Vec<Message>,
    /// 状态中除 messages 以外的字段
    pub state: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 会话存储接口
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 保存（覆盖）会话；首次保存时记录创建时间
    async fn save(
        &self,
        session_id: &str,
        messages: &[Message],
        state: serde_json::Value,
    ) -> Result<(), AgentError>;

    /// 加载会话；不存在时返回 None
    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>, AgentError>;

    /// 所有会话 id
    async fn list(&self) -> Result<Vec<String>, AgentError>;

    /// 删除会话，返回是否存在
    async fn delete(&self, session_id: &str) -> Result<bool, AgentError>;
}

/// 生成新的会话 id
pub fn new_session_id() -> String {
    format!("sess_{}", uuid::Uuid::new_v4().simple())
}

/// 把任意可序列化状态拆成 (messages, 其余字段)，用于 save
pub fn split_state<S: Serialize>(
    state: &S,
) -> Result<(Vec<Message>, serde_json::Value), AgentError> {
    let mut value = serde_json::to_value(state).map_err(|e| AgentError::Session(e.to_string()))?;
    let messages = match value.as_object_mut().and_then(|o| o.remove("messages")) {
        Some(m) => serde_json::from_value(m).map_err(|e| AgentError::Session(e.to_string()))?,
        None => Vec::new(),
    };
    Ok((messages, value))
}

/// split_state 的逆操作：把 messages 放回状态后反序列化
pub fn join_state<S: for<'de> Deserialize<'de>>(record: &SessionRecord) -> Result<S, AgentError> {
    let mut value = record.state.clone();
    if let Some(obj) = value.as_object_mut() {
        let messages =
            serde_json::to_value(&record.messages).map_err(|e| AgentError::Session(e.to_string()))?;
        obj.insert("messages".to_string(), messages);
    }
    serde_json::from_value(value).map_err(|e| AgentError::Session(e.to_string()))
}

/// 内存会话存储
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save(
        &self,
        session_id: &str,
        messages: &[Message],
        state: serde_json::Value,
    ) -> Result<(), AgentError> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let created_at = sessions.get(session_id).map(|r| r.created_at).unwrap_or(now);
        sessions.insert(
            session_id.to_string(),
            SessionRecord {
                id: session_id.to_string(),
                messages: messages.to_vec(),
                state,
                created_at,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>, AgentError> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn list(&self) -> Result<Vec<String>, AgentError> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, session_id: &str) -> Result<bool, AgentError> {
        Ok(self.sessions.write().await.remove(session_id).is_some())
    }
}

/// 文件会话存储：目录下每个会话一个 `<id>.json`
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, session_id: &str) -> Result<PathBuf, AgentError> {
        // id 只允许出现在文件名里
        if session_id.is_empty()
            || !session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(AgentError::Session(format!("invalid session id: {session_id}")));
        }
        Ok(self.dir.join(format!("{session_id}.json")))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn save(
        &self,
        session_id: &str,
        messages: &[Message],
        state: serde_json::Value,
    ) -> Result<(), AgentError> {
        let path = self.path_for(session_id)?;
        let now = Utc::now();
        let created_at = self
            .load(session_id)
            .await?
            .map(|r| r.created_at)
            .unwrap_or(now);
        let record = SessionRecord {
            id: session_id.to_string(),
            messages: messages.to_vec(),
            state,
            created_at,
            updated_at: now,
        };
        let data =
            serde_json::to_string_pretty(&record).map_err(|e| AgentError::Session(e.to_string()))?;
        fs::create_dir_all(&self.dir).await?;
        fs::write(&path, data).await?;
        tracing::debug!(session_id, path = %path.display(), "session saved");
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>, AgentError> {
        let path = self.path_for(session_id)?;
        let data = match fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record = serde_json::from_str(&data).map_err(|e| AgentError::Session(e.to_string()))?;
        Ok(Some(record))
    }

    async fn list(&self) -> Result<Vec<String>, AgentError> {
        let mut ids = Vec::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, session_id: &str) -> Result<bool, AgentError> {
        let path = self.path_for(session_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
