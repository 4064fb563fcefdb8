//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 按顺序返回预设的回复或错误；队列为空时回显最后一条 User 消息。记录每次请求的消息，便于断言提示词。

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{ChunkStream, Completion, CompletionOptions, LlmClient, LlmError, StreamChunk};
use crate::memory::{Message, Role};

const MOCK_MODEL: &str = "mock";
/// 流式回复时每段字符数
const CHUNK_CHARS: usize = 8;

#[derive(Debug)]
enum Scripted {
    Reply(String),
    Error(LlmError),
}

#[derive(Debug, Default)]
struct MockInner {
    script: VecDeque<Scripted>,
    requests: Vec<Vec<Message>>,
}

/// Mock 客户端：预设脚本，否则回显
#[derive(Debug, Default)]
pub struct MockLlmClient {
    inner: Mutex<MockInner>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预设若干回复
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mock = Self::new();
        for r in replies {
            mock.push_reply(r);
        }
        mock
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.lock().script.push_back(Scripted::Reply(reply.into()));
    }

    pub fn push_error(&self, err: LlmError) {
        self.lock().script.push_back(Scripted::Error(err));
    }

    /// 已收到的请求数
    pub fn call_count(&self) -> usize {
        self.lock().requests.len()
    }

    /// 已收到的全部请求（按顺序）
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.lock().requests.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next(&self, messages: &[Message]) -> Result<String, LlmError> {
        let mut inner = self.lock();
        inner.requests.push(messages.to_vec());
        match inner.script.pop_front() {
            Some(Scripted::Reply(r)) => Ok(r),
            Some(Scripted::Error(e)) => Err(e),
            None => {
                let last_user = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.as_str())
                    .unwrap_or("(no input)");
                Ok(format!("Echo from Mock: {last_user}"))
            }
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<Completion, LlmError> {
        let content = self.next(messages)?;
        Ok(Completion {
            content,
            model: MOCK_MODEL.to_string(),
            usage: None,
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<ChunkStream, LlmError> {
        let content = self.next(messages)?;
        let chars: Vec<char> = content.chars().collect();
        let mut chunks: Vec<Result<StreamChunk, LlmError>> = chars
            .chunks(CHUNK_CHARS)
            .map(|c| {
                Ok(StreamChunk {
                    content: c.iter().collect(),
                    finish_reason: None,
                })
            })
            .collect();
        chunks.push(Ok(StreamChunk {
            content: String::new(),
            finish_reason: Some("stop".to_string()),
        }));
        Ok(Box::pin(stream::iter(chunks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_mock_script_then_echo() {
        let mock = MockLlmClient::with_replies(["first"]);
        let opts = CompletionOptions::default();
        let a = mock.complete(&[Message::user("q")], &opts).await.unwrap();
        let b = mock.complete(&[Message::user("q2")], &opts).await.unwrap();
        assert_eq!(a.content, "first");
        assert_eq!(b.content, "Echo from Mock: q2");
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_stream_splits_and_finishes() {
        let mock = MockLlmClient::with_replies(["abcdefghijklmnop-q"]);
        let chunks: Vec<StreamChunk> = mock
            .complete_stream(&[Message::user("q")], &CompletionOptions::default())
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].content, "abcdefgh");
        assert_eq!(chunks.last().unwrap().finish_reason.as_deref(), Some("stop"));
    }
}
