//! 智能体：苏格拉底式对话、文献检索、LaTeX 编辑，以及在前两者之间路由的编排器
//!
//! 每个智能体都有两条入口：
//! - `chat` / `search` / `edit` / `run`：跑完整个阶段图，结果写回调用方持有的状态
//! - `stream_*`：绕过阶段图，只做一次流式补全；**不**推进 phase，也不写回状态

pub mod dialogue;
pub mod edit;
pub mod latex;
pub mod orchestrator;
pub mod search;

use std::pin::Pin;

use futures_util::{future, Stream, StreamExt, TryStreamExt};

use crate::core::AgentError;
use crate::llm::ChunkStream;

pub use dialogue::{DialogueAgent, DialoguePhase, DialogueState, DialogueUpdate};
pub use edit::{EditAgent, EditPhase, EditState, EditUpdate};
pub use latex::{check_syntax, extract_latex, repair};
pub use orchestrator::{
    extract_search_query, is_handoff, ActiveAgent, Orchestrator, OrchestratorPhase,
    OrchestratorState, OrchestratorUpdate,
};
pub use search::{format_bibtex, Citation, SearchAgent, SearchPhase, SearchState, SearchUpdate};

/// 流式入口产出的文本分片
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, AgentError>> + Send>>;

/// 把模型分片流转成文本流，丢弃空分片（如只带 finish_reason 的收尾分片）
pub(crate) fn text_stream(chunks: ChunkStream) -> TextStream {
    Box::pin(
        chunks
            .map(|chunk| chunk.map(|c| c.content).map_err(AgentError::from))
            .try_filter(|text| future::ready(!text.is_empty())),
    )
}

/// 旧列表 + 新项（合并按键替换，列表需整体重建）
pub(crate) fn appended<T: Clone>(list: &[T], item: T) -> Vec<T> {
    let mut out = Vec::with_capacity(list.len() + 1);
    out.extend_from_slice(list);
    out.push(item);
    out
}

/// 按字符截断
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
