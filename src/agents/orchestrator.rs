//! 编排器：在对话智能体与检索智能体之间路由用户轮次
//!
//! 阶段图：route -> dialogue -> END，或 route -> search -> integrate -> END。
//! 子智能体状态按值传递：阶段体克隆出子状态交给子智能体，再在更新中整体替换回来。
//! 同一个 OrchestratorState 不支持并发调用，调用方需串行化。

use std::fmt;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::agents::dialogue::{DialogueAgent, DialogueState};
use crate::agents::search::{SearchAgent, SearchState};
use crate::agents::{appended, truncate_chars, TextStream};
use crate::config::AppConfig;
use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::{Message, Role};
use crate::workflow::{GraphExecutor, PhaseMachine, PhaseState, PhaseTag, RunReport};

/// 检索查询最多保留的字符数
const MAX_QUERY_CHARS: usize = 200;

/// 交接模式：按顺序匹配，大小写不敏感
const HANDOFF_PATTERNS: [&str; 5] = [
    r"この主張の根拠を(探して|調べて|検索して)",
    r"(文献|論文|ソース|出典)を(探して|調べて|検索して)",
    r"(evidence|sources?|citations?|references?)\s+(for|about|on)",
    r"find\s+(papers?|sources?|evidence|literature)",
    r"search\s+(for\s+)?(literature|papers?|sources?)",
];

static HANDOFF_RE: OnceLock<Vec<Regex>> = OnceLock::new();

fn handoff_res() -> &'static [Regex] {
    HANDOFF_RE.get_or_init(|| {
        HANDOFF_PATTERNS
            .iter()
            .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
            .collect()
    })
}

/// 是否为文献检索请求
pub fn is_handoff(text: &str) -> bool {
    handoff_res().iter().any(|re| re.is_match(text))
}

/// 检索查询：第一个匹配且其后仍有文本的模式之后的内容；都没有则取整条消息
pub fn extract_search_query(text: &str) -> String {
    for re in handoff_res() {
        if let Some(m) = re.find(text) {
            let rest = text[m.end()..].trim();
            if !rest.is_empty() {
                return truncate_chars(rest, MAX_QUERY_CHARS);
            }
        }
    }
    truncate_chars(text, MAX_QUERY_CHARS)
}

/// 本轮由哪个智能体处理
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveAgent {
    #[default]
    Dialogue,
    Search,
    Orchestrator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestratorPhase {
    #[default]
    Route,
    Dialogue,
    Search,
    Integrate,
    End,
}

impl fmt::Display for OrchestratorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrchestratorPhase::Route => "route",
            OrchestratorPhase::Dialogue => "dialogue",
            OrchestratorPhase::Search => "search",
            OrchestratorPhase::Integrate => "integrate",
            OrchestratorPhase::End => "end",
        };
        f.write_str(s)
    }
}

impl PhaseTag for OrchestratorPhase {
    const END: Self = OrchestratorPhase::End;
}

/// 编排器状态：内嵌两个子智能体的状态
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorState {
    pub messages: Vec<Message>,
    pub phase: OrchestratorPhase,
    pub active_agent: ActiveAgent,
    pub dialogue: DialogueState,
    pub search: SearchState,
    /// 待执行的检索查询
    pub pending_search: Option<String>,
    /// 最近一次检索得到的 BibTeX，下一轮对话时作为上下文注入后清空
    pub search_results: Vec<String>,
}

impl OrchestratorState {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Default)]
pub struct OrchestratorUpdate {
    pub messages: Option<Vec<Message>>,
    pub active_agent: Option<ActiveAgent>,
    pub dialogue: Option<DialogueState>,
    pub search: Option<SearchState>,
    /// Some(None) 表示清空
    pub pending_search: Option<Option<String>>,
    pub search_results: Option<Vec<String>>,
}

impl PhaseState for OrchestratorState {
    type Phase = OrchestratorPhase;
    type Update = OrchestratorUpdate;

    fn phase(&self) -> OrchestratorPhase {
        self.phase
    }

    fn set_phase(&mut self, phase: OrchestratorPhase) {
        self.phase = phase;
    }

    fn merge(&mut self, update: OrchestratorUpdate) {
        if let Some(v) = update.messages {
            self.messages = v;
        }
        if let Some(v) = update.active_agent {
            self.active_agent = v;
        }
        if let Some(v) = update.dialogue {
            self.dialogue = v;
        }
        if let Some(v) = update.search {
            self.search = v;
        }
        if let Some(v) = update.pending_search {
            self.pending_search = v;
        }
        if let Some(v) = update.search_results {
            self.search_results = v;
        }
    }

    fn message_count(&self) -> usize {
        self.messages.len()
    }
}

/// route 阶段的决策：只看最后一条消息
pub fn decide_handoff(messages: &[Message]) -> OrchestratorUpdate {
    let dialogue = OrchestratorUpdate {
        active_agent: Some(ActiveAgent::Dialogue),
        ..Default::default()
    };
    let Some(last) = messages.last() else {
        return dialogue;
    };
    if !last.is_user() || !is_handoff(&last.content) {
        return dialogue;
    }
    OrchestratorUpdate {
        active_agent: Some(ActiveAgent::Search),
        pending_search: Some(Some(extract_search_query(&last.content))),
        ..Default::default()
    }
}

fn integration_notice(count: usize) -> String {
    format!(
        "[Literature search found {count} relevant source(s). The sources have been integrated into the discussion context.]"
    )
}

/// 编排器：组合对话与检索两个智能体
pub struct Orchestrator {
    dialogue: DialogueAgent,
    search: SearchAgent,
    executor: GraphExecutor,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            dialogue: DialogueAgent::new(llm.clone()),
            search: SearchAgent::new(llm),
            executor: GraphExecutor::default(),
        }
    }

    pub fn from_config(llm: Arc<dyn LlmClient>, cfg: &AppConfig) -> Self {
        Self {
            dialogue: DialogueAgent::from_config(llm.clone(), cfg),
            search: SearchAgent::from_config(llm, cfg),
            executor: GraphExecutor::new(cfg.agents.max_steps),
        }
    }

    /// 一轮：追加用户消息，从 route 开始跑阶段图
    pub async fn chat(
        &self,
        state: &mut OrchestratorState,
        input: &str,
    ) -> Result<RunReport<OrchestratorPhase>, AgentError> {
        tracing::info!(agent = "orchestrator", history = state.messages.len(), "chat turn");
        state.messages.push(Message::user(input));
        state.phase = OrchestratorPhase::Route;
        self.executor.run(self, state).await
    }

    /// 流式入口：直接做模式匹配，不跑阶段图，不写回 state
    pub async fn stream_chat(
        &self,
        state: &OrchestratorState,
        input: &str,
    ) -> Result<TextStream, AgentError> {
        if is_handoff(input) {
            let query = extract_search_query(input);
            let notice = format!("[Searching for: {query}]\n\n");
            let inner = self.search.stream_search(&state.search, &query).await?;
            return Ok(Box::pin(stream::once(async move { Ok(notice) }).chain(inner)));
        }

        let input = if state.search_results.is_empty() {
            input.to_string()
        } else {
            format!(
                "{input}\n\n[Available sources]:\n{}",
                state.search_results.join("\n")
            )
        };
        self.dialogue.stream_chat(&state.dialogue, &input).await
    }

    async fn run_dialogue(
        &self,
        state: &OrchestratorState,
    ) -> Result<OrchestratorUpdate, AgentError> {
        let Some(last) = state.messages.last().filter(|m| m.is_user()) else {
            return Ok(OrchestratorUpdate::default());
        };

        let mut update = OrchestratorUpdate::default();
        let mut input = last.content.clone();
        if !state.search_results.is_empty() {
            input = format!(
                "{input}\n\n[Available sources from literature search]:\n{}",
                state.search_results.join("\n")
            );
            update.search_results = Some(Vec::new());
        }

        let mut dialogue = state.dialogue.clone();
        let before = dialogue.messages.len();
        self.dialogue.chat(&mut dialogue, &input).await?;

        // 只转发本轮新产生的助手回复；对话已结束时本轮没有回复
        let reply = dialogue.messages[before..]
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant);
        if let Some(reply) = reply {
            update.messages = Some(appended(&state.messages, reply.clone()));
        }
        update.dialogue = Some(dialogue);
        Ok(update)
    }

    async fn run_search(
        &self,
        state: &OrchestratorState,
    ) -> Result<OrchestratorUpdate, AgentError> {
        let Some(query) = state.pending_search.as_deref() else {
            tracing::debug!("search phase without pending query");
            return Ok(OrchestratorUpdate::default());
        };

        let mut search = state.search.clone();
        self.search.search(&mut search, query).await?;

        Ok(OrchestratorUpdate {
            search_results: Some(search.bib_entries.clone()),
            search: Some(search),
            pending_search: Some(None),
            ..Default::default()
        })
    }

    fn integrate(&self, state: &OrchestratorState) -> OrchestratorUpdate {
        if state.search_results.is_empty() {
            return OrchestratorUpdate::default();
        }
        let notice = Message::assistant(integration_notice(state.search_results.len()));
        OrchestratorUpdate {
            messages: Some(appended(&state.messages, notice)),
            ..Default::default()
        }
    }
}

#[async_trait]
impl PhaseMachine for Orchestrator {
    type Phase = OrchestratorPhase;
    type State = OrchestratorState;

    fn name(&self) -> &'static str {
        "orchestrator"
    }

    fn entry(&self) -> OrchestratorPhase {
        OrchestratorPhase::Route
    }

    fn edges(&self, from: OrchestratorPhase) -> &'static [OrchestratorPhase] {
        use OrchestratorPhase::*;
        match from {
            Route => &[Dialogue, Search, End],
            Dialogue => &[End],
            Search => &[Integrate],
            Integrate => &[End],
            End => &[],
        }
    }

    async fn run_phase(
        &self,
        phase: OrchestratorPhase,
        state: &OrchestratorState,
    ) -> Result<OrchestratorUpdate, AgentError> {
        match phase {
            OrchestratorPhase::Route => Ok(decide_handoff(&state.messages)),
            OrchestratorPhase::Dialogue => self.run_dialogue(state).await,
            OrchestratorPhase::Search => self.run_search(state).await,
            OrchestratorPhase::Integrate => Ok(self.integrate(state)),
            OrchestratorPhase::End => Ok(OrchestratorUpdate::default()),
        }
    }

    fn route(&self, from: OrchestratorPhase, state: &OrchestratorState) -> OrchestratorPhase {
        match from {
            OrchestratorPhase::Route => match state.active_agent {
                ActiveAgent::Dialogue => OrchestratorPhase::Dialogue,
                ActiveAgent::Search => OrchestratorPhase::Search,
                ActiveAgent::Orchestrator => OrchestratorPhase::End,
            },
            OrchestratorPhase::Search => OrchestratorPhase::Integrate,
            _ => OrchestratorPhase::End,
        }
    }
}
