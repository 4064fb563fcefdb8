//! 文献检索智能体：search -> extract -> validate -> END 的线性流水线
//!
//! validate 阶段把模型给出的 BibTeX 原文追加到 bib_entries；citations 字段只供调用方填充与 format_bibtex 使用。

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agents::{appended, text_stream, truncate_chars, TextStream};
use crate::config::AppConfig;
use crate::core::AgentError;
use crate::llm::{CompletionOptions, LlmClient};
use crate::memory::{compose_request, Message};
use crate::workflow::{GraphExecutor, PhaseMachine, PhaseState, PhaseTag, RunReport};

/// BibTeX 中 abstract 字段最多保留的字符数
const ABSTRACT_MAX_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchPhase {
    #[default]
    Search,
    Extract,
    Validate,
    End,
}

impl fmt::Display for SearchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SearchPhase::Search => "search",
            SearchPhase::Extract => "extract",
            SearchPhase::Validate => "validate",
            SearchPhase::End => "end",
        };
        f.write_str(s)
    }
}

impl PhaseTag for SearchPhase {
    const END: Self = SearchPhase::End;
}

/// 一条文献引用
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub key: String,
    /// 条目类型：article / book / inproceedings ...
    #[serde(rename = "type")]
    pub entry_type: String,
    pub title: String,
    pub authors: Vec<String>,
    pub year: String,
    /// 期刊、会议或出版社
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, rename = "abstract", skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchState {
    pub messages: Vec<Message>,
    pub query: String,
    pub phase: SearchPhase,
    pub citations: Vec<Citation>,
    /// validate 阶段产出的 BibTeX 原文，每次运行追加一条
    pub bib_entries: Vec<String>,
}

impl SearchState {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Default)]
pub struct SearchUpdate {
    pub messages: Option<Vec<Message>>,
    pub citations: Option<Vec<Citation>>,
    pub bib_entries: Option<Vec<String>>,
}

impl PhaseState for SearchState {
    type Phase = SearchPhase;
    type Update = SearchUpdate;

    fn phase(&self) -> SearchPhase {
        self.phase
    }

    fn set_phase(&mut self, phase: SearchPhase) {
        self.phase = phase;
    }

    fn merge(&mut self, update: SearchUpdate) {
        if let Some(messages) = update.messages {
            self.messages = messages;
        }
        if let Some(citations) = update.citations {
            self.citations = citations;
        }
        if let Some(bib_entries) = update.bib_entries {
            self.bib_entries = bib_entries;
        }
    }

    fn message_count(&self) -> usize {
        self.messages.len()
    }
}

/// 渲染单条 BibTeX：作者以 " and " 连接，doi / url / 截断后的 abstract 仅在存在时输出
pub fn format_bibtex(citation: &Citation) -> String {
    let mut fields = vec![
        format!("  author = {{{}}}", citation.authors.join(" and ")),
        format!("  title = {{{}}}", citation.title),
        format!("  year = {{{}}}", citation.year),
    ];
    if let Some(doi) = citation.doi.as_deref().filter(|s| !s.is_empty()) {
        fields.push(format!("  doi = {{{doi}}}"));
    }
    if let Some(url) = citation.url.as_deref().filter(|s| !s.is_empty()) {
        fields.push(format!("  url = {{{url}}}"));
    }
    if let Some(abstract_text) = citation.abstract_text.as_deref().filter(|s| !s.is_empty()) {
        fields.push(format!(
            "  abstract = {{{}}}",
            truncate_chars(abstract_text, ABSTRACT_MAX_CHARS)
        ));
    }
    format!(
        "@{}{{{},\n{}\n}}",
        citation.entry_type,
        citation.key,
        fields.join(",\n")
    )
}

fn system_prompt(phase: SearchPhase) -> String {
    format!(
        "You are Bibliographos, a scholarly research assistant specializing in literature search, citation management, and BibTeX generation.

Your responsibilities:
- Search for relevant academic sources based on user queries
- Extract citation metadata from sources
- Generate properly formatted BibTeX entries
- Validate citation completeness and accuracy
- Maintain citation traceability - every claim needs a source

Current phase: {phase}
- search: Find relevant academic sources
- extract: Extract citation metadata from found sources
- validate: Verify citation completeness and format BibTeX

Respond in the user's language. Be thorough but concise."
    )
}

fn search_instruction(query: &str) -> String {
    format!(
        "Search query: {query}\n\n\
         Provide a list of relevant academic sources. For each source, include:\n\
         - Title\n- Authors\n- Year\n- Source (journal/conference/publisher)\n\
         - DOI if available\n- Brief relevance explanation"
    )
}

const EXTRACT_INSTRUCTION: &str = "Extract structured citation metadata from the search results above.
For each citation, provide:
- Citation key (author-year format, e.g., smith2023)
- Entry type (article, book, inproceedings, etc.)
- All bibliographic fields";

const VALIDATE_INSTRUCTION: &str = "Review the extracted citations and generate valid BibTeX entries.
Ensure:
- All required fields are present
- Author names are properly formatted (Last, First and ...)
- Special characters are escaped
- Keys are unique

Output the final BibTeX entries.";

/// 文献检索智能体
pub struct SearchAgent {
    llm: Arc<dyn LlmClient>,
    options: CompletionOptions,
    executor: GraphExecutor,
}

impl SearchAgent {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            options: CompletionOptions::default(),
            executor: GraphExecutor::default(),
        }
    }

    pub fn from_config(llm: Arc<dyn LlmClient>, cfg: &AppConfig) -> Self {
        Self {
            executor: GraphExecutor::new(cfg.agents.max_steps),
            ..Self::new(llm)
        }
    }

    /// 一次检索：记录 query、追加用户消息，从 search 阶段重新开始整条流水线
    pub async fn search(
        &self,
        state: &mut SearchState,
        query: &str,
    ) -> Result<RunReport<SearchPhase>, AgentError> {
        tracing::info!(agent = "search", query, "literature search");
        state.query = query.to_string();
        state.messages.push(Message::user(query));
        state.phase = SearchPhase::Search;
        self.executor.run(self, state).await
    }

    /// 单次流式检索；不推进 phase，不写回 state
    pub async fn stream_search(
        &self,
        state: &SearchState,
        query: &str,
    ) -> Result<TextStream, AgentError> {
        let history = appended(&state.messages, Message::user(query));
        let instruction = format!(
            "Search query: {query}\n\nFind and cite relevant academic sources for this research topic."
        );
        let request = compose_request(system_prompt(state.phase), &history, Some(instruction));
        let chunks = self.llm.complete_stream(&request, &self.options).await?;
        Ok(text_stream(chunks))
    }

    async fn ask(
        &self,
        phase: SearchPhase,
        state: &SearchState,
        instruction: String,
    ) -> Result<String, AgentError> {
        let request = compose_request(system_prompt(phase), &state.messages, Some(instruction));
        Ok(self.llm.complete(&request, &self.options).await?.content)
    }
}

#[async_trait]
impl PhaseMachine for SearchAgent {
    type Phase = SearchPhase;
    type State = SearchState;

    fn name(&self) -> &'static str {
        "search"
    }

    fn entry(&self) -> SearchPhase {
        SearchPhase::Search
    }

    fn edges(&self, from: SearchPhase) -> &'static [SearchPhase] {
        match from {
            SearchPhase::Search => &[SearchPhase::Extract, SearchPhase::End],
            SearchPhase::Extract => &[SearchPhase::Validate, SearchPhase::End],
            SearchPhase::Validate => &[SearchPhase::End],
            SearchPhase::End => &[],
        }
    }

    async fn run_phase(
        &self,
        phase: SearchPhase,
        state: &SearchState,
    ) -> Result<SearchUpdate, AgentError> {
        let instruction = match phase {
            SearchPhase::Search => search_instruction(&state.query),
            SearchPhase::Extract => EXTRACT_INSTRUCTION.to_string(),
            SearchPhase::Validate => VALIDATE_INSTRUCTION.to_string(),
            SearchPhase::End => return Ok(SearchUpdate::default()),
        };
        let reply = self.ask(phase, state, instruction).await?;
        let bib_entries = (phase == SearchPhase::Validate)
            .then(|| appended(&state.bib_entries, reply.clone()));
        Ok(SearchUpdate {
            messages: Some(appended(&state.messages, Message::assistant(reply))),
            bib_entries,
            ..Default::default()
        })
    }

    fn route(&self, from: SearchPhase, state: &SearchState) -> SearchPhase {
        if state.phase == SearchPhase::End {
            return SearchPhase::End;
        }
        match from {
            SearchPhase::Search => SearchPhase::Extract,
            SearchPhase::Extract => SearchPhase::Validate,
            SearchPhase::Validate | SearchPhase::End => SearchPhase::End,
        }
    }
}
