//! LaTeX 编辑智能体：analyze -> (edit | repair) -> ... -> END
//!
//! analyze 先跑本地语法检查：有诊断直接进 repair，否则进 edit；
//! edit 之后有新诊断进 repair，否则结束；repair 只跑一次，之后总是结束。

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agents::latex::{check_syntax, extract_latex};
use crate::agents::{appended, text_stream, truncate_chars, TextStream};
use crate::config::AppConfig;
use crate::core::AgentError;
use crate::llm::{CompletionOptions, LlmClient};
use crate::memory::{compose_request, Message};
use crate::workflow::{GraphExecutor, PhaseMachine, PhaseState, PhaseTag, RunReport};

const DEFAULT_PREVIEW_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditPhase {
    #[default]
    Analyze,
    Edit,
    Repair,
    End,
}

impl fmt::Display for EditPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EditPhase::Analyze => "analyze",
            EditPhase::Edit => "edit",
            EditPhase::Repair => "repair",
            EditPhase::End => "end",
        };
        f.write_str(s)
    }
}

impl PhaseTag for EditPhase {
    const END: Self = EditPhase::End;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditState {
    pub messages: Vec<Message>,
    pub phase: EditPhase,
    /// 当前文档全文
    pub content: String,
    /// 最近一次语法检查的诊断
    pub errors: Vec<String>,
    pub file_path: Option<String>,
}

impl EditState {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
pub struct EditUpdate {
    pub messages: Option<Vec<Message>>,
    pub content: Option<String>,
    pub errors: Option<Vec<String>>,
}

impl PhaseState for EditState {
    type Phase = EditPhase;
    type Update = EditUpdate;

    fn phase(&self) -> EditPhase {
        self.phase
    }

    fn set_phase(&mut self, phase: EditPhase) {
        self.phase = phase;
    }

    fn merge(&mut self, update: EditUpdate) {
        if let Some(messages) = update.messages {
            self.messages = messages;
        }
        if let Some(content) = update.content {
            self.content = content;
        }
        if let Some(errors) = update.errors {
            self.errors = errors;
        }
    }

    fn message_count(&self) -> usize {
        self.messages.len()
    }
}

/// analyze 之后：有诊断进 repair，否则 edit
pub fn route_from_analyze(state: &EditState) -> EditPhase {
    if state.phase == EditPhase::End {
        EditPhase::End
    } else if state.errors.is_empty() {
        EditPhase::Edit
    } else {
        EditPhase::Repair
    }
}

/// edit 之后：有新诊断进 repair，否则结束
pub fn route_from_edit(state: &EditState) -> EditPhase {
    if state.phase == EditPhase::End || state.errors.is_empty() {
        EditPhase::End
    } else {
        EditPhase::Repair
    }
}

/// repair 只跑一次
pub fn route_from_repair(_state: &EditState) -> EditPhase {
    EditPhase::End
}

fn system_prompt(phase: EditPhase) -> String {
    format!(
        "You are Graphos, a LaTeX editing assistant specializing in academic document preparation.

Your responsibilities:
- Edit LaTeX documents based on user instructions
- Maintain document structure and formatting consistency
- Repair common LaTeX syntax errors
- Preserve existing style and conventions
- Handle citations, references, and cross-references properly

Current phase: {phase}
- analyze: Understand the document structure and user request
- edit: Make requested changes to the document
- repair: Fix syntax errors and validate structure

Respond in the user's language. Preserve document integrity."
    )
}

/// 文件存在时异步读取全文，返回 (内容, 路径)
async fn load_document(file_path: &Path) -> Result<Option<(String, String)>, AgentError> {
    if !tokio::fs::try_exists(file_path).await? {
        tracing::warn!(path = %file_path.display(), "document not found, using inline content");
        return Ok(None);
    }
    let content = tokio::fs::read_to_string(file_path).await?;
    Ok(Some((content, file_path.display().to_string())))
}

/// LaTeX 编辑智能体
pub struct EditAgent {
    llm: Arc<dyn LlmClient>,
    options: CompletionOptions,
    executor: GraphExecutor,
    preview_chars: usize,
}

impl EditAgent {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            options: CompletionOptions::default(),
            executor: GraphExecutor::default(),
            preview_chars: DEFAULT_PREVIEW_CHARS,
        }
    }

    pub fn from_config(llm: Arc<dyn LlmClient>, cfg: &AppConfig) -> Self {
        Self {
            llm,
            options: CompletionOptions::default(),
            executor: GraphExecutor::new(cfg.agents.max_steps),
            preview_chars: cfg.agents.edit.analyze_preview_chars,
        }
    }

    /// 以新状态执行一次编辑；file_path 指向存在的文件时，以文件内容为准
    pub async fn edit(
        &self,
        instruction: &str,
        content: Option<&str>,
        file_path: Option<&Path>,
    ) -> Result<EditState, AgentError> {
        let mut state = EditState::new(content.unwrap_or_default());
        if let Some(path) = file_path {
            if let Some((text, path)) = load_document(path).await? {
                state.content = text;
                state.file_path = Some(path);
            }
        }
        self.run(&mut state, instruction).await?;
        Ok(state)
    }

    /// 在已有状态上执行一次编辑：追加指令并从 analyze 重新开始
    pub async fn run(
        &self,
        state: &mut EditState,
        instruction: &str,
    ) -> Result<RunReport<EditPhase>, AgentError> {
        tracing::info!(
            agent = "edit",
            chars = state.content.chars().count(),
            file = state.file_path.as_deref().unwrap_or("-"),
            "edit request"
        );
        state.messages.push(Message::user(instruction));
        state.phase = EditPhase::Analyze;
        self.executor.run(self, state).await
    }

    /// 单次流式编辑；不经过阶段图，也不做语法检查
    pub async fn stream_edit(
        &self,
        instruction: &str,
        content: Option<&str>,
        file_path: Option<&Path>,
    ) -> Result<TextStream, AgentError> {
        let mut document = content.unwrap_or_default().to_string();
        if let Some(path) = file_path {
            if let Some((text, _)) = load_document(path).await? {
                document = text;
            }
        }
        let prompt = format!(
            "{instruction}\n\nDocument:\n```latex\n{document}\n```\n\nProvide the edited LaTeX."
        );
        let request = compose_request(
            system_prompt(EditPhase::Edit),
            &[Message::user(prompt)],
            None,
        );
        let chunks = self.llm.complete_stream(&request, &self.options).await?;
        Ok(text_stream(chunks))
    }

    /// 不调用模型的自动修复，见 [`crate::agents::latex::repair`]
    pub fn repair(&self, content: &str) -> (String, Vec<String>) {
        crate::agents::latex::repair(content)
    }

    async fn ask(
        &self,
        phase: EditPhase,
        state: &EditState,
        instruction: String,
    ) -> Result<String, AgentError> {
        let request = compose_request(system_prompt(phase), &state.messages, Some(instruction));
        Ok(self.llm.complete(&request, &self.options).await?.content)
    }

    async fn analyze(&self, state: &EditState) -> Result<EditUpdate, AgentError> {
        let errors = check_syntax(&state.content);
        if !errors.is_empty() {
            tracing::debug!(count = errors.len(), "syntax diagnostics before edit");
        }
        let instruction = format!(
            "Analyze this LaTeX document:\n\n```latex\n{}\n```\n\n\
             Identify:\n1. Document class and structure\n2. Packages used\n3. Any potential issues or improvements",
            truncate_chars(&state.content, self.preview_chars)
        );
        let reply = self.ask(EditPhase::Analyze, state, instruction).await?;
        Ok(EditUpdate {
            messages: Some(appended(&state.messages, Message::assistant(reply))),
            errors: Some(errors),
            ..Default::default()
        })
    }

    async fn rewrite(&self, state: &EditState) -> Result<EditUpdate, AgentError> {
        let instruction = format!(
            "Based on the analysis, provide the edited LaTeX content.\n\
             Output ONLY the complete modified LaTeX document, no explanations.\n\n\
             Current document:\n```latex\n{}\n```",
            state.content
        );
        let reply = self.ask(EditPhase::Edit, state, instruction).await?;
        Ok(self.checked(state, reply))
    }

    async fn fix(&self, state: &EditState) -> Result<EditUpdate, AgentError> {
        let error_list = state
            .errors
            .iter()
            .map(|e| format!("- {e}"))
            .collect::<Vec<_>>()
            .join("\n");
        let instruction = format!(
            "Fix these LaTeX syntax errors:\n{error_list}\n\n\
             In this document:\n```latex\n{}\n```\n\n\
             Output ONLY the corrected LaTeX document.",
            state.content
        );
        let reply = self.ask(EditPhase::Repair, state, instruction).await?;
        Ok(self.checked(state, reply))
    }

    /// 从回复中取出文档并重新检查
    fn checked(&self, state: &EditState, reply: String) -> EditUpdate {
        let content = extract_latex(&reply);
        let errors = check_syntax(&content);
        EditUpdate {
            messages: Some(appended(&state.messages, Message::assistant(reply))),
            content: Some(content),
            errors: Some(errors),
        }
    }
}

#[async_trait]
impl PhaseMachine for EditAgent {
    type Phase = EditPhase;
    type State = EditState;

    fn name(&self) -> &'static str {
        "edit"
    }

    fn entry(&self) -> EditPhase {
        EditPhase::Analyze
    }

    fn edges(&self, from: EditPhase) -> &'static [EditPhase] {
        match from {
            EditPhase::Analyze => &[EditPhase::Edit, EditPhase::Repair, EditPhase::End],
            EditPhase::Edit => &[EditPhase::Repair, EditPhase::End],
            EditPhase::Repair => &[EditPhase::End],
            EditPhase::End => &[],
        }
    }

    async fn run_phase(
        &self,
        phase: EditPhase,
        state: &EditState,
    ) -> Result<EditUpdate, AgentError> {
        match phase {
            EditPhase::Analyze => self.analyze(state).await,
            EditPhase::Edit => self.rewrite(state).await,
            EditPhase::Repair => self.fix(state).await,
            EditPhase::End => Ok(EditUpdate::default()),
        }
    }

    fn route(&self, from: EditPhase, state: &EditState) -> EditPhase {
        match from {
            EditPhase::Analyze => route_from_analyze(state),
            EditPhase::Edit => route_from_edit(state),
            EditPhase::Repair => route_from_repair(state),
            EditPhase::End => EditPhase::End,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use futures_util::TryStreamExt;
    use tempfile::TempDir;

    const CLEAN: &str = "\\documentclass{article}\n\\begin{document}\nHello.\n\\end{document}";

    #[test]
    fn test_routers() {
        let mut state = EditState::new(CLEAN);
        assert_eq!(route_from_analyze(&state), EditPhase::Edit);
        assert_eq!(route_from_edit(&state), EditPhase::End);
        state.errors = vec!["Unclosed brace".into()];
        assert_eq!(route_from_analyze(&state), EditPhase::Repair);
        assert_eq!(route_from_edit(&state), EditPhase::Repair);
        assert_eq!(route_from_repair(&state), EditPhase::End);
    }

    #[tokio::test]
    async fn test_clean_document_goes_through_edit() {
        let edited = format!("```latex\n{}\n```", CLEAN.replace("Hello.", "Hello, world."));
        let mock = Arc::new(MockLlmClient::with_replies(["Looks fine.".to_string(), edited]));
        let agent = EditAgent::new(mock.clone());

        let state = agent.edit("Say hello to the world", Some(CLEAN), None).await.unwrap();
        assert_eq!(state.phase, EditPhase::End);
        assert!(state.content.contains("Hello, world."));
        assert!(state.errors.is_empty());
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_repair_runs_once_even_if_errors_remain() {
        let broken = "\\begin{itemize}\n\\item a\n";
        let mock = Arc::new(MockLlmClient::with_replies([
            "Missing end.",
            "```latex\n\\begin{itemize}\n\\item a\n```",
        ]));
        let agent = EditAgent::new(mock.clone());
        let mut state = EditState::new(broken);
        let report = agent.run(&mut state, "fix it").await.unwrap();

        assert_eq!(report.visited, vec![EditPhase::Analyze, EditPhase::Repair]);
        assert_eq!(state.phase, EditPhase::End);
        assert_eq!(state.errors, vec!["Unclosed environment: itemize".to_string()]);
        assert_eq!(mock.call_count(), 2);
        let repair_req = &mock.requests()[1];
        assert!(repair_req.last().unwrap().content.contains("- Unclosed environment: itemize"));
    }

    #[tokio::test]
    async fn test_edit_introducing_errors_goes_to_repair() {
        let mock = Arc::new(MockLlmClient::with_replies([
            "ok",
            "```tex\nbroken $x\n```",
            "```latex\nfixed $x$\n```",
        ]));
        let agent = EditAgent::new(mock.clone());
        let mut state = EditState::new("plain text");
        let report = agent.run(&mut state, "add math").await.unwrap();
        assert_eq!(
            report.visited,
            vec![EditPhase::Analyze, EditPhase::Edit, EditPhase::Repair]
        );
        assert_eq!(state.content, "fixed $x$");
        assert!(state.errors.is_empty());
    }

    #[tokio::test]
    async fn test_analyze_preview_is_truncated() {
        let mock = Arc::new(MockLlmClient::new());
        let mut cfg = AppConfig::default();
        cfg.agents.edit.analyze_preview_chars = 5;
        let agent = EditAgent::from_config(mock.clone(), &cfg);
        let mut state = EditState::new("abcdefghij");
        agent.run(&mut state, "x").await.unwrap();
        let analyze = mock.requests()[0].last().unwrap().content.clone();
        assert!(analyze.contains("```latex\nabcde\n```"));
    }

    #[tokio::test]
    async fn test_file_content_wins_over_inline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("paper.tex");
        std::fs::write(&path, CLEAN).unwrap();
        let mock = Arc::new(MockLlmClient::new());
        let agent = EditAgent::new(mock.clone());

        let state = agent.edit("tidy", Some("ignored"), Some(&path)).await.unwrap();
        assert_eq!(state.file_path.as_deref(), Some(path.display().to_string().as_str()));
        assert!(mock.requests()[0].last().unwrap().content.contains("\\begin{document}"));
    }

    #[tokio::test]
    async fn test_stream_edit_single_request() {
        let mock = Arc::new(MockLlmClient::with_replies(["\\section{Intro}"]));
        let agent = EditAgent::new(mock.clone());
        let text: Vec<String> = agent
            .stream_edit("add intro", Some(CLEAN), None)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(text.concat(), "\\section{Intro}");
        let req = &mock.requests()[0];
        assert_eq!(req.len(), 2);
        assert!(req[1].content.starts_with("add intro\n\nDocument:"));
    }
}
