//! 苏格拉底式对话智能体：clarify -> challenge -> synthesize -> clarify ...
//!
//! clarify 在论题为空时自环；challenge 累计反驳直到达到阈值；synthesize 之后回到 clarify 开始新一轮。
//! 图本身没有通往 END 的常规路径，因此单次运行内 clarify 的执行次数有上限（见 max_clarify_visits），
//! 达到上限时本轮结束，phase 停在 clarify。

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agents::{appended, text_stream, TextStream};
use crate::config::AppConfig;
use crate::core::AgentError;
use crate::llm::{CompletionOptions, LlmClient};
use crate::memory::{compose_request, Message};
use crate::workflow::{GraphExecutor, PhaseMachine, PhaseState, PhaseTag, RunReport};

const THESIS_MARKER: &str = "thesis:";
const DEFAULT_OBJECTION_THRESHOLD: usize = 3;
const DEFAULT_MAX_CLARIFY_VISITS: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialoguePhase {
    #[default]
    Clarify,
    Challenge,
    Synthesize,
    End,
}

impl DialoguePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialoguePhase::Clarify => "clarify",
            DialoguePhase::Challenge => "challenge",
            DialoguePhase::Synthesize => "synthesize",
            DialoguePhase::End => "end",
        }
    }
}

impl fmt::Display for DialoguePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PhaseTag for DialoguePhase {
    const END: Self = DialoguePhase::End;
}

/// 对话状态：由调用方跨轮持有
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogueState {
    pub messages: Vec<Message>,
    pub phase: DialoguePhase,
    /// 为空表示尚未给出论题
    pub thesis: String,
    pub objections: Vec<String>,
    pub refinements: Vec<String>,
}

impl DialogueState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 外部强制结束后重新开放对话
    pub fn reopen(&mut self) {
        if self.phase == DialoguePhase::End {
            self.phase = DialoguePhase::Clarify;
        }
    }
}

#[derive(Debug, Default)]
pub struct DialogueUpdate {
    pub messages: Option<Vec<Message>>,
    pub objections: Option<Vec<String>>,
    pub refinements: Option<Vec<String>>,
}

impl PhaseState for DialogueState {
    type Phase = DialoguePhase;
    type Update = DialogueUpdate;

    fn phase(&self) -> DialoguePhase {
        self.phase
    }

    fn set_phase(&mut self, phase: DialoguePhase) {
        self.phase = phase;
    }

    fn merge(&mut self, update: DialogueUpdate) {
        if let Some(messages) = update.messages {
            self.messages = messages;
        }
        if let Some(objections) = update.objections {
            self.objections = objections;
        }
        if let Some(refinements) = update.refinements {
            self.refinements = refinements;
        }
    }

    fn message_count(&self) -> usize {
        self.messages.len()
    }
}

fn system_prompt(phase: DialoguePhase) -> String {
    format!(
        "You are Theoretikos, a Socratic philosophical dialogue partner.

Your role:
- Help the user clarify, examine, and refine their arguments
- Ask probing questions to uncover assumptions
- Present counter-arguments and objections
- Never simply agree - always push for deeper thinking
- Guide toward well-supported conclusions with traceable reasoning

Current phase: {phase}
- clarify: Help user articulate their thesis clearly
- challenge: Present objections and counter-arguments
- synthesize: Help integrate insights into refined position

Respond in the user's language. Be rigorous but not hostile."
    )
}

/// 从用户输入中提取 `thesis:` 之后的论题（大小写不敏感）；标记后为空则视为未给出
pub fn extract_thesis(input: &str) -> Option<String> {
    // ASCII 小写化不改变字节偏移
    let idx = input.to_ascii_lowercase().find(THESIS_MARKER)?;
    let thesis = input[idx + THESIS_MARKER.len()..].trim();
    (!thesis.is_empty()).then(|| thesis.to_string())
}

/// clarify 之后：有论题进入 challenge，否则自环
pub fn route_from_clarify(state: &DialogueState) -> DialoguePhase {
    if state.phase == DialoguePhase::End {
        return DialoguePhase::End;
    }
    if state.thesis.is_empty() {
        DialoguePhase::Clarify
    } else {
        DialoguePhase::Challenge
    }
}

/// challenge 之后：反驳数达到阈值进入 synthesize，否则继续 challenge
pub fn route_from_challenge(state: &DialogueState, objection_threshold: usize) -> DialoguePhase {
    if state.phase == DialoguePhase::End {
        return DialoguePhase::End;
    }
    if state.objections.len() >= objection_threshold {
        DialoguePhase::Synthesize
    } else {
        DialoguePhase::Challenge
    }
}

/// synthesize 之后总是回到 clarify
pub fn route_from_synthesize(state: &DialogueState) -> DialoguePhase {
    if state.phase == DialoguePhase::End {
        return DialoguePhase::End;
    }
    DialoguePhase::Clarify
}

/// 苏格拉底式对话智能体
pub struct DialogueAgent {
    llm: Arc<dyn LlmClient>,
    options: CompletionOptions,
    executor: GraphExecutor,
    objection_threshold: usize,
    max_clarify_visits: usize,
}

impl DialogueAgent {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            options: CompletionOptions::default(),
            executor: GraphExecutor::default(),
            objection_threshold: DEFAULT_OBJECTION_THRESHOLD,
            max_clarify_visits: DEFAULT_MAX_CLARIFY_VISITS,
        }
    }

    pub fn from_config(llm: Arc<dyn LlmClient>, cfg: &AppConfig) -> Self {
        Self {
            llm,
            options: CompletionOptions::default(),
            executor: GraphExecutor::new(cfg.agents.max_steps),
            objection_threshold: cfg.agents.dialogue.objection_threshold,
            max_clarify_visits: cfg.agents.dialogue.max_clarify_visits.max(1),
        }
    }

    pub fn with_objection_threshold(mut self, threshold: usize) -> Self {
        self.objection_threshold = threshold;
        self
    }

    pub fn with_max_clarify_visits(mut self, visits: usize) -> Self {
        self.max_clarify_visits = visits.max(1);
        self
    }

    /// 一轮对话：追加用户消息、提取论题，然后跑阶段图
    ///
    /// 出错时 state 保留已完成阶段合并的结果（包括本轮的用户消息）。
    pub async fn chat(
        &self,
        state: &mut DialogueState,
        input: &str,
    ) -> Result<RunReport<DialoguePhase>, AgentError> {
        tracing::info!(
            agent = "dialogue",
            phase = %state.phase,
            history = state.messages.len(),
            "chat turn"
        );
        state.messages.push(Message::user(input));
        if state.thesis.is_empty() {
            if let Some(thesis) = extract_thesis(input) {
                tracing::debug!(thesis = %thesis, "thesis recorded");
                state.thesis = thesis;
            }
        }
        self.executor.run(self, state).await
    }

    /// 单次流式补全：按当前 phase 选系统提示；不推进 phase，不写回 state
    pub async fn stream_chat(
        &self,
        state: &DialogueState,
        input: &str,
    ) -> Result<TextStream, AgentError> {
        let history = appended(&state.messages, Message::user(input));
        let request = compose_request(system_prompt(state.phase), &history, None);
        let chunks = self.llm.complete_stream(&request, &self.options).await?;
        Ok(text_stream(chunks))
    }

    async fn ask(&self, request: Vec<Message>) -> Result<String, AgentError> {
        Ok(self.llm.complete(&request, &self.options).await?.content)
    }

    async fn clarify(&self, state: &DialogueState) -> Result<DialogueUpdate, AgentError> {
        let request = compose_request(system_prompt(DialoguePhase::Clarify), &state.messages, None);
        let reply = self.ask(request).await?;
        Ok(DialogueUpdate {
            messages: Some(appended(&state.messages, Message::assistant(reply))),
            ..Default::default()
        })
    }

    async fn challenge(&self, state: &DialogueState) -> Result<DialogueUpdate, AgentError> {
        let instruction = format!(
            "The user's thesis: {}\n\nPresent a thoughtful objection or counter-argument.",
            state.thesis
        );
        let request = compose_request(
            system_prompt(DialoguePhase::Challenge),
            &state.messages,
            Some(instruction),
        );
        let reply = self.ask(request).await?;
        Ok(DialogueUpdate {
            messages: Some(appended(&state.messages, Message::assistant(reply.clone()))),
            objections: Some(appended(&state.objections, reply)),
            ..Default::default()
        })
    }

    async fn synthesize(&self, state: &DialogueState) -> Result<DialogueUpdate, AgentError> {
        let instruction = format!(
            "Original thesis: {}\nObjections raised: {}\n\nHelp the user synthesize insights into a refined position.",
            state.thesis,
            state.objections.len()
        );
        let request = compose_request(
            system_prompt(DialoguePhase::Synthesize),
            &state.messages,
            Some(instruction),
        );
        let reply = self.ask(request).await?;
        Ok(DialogueUpdate {
            messages: Some(appended(&state.messages, Message::assistant(reply.clone()))),
            refinements: Some(appended(&state.refinements, reply)),
            ..Default::default()
        })
    }
}

#[async_trait]
impl PhaseMachine for DialogueAgent {
    type Phase = DialoguePhase;
    type State = DialogueState;

    fn name(&self) -> &'static str {
        "dialogue"
    }

    fn entry(&self) -> DialoguePhase {
        DialoguePhase::Clarify
    }

    fn edges(&self, from: DialoguePhase) -> &'static [DialoguePhase] {
        use DialoguePhase::*;
        match from {
            Clarify => &[Challenge, Clarify, End],
            Challenge => &[Synthesize, Challenge, End],
            Synthesize => &[Clarify, End],
            End => &[],
        }
    }

    async fn run_phase(
        &self,
        phase: DialoguePhase,
        state: &DialogueState,
    ) -> Result<DialogueUpdate, AgentError> {
        match phase {
            DialoguePhase::Clarify => self.clarify(state).await,
            DialoguePhase::Challenge => self.challenge(state).await,
            DialoguePhase::Synthesize => self.synthesize(state).await,
            DialoguePhase::End => Ok(DialogueUpdate::default()),
        }
    }

    fn route(&self, from: DialoguePhase, state: &DialogueState) -> DialoguePhase {
        match from {
            DialoguePhase::Clarify => route_from_clarify(state),
            DialoguePhase::Challenge => route_from_challenge(state, self.objection_threshold),
            DialoguePhase::Synthesize => route_from_synthesize(state),
            DialoguePhase::End => DialoguePhase::End,
        }
    }

    fn max_visits(&self, phase: DialoguePhase) -> Option<usize> {
        match phase {
            DialoguePhase::Clarify => Some(self.max_clarify_visits),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::memory::Role;
    use crate::workflow::RunOutcome;
    use futures_util::TryStreamExt;

    fn agent(mock: &Arc<MockLlmClient>) -> DialogueAgent {
        DialogueAgent::new(mock.clone())
    }

    #[test]
    fn test_extract_thesis_case_insensitive() {
        assert_eq!(
            extract_thesis("My THESIS:  free will is compatible with determinism "),
            Some("free will is compatible with determinism".to_string())
        );
        assert_eq!(extract_thesis("no marker here"), None);
        assert_eq!(extract_thesis("thesis:   "), None);
    }

    #[test]
    fn test_routers() {
        let mut state = DialogueState::default();
        assert_eq!(route_from_clarify(&state), DialoguePhase::Clarify);
        state.thesis = "x".into();
        assert_eq!(route_from_clarify(&state), DialoguePhase::Challenge);

        state.objections = vec!["a".into(), "b".into()];
        assert_eq!(route_from_challenge(&state, 3), DialoguePhase::Challenge);
        state.objections.push("c".into());
        assert_eq!(route_from_challenge(&state, 3), DialoguePhase::Synthesize);
        state.objections.push("d".into());
        assert_eq!(route_from_challenge(&state, 3), DialoguePhase::Synthesize);

        assert_eq!(route_from_synthesize(&state), DialoguePhase::Clarify);
        state.phase = DialoguePhase::End;
        assert_eq!(route_from_clarify(&state), DialoguePhase::End);
        assert_eq!(route_from_challenge(&state, 3), DialoguePhase::End);
        assert_eq!(route_from_synthesize(&state), DialoguePhase::End);
    }

    #[tokio::test]
    async fn test_no_thesis_stops_after_one_clarify() {
        let mock = Arc::new(MockLlmClient::with_replies(["What do you mean by justice?"]));
        let mut state = DialogueState::new();
        let report = agent(&mock).chat(&mut state, "Let's talk about justice").await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Capped(DialoguePhase::Clarify));
        assert_eq!(report.visited, vec![DialoguePhase::Clarify]);
        assert_eq!(state.phase, DialoguePhase::Clarify);
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[1].content, "What do you mean by justice?");
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_thesis_runs_full_round() {
        let mock = Arc::new(MockLlmClient::with_replies([
            "Clarified.",
            "Objection 1",
            "Objection 2",
            "Objection 3",
            "Refined position",
        ]));
        let mut state = DialogueState::new();
        let report = agent(&mock)
            .chat(&mut state, "Thesis: knowledge is justified true belief")
            .await
            .unwrap();

        use DialoguePhase::*;
        assert_eq!(
            report.visited,
            vec![Clarify, Challenge, Challenge, Challenge, Synthesize]
        );
        assert_eq!(state.thesis, "knowledge is justified true belief");
        assert_eq!(state.objections, vec!["Objection 1", "Objection 2", "Objection 3"]);
        assert_eq!(state.refinements, vec!["Refined position"]);
        assert_eq!(state.messages.len(), 6);
        assert_eq!(state.phase, Clarify);

        // challenge 的指令带论题，但不写回历史
        let requests = mock.requests();
        let challenge_req = &requests[1];
        let last = challenge_req.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert!(last.content.contains("knowledge is justified true belief"));
        assert!(challenge_req[0].content.contains("Current phase: challenge"));
        assert!(requests[4].last().unwrap().content.contains("Objections raised: 3"));
    }

    #[tokio::test]
    async fn test_clarify_cap_bounds_repeated_clarify() {
        let mock = Arc::new(MockLlmClient::new());
        let mut state = DialogueState::new();
        let report = agent(&mock)
            .with_max_clarify_visits(3)
            .chat(&mut state, "Let's talk about justice")
            .await
            .unwrap();

        use DialoguePhase::*;
        assert_eq!(report.outcome, RunOutcome::Capped(Clarify));
        assert_eq!(report.visited, vec![Clarify, Clarify, Clarify]);
        assert_eq!(mock.call_count(), 3);
        assert_eq!(state.messages.len(), 4);
        assert_eq!(state.phase, Clarify);
    }

    #[tokio::test]
    async fn test_clarify_cap_allows_second_round() {
        let mock = Arc::new(MockLlmClient::new());
        let mut state = DialogueState::new();
        let report = agent(&mock)
            .with_max_clarify_visits(2)
            .chat(&mut state, "Thesis: virtue is knowledge")
            .await
            .unwrap();

        use DialoguePhase::*;
        assert_eq!(report.outcome, RunOutcome::Capped(Clarify));
        assert_eq!(
            report.visited,
            vec![
                Clarify, Challenge, Challenge, Challenge, Synthesize, Clarify, Challenge,
                Synthesize
            ]
        );
        assert_eq!(mock.call_count(), 8);
        // 第二轮只需一次反驳即达阈值
        assert_eq!(state.objections.len(), 4);
        assert_eq!(state.refinements.len(), 2);
        assert_eq!(state.phase, Clarify);
    }

    #[tokio::test]
    async fn test_existing_thesis_is_kept() {
        let mock = Arc::new(MockLlmClient::new());
        let mut state = DialogueState {
            thesis: "first".into(),
            ..Default::default()
        };
        let agent = agent(&mock).with_objection_threshold(1);
        agent.chat(&mut state, "thesis: second").await.unwrap();
        assert_eq!(state.thesis, "first");
        assert_eq!(state.objections.len(), 1);
    }

    #[tokio::test]
    async fn test_forced_end_runs_no_phase() {
        let mock = Arc::new(MockLlmClient::new());
        let mut state = DialogueState {
            phase: DialoguePhase::End,
            ..Default::default()
        };
        let report = agent(&mock).chat(&mut state, "hello").await.unwrap();
        assert_eq!(report.outcome, RunOutcome::AlreadyEnded);
        assert_eq!(mock.call_count(), 0);
        assert_eq!(state.messages.len(), 1);

        state.reopen();
        assert_eq!(state.phase, DialoguePhase::Clarify);
    }

    #[tokio::test]
    async fn test_error_keeps_partial_state() {
        let mock = Arc::new(MockLlmClient::with_replies(["Clarified.", "Objection 1"]));
        mock.push_error(crate::llm::LlmError::Completion("boom".into()));
        let mut state = DialogueState::new();
        let err = agent(&mock).chat(&mut state, "thesis: p").await.unwrap_err();

        assert!(err.llm().is_some());
        assert_eq!(state.objections, vec!["Objection 1"]);
        assert_eq!(state.messages.len(), 3);
        assert_eq!(state.phase, DialoguePhase::Challenge);
    }

    #[tokio::test]
    async fn test_stream_chat_does_not_touch_state() {
        let mock = Arc::new(MockLlmClient::with_replies(["streamed socratic reply"]));
        let state = DialogueState::new();
        let stream = agent(&mock).stream_chat(&state, "hi").await.unwrap();
        let text: Vec<String> = stream.try_collect().await.unwrap();

        assert_eq!(text.concat(), "streamed socratic reply");
        assert!(state.messages.is_empty());
        let req = &mock.requests()[0];
        assert!(req[0].content.contains("Current phase: clarify"));
        assert_eq!(req.last().unwrap(), &Message::user("hi"));
    }
}
