//! Theoria - 学术写作智能体
//!
//! 入口：`theoria [session-id]`。初始化日志与 LLM 后端，恢复会话（若给出 id），
//! 然后逐行读取标准输入交给编排器，每轮结束后保存会话。

use std::io::Write;

use anyhow::Context;
use theoria::core::RecoveryEngine;
use theoria::llm::create_llm_from_config;
use theoria::memory::{join_state, new_session_id, split_state, FileSessionStore, SessionStore};
use theoria::{load_config, observability, AgentError, Orchestrator, OrchestratorState};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).context("Failed to load config")?;
    let recovery = RecoveryEngine::new();

    let llm = match create_llm_from_config(&cfg) {
        Ok(llm) => llm,
        Err(e) => {
            let err = AgentError::from(e);
            eprintln!("{}", recovery.hint(&err));
            return Err(err).context("Failed to create LLM client");
        }
    };
    let orchestrator = Orchestrator::from_config(llm, &cfg);
    let store = FileSessionStore::new(&cfg.session.dir);

    let (session_id, mut state) = match std::env::args().nth(1) {
        Some(id) => {
            let state = match store.load(&id).await.context("Failed to load session")? {
                Some(record) => {
                    tracing::info!("Restored session {} ({} messages)", id, record.messages.len());
                    join_state::<OrchestratorState>(&record)?
                }
                None => OrchestratorState::new(),
            };
            (id, state)
        }
        None => (new_session_id(), OrchestratorState::new()),
    };
    println!("Session {session_id}. Type /quit to exit.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "/quit" | "/exit") {
            break;
        }

        match orchestrator.chat(&mut state, input).await {
            Ok(_) => {
                if let Some(reply) = state.messages.last().filter(|m| !m.is_user()) {
                    println!("\n{}\n", reply.content);
                }
            }
            Err(e) => {
                tracing::warn!("turn failed: {}", e);
                eprintln!("{}", recovery.hint(&e));
            }
        }

        let (messages, rest) = split_state(&state)?;
        store
            .save(&session_id, &messages, rest)
            .await
            .context("Failed to save session")?;
    }

    Ok(())
}
