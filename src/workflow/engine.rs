//! 阶段图执行器
//!
//! 从入口阶段开始严格顺序执行：阶段体 -> 按键替换合并 -> 路由，直到路由给出 END。
//! 一次 run 对应一次 chat / search / edit 调用，运行中途不持久化；出错时状态保留已完成阶段合并的结果。

use std::collections::HashMap;

use crate::core::AgentError;
use crate::workflow::graph::{check_edge, PhaseMachine};
use crate::workflow::types::{PhaseState, PhaseTag, RunOutcome, RunReport};

/// 默认单次运行最多执行的阶段数
pub const DEFAULT_MAX_STEPS: usize = 25;

/// 阶段图执行器
#[derive(Debug, Clone, Copy)]
pub struct GraphExecutor {
    max_steps: usize,
}

impl Default for GraphExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STEPS)
    }
}

impl GraphExecutor {
    pub fn new(max_steps: usize) -> Self {
        Self {
            max_steps: max_steps.max(1),
        }
    }

    /// 驱动状态直到终止；state 在调用期间由执行器独占
    pub async fn run<M>(
        &self,
        machine: &M,
        state: &mut M::State,
    ) -> Result<RunReport<M::Phase>, AgentError>
    where
        M: PhaseMachine + ?Sized,
    {
        let agent = machine.name();

        if state.phase().is_terminal() {
            tracing::debug!(agent, "state already at end, nothing to run");
            return Ok(RunReport {
                outcome: RunOutcome::AlreadyEnded,
                visited: Vec::new(),
            });
        }

        let mut current = machine.entry();
        let mut visits: HashMap<M::Phase, usize> = HashMap::new();
        let mut visited = Vec::new();

        tracing::debug!(agent, entry = %current, "graph run started");

        loop {
            if visited.len() >= self.max_steps {
                return Err(AgentError::StepLimitExceeded {
                    agent,
                    limit: self.max_steps,
                });
            }

            state.set_phase(current);
            let before = state.message_count();

            let update = machine.run_phase(current, state).await?;
            state.merge(update);

            debug_assert!(
                state.message_count() >= before,
                "{agent}: phase {current} shrank the message history"
            );

            *visits.entry(current).or_insert(0) += 1;
            visited.push(current);

            let next = machine.route(current, state);
            check_edge(machine, current, next)?;
            tracing::debug!(agent, from = %current, to = %next, "route");

            if next.is_terminal() {
                state.set_phase(next);
                tracing::debug!(agent, steps = visited.len(), "graph run completed");
                return Ok(RunReport {
                    outcome: RunOutcome::Completed,
                    visited,
                });
            }

            if let Some(cap) = machine.max_visits(next) {
                if visits.get(&next).copied().unwrap_or(0) >= cap {
                    tracing::warn!(
                        agent,
                        phase = %next,
                        cap,
                        "phase visit cap reached, ending run early"
                    );
                    state.set_phase(next);
                    return Ok(RunReport {
                        outcome: RunOutcome::Capped(next),
                        visited,
                    });
                }
            }

            current = next;
        }
    }
}
