//! 阶段图声明
//!
//! 智能体实现 PhaseMachine：入口阶段、每个阶段声明的后继（边表）、异步阶段体与纯函数路由。

use async_trait::async_trait;

use crate::core::AgentError;
use crate::workflow::types::{PhaseState, PhaseTag};

pub type UpdateOf<M> = <<M as PhaseMachine>::State as PhaseState>::Update;

/// 阶段图：由执行器按「阶段体 -> 合并 -> 路由」循环驱动
#[async_trait]
pub trait PhaseMachine: Send + Sync {
    type Phase: PhaseTag;
    type State: PhaseState<Phase = Self::Phase>;

    /// 用于日志与错误信息
    fn name(&self) -> &'static str;

    fn entry(&self) -> Self::Phase;

    /// `from` 声明的后继阶段（可含 END 与自身）
    fn edges(&self, from: Self::Phase) -> &'static [Self::Phase];

    /// 阶段体：只读当前状态，返回局部更新
    async fn run_phase(
        &self,
        phase: Self::Phase,
        state: &Self::State,
    ) -> Result<UpdateOf<Self>, AgentError>;

    /// 路由：阶段体合并后调用，返回下一阶段
    fn route(&self, from: Self::Phase, state: &Self::State) -> Self::Phase;

    /// 单次运行内某阶段最多执行的次数；None 表示不限（仍受执行器 max_steps 约束）
    fn max_visits(&self, _phase: Self::Phase) -> Option<usize> {
        None
    }
}

/// 校验路由结果是否在声明的边表内
pub fn check_edge<M: PhaseMachine + ?Sized>(
    machine: &M,
    from: M::Phase,
    to: M::Phase,
) -> Result<(), AgentError> {
    if machine.edges(from).contains(&to) {
        Ok(())
    } else {
        Err(AgentError::InvalidTransition {
            agent: machine.name(),
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
