//! 阶段图类型定义
//!
//! 每个智能体用一个枚举表示阶段（含保留的终止标记 END），状态对象通过 merge 接收阶段体返回的局部更新。

use std::fmt::{Debug, Display};
use std::hash::Hash;

/// 阶段标签：每个智能体一个枚举
pub trait PhaseTag: Copy + Eq + Hash + Debug + Display + Send + Sync + 'static {
    /// 保留的终止标记
    const END: Self;

    fn is_terminal(self) -> bool {
        self == Self::END
    }
}

/// 可被阶段图驱动的状态
///
/// `merge` 按键替换：更新中出现的字段整体覆盖旧值，不做深合并；
/// 列表字段需由阶段体自行构造「旧列表 + 新项」。
pub trait PhaseState: Send + Sync {
    type Phase: PhaseTag;
    /// 阶段体返回的局部更新（字段均为 Option，None 表示不修改）
    type Update: Send;

    fn phase(&self) -> Self::Phase;
    fn set_phase(&mut self, phase: Self::Phase);
    fn merge(&mut self, update: Self::Update);
    /// 消息条数（单次运行内只增不减）
    fn message_count(&self) -> usize;
}

/// 一次运行的结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome<P> {
    /// 路由到 END
    Completed,
    /// 下一阶段已达到本次运行的访问上限，停在该阶段
    Capped(P),
    /// 开始前状态已处于 END，未执行任何阶段
    AlreadyEnded,
}

/// 运行报告：结束方式与实际执行的阶段序列
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport<P> {
    pub outcome: RunOutcome<P>,
    pub visited: Vec<P>,
}
